//! HTTP surface: `POST /process_email` and `GET /health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::error::IntakeError;
use crate::pipeline::IntakePipeline;
use crate::pipeline::types::{Attachment, EmailSubmission, ExtractionSpec, Taxonomy};

/// Shared handler state.
#[derive(Clone)]
pub struct IntakeState {
    pub pipeline: Arc<IntakePipeline>,
    /// Used when a request carries no `request_definitions`.
    pub default_taxonomy: Arc<Taxonomy>,
    /// Used when a request carries no `extraction_rules`.
    pub default_spec: Arc<ExtractionSpec>,
}

impl IntakeState {
    pub fn new(pipeline: Arc<IntakePipeline>) -> Self {
        Self {
            pipeline,
            default_taxonomy: Arc::new(Taxonomy::loan_servicing()),
            default_spec: Arc::new(ExtractionSpec::loan_servicing()),
        }
    }
}

/// Build the Axum router.
pub fn intake_routes(state: IntakeState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/process_email", post(process_email))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Wire types ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AttachmentPayload {
    pub filename: String,
    pub content_base64: String,
}

type DecodedRequest = (EmailSubmission, Option<Taxonomy>, Option<ExtractionSpec>);

#[derive(Debug, Deserialize)]
pub struct ProcessEmailRequest {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentPayload>,
    pub request_definitions: Option<Taxonomy>,
    pub extraction_rules: Option<ExtractionSpec>,
}

impl ProcessEmailRequest {
    fn into_submission(self) -> Result<DecodedRequest, ApiError> {
        let attachments = self
            .attachments
            .into_iter()
            .map(|a| {
                general_purpose::STANDARD
                    .decode(a.content_base64.trim())
                    .map(|bytes| Attachment::new(a.filename.as_str(), bytes))
                    .map_err(|e| {
                        ApiError::BadAttachment(format!("{}: invalid base64 ({e})", a.filename))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let submission = EmailSubmission {
            sender: self.sender,
            subject: self.subject,
            body: self.body,
            attachments,
        };
        Ok((submission, self.request_definitions, self.extraction_rules))
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug)]
enum ApiError {
    BadAttachment(String),
    Intake(IntakeError),
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        Self::Intake(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadAttachment(_) => StatusCode::BAD_REQUEST,
            Self::Intake(IntakeError::EmptyTaxonomy) => StatusCode::BAD_REQUEST,
            Self::Intake(IntakeError::Parse(_) | IntakeError::Oracle(_)) => StatusCode::BAD_GATEWAY,
            Self::Intake(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::BadAttachment(msg) => msg.clone(),
            Self::Intake(e) => e.to_string(),
        };
        warn!(status = status.as_u16(), error = %message, "Request failed");
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health(State(state): State<IntakeState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "loan-intake",
        "strategy": state.pipeline.strategy().kind(),
    }))
}

async fn process_email(
    State(state): State<IntakeState>,
    Json(request): Json<ProcessEmailRequest>,
) -> Result<Response, ApiError> {
    let (submission, taxonomy, spec) = request.into_submission()?;
    info!(
        sender = %submission.sender,
        attachments = submission.attachments.len(),
        "process_email request"
    );

    let taxonomy = taxonomy.as_ref().unwrap_or(state.default_taxonomy.as_ref());
    let spec = spec.as_ref().unwrap_or(state.default_spec.as_ref());

    let result = state.pipeline.process(&submission, taxonomy, spec).await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}
