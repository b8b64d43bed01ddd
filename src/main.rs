use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use loan_intake::config::{IntakeConfig, load_json_file};
use loan_intake::mail::parse_eml;
use loan_intake::pipeline::duplicate::InMemoryRegistry;
use loan_intake::pipeline::types::{Attachment, EmailSubmission, ExtractionSpec, Taxonomy};
use loan_intake::pipeline::{IntakePipeline, StrategyKind};
use loan_intake::server::{IntakeState, intake_routes};

#[derive(Parser)]
#[command(name = "loan-intake", version, about = "Classify and extract loan-servicing requests")]
struct Cli {
    /// `oracle` or `rules` (overrides INTAKE_STRATEGY)
    #[arg(long, global = true)]
    strategy: Option<StrategyKind>,

    /// JSON object of request types (defaults to the loan-servicing set)
    #[arg(long, global = true)]
    taxonomy: Option<PathBuf>,

    /// JSON object of field name -> extraction instruction
    #[arg(long, global = true)]
    fields: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen port (overrides INTAKE_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Process an email given on the command line
    Email {
        #[arg(long, default_value = "")]
        sender: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        body: String,
        /// Attachment files, in order
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,
    },
    /// Process one or more .eml files
    Eml {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Process a document file (PDF, text, or image with OCR)
    Document {
        file: PathBuf,
        /// File holding the email text the document came with
        #[arg(long)]
        email: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = IntakeConfig::from_env()?;

    let kind = cli.strategy.unwrap_or(config.strategy);
    let strategy = config.build_strategy(kind, Arc::new(InMemoryRegistry::new()))?;
    tracing::info!(strategy = %kind, components = %strategy.describe(), "Strategy ready");

    let pipeline = Arc::new(
        IntakePipeline::new(strategy)
            .with_secondary(config.secondary.clone())
            .with_batch_concurrency(config.batch_concurrency),
    );

    let taxonomy = match &cli.taxonomy {
        Some(path) => load_json_file(path)?,
        None => Taxonomy::loan_servicing(),
    };
    let spec = match &cli.fields {
        Some(path) => load_json_file(path)?,
        None => ExtractionSpec::loan_servicing(),
    };

    match cli.command {
        Command::Serve { port } => {
            let port = port.unwrap_or(config.port);
            let mut state = IntakeState::new(pipeline);
            state.default_taxonomy = Arc::new(taxonomy);
            state.default_spec = Arc::new(spec);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
                .await
                .with_context(|| format!("Failed to bind port {port}"))?;
            tracing::info!(port, "Intake server started");
            axum::serve(listener, intake_routes(state)).await?;
        }
        Command::Email {
            sender,
            subject,
            body,
            attachments,
        } => {
            let attachments = attachments
                .iter()
                .map(|path| read_attachment(path))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let submission = EmailSubmission {
                sender,
                subject,
                body,
                attachments,
            };
            let result = pipeline.process(&submission, &taxonomy, &spec).await?;
            print_json(&result)?;
        }
        Command::Eml { files } => {
            let mut submissions = Vec::with_capacity(files.len());
            for path in &files {
                let raw = std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                submissions.push(parse_eml(&path.display().to_string(), &raw)?);
            }

            if let [submission] = submissions.as_slice() {
                let result = pipeline.process(submission, &taxonomy, &spec).await?;
                print_json(&result)?;
            } else {
                let results = pipeline.process_batch(&submissions, &taxonomy, &spec).await;
                print_json(&results)?;
            }
        }
        Command::Document { file, email } => {
            let email_text = email
                .as_deref()
                .map(|path| {
                    std::fs::read_to_string(path)
                        .with_context(|| format!("Failed to read {}", path.display()))
                })
                .transpose()?;
            let result = pipeline
                .process_document(&file, email_text.as_deref(), &taxonomy, &spec)
                .await?;
            print_json(&result)?;
        }
    }

    Ok(())
}

fn read_attachment(path: &Path) -> anyhow::Result<Attachment> {
    let content =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::new(filename, content))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
