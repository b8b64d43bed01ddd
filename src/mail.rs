//! `.eml` intake — turns a raw RFC 5322 message into an `EmailSubmission`.

use mail_parser::{MessageParser, MimeHeaders};
use tracing::debug;

use crate::error::IntakeError;
use crate::pipeline::types::{Attachment, EmailSubmission};

/// Parse a raw message. `source` names it in errors and logs.
///
/// The body is the first text part, falling back to the first HTML part
/// with tags stripped. Every attachment is kept with its decoded bytes;
/// unnamed ones get a positional name.
pub fn parse_eml(source: &str, raw: &[u8]) -> Result<EmailSubmission, IntakeError> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| IntakeError::Extraction {
            file: source.to_string(),
            reason: "not a parseable email message".to_string(),
        })?;

    let sender = extract_sender(&parsed);
    let subject = parsed.subject().unwrap_or_default().to_string();
    let body = extract_body(&parsed);

    let attachments: Vec<Attachment> = parsed
        .attachments()
        .enumerate()
        .map(|(i, part)| {
            let filename = MimeHeaders::attachment_name(part)
                .map(str::to_string)
                .unwrap_or_else(|| format!("attachment-{}", i + 1));
            Attachment::new(filename, part.contents().to_vec())
        })
        .collect();

    debug!(
        source,
        sender = %sender,
        attachments = attachments.len(),
        "Parsed email message"
    );

    Ok(EmailSubmission {
        sender,
        subject,
        body,
        attachments,
    })
}

/// Sender address, or empty when the message has no usable `From`.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default()
}

fn extract_body(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.into_owned();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    String::new()
}

/// Strip HTML tags and collapse whitespace (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
