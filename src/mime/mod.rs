//! Body and threading-header extraction from raw RFC 5322 messages.
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use tracing::{debug, warn};

use crate::errors::{EmailError, EmailResult};
use crate::types::Message;

/// Per-body ceiling for `text_body` and `html_body`.
pub const MAX_BODY_BYTES: usize = 32 * 1024;
pub const TRUNCATION_MARKER: &str = "\n\n[... message truncated]";

/// Fills `text_body`, `html_body` and `references` from the raw message.
///
/// Walks the MIME tree depth-first and keeps the first inline `text/plain`
/// and the first inline `text/html` part, wherever they are nested.
/// Attachment subtrees are never read. A part whose charset cannot be decoded
/// is kept as lossy UTF-8 rather than failing the whole message.
pub fn extract_body(raw: &[u8], message: &mut Message) -> EmailResult<()> {
    let parsed = mailparse::parse_mail(raw).map_err(|e| EmailError::Parse(e.to_string()))?;

    if let Some(references) = parsed.headers.get_first_value("References") {
        message.references = parse_message_ids(&references);
    }

    collect_bodies(&parsed, message);
    Ok(())
}

fn collect_bodies(part: &ParsedMail, message: &mut Message) {
    if !message.text_body.is_empty() && !message.html_body.is_empty() {
        return;
    }
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        debug!(mimetype = %part.ctype.mimetype, "Skipping attachment part");
        return;
    }

    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_bodies(sub, message);
        }
        return;
    }

    let mimetype = part.ctype.mimetype.to_ascii_lowercase();
    if mimetype == "text/plain" && message.text_body.is_empty() {
        message.text_body = bound_body(&decode_part(part));
    } else if mimetype == "text/html" && message.html_body.is_empty() {
        message.html_body = bound_body(&decode_part(part));
    }
}

fn decode_part(part: &ParsedMail) -> String {
    match part.get_body() {
        Ok(body) => body,
        Err(e) => {
            warn!(
                charset = %part.ctype.charset,
                error = %e,
                "Could not decode MIME part, keeping raw bytes"
            );
            let raw = part.get_body_raw().unwrap_or_default();
            String::from_utf8_lossy(&raw).into_owned()
        }
    }
}

/// Cuts `body` to `MAX_BODY_BYTES` (on a char boundary), appends the
/// truncation marker when anything was dropped, and trims whitespace.
pub fn bound_body(body: &str) -> String {
    if body.len() <= MAX_BODY_BYTES {
        return body.trim().to_string();
    }

    let mut cut = MAX_BODY_BYTES;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + TRUNCATION_MARKER.len());
    out.push_str(&body[..cut]);
    out.push_str(TRUNCATION_MARKER);
    out.trim().to_string()
}

/// Splits a `References` / `In-Reply-To` value into bare message ids.
pub fn parse_message_ids(raw: &str) -> Vec<String> {
    let mut ids = Vec::new();
    let mut rest = raw;
    while let Some(start) = rest.find('<') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('>') else {
            break;
        };
        let id = after[..end].trim();
        if !id.is_empty() {
            ids.push(id.to_string());
        }
        rest = &after[end + 1..];
    }

    if ids.is_empty() {
        ids = raw
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();
    }
    ids
}

/// Decodes RFC 2047 encoded words (`=?utf-8?B?...?=`) in a header value.
pub fn decode_header_words(raw: &[u8]) -> String {
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    match mailparse::parse_header(&line) {
        Ok((header, _)) => header.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}
