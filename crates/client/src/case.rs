/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The test-case file format (§6 "Test case file (client)"): a route,
//! a MAIL sender, one or more RCPT/MIME/assertion envelopes, and an
//! optional session-level assertion group covering commands issued
//! before the first envelope (EHLO, STARTTLS, AUTH).

use serde::Deserialize;
use trc::Error;

use crate::assertions::AssertionGroup;
use crate::route::Route;

/// A case's "mime" field: either a raw pre-built body or a description
/// the behaviour engine hands to `smtp::mime::build` (§4.11, §4.12).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MimeSpec {
    Raw { raw: String },
    Built {
        #[serde(default)]
        subject: Option<String>,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        text: Option<String>,
        #[serde(default)]
        html: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    pub rcpt: Vec<String>,
    #[serde(default)]
    pub mime: Option<MimeSpec>,
    #[serde(default)]
    pub assertions: AssertionGroup,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestCase {
    pub route: Route,
    pub mail: String,
    #[serde(default)]
    pub rcpt: Vec<String>,
    #[serde(default)]
    pub mime: Option<MimeSpec>,
    /// Session-level assertions, evaluated against commands up to and
    /// including the greeting/STARTTLS/AUTH exchange, before any
    /// envelope's MAIL is issued.
    #[serde(default)]
    pub assertions: AssertionGroup,
    /// Additional envelopes beyond the single inline `rcpt`/`mime`
    /// pair (§6 "per-envelope `assertions` follow the same shape").
    #[serde(default)]
    pub envelopes: Vec<Envelope>,
}

/// Renders an envelope's `mime` field (or a bare default body) into
/// RFC 5322 bytes ready for DATA, falling back to the case's MAIL
/// sender as From when the description doesn't name one.
pub fn render_body(mail: &str, mime: Option<&MimeSpec>) -> Result<Vec<u8>, Error> {
    use mail_builder::MessageBuilder;

    match mime {
        Some(MimeSpec::Raw { raw }) => Ok(raw.clone().into_bytes()),
        Some(MimeSpec::Built { subject, from, to, text, html }) => {
            let mut builder = MessageBuilder::new();
            builder = builder.from(from.clone().unwrap_or_else(|| mail.to_string()));
            builder = builder.to(to.clone().unwrap_or_else(|| "undisclosed@localhost".to_string()));
            builder = builder.subject(subject.clone().unwrap_or_else(|| "(no subject)".to_string()));
            builder = builder.date(chrono::Utc::now().to_rfc2822().as_str());
            let body = match (text, html) {
                (Some(text), Some(html)) => builder.text_body(text.clone()).html_body(html.clone()),
                (Some(text), None) => builder.text_body(text.clone()),
                (None, Some(html)) => builder.html_body(html.clone()),
                (None, None) => builder.text_body(""),
            };
            body.write_to_vec()
                .map_err(|e| Error::local_permanent(format!("mime build failed: {e}")))
        }
        None => Ok(b"(empty body)\r\n".to_vec()),
    }
}

impl TestCase {
    pub fn from_json(data: &str) -> Result<Self, Error> {
        serde_json::from_str(data).map_err(|e| Error::local_permanent(format!("invalid test case: {e}")))
    }

    /// The inline top-level `rcpt`/`mime`/`assertions` fields, plus any
    /// entries in `envelopes`, as one ordered list of envelopes to run.
    pub fn all_envelopes(&self) -> Vec<Envelope> {
        let mut envelopes = Vec::new();
        if !self.rcpt.is_empty() {
            envelopes.push(Envelope {
                rcpt: self.rcpt.clone(),
                mime: self.mime.clone(),
                assertions: self.assertions.clone(),
            });
        }
        envelopes.extend(self.envelopes.iter().cloned());
        envelopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_single_envelope_case() {
        let json = r#"{
            "route": {"host": "mx.example.com", "port": 25},
            "mail": "s@x.com",
            "rcpt": ["r@y.com"],
            "mime": {"subject": "hi", "text": "hello"},
            "assertions": {"smtp": [["RCPT", "^250"]]}
        }"#;
        let case = TestCase::from_json(json).unwrap();
        assert_eq!(case.route.host, "mx.example.com");
        let envelopes = case.all_envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].rcpt, vec!["r@y.com".to_string()]);
    }

    #[test]
    fn combines_inline_and_extra_envelopes() {
        let json = r#"{
            "route": {"host": "mx.example.com"},
            "mail": "s@x.com",
            "rcpt": ["first@y.com"],
            "envelopes": [{"rcpt": ["second@y.com"]}]
        }"#;
        let case = TestCase::from_json(json).unwrap();
        assert_eq!(case.all_envelopes().len(), 2);
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(TestCase::from_json("{not json").is_err());
    }
}
