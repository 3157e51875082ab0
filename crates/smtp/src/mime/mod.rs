/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! MIME parsing and building (§4.11), wrapping `mail-parser` and
//! `mail-builder` rather than reimplementing RFC 2045/2047. The parser
//! side adds per-part content hashing and spills large bodies to disk;
//! the builder side categorizes parts into the canonical
//! `mixed -> related -> alternative` hierarchy with stable boundary
//! names and fills in required headers that are missing.

pub mod build;
pub mod parse;

pub use build::{categorize, BuiltPart, PartKind};
pub use parse::{parse_message, ParsedMessage, ParsedPart, PartBody};

#[cfg(test)]
mod tests {
    use super::build::{build_message, BuiltPart, RequiredHeaders};
    use super::parse::{parse_message, HashConfig, PartBody};
    use sha2::{Digest, Sha256};

    /// Builds a message, re-parses it, and checks the header set and
    /// per-part hash survive the round trip (§8 property 4).
    #[test]
    fn built_message_reparses_to_the_same_headers_and_part_hashes() {
        let headers = RequiredHeaders {
            date: Some("Mon, 1 Jan 2024 00:00:00 +0000".into()),
            message_id: Some("<roundtrip@x.com>".into()),
            from: Some("a@x.com".into()),
            to: Some("b@y.com".into()),
            subject: Some("round trip".into()),
        };
        let body = b"hello round trip".to_vec();
        let parts = vec![BuiltPart {
            content_type: "text/plain".into(),
            content_id: None,
            filename: None,
            data: body.clone(),
        }];
        let built = build_message(headers, parts).unwrap();

        let hashes = HashConfig {
            sha1: false,
            sha256: true,
            md5: false,
        };
        let spool = std::env::temp_dir().join("mime-roundtrip-test");
        let parsed = parse_message(&built, &hashes, 1_000_000, &spool).unwrap();

        assert_eq!(parsed.header("Subject"), Some("round trip"));
        assert_eq!(parsed.header("From"), Some("a@x.com"));
        assert_eq!(parsed.header("To"), Some("b@y.com"));
        assert_eq!(parsed.header("Message-ID"), Some("<roundtrip@x.com>"));

        assert_eq!(parsed.parts.len(), 1);
        let expected_hash = hex::encode(Sha256::digest(&body));
        assert_eq!(parsed.parts[0].hashes.sha256.as_deref(), Some(expected_hash.as_str()));
        match &parsed.parts[0].body {
            PartBody::Inline(data) => assert_eq!(data, &body),
            PartBody::OnDisk(_) => panic!("expected inline body for a small part"),
        }

        let _ = std::fs::remove_dir_all(&spool);
    }
}
