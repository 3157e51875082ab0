/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Parses a raw message into headers plus a flat part list, computing
//! optional hashes per part and keeping large bodies on disk rather
//! than in memory (§4.11).

use std::path::{Path, PathBuf};

use mail_parser::{MessageParser, MimeHeaders};
use sha1::{Digest as Sha1Digest, Sha1};
use sha2::{Digest as Sha2Digest, Sha256};
use trc::Error;

#[derive(Debug, Clone)]
pub enum PartBody {
    Inline(Vec<u8>),
    OnDisk(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct PartHashes {
    pub sha1: Option<String>,
    pub sha256: Option<String>,
    pub md5: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParsedPart {
    pub content_type: String,
    pub content_id: Option<String>,
    pub transfer_encoding: String,
    pub hashes: PartHashes,
    pub body: PartBody,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub headers: Vec<(String, String)>,
    pub parts: Vec<ParsedPart>,
}

impl ParsedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct HashConfig {
    pub sha1: bool,
    pub sha256: bool,
    pub md5: bool,
}

/// Parses `data`; any part whose decoded body exceeds `disk_threshold`
/// bytes is written under `spool_dir` instead of kept in memory
/// (§4.11 "keep body on disk when it exceeds a threshold").
pub fn parse_message(
    data: &[u8],
    hashes: &HashConfig,
    disk_threshold: usize,
    spool_dir: &Path,
) -> Result<ParsedMessage, Error> {
    let message = MessageParser::default()
        .parse(data)
        .ok_or_else(|| Error::protocol(550, "5.6.0", "malformed MIME message"))?;

    let headers = message
        .headers()
        .iter()
        .map(|header| {
            (
                header.name().to_string(),
                header.value().as_text().unwrap_or_default().to_string(),
            )
        })
        .collect();

    let mut parts = Vec::with_capacity(message.parts.len());
    for (index, part) in message.parts.iter().enumerate() {
        let contents = part.contents();
        let hash_values = PartHashes {
            sha1: hashes.sha1.then(|| hex::encode(Sha1::digest(contents))),
            sha256: hashes.sha256.then(|| hex::encode(Sha256::digest(contents))),
            md5: hashes.md5.then(|| format!("{:x}", md5::compute(contents))),
        };

        let body = if contents.len() > disk_threshold {
            let path = spool_dir.join(format!("part-{index}.bin"));
            std::fs::create_dir_all(spool_dir)?;
            std::fs::write(&path, contents)?;
            PartBody::OnDisk(path)
        } else {
            PartBody::Inline(contents.to_vec())
        };

        parts.push(ParsedPart {
            content_type: part
                .content_type()
                .map(|ct| ct.ctype().to_string())
                .unwrap_or_else(|| "text/plain".to_string()),
            content_id: part.content_id().map(str::to_string),
            transfer_encoding: part
                .content_transfer_encoding()
                .map(str::to_string)
                .unwrap_or_default(),
            hashes: hash_values,
            body,
        });
    }

    Ok(ParsedMessage { headers, parts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_plaintext_message() {
        let raw = b"From: a@x.com\r\nTo: b@y.com\r\nSubject: hi\r\nDate: Mon, 1 Jan 2024 00:00:00 +0000\r\nMessage-ID: <1@x.com>\r\nContent-Type: text/plain\r\n\r\nhello world";
        let hashes = HashConfig {
            sha1: true,
            sha256: true,
            md5: false,
        };
        let spool = std::env::temp_dir().join("mime-parse-test");
        let parsed = parse_message(raw, &hashes, 1_000_000, &spool).unwrap();
        assert_eq!(parsed.header("Subject"), Some("hi"));
        assert_eq!(parsed.parts.len(), 1);
        assert!(parsed.parts[0].hashes.sha1.is_some());
        assert!(matches!(parsed.parts[0].body, PartBody::Inline(_)));
    }
}
