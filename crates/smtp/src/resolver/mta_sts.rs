/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! MTA-STS policy fetch and validation (§4.7). Retrieve the
//! `_mta-sts.<domain>` TXT record, fetch the policy document over
//! HTTPS with a PKI-validated connection from
//! `https://mta-sts.<domain>/.well-known/mta-sts.txt`, and parse it.

use hickory_resolver::{proto::rr::RecordType, TokioAsyncResolver};
use trc::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtaStsMode {
    Enforce,
    Testing,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtaStsPolicy {
    pub mode: MtaStsMode,
    pub mx_patterns: Vec<String>,
    pub max_age: u64,
}

impl MtaStsPolicy {
    /// `mx:` patterns support a single leading `*.` wildcard label
    /// (RFC 8461 §4.1).
    pub fn matches(&self, hostname: &str) -> bool {
        self.mx_patterns.iter().any(|pattern| {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                hostname
                    .split_once('.')
                    .map(|(_, rest)| rest.eq_ignore_ascii_case(suffix))
                    .unwrap_or(false)
            } else {
                hostname.eq_ignore_ascii_case(pattern)
            }
        })
    }
}

/// Returns `Ok(None)` when no `_mta-sts` TXT record is published or
/// the policy document fails to parse — callers fall back to plain
/// MX resolution in that case (§4.7).
pub async fn fetch_policy(
    dns: &TokioAsyncResolver,
    domain: &str,
) -> Result<Option<MtaStsPolicy>, Error> {
    let txt_name = format!("_mta-sts.{domain}");
    let txt = match dns.lookup(txt_name, RecordType::TXT).await {
        Ok(lookup) => lookup,
        Err(_) => return Ok(None),
    };
    let published = txt
        .iter()
        .filter_map(|rdata| rdata.as_txt())
        .any(|txt| txt.to_string().contains("v=STSv1"));
    if !published {
        return Ok(None);
    }

    let url = format!("https://mta-sts.{domain}/.well-known/mta-sts.txt");
    let body = reqwest::get(&url)
        .await
        .map_err(|e| Error::relay_transient(format!("mta-sts fetch failed: {e}")))?
        .text()
        .await
        .map_err(|e| Error::relay_transient(format!("mta-sts body read failed: {e}")))?;

    Ok(parse_policy(&body))
}

fn parse_policy(body: &str) -> Option<MtaStsPolicy> {
    let mut mode = MtaStsMode::None;
    let mut mx_patterns = Vec::new();
    let mut max_age = 86_400u64;

    for line in body.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "mode" => {
                mode = match value {
                    "enforce" => MtaStsMode::Enforce,
                    "testing" => MtaStsMode::Testing,
                    _ => MtaStsMode::None,
                }
            }
            "mx" => mx_patterns.push(value.to_string()),
            "max_age" => max_age = value.parse().unwrap_or(max_age),
            _ => {}
        }
    }

    if mode == MtaStsMode::None || mx_patterns.is_empty() {
        None
    } else {
        Some(MtaStsPolicy {
            mode,
            mx_patterns,
            max_age,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_policy_document() {
        let body = "version: STSv1\nmode: enforce\nmx: mail.example.com\nmx: *.example.com\nmax_age: 604800\n";
        let policy = parse_policy(body).unwrap();
        assert_eq!(policy.mode, MtaStsMode::Enforce);
        assert_eq!(policy.max_age, 604_800);
        assert!(policy.matches("mail.example.com"));
        assert!(policy.matches("sub.example.com"));
        assert!(!policy.matches("evil.attacker.com"));
    }

    #[test]
    fn missing_mode_yields_no_policy() {
        let body = "mx: mail.example.com\n";
        assert!(parse_policy(body).is_none());
    }
}
