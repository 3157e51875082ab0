/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The assertion engine (§4.12 "an assertion group has `{delay, wait,
//! retry, match: [[verb_filter, regex], …]}`. Each regex must match at
//! least one recorded entry whose verb matches the filter."). SMTP
//! groups are evaluated against the in-memory transaction log; `mta`
//! groups go through an [`ExternalLookup`] under the same retry/wait
//! contract (§4.12 "external assertions ... follow the same
//! retry/wait contract").

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use trc::Error;

use crate::external::ExternalLookup;
use crate::report::Transaction;

fn default_retry() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct MtaAssertion {
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(rename = "match")]
    pub matches: Vec<(String, String)>,
}

/// `{delay, wait, retry, match: [[verb_filter, regex], ...]}` (§4.12,
/// §6 "assertions `{smtp: [[verb_filter, regex], …], mta: {...}}`").
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssertionGroup {
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub wait: Option<u64>,
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default)]
    pub smtp: Vec<(String, String)>,
    #[serde(default)]
    pub mta: Option<MtaAssertion>,
}

impl AssertionGroup {
    pub fn is_empty(&self) -> bool {
        self.smtp.is_empty() && self.mta.is_none()
    }
}

fn verb_matches(filter: &str, verb: &str) -> bool {
    if filter == "*" {
        return true;
    }
    Regex::new(&format!("(?i)^{filter}$"))
        .map(|re| re.is_match(verb))
        .unwrap_or(false)
}

/// A single `[verb_filter, regex]` pair is satisfied if any log entry
/// whose verb matches `verb_filter` has a response matching `regex`.
fn pair_satisfied(log: &[Transaction], verb_filter: &str, pattern: &str) -> Result<bool, Error> {
    let regex = Regex::new(pattern)
        .map_err(|e| Error::local_permanent(format!("invalid assertion pattern \"{pattern}\": {e}")))?;
    Ok(log
        .iter()
        .filter(|entry| verb_matches(verb_filter, &entry.verb))
        .any(|entry| regex.is_match(&entry.response)))
}

/// Evaluates `group.smtp` against `log`, sleeping `group.delay` before
/// the first attempt and `group.wait` between retries, up to
/// `group.retry` attempts total. Returns the name-qualified failure
/// error on exhaustion.
pub async fn evaluate_smtp(name: &str, group: &AssertionGroup, log: &[Transaction]) -> Result<(), Error> {
    if let Some(delay) = group.delay {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let attempts = group.retry.max(1);
    for attempt in 0..attempts {
        if attempt > 0 {
            if let Some(wait) = group.wait {
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }
        let mut all_ok = true;
        for (verb_filter, pattern) in &group.smtp {
            if !pair_satisfied(log, verb_filter, pattern)? {
                all_ok = false;
                break;
            }
        }
        if all_ok {
            trc::event!(trc::EventType::ClientAssertion, "group" = name.to_string());
            return Ok(());
        }
    }
    let last = log
        .last()
        .map(Transaction::render)
        .unwrap_or_else(|| "<no transactions recorded>".to_string());
    Err(Error::client_assertion_failure(name, last))
}

/// Evaluates `group.mta` (if present) by fetching each tag through
/// `lookup` and matching its regex, under the same retry/wait shape.
pub async fn evaluate_mta(
    name: &str,
    assertion: &MtaAssertion,
    lookup: &dyn ExternalLookup,
) -> Result<(), Error> {
    if let Some(delay) = assertion.delay {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let attempts = assertion.retry.max(1);
    let mut last_seen = String::new();
    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let mut all_ok = true;
        for (tag, pattern) in &assertion.matches {
            let regex = Regex::new(pattern)
                .map_err(|e| Error::local_permanent(format!("invalid mta pattern \"{pattern}\": {e}")))?;
            match lookup.fetch(tag).await {
                Ok(text) => {
                    last_seen = text.clone();
                    if !regex.is_match(&text) {
                        all_ok = false;
                    }
                }
                Err(_) => all_ok = false,
            }
        }
        if all_ok {
            trc::event!(trc::EventType::ClientAssertion, "group" = name.to_string());
            return Ok(());
        }
    }
    Err(Error::client_assertion_failure(name, last_seen))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::NullExternalLookup;

    fn log() -> Vec<Transaction> {
        vec![
            Transaction::new("EHLO", "EHLO a", "250-mx.example.com"),
            Transaction::new("MAIL", "MAIL FROM:<s@x>", "250 2.1.0 OK"),
            Transaction::new("RCPT", "RCPT TO:<r@y>", "250 2.1.5 OK"),
        ]
    }

    #[tokio::test]
    async fn passes_when_every_pair_matches_some_entry() {
        let group = AssertionGroup {
            delay: None,
            wait: None,
            retry: 1,
            smtp: vec![
                ("EHLO".into(), "^250".into()),
                ("RCPT".into(), "2\\.1\\.5".into()),
            ],
            mta: None,
        };
        assert!(evaluate_smtp("session", &group, &log()).await.is_ok());
    }

    #[tokio::test]
    async fn fails_and_reports_last_transaction_when_no_entry_matches() {
        let group = AssertionGroup {
            delay: None,
            wait: None,
            retry: 1,
            smtp: vec![("RCPT".into(), "^550".into())],
            mta: None,
        };
        let err = evaluate_smtp("envelope-0", &group, &log()).await.unwrap_err();
        let (name, last) = err.assertion_failure().unwrap();
        assert_eq!(name, "envelope-0");
        assert!(last.contains("RCPT TO"));
    }

    #[tokio::test]
    async fn wildcard_filter_matches_any_verb() {
        let group = AssertionGroup {
            delay: None,
            wait: None,
            retry: 1,
            smtp: vec![("*".into(), "2\\.1\\.0".into())],
            mta: None,
        };
        assert!(evaluate_smtp("session", &group, &log()).await.is_ok());
    }

    #[tokio::test]
    async fn retries_before_failing() {
        let group = AssertionGroup {
            delay: None,
            wait: Some(1),
            retry: 3,
            smtp: vec![("QUIT".into(), "221".into())],
            mta: None,
        };
        let err = evaluate_smtp("session", &group, &log()).await.unwrap_err();
        assert!(err.assertion_failure().is_some());
    }

    #[tokio::test]
    async fn mta_assertion_fails_without_a_configured_lookup() {
        let assertion = MtaAssertion {
            delay: None,
            retry: 1,
            matches: vec![("mailbox:jane".into(), "Subject: hi".into())],
        };
        let lookup = NullExternalLookup;
        assert!(evaluate_mta("envelope-0", &assertion, &lookup).await.is_err());
    }
}
