/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Per-verb HTTP callback (§4.3 "Webhooks"). Building the HTTP request
//! itself is the external collaborator named in §1 ("HTTP request
//! builder"); this module owns only the contract the core consumes:
//! which verbs are enabled, whether the engine should block for a
//! response, and how that response folds back into the protocol
//! decision.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trc::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEntry {
    pub url: String,
    #[serde(default)]
    pub wait_for_response: bool,
    #[serde(default)]
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub verbs: AHashMap<String, WebhookEntry>,
}

impl WebhookConfig {
    pub fn entry(&self, verb: &str) -> Option<&WebhookEntry> {
        self.verbs.get(&verb.to_ascii_uppercase())
    }
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub session: &'a Value,
    pub envelope: &'a Value,
    pub verb: &'a str,
}

#[derive(Debug, Deserialize, Default)]
pub struct WebhookResponse {
    #[serde(rename = "smtpResponse")]
    pub smtp_response: Option<String>,
}

/// Posts the verb's JSON payload and, when `wait_for_response` is set,
/// decodes the reply for a `smtpResponse` override. Errors honor
/// `ignore_errors` rather than aborting the command outright.
pub async fn invoke(
    client: &reqwest::Client,
    entry: &WebhookEntry,
    payload: &WebhookPayload<'_>,
) -> Result<Option<String>, Error> {
    let response = match client.post(&entry.url).json(payload).send().await {
        Ok(response) => response,
        Err(err) => {
            trc::event!(trc::EventType::WebhookError, "error" = err.to_string());
            return if entry.ignore_errors {
                Ok(None)
            } else {
                Err(Error::local_transient(format!("webhook call failed: {err}")))
            };
        }
    };

    if !entry.wait_for_response {
        return Ok(None);
    }

    match response.json::<WebhookResponse>().await {
        Ok(body) => Ok(body.smtp_response.filter(|s| !s.is_empty())),
        Err(err) if entry.ignore_errors => {
            trc::event!(trc::EventType::WebhookError, "error" = err.to_string());
            Ok(None)
        }
        Err(err) => Err(Error::local_transient(format!(
            "webhook response decode failed: {err}"
        ))),
    }
}

/// Resolves the §9 precedence rule between a scenario override and a
/// webhook override for the same verb: the webhook wins only when the
/// engine waited for its response and it returned a non-empty
/// `smtpResponse`; otherwise the scenario override (if any) applies.
pub fn resolve_override<'a>(
    scenario: Option<&'a str>,
    webhook_response: Option<&'a str>,
    wait_for_response: bool,
) -> Option<&'a str> {
    if wait_for_response {
        if let Some(webhook) = webhook_response.filter(|r| !r.is_empty()) {
            return Some(webhook);
        }
    }
    scenario
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_wins_when_waited_for_and_non_empty() {
        assert_eq!(
            resolve_override(Some("501 scenario"), Some("502 webhook"), true),
            Some("502 webhook")
        );
    }

    #[test]
    fn scenario_wins_when_webhook_empty() {
        assert_eq!(
            resolve_override(Some("501 scenario"), Some(""), true),
            Some("501 scenario")
        );
    }

    #[test]
    fn scenario_wins_when_not_waiting_for_webhook() {
        assert_eq!(
            resolve_override(Some("501 scenario"), Some("502 webhook"), false),
            Some("501 scenario")
        );
    }

    #[test]
    fn webhook_applies_when_no_scenario_override_exists() {
        assert_eq!(resolve_override(None, Some("502 webhook"), true), Some("502 webhook"));
    }
}
