/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Extension-pair handlers for every verb in the state machine
//! (§4.3): EHLO/LHLO, STARTTLS, AUTH, MAIL, RCPT, DATA/BDAT, RSET,
//! QUIT, HELP, XCLIENT. Each handler takes the mutable session plus
//! the verb's argument text and returns the response line to send,
//! after checking for a scenario or webhook override (§9 precedence:
//! webhook wins only when it was waited for and non-empty).

pub mod auth;
pub mod data;
pub mod greeting;
pub mod mail;
pub mod misc;

use common::webhook::{self, WebhookPayload};
use serde_json::json;
use trc::Error;

use crate::session::Session;

/// Looks up a scenario override for `verb`, invokes a configured
/// webhook when present, and resolves the two per §9's precedence
/// rule. Returns `None` when no override applies and the caller should
/// run its normal logic.
pub async fn resolve_verb_override(
    session: &Session,
    verb: &str,
) -> Result<Option<String>, Error> {
    let core = &session.core;
    let scenario = core.scenarios.response_for(session.ehlo_key(), verb);

    let webhook_response = if let Some(entry) = core.webhooks.entry(verb) {
        let session_json = json!({
            "id": session.id,
            "peerAddr": session.peer_addr.to_string(),
            "ehlo": session.ehlo_domain,
        });
        let envelope_json = session
            .current
            .as_ref()
            .map(|envelope| json!({ "sender": envelope.sender, "recipients": envelope.recipients }))
            .unwrap_or_else(|| json!({}));
        let payload = WebhookPayload {
            session: &session_json,
            envelope: &envelope_json,
            verb,
        };
        let client = reqwest::Client::new();
        trc::event!(trc::EventType::WebhookCall, "verb" = verb.to_string());
        webhook::invoke(&client, entry, &payload).await?
    } else {
        None
    };

    let wait_for_response = core
        .webhooks
        .entry(verb)
        .map(|entry| entry.wait_for_response)
        .unwrap_or(false);

    let resolved = webhook::resolve_override(scenario, webhook_response.as_deref(), wait_for_response)
        .map(str::to_string);
    if resolved.is_some() {
        trc::event!(trc::EventType::ScenarioOverride, "verb" = verb.to_string());
    }
    Ok(resolved)
}

pub use auth::{handle_auth_digest_md5, handle_auth_login, handle_auth_plain};
pub use data::{handle_bdat, handle_data};
pub use greeting::{handle_ehlo, handle_lhlo};
pub use mail::{handle_mail, handle_rcpt};
pub use misc::{handle_help, handle_quit, handle_rset, handle_starttls, handle_xclient};
