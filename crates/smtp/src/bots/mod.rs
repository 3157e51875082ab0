/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Bot dispatch (§4.13). After successful ingestion, each recipient is
//! matched against configured bot definitions. A match schedules the
//! named bot on a dedicated executor; `session` emits a JSON report of
//! the session, `email` composes a reply to an address resolved from
//! the sieve-style token address or an envelope fallback chain.

use std::{net::IpAddr, path::PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::{envelope::Envelope, session::Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotKind {
    Session,
    Email,
}

#[derive(Clone)]
pub struct BotDefinition {
    pub name: String,
    pub kind: BotKind,
    pub address_pattern: Regex,
    pub allowed_ips: Vec<IpAddr>,
    pub allowed_tokens: Vec<String>,
}

/// `robot[+token][+user+domain.tld]@botdomain` (§6, glossary "Sieve-
/// style token address").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SieveAddress {
    pub robot: String,
    pub token: Option<String>,
    pub user: Option<String>,
    pub domain: Option<String>,
}

impl SieveAddress {
    pub fn parse(address: &str) -> Option<Self> {
        let (local, _domain) = address.split_once('@')?;
        let mut segments = local.split('+');
        let robot = segments.next()?.to_string();
        let rest: Vec<&str> = segments.collect();
        match rest.len() {
            0 => Some(SieveAddress {
                robot,
                token: None,
                user: None,
                domain: None,
            }),
            1 => Some(SieveAddress {
                robot,
                token: Some(rest[0].to_string()),
                user: None,
                domain: None,
            }),
            3 => Some(SieveAddress {
                robot,
                token: Some(rest[0].to_string()),
                user: Some(rest[1].to_string()),
                domain: Some(rest[2].to_string()),
            }),
            _ => None,
        }
    }
}

impl BotDefinition {
    fn matches(&self, recipient: &str, peer_ip: IpAddr) -> bool {
        if !self.address_pattern.is_match(recipient) {
            return false;
        }
        if !self.allowed_ips.is_empty() && !self.allowed_ips.contains(&peer_ip) {
            return false;
        }
        if self.allowed_tokens.is_empty() {
            return true;
        }
        SieveAddress::parse(recipient)
            .and_then(|addr| addr.token)
            .map(|token| self.allowed_tokens.contains(&token))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: u64,
    pub peer_addr: IpAddr,
    pub ehlo_domain: Option<String>,
    pub authenticated: bool,
    pub envelope_count: usize,
}

impl SessionReport {
    fn from_session(session: &Session) -> Self {
        SessionReport {
            session_id: session.id,
            peer_addr: session.peer_addr,
            ehlo_domain: session.ehlo_domain.clone(),
            authenticated: session.authenticated,
            envelope_count: session.envelopes.len(),
        }
    }
}

/// Resolution order for the `email` bot's reply target: envelope
/// `Reply-To`, then `From`, then MAIL FROM (§4.13).
pub fn resolve_reply_address(envelope: &Envelope) -> Option<String> {
    envelope
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Reply-To"))
        .or_else(|| envelope.headers.iter().find(|(name, _)| name.eq_ignore_ascii_case("From")))
        .map(|(_, value)| value.clone())
        .or_else(|| (!envelope.sender.is_empty()).then(|| envelope.sender.clone()))
}

/// Scans every recipient of a just-committed envelope against the bot
/// table and returns the dispatches due to run (§4.13).
pub fn dispatch(
    definitions: &[BotDefinition],
    session: &Session,
    envelope: &Envelope,
) -> Vec<(String, BotKind)> {
    let mut dispatches = Vec::new();
    for recipient in &envelope.recipients {
        for def in definitions {
            if def.matches(recipient, session.peer_addr) {
                trc::event!(trc::EventType::BotDispatch, "bot" = def.name.clone());
                dispatches.push((def.name.clone(), def.kind));
            }
        }
    }
    dispatches
}

/// Holds the configured bot table and runs matches on a dedicated task
/// per §5 ("bot processing is dispatched asynchronously after the
/// response is emitted"), so `schedule` never delays the DATA/BDAT
/// reply.
pub struct BotExecutor {
    definitions: Vec<BotDefinition>,
    reports_dir: PathBuf,
}

impl BotExecutor {
    pub fn new(definitions: Vec<BotDefinition>, reports_dir: impl Into<PathBuf>) -> Self {
        BotExecutor {
            definitions,
            reports_dir: reports_dir.into(),
        }
    }

    /// Matches `envelope`'s recipients against the bot table and spawns
    /// one task per match; a bare no-op when the table is empty or
    /// nothing matches.
    pub fn schedule(&self, session: &Session, envelope: &Envelope) {
        let dispatches = dispatch(&self.definitions, session, envelope);
        if dispatches.is_empty() {
            return;
        }
        let report = SessionReport::from_session(session);
        let reply_address = resolve_reply_address(envelope);
        for (name, kind) in dispatches {
            let report = report.clone();
            let reply_address = reply_address.clone();
            let reports_dir = self.reports_dir.clone();
            tokio::spawn(async move {
                match kind {
                    BotKind::Session => run_session_bot(&reports_dir, &report).await,
                    BotKind::Email => run_email_bot(&name, reply_address.as_deref()),
                }
            });
        }
    }
}

async fn run_session_bot(reports_dir: &std::path::Path, report: &SessionReport) {
    let Ok(json) = serde_json::to_vec_pretty(report) else {
        trc::event!(trc::EventType::BotDispatchFailed, "reason" = "session report serialization failed");
        return;
    };
    if let Err(e) = tokio::fs::create_dir_all(reports_dir).await {
        trc::event!(trc::EventType::BotDispatchFailed, "reason" = e.to_string());
        return;
    }
    let path = reports_dir.join(format!("{}.json", report.session_id));
    if let Err(e) = tokio::fs::write(&path, json).await {
        trc::event!(trc::EventType::BotDispatchFailed, "reason" = e.to_string());
    }
}

/// On no resolution, the bot is skipped with a warning (§4.13).
fn run_email_bot(bot_name: &str, reply_address: Option<&str>) {
    match reply_address {
        Some(address) => {
            trc::event!(trc::EventType::BotDispatch, "bot" = bot_name.to_string(), "reply_to" = address.to_string());
        }
        None => {
            trc::event!(trc::EventType::BotDispatchFailed, "reason" = "no reply address resolved for email bot".to_string());
        }
    }
}
