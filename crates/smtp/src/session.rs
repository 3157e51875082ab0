/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Per-connection state shared by every extension processor on one
//! connection (§3 "Session", §4.2).

use std::{net::IpAddr, sync::Arc, time::Instant};

use ahash::AHashMap;
use common::Core;
use trc::Error;

use crate::envelope::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// States per §4.3: `Greeted -> Ehloed -> {TlsUpgraded?} ->
/// {Authed?} -> HasSender -> HasRecipients -> InData -> Committed ->
/// Ehloed`. `TlsUpgraded`/`Authed` are orthogonal flags tracked on the
/// session rather than folded into this enum, since either may or may
/// not occur independently of the envelope's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Greeted,
    Ehloed,
    HasSender,
    HasRecipients,
    InData,
    Committed,
}

#[derive(Debug, Clone)]
pub struct Transaction {
    pub verb: String,
    pub response: String,
    pub failed: bool,
}

pub struct Session {
    pub id: u64,
    pub core: Arc<Core>,
    pub direction: Direction,
    pub peer_addr: IpAddr,
    pub peer_rdns: Option<String>,
    pub local_addr: IpAddr,
    /// Server-declared hostname, used in the greeting and EHLO reply.
    pub hostname: String,
    pub ehlo_domain: Option<String>,
    pub state: State,
    pub tls: bool,
    pub authenticated: bool,
    pub username: Option<String>,
    pub advertised_extensions: Vec<&'static str>,
    pub negotiated_extensions: Vec<&'static str>,
    pub envelopes: Vec<Envelope>,
    pub current: Option<Envelope>,
    pub transaction_log: Vec<Transaction>,
    pub vars: AHashMap<String, String>,
    pub bot_bindings: Vec<String>,
    pub error_count: u32,
    pub auth_error_count: u32,
    pub transactions_attempted: usize,
    pub next_envelope_id: u64,
    pub started_at: Instant,
}

impl Session {
    pub fn new(
        id: u64,
        core: Arc<Core>,
        direction: Direction,
        peer_addr: IpAddr,
        local_addr: IpAddr,
        hostname: impl Into<String>,
    ) -> Self {
        Session {
            id,
            core,
            direction,
            peer_addr,
            peer_rdns: None,
            local_addr,
            hostname: hostname.into(),
            ehlo_domain: None,
            state: State::Greeted,
            tls: false,
            authenticated: false,
            username: None,
            advertised_extensions: Vec::new(),
            negotiated_extensions: Vec::new(),
            envelopes: Vec::new(),
            current: None,
            transaction_log: Vec::new(),
            vars: AHashMap::new(),
            bot_bindings: Vec::new(),
            error_count: 0,
            auth_error_count: 0,
            transactions_attempted: 0,
            next_envelope_id: 1,
            started_at: Instant::now(),
        }
    }

    /// The EHLO-keyed lookup key for scenario/webhook overrides; `*`
    /// before the client has issued EHLO.
    pub fn ehlo_key(&self) -> &str {
        self.ehlo_domain.as_deref().unwrap_or(common::scenario::WILDCARD)
    }

    /// Appends one transaction entry (§3, §8 property 1), mirroring it
    /// into the current envelope's scoped log when one is open.
    pub fn record(&mut self, verb: &str, response: &str, failed: bool) {
        self.transaction_log.push(Transaction {
            verb: verb.to_string(),
            response: response.to_string(),
            failed,
        });
        if let Some(envelope) = self.current.as_mut() {
            envelope.record(verb, response, failed);
        }
    }

    /// Registers a protocol/auth error toward `errorLimit` (§4.2) and
    /// reports whether the session must now be torn down.
    pub fn register_error(&mut self, err: &Error) -> bool {
        if err.counts_toward_error_limit() {
            self.error_count += 1;
        }
        if matches!(err.kind, trc::ErrorKind::AuthenticationFailure) {
            self.auth_error_count += 1;
        }
        self.error_count >= self.core.limits.error_limit
    }

    /// MAIL starts a new transaction, bounded by `transactionsLimit`
    /// (§9 open question: kept distinct from `envelopeLimit`).
    pub fn begin_envelope(&mut self, sender: impl Into<String>) -> Result<(), Error> {
        if self.state == State::InData {
            return Err(Error::protocol(503, "5.5.1", "DATA already in progress"));
        }
        if self.transactions_attempted >= self.core.limits.transactions_limit {
            return Err(Error::policy(452, "4.5.3", true, "too many transactions"));
        }
        self.transactions_attempted += 1;
        let id = self.next_envelope_id;
        self.next_envelope_id += 1;
        self.current = Some(Envelope {
            id,
            session_id: self.id,
            sender: sender.into(),
            ..Envelope::default()
        });
        self.state = State::HasSender;
        Ok(())
    }

    pub fn add_recipient(&mut self, rcpt: impl Into<String>) -> Result<(), Error> {
        let limit = self.core.limits.recipients_limit;
        let envelope = self
            .current
            .as_mut()
            .ok_or_else(|| Error::protocol(503, "5.5.1", "MAIL required before RCPT"))?;
        if envelope.recipients.len() >= limit {
            return Err(Error::policy(452, "4.5.3", true, "too many recipients"));
        }
        envelope.recipients.push(rcpt.into());
        self.state = State::HasRecipients;
        Ok(())
    }

    /// Commits the current envelope, bounded by `envelopeLimit` (§3
    /// invariant, distinct from `transactionsLimit`).
    pub fn commit_envelope(&mut self) -> Result<(), Error> {
        if self.envelopes.len() >= self.core.limits.envelope_limit {
            return Err(Error::policy(452, "4.5.3", true, "envelope limit reached"));
        }
        if let Some(envelope) = self.current.take() {
            self.envelopes.push(envelope);
        }
        self.state = State::Committed;
        Ok(())
    }

    /// RSET clears the current envelope but preserves session-level
    /// state (authentication, TLS) per §4.2.
    pub fn reset_envelope(&mut self) {
        self.current = None;
        self.state = State::Ehloed;
    }

    pub fn after_commit(&mut self) {
        self.state = State::Ehloed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        digest_cache::DigestCache, limits::Limits, metrics::Metrics, scenario::ScenarioTable,
        webhook::WebhookConfig, Core,
    };
    use directory::DirectoryChain;
    use std::{net::Ipv4Addr, sync::Arc};
    use store::queue::memory::MemoryQueue;

    fn core() -> Arc<Core> {
        Arc::new(Core {
            scenarios: ScenarioTable::new(),
            webhooks: WebhookConfig::default(),
            directory: Arc::new(DirectoryChain::new(vec![])),
            queue: Arc::new(MemoryQueue::new()),
            limits: Limits::default(),
            metrics: Arc::new(Metrics::new()),
            digest_cache: Arc::new(DigestCache::new()),
        })
    }

    fn session() -> Session {
        Session::new(
            1,
            core(),
            Direction::Inbound,
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            "mx.example.com",
        )
    }

    #[test]
    fn mail_rcpt_data_commits_one_envelope() {
        let mut session = session();
        session.begin_envelope("s@x").unwrap();
        session.add_recipient("r@y").unwrap();
        session.commit_envelope().unwrap();
        assert_eq!(session.envelopes.len(), 1);
        assert_eq!(session.envelopes[0].recipients, vec!["r@y".to_string()]);
    }

    #[test]
    fn rset_discards_current_envelope_but_keeps_auth() {
        let mut session = session();
        session.authenticated = true;
        session.begin_envelope("s@x").unwrap();
        session.reset_envelope();
        assert!(session.current.is_none());
        assert!(session.authenticated);
    }

    #[test]
    fn rcpt_without_mail_is_rejected() {
        let mut session = session();
        assert!(session.add_recipient("r@y").is_err());
    }

    #[test]
    fn transaction_log_mirrors_into_open_envelope() {
        let mut session = session();
        session.begin_envelope("s@x").unwrap();
        session.record("MAIL", "250 OK", false);
        assert_eq!(session.transaction_log.len(), 1);
        assert_eq!(session.current.as_ref().unwrap().transaction_log.len(), 1);
    }
}
