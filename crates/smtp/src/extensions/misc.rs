/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! STARTTLS, RSET, QUIT, HELP, XCLIENT (§4.1, §4.3). STARTTLS only
//! answers `220` here; the actual stream replacement happens in the
//! listener once this response has been written, per §4.1 ("after
//! the server emits 220 ready to start TLS, the stream is replaced").
//! All previously advertised state is reset by the caller re-running
//! EHLO negotiation after the upgrade (RFC-3207).

use trc::Error;

use crate::session::Session;

pub async fn handle_starttls(session: &mut Session, key_store_loaded: bool) -> Result<String, Error> {
    if session.tls {
        return Err(Error::protocol(503, "5.5.1", "TLS already active"));
    }
    if !key_store_loaded {
        return Err(Error::protocol(454, "4.7.0", "TLS not available"));
    }
    let response = "220 2.0.0 ready to start TLS".to_string();
    session.record("STARTTLS", &response, false);
    Ok(response)
}

pub async fn handle_rset(session: &mut Session) -> Result<String, Error> {
    if let Some(overridden) = super::resolve_verb_override(session, "RSET").await? {
        return Ok(overridden);
    }
    session.reset_envelope();
    let response = "250 2.0.0 OK".to_string();
    session.record("RSET", &response, false);
    Ok(response)
}

pub async fn handle_quit(session: &mut Session) -> Result<String, Error> {
    if let Some(overridden) = super::resolve_verb_override(session, "QUIT").await? {
        return Ok(overridden);
    }
    let response = format!("221 2.0.0 {} closing connection", session.hostname);
    session.record("QUIT", &response, false);
    Ok(response)
}

pub async fn handle_help(session: &mut Session) -> Result<String, Error> {
    let response = "214 2.0.0 see https://www.rfc-editor.org/rfc/rfc5321".to_string();
    session.record("HELP", &response, false);
    Ok(response)
}

/// Disabled by default (§4.3). When the listener is configured to
/// allow it, the peer may rewrite `NAME`, `ADDR`, `HELO` — used by
/// trusted frontends relaying the original client's identity.
pub async fn handle_xclient(
    session: &mut Session,
    enabled: bool,
    name: Option<&str>,
    addr: Option<std::net::IpAddr>,
    helo: Option<&str>,
) -> Result<String, Error> {
    if !enabled {
        return Err(Error::protocol(501, "5.5.1", "XCLIENT not permitted"));
    }
    if let Some(addr) = addr {
        session.peer_addr = addr;
    }
    if let Some(name) = name {
        session.peer_rdns = Some(name.to_string());
    }
    if let Some(helo) = helo {
        session.ehlo_domain = Some(helo.to_string());
    }
    let response = "220 2.0.0 XCLIENT OK".to_string();
    session.record("XCLIENT", &response, false);
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Direction;
    use common::{
        digest_cache::DigestCache, limits::Limits, metrics::Metrics, scenario::ScenarioTable,
        webhook::WebhookConfig, Core,
    };
    use directory::DirectoryChain;
    use std::{net::IpAddr, net::Ipv4Addr, sync::Arc};
    use store::queue::memory::MemoryQueue;

    fn session() -> Session {
        let core = Arc::new(Core {
            scenarios: ScenarioTable::new(),
            webhooks: WebhookConfig::default(),
            directory: Arc::new(DirectoryChain::new(vec![])),
            queue: Arc::new(MemoryQueue::new()),
            limits: Limits::default(),
            metrics: Arc::new(Metrics::new()),
            digest_cache: Arc::new(DigestCache::new()),
        });
        Session::new(
            1,
            core,
            Direction::Inbound,
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
            "mx.example.com",
        )
    }

    #[tokio::test]
    async fn rset_clears_envelope_state() {
        let mut session = session();
        session.begin_envelope("s@x").unwrap();
        let response = handle_rset(&mut session).await.unwrap();
        assert!(response.starts_with("250"));
        assert!(session.current.is_none());
    }

    #[tokio::test]
    async fn starttls_rejected_without_key_store() {
        let mut session = session();
        assert!(handle_starttls(&mut session, false).await.is_err());
    }

    #[tokio::test]
    async fn xclient_disabled_by_default() {
        let mut session = session();
        assert!(handle_xclient(&mut session, false, None, None, None).await.is_err());
    }

    #[tokio::test]
    async fn xclient_rewrites_peer_identity_when_enabled() {
        let mut session = session();
        let new_addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        let response = handle_xclient(&mut session, true, Some("client.example"), Some(new_addr), Some("new.helo"))
            .await
            .unwrap();
        assert!(response.starts_with("220"));
        assert_eq!(session.peer_addr, new_addr);
        assert_eq!(session.peer_rdns.as_deref(), Some("client.example"));
        assert_eq!(session.ehlo_domain.as_deref(), Some("new.helo"));
    }
}
