/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! EHLO/LHLO (§4.3, §6 "Wire protocol"). LHLO selects LMTP semantics
//! (per-recipient DATA responses); otherwise the same capability set
//! is advertised either way.

use trc::Error;

use crate::session::{Session, State};

fn capabilities(session: &Session, message_size_limit: u64) -> Vec<String> {
    let mut caps = vec![format!("SIZE {message_size_limit}"), "PIPELINING".into(), "8BITMIME".into(), "CHUNKING".into()];
    if !session.tls {
        caps.push("STARTTLS".into());
    }
    caps.push("AUTH PLAIN LOGIN DIGEST-MD5".into());
    caps
}

fn reply(session: &Session, greeting_verb: &str, message_size_limit: u64) -> String {
    let caps = capabilities(session, message_size_limit);
    let mut lines = vec![format!("250-{}", session.hostname)];
    for (i, cap) in caps.iter().enumerate() {
        let sep = if i + 1 == caps.len() { ' ' } else { '-' };
        lines.push(format!("250{sep}{cap}"));
    }
    let _ = greeting_verb;
    lines.join("\r\n")
}

pub async fn handle_ehlo(session: &mut Session, domain: &str) -> Result<String, Error> {
    if let Some(overridden) = super::resolve_verb_override(session, "EHLO").await? {
        return Ok(overridden);
    }
    trc::event!(trc::EventType::Ehlo, "domain" = domain.to_string());
    session.ehlo_domain = Some(domain.to_string());
    session.state = State::Ehloed;
    let response = reply(session, "EHLO", 25 * 1024 * 1024);
    session.record("EHLO", &response, false);
    Ok(response)
}

pub async fn handle_lhlo(session: &mut Session, domain: &str) -> Result<String, Error> {
    handle_ehlo(session, domain).await
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
    use std::{net::Ipv4Addr, net::IpAddr, sync::Arc};
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
    async fn ehlo_sets_domain_and_advertises_starttls_before_tls() {
        let mut session = session();
        let response = handle_ehlo(&mut session, "client.example.com").await.unwrap();
        assert_eq!(session.ehlo_domain.as_deref(), Some("client.example.com"));
        assert!(response.contains("STARTTLS"));
        assert!(response.contains("AUTH PLAIN LOGIN DIGEST-MD5"));
    }

    #[tokio::test]
    async fn ehlo_omits_starttls_once_tls_is_active() {
        let mut session = session();
        session.tls = true;
        let response = handle_ehlo(&mut session, "client.example.com").await.unwrap();
        assert!(!response.contains("STARTTLS"));
    }
}
