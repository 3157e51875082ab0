/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Dials a real listener with the outbound client crate instead of a
//! hand-rolled dialogue, the way E1-E6 are exercised per-module but
//! never end to end across the listener/client boundary (§8).

use std::sync::Arc;
use std::time::Duration;

use client::assertions::AssertionGroup;
use client::case::{Envelope, MimeSpec, TestCase};
use client::external::NullExternalLookup;
use client::report::CaseReport;
use client::route::{Protocol, Route, TlsMode};

use common::{
    digest_cache::DigestCache, limits::Limits, metrics::Metrics, scenario::ScenarioTable,
    webhook::WebhookConfig, Core, Data,
};
use directory::{static_list::StaticList, static_list::StaticUser, hash::HashKind, Directory, DirectoryChain, PrincipalKind};
use smtp::listener::{run_listener, Admission, ListenerContext};
use smtp::relay::RelayDispatch;
use smtp::resolver::Resolver;
use smtp::storage::{mailbox::MailboxConfig, mailbox::MailboxProcessor, Chain, Processor};
use store::queue::memory::MemoryQueue;
use utils::lineio::LineIoLimits;
use utils::listener::{blocked::BlockedIps, limiter::ConcurrencyLimiter, ServerInstance, ServerProtocol};

fn core() -> Core {
    let directory: Arc<dyn Directory> = Arc::new(StaticList::new(
        "static",
        vec![StaticUser {
            name: "jane".to_string(),
            secret: "secret".to_string(),
            hash: HashKind::Plain,
            emails: vec!["jane@x.com".to_string()],
            kind: PrincipalKind::Individual,
        }],
    ));
    Core {
        scenarios: ScenarioTable::new(),
        webhooks: WebhookConfig::default(),
        directory: Arc::new(DirectoryChain::new(vec![directory])),
        queue: Arc::new(MemoryQueue::new()),
        limits: Limits::default(),
        metrics: Arc::new(Metrics::new()),
        digest_cache: Arc::new(DigestCache::new()),
    }
}

fn admission() -> Admission {
    Admission {
        blocked: BlockedIps::from_entries(std::iter::empty()),
        rbl: smtp::listener::rbl::RblConfig::default(),
        dns: None,
        conn_limiter: ConcurrencyLimiter::new(16),
        rate_limiters: dashmap::DashMap::new(),
        rate_limit: 1000,
        rate_window: Duration::from_secs(1),
        tarpits: dashmap::DashMap::new(),
        tarpit_base: Duration::from_millis(1),
        tarpit_max: Duration::from_millis(1),
    }
}

fn relay_dispatch() -> Arc<RelayDispatch> {
    Arc::new(RelayDispatch::new(Default::default(), "mx.test", Resolver::new().unwrap()))
}

fn bot_executor() -> Arc<smtp::bots::BotExecutor> {
    Arc::new(smtp::bots::BotExecutor::new(
        Vec::new(),
        std::env::temp_dir().join(format!("cli-integration-test-bots-{}", std::process::id())),
    ))
}

fn proxy_router() -> Arc<smtp::proxy::ProxyRouter> {
    Arc::new(smtp::proxy::ProxyRouter::new(Vec::new()))
}

#[tokio::test]
async fn client_runs_a_full_case_against_a_real_listener_on_loopback() {
    let spool_dir = std::env::temp_dir().join(format!("cli-integration-test-{}", std::process::id()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bind_addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let instance = Arc::new(ServerInstance {
        id: "integration".to_string(),
        listener_id: bind_addr.port(),
        protocol: ServerProtocol::Smtp,
        hostname: "mx.test".to_string(),
        bind_addr,
        is_tls_implicit: false,
        limiter: ConcurrencyLimiter::new(16),
        shutdown_rx,
    });

    let mailbox = MailboxConfig {
        local_hostname: "mx.test".to_string(),
        ..MailboxConfig::default()
    };
    let processors: Vec<Box<dyn Processor>> = vec![Box::new(MailboxProcessor::new(mailbox))];

    let ctx = Arc::new(ListenerContext {
        instance: instance.clone(),
        data: Data::new(core()),
        spool_dir: spool_dir.clone(),
        chain: Arc::new(Chain::new(processors)),
        relay: relay_dispatch(),
        bots: bot_executor(),
        proxy: proxy_router(),
        tls_acceptor: None,
        xclient_enabled: false,
        io_limits: LineIoLimits::default(),
        slow_transfer_window: Duration::from_secs(30),
        slow_transfer_min_bytes: 256,
    });

    let server = tokio::spawn(run_listener(listener, instance, Arc::new(admission()), ctx));

    let case = TestCase {
        route: Route {
            host: "127.0.0.1".to_string(),
            port: bind_addr.port(),
            protocol: Protocol::Esmtp,
            tls: TlsMode::None,
            auth: None,
            local_hostname: "client.test".to_string(),
        },
        mail: "sender@client.test".to_string(),
        rcpt: vec!["jane@x.com".to_string()],
        mime: Some(MimeSpec::Raw {
            raw: "Subject: hi\r\n\r\nhello from the integration test\r\n".to_string(),
        }),
        assertions: AssertionGroup {
            delay: None,
            wait: None,
            retry: 1,
            smtp: vec![("EHLO".to_string(), "^250".to_string())],
            mta: None,
        },
        envelopes: vec![Envelope {
            rcpt: vec!["jane@x.com".to_string()],
            mime: None,
            assertions: AssertionGroup {
                delay: None,
                wait: None,
                retry: 1,
                smtp: vec![("DATA-END".to_string(), "^250".to_string())],
                mta: None,
            },
        }],
    };

    let lookup = NullExternalLookup;
    let mut report = CaseReport::new();
    client::behaviour::run(&case, &lookup, &mut report).await.unwrap();

    assert!(report.passed());
    assert!(report
        .transactions
        .iter()
        .any(|t| t.verb == "DATA-END" && t.response.starts_with("250")));
    assert!(report.transactions.iter().any(|t| t.verb == "QUIT"));

    let _ = std::fs::remove_dir_all(&spool_dir);
    server.abort();
}

#[tokio::test]
async fn client_surfaces_an_rcpt_rejection_for_an_unknown_recipient() {
    let spool_dir = std::env::temp_dir().join(format!("cli-integration-test-reject-{}", std::process::id()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bind_addr = listener.local_addr().unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let instance = Arc::new(ServerInstance {
        id: "integration-reject".to_string(),
        listener_id: bind_addr.port(),
        protocol: ServerProtocol::Smtp,
        hostname: "mx.test".to_string(),
        bind_addr,
        is_tls_implicit: false,
        limiter: ConcurrencyLimiter::new(16),
        shutdown_rx,
    });

    let processors: Vec<Box<dyn Processor>> = vec![Box::new(MailboxProcessor::new(MailboxConfig::default()))];
    let ctx = Arc::new(ListenerContext {
        instance: instance.clone(),
        data: Data::new(core()),
        spool_dir: spool_dir.clone(),
        chain: Arc::new(Chain::new(processors)),
        relay: relay_dispatch(),
        bots: bot_executor(),
        proxy: proxy_router(),
        tls_acceptor: None,
        xclient_enabled: false,
        io_limits: LineIoLimits::default(),
        slow_transfer_window: Duration::from_secs(30),
        slow_transfer_min_bytes: 256,
    });

    let server = tokio::spawn(run_listener(listener, instance, Arc::new(admission()), ctx));

    let case = TestCase {
        route: Route {
            host: "127.0.0.1".to_string(),
            port: bind_addr.port(),
            protocol: Protocol::Esmtp,
            tls: TlsMode::None,
            auth: None,
            local_hostname: "client.test".to_string(),
        },
        mail: "sender@client.test".to_string(),
        rcpt: vec!["nobody@unknown.test".to_string()],
        mime: None,
        assertions: AssertionGroup::default(),
        envelopes: vec![Envelope {
            rcpt: vec!["nobody@unknown.test".to_string()],
            mime: None,
            assertions: AssertionGroup {
                delay: None,
                wait: None,
                retry: 1,
                smtp: vec![("RCPT".to_string(), "^550".to_string())],
                mta: None,
            },
        }],
    };

    let lookup = NullExternalLookup;
    let mut report = CaseReport::new();
    client::behaviour::run(&case, &lookup, &mut report).await.unwrap();
    assert!(report.passed());

    let _ = std::fs::remove_dir_all(&spool_dir);
    server.abort();
}
