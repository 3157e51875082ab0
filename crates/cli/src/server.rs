/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The `server <config-dir>` bootstrap (§6): turns a flattened
//! [`Config`] snapshot into a [`Core`], one listener per configured
//! entry, and the queue retry cron, then runs until every listener
//! task exits (normally only on shutdown).

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dashmap::DashMap;
use hickory_resolver::{config::ResolverConfig, TokioAsyncResolver};
use regex::Regex;
use tokio::{net::TcpListener, sync::watch};
use trc::Error;

use common::{
    digest_cache::DigestCache,
    limits::Limits,
    metrics::Metrics,
    reload::TimerWheel,
    scenario::{ScenarioEntry, ScenarioTable, WILDCARD},
    webhook::{WebhookConfig, WebhookEntry},
    Core, Data,
};
use directory::{
    dovecot::DovecotAuth,
    hash::HashKind,
    static_list::{StaticList, StaticUser},
    Directory, DirectoryChain, PrincipalKind,
};
use smtp::{
    bots::{BotDefinition, BotExecutor, BotKind},
    listener::{rbl::RblConfig, run_listener, Admission, ListenerContext},
    proxy::{Direction as ProxyDirection, ProxyProtocol, ProxyRouter, ProxyRule},
    relay::{
        cron::{self, CronConfig},
        RelayDispatch,
    },
    resolver::Resolver,
    storage::{
        av::{AvProcessor, ClamdClient},
        local_file::LocalFileProcessor,
        mailbox::{FailureBehaviour, MailboxConfig, MailboxProcessor},
        spam::{SpamProcessor, SpamdClient},
        Chain, ChaosDecorator, Processor,
    },
};
use store::{
    queue::{file::FileQueue, memory::MemoryQueue},
    Queue,
};
use utils::{
    config::Config,
    lineio::LineIoLimits,
    listener::{blocked::BlockedIps, blocked::Cidr, limiter::ConcurrencyLimiter, ServerInstance, ServerProtocol},
};

use crate::config::{indices, load_dir, values};

fn parse_protocol(value: Option<&str>) -> Result<ServerProtocol, Error> {
    match value.unwrap_or("smtp") {
        "smtp" => Ok(ServerProtocol::Smtp),
        "lmtp" => Ok(ServerProtocol::Lmtp),
        "implicit-tls" => Ok(ServerProtocol::ImplicitTls),
        "submission" => Ok(ServerProtocol::Submission),
        other => Err(Error::local_permanent(format!("unknown listener protocol \"{other}\""))),
    }
}

fn build_static_users(cfg: &Config) -> Vec<StaticUser> {
    indices(cfg, "directory.static")
        .into_iter()
        .filter_map(|id| {
            let prefix = format!("directory.static.{id}");
            let name = cfg.value(&format!("{prefix}.name"))?.to_string();
            let secret = cfg.value(&format!("{prefix}.secret"))?.to_string();
            let hash = match cfg.value(&format!("{prefix}.hash")).unwrap_or("plain") {
                "sha256" => HashKind::Sha256,
                "sha512-crypt" => HashKind::Sha512Crypt,
                _ => HashKind::Plain,
            };
            let kind = match cfg.value(&format!("{prefix}.kind")).unwrap_or("individual") {
                "list" => PrincipalKind::List,
                "alias" => PrincipalKind::Alias,
                _ => PrincipalKind::Individual,
            };
            let emails = values(cfg, &format!("{prefix}.emails"));
            Some(StaticUser { name, secret, hash, emails, kind })
        })
        .collect()
}

fn build_directory(cfg: &Config) -> Arc<DirectoryChain> {
    let mut backends: Vec<Arc<dyn Directory>> = Vec::new();
    if let Some(socket) = cfg.value("directory.dovecot.socket") {
        backends.push(Arc::new(DovecotAuth::new(socket)));
    }
    let static_users = build_static_users(cfg);
    if !static_users.is_empty() {
        backends.push(Arc::new(StaticList::new("static", static_users)));
    }
    Arc::new(DirectoryChain::new(backends))
}

async fn build_queue(cfg: &Config) -> Result<Arc<dyn Queue>, Error> {
    match cfg.value("queue.backend").unwrap_or("memory") {
        "file" => {
            let path = cfg.value("queue.file.path").unwrap_or("/var/spool/robin/queue");
            Ok(Arc::new(FileQueue::open(path).await?))
        }
        _ => Ok(Arc::new(MemoryQueue::new())),
    }
}

fn build_limits(cfg: &Config) -> Limits {
    let defaults = Limits::default();
    Limits {
        message_size_limit: cfg.property_or("limits.message-size-limit", defaults.message_size_limit),
        recipients_limit: cfg.property_or("limits.recipients-limit", defaults.recipients_limit),
        envelope_limit: cfg.property_or("limits.envelope-limit", defaults.envelope_limit),
        transactions_limit: cfg.property_or("limits.transactions-limit", defaults.transactions_limit),
        error_limit: cfg.property_or("limits.error-limit", defaults.error_limit),
        command_flood_limit: cfg.property_or("limits.command-flood-limit", defaults.command_flood_limit),
        minimum_pool_size: cfg.property_or("limits.minimum-pool-size", defaults.minimum_pool_size),
        maximum_pool_size: cfg.property_or("limits.maximum-pool-size", defaults.maximum_pool_size),
    }
}

fn build_scenarios(cfg: &Config) -> Result<ScenarioTable, Error> {
    let mut table = ScenarioTable::new();
    for id in indices(cfg, "scenario") {
        let prefix = format!("scenario.{id}");
        let ehlo = cfg.value(&format!("{prefix}.ehlo")).unwrap_or(WILDCARD).to_string();
        let mut entry = ScenarioEntry::default();

        let response_prefix = format!("{prefix}.response.");
        for (key, value) in cfg.keys.range(response_prefix.clone()..) {
            let Some(verb) = key.strip_prefix(&response_prefix) else { break };
            if verb.contains('.') {
                continue;
            }
            entry = entry.with_response(verb, value.clone());
        }

        for pattern_id in indices(cfg, &format!("{prefix}.rcpt-pattern")) {
            let pattern_prefix = format!("{prefix}.rcpt-pattern.{pattern_id}");
            let Some(regex) = cfg.value(&format!("{pattern_prefix}.regex")) else { continue };
            let Some(response) = cfg.value(&format!("{pattern_prefix}.response")) else { continue };
            let regex = Regex::new(regex)
                .map_err(|e| Error::local_permanent(format!("invalid rcpt-pattern regex in {prefix}: {e}")))?;
            entry = entry.with_rcpt_pattern(regex, response);
        }

        table.insert(ehlo, entry);
    }
    Ok(table)
}

/// Builds the §4.13 bot table from indexed `bot.<id>.*` config keys.
fn build_bots(cfg: &Config) -> Result<Vec<BotDefinition>, Error> {
    indices(cfg, "bot")
        .into_iter()
        .filter_map(|id| {
            let prefix = format!("bot.{id}");
            let name = cfg.value(&format!("{prefix}.name"))?.to_string();
            let kind = match cfg.value(&format!("{prefix}.kind")).unwrap_or("session") {
                "email" => BotKind::Email,
                _ => BotKind::Session,
            };
            let pattern = cfg.value(&format!("{prefix}.address-pattern")).unwrap_or(".*");
            let address_pattern = match Regex::new(pattern) {
                Ok(re) => re,
                Err(e) => return Some(Err(Error::local_permanent(format!("invalid address-pattern in {prefix}: {e}")))),
            };
            let allowed_ips = values(cfg, &format!("{prefix}.allowed-ips"))
                .into_iter()
                .filter_map(|ip| ip.parse().ok())
                .collect();
            let allowed_tokens = values(cfg, &format!("{prefix}.allowed-tokens"));
            Some(Ok(BotDefinition { name, kind, address_pattern, allowed_ips, allowed_tokens }))
        })
        .collect()
}

/// Builds the ordered §4.10 proxy rule table from indexed
/// `proxy.<id>.*` config keys; rules are tried in index order.
fn build_proxy_rules(cfg: &Config) -> Result<Vec<ProxyRule>, Error> {
    indices(cfg, "proxy")
        .into_iter()
        .map(|id| {
            let prefix = format!("proxy.{id}");
            let name = cfg.value(&format!("{prefix}.name")).unwrap_or(id.as_str()).to_string();
            let direction = match cfg.value(&format!("{prefix}.direction")).unwrap_or("both") {
                "inbound" => ProxyDirection::Inbound,
                "outbound" => ProxyDirection::Outbound,
                _ => ProxyDirection::Both,
            };
            let ip_pattern = cfg.value(&format!("{prefix}.ip-pattern")).and_then(Cidr::parse);
            let regex_at = |key: &str| -> Result<Option<Regex>, Error> {
                match cfg.value(&format!("{prefix}.{key}")) {
                    Some(pattern) => Regex::new(pattern)
                        .map(Some)
                        .map_err(|e| Error::local_permanent(format!("invalid {key} in {prefix}: {e}"))),
                    None => Ok(None),
                }
            };
            let hosts = values(cfg, &format!("{prefix}.hosts"));
            let protocol = match cfg.value(&format!("{prefix}.protocol")).unwrap_or("smtp") {
                "lmtp" => ProxyProtocol::Lmtp,
                _ => ProxyProtocol::Smtp,
            };
            Ok(ProxyRule {
                name,
                direction,
                ip_pattern,
                ehlo_pattern: regex_at("ehlo-pattern")?,
                mail_pattern: regex_at("mail-pattern")?,
                rcpt_pattern: regex_at("rcpt-pattern")?,
                hosts,
                port: cfg.property_or(&format!("{prefix}.port"), 25u16),
                protocol,
                tls: cfg.property_or(&format!("{prefix}.tls"), false),
            })
        })
        .collect()
}

fn build_webhooks(cfg: &Config) -> WebhookConfig {
    let mut webhooks = WebhookConfig::default();
    for verb in indices(cfg, "webhook") {
        let prefix = format!("webhook.{verb}");
        let Some(url) = cfg.value(&format!("{prefix}.url")) else { continue };
        webhooks.verbs.insert(
            verb.to_ascii_uppercase(),
            WebhookEntry {
                url: url.to_string(),
                wait_for_response: cfg.property_or(&format!("{prefix}.wait-for-response"), false),
                ignore_errors: cfg.property_or(&format!("{prefix}.ignore-errors"), false),
            },
        );
    }
    webhooks
}

/// Spam scan, AV scan, local-file store, mailbox delivery, in the
/// fixed §4.5 order. `LocalFileProcessor` takes its session id from
/// each envelope it processes rather than at construction, so the
/// same instance is shared across every connection on a listener like
/// the other stages.
fn build_chain(cfg: &Config, spool_dir: &Path) -> Chain {
    let chaos_headers = cfg.property_or("storage.chaos-headers", false);
    let mut processors: Vec<Box<dyn Processor>> = Vec::new();

    if let Some(url) = cfg.value("storage.spam.url") {
        let threshold = cfg.property_or("storage.spam.threshold", 6.0f32);
        let client = SpamdClient::new(url, threshold);
        processors.push(Box::new(ChaosDecorator::new(SpamProcessor::new(client), chaos_headers)));
    }
    if let Some(addr) = cfg.value("storage.av.clamd-addr") {
        let client = ClamdClient::new(addr);
        processors.push(Box::new(ChaosDecorator::new(AvProcessor::new(client), chaos_headers)));
    }

    let local_file_dir = cfg
        .value("storage.local-file.dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| spool_dir.join("store"));
    let local_mailbox = cfg.property_or("storage.local-file.local-mailbox", false);
    processors.push(Box::new(ChaosDecorator::new(
        LocalFileProcessor::new(local_file_dir, local_mailbox),
        chaos_headers,
    )));

    let mailbox = MailboxConfig {
        lmtp_enabled: cfg.property_or("storage.mailbox.lmtp-enabled", true),
        lmtp_servers: {
            let servers = values(cfg, "storage.mailbox.lmtp-servers");
            if servers.is_empty() {
                vec!["127.0.0.1:24".to_string()]
            } else {
                servers
            }
        },
        lda_enabled: cfg.property_or("storage.mailbox.lda-enabled", false),
        lda_binary: cfg.value("storage.mailbox.lda-binary").map(str::to_string),
        inline_save_max_attempts: cfg.property_or("storage.mailbox.inline-save-max-attempts", 3),
        inline_save_retry_delay: cfg
            .duration("storage.mailbox.inline-save-retry-delay")
            .unwrap_or(Duration::from_secs(5)),
        failure_behaviour: match cfg.value("storage.mailbox.failure-behaviour") {
            Some("bounce") => FailureBehaviour::Bounce,
            _ => FailureBehaviour::Retry,
        },
        max_retry_count: cfg.property_or("storage.mailbox.max-retry-count", 5),
        local_hostname: cfg.value("server.hostname").unwrap_or("localhost").to_string(),
    };
    processors.push(Box::new(ChaosDecorator::new(MailboxProcessor::new(mailbox), chaos_headers)));

    Chain::new(processors)
}

/// Builds the bridge from a committed envelope to the outbound relay
/// pipeline (§4.7, §4.8). `storage.mailbox.local-domains` lists the
/// domains delivered through the storage chain; everything else is
/// resolved and enqueued for relay. An empty list keeps every recipient
/// local, matching the server's behaviour before relay was wired in.
fn build_relay_dispatch(cfg: &Config, hostname: &str) -> Result<RelayDispatch, Error> {
    let local_domains = values(cfg, "storage.mailbox.local-domains")
        .into_iter()
        .map(|d| d.to_ascii_lowercase())
        .collect();
    let resolver = Resolver::new()?;
    Ok(RelayDispatch::new(local_domains, hostname, resolver))
}

fn build_admission(cfg: &Config) -> Admission {
    let blocked = BlockedIps::from_entries(values(cfg, "admission.blocked"));
    let zones = values(cfg, "admission.rbl.zones");
    let rbl = RblConfig::new(zones, cfg.duration("admission.rbl.timeout").unwrap_or(Duration::from_secs(2)));
    let dns = rbl
        .is_enabled()
        .then(|| TokioAsyncResolver::tokio(ResolverConfig::default(), Default::default()));

    Admission {
        blocked,
        rbl,
        dns,
        conn_limiter: ConcurrencyLimiter::new(cfg.property_or("admission.connection-limit", 1024usize)),
        rate_limiters: DashMap::new(),
        rate_limit: cfg.property_or("admission.rate-limit.count", 100usize),
        rate_window: cfg.duration("admission.rate-limit.window").unwrap_or(Duration::from_secs(1)),
        tarpits: DashMap::new(),
        tarpit_base: cfg.duration("admission.tarpit.base").unwrap_or(Duration::from_millis(200)),
        tarpit_max: cfg.duration("admission.tarpit.max").unwrap_or(Duration::from_secs(30)),
    }
}

fn build_cron_config(cfg: &Config) -> CronConfig {
    let defaults = CronConfig::default();
    CronConfig {
        initial_delay: cfg.duration("queue.cron.initial-delay").unwrap_or(defaults.initial_delay),
        interval: cfg.duration("queue.cron.interval").unwrap_or(defaults.interval),
        max_dequeue_per_tick: cfg.property_or("queue.cron.max-dequeue-per-tick", defaults.max_dequeue_per_tick),
        max_retry_count: cfg.property_or("queue.cron.max-retry-count", defaults.max_retry_count),
        retry_backoff: cfg.duration("queue.cron.retry-backoff").unwrap_or(defaults.retry_backoff),
        bounce_enabled: cfg.property_or("queue.cron.bounce-enabled", defaults.bounce_enabled),
    }
}

/// Runs the server until every listener task exits. Binds all
/// configured listeners before returning control, so a bind failure on
/// any one of them aborts the whole startup rather than leaving a
/// partially-up server running.
pub async fn run(config_dir: &Path) -> Result<(), Error> {
    let cfg = load_dir(config_dir)?;
    let hostname = cfg.value("server.hostname").unwrap_or("localhost").to_string();
    let spool_dir = std::path::PathBuf::from(cfg.value("server.spool-dir").unwrap_or("/var/spool/robin/mail"));
    let xclient_enabled = cfg.property_or("server.xclient-enabled", false);

    let queue = build_queue(&cfg).await?;
    let core = Core {
        scenarios: build_scenarios(&cfg)?,
        webhooks: build_webhooks(&cfg),
        directory: build_directory(&cfg),
        queue: queue.clone(),
        limits: build_limits(&cfg),
        metrics: Arc::new(Metrics::new()),
        digest_cache: Arc::new(DigestCache::new()),
    };
    let data = Data::new(core);

    let io_limits = LineIoLimits {
        max_line_length: cfg.property_or("limits.max-line-length", 4096usize),
        command_timeout: cfg.duration("limits.command-timeout").unwrap_or(Duration::from_secs(300)),
        data_timeout: cfg.duration("limits.data-timeout").unwrap_or(Duration::from_secs(600)),
    };
    let slow_transfer_window = cfg.duration("limits.slow-transfer-window").unwrap_or(Duration::from_secs(30));
    let slow_transfer_min_bytes = cfg.property_or("limits.slow-transfer-min-bytes", 256u64);

    let tls_acceptor = super::tls_config::build_acceptor(&cfg, &hostname)?;
    let admission = Arc::new(build_admission(&cfg));
    let chain = Arc::new(build_chain(&cfg, &spool_dir));
    let relay = Arc::new(build_relay_dispatch(&cfg, &hostname)?);
    let bots = Arc::new(BotExecutor::new(build_bots(&cfg)?, spool_dir.join("bots")));
    let proxy = Arc::new(ProxyRouter::new(build_proxy_rules(&cfg)?));

    let listener_ids = indices(&cfg, "listener");
    if listener_ids.is_empty() {
        return Err(Error::local_permanent("configuration declares no listeners"));
    }

    let mut tasks = Vec::new();
    for id in listener_ids {
        let prefix = format!("listener.{id}");
        let bind: SocketAddr = cfg
            .value(&format!("{prefix}.bind"))
            .ok_or_else(|| Error::local_permanent(format!("listener {id} is missing \"bind\"")))?
            .parse()
            .map_err(|e| Error::local_permanent(format!("listener {id} has an invalid bind address: {e}")))?;
        let protocol = parse_protocol(cfg.value(&format!("{prefix}.protocol")))?;
        let tls_implicit = cfg.property_or(&format!("{prefix}.tls-implicit"), false);

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let instance = Arc::new(ServerInstance {
            id: id.clone(),
            listener_id: bind.port(),
            protocol,
            hostname: hostname.clone(),
            bind_addr: bind,
            is_tls_implicit: tls_implicit,
            limiter: ConcurrencyLimiter::new(cfg.property_or("limits.maximum-pool-size", 64usize)),
            shutdown_rx,
        });

        let ctx = Arc::new(ListenerContext {
            instance: instance.clone(),
            data: data.clone(),
            spool_dir: spool_dir.clone(),
            chain: chain.clone(),
            relay: relay.clone(),
            bots: bots.clone(),
            proxy: proxy.clone(),
            tls_acceptor: if tls_implicit || protocol != ServerProtocol::Lmtp {
                tls_acceptor.clone()
            } else {
                None
            },
            xclient_enabled,
            io_limits,
            slow_transfer_window,
            slow_transfer_min_bytes,
        });

        let listener = TcpListener::bind(bind)
            .await
            .map_err(|e| Error::local_transient(format!("cannot bind listener {id} on {bind}: {e}")))?;
        trc::event!(trc::EventType::ListenerAccept, "listener" = id.clone());
        tasks.push(tokio::spawn(run_listener(listener, instance, admission.clone(), ctx)));
    }

    let wheel = TimerWheel::new();
    let cron_config = build_cron_config(&cfg);
    cron::spawn(&wheel, queue, cron_config, |bounce| {
        trc::event!(trc::EventType::QueueBounce, "sender" = bounce.original_sender);
    });

    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn cfg(pairs: &[(&str, &str)]) -> Config {
        let mut keys = BTreeMap::new();
        for (k, v) in pairs {
            keys.insert(k.to_string(), v.to_string());
        }
        Config::new(keys)
    }

    #[test]
    fn parses_known_protocols_and_rejects_unknown_ones() {
        assert_eq!(parse_protocol(Some("lmtp")).unwrap(), ServerProtocol::Lmtp);
        assert_eq!(parse_protocol(None).unwrap(), ServerProtocol::Smtp);
        assert!(parse_protocol(Some("gopher")).is_err());
    }

    #[test]
    fn builds_static_users_from_indexed_config_keys() {
        let cfg = cfg(&[
            ("directory.static.0.name", "jane"),
            ("directory.static.0.secret", "hunter2"),
            ("directory.static.0.emails.0", "jane@example.com"),
        ]);
        let users = build_static_users(&cfg);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].name, "jane");
        assert_eq!(users[0].emails, vec!["jane@example.com".to_string()]);
    }

    #[test]
    fn builds_a_scenario_table_with_rcpt_pattern_overrides() {
        let cfg = cfg(&[
            ("scenario.0.ehlo", "chaos.test"),
            ("scenario.0.response.RCPT", "550 5.1.1 no such user"),
            ("scenario.0.rcpt-pattern.0.regex", "^bounce@"),
            ("scenario.0.rcpt-pattern.0.response", "550 5.1.1 blocked"),
        ]);
        let table = build_scenarios(&cfg).unwrap();
        assert_eq!(table.response_for("chaos.test", "RCPT"), Some("550 5.1.1 no such user"));
        assert_eq!(table.rcpt_override("chaos.test", "bounce@example.com"), Some("550 5.1.1 blocked"));
    }

    #[test]
    fn admission_defaults_are_permissive_without_configuration() {
        let cfg = cfg(&[]);
        let admission = build_admission(&cfg);
        assert!(admission.rbl.is_enabled() == false || admission.dns.is_some());
        assert_eq!(admission.rate_limit, 100);
    }

    #[test]
    fn run_rejects_a_config_directory_with_no_listeners() {
        let dir = std::env::temp_dir().join(format!("cli-server-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("server.json"), r#"{"server": {"hostname": "mx.test"}}"#).unwrap();

        let err = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(run(&dir))
            .unwrap_err();
        assert!(matches!(err.kind, trc::ErrorKind::LocalPermanent));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
