/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Admission control and the line-oriented command loop (§4.1, §4.9).
//! Three listeners share this code: plain SMTP/LMTP (STARTTLS capable),
//! implicit-TLS, and submission. Admission controls run in order on
//! accept — IP blocklist, RBL, connection-limit, rate-limit/tarpit —
//! each rejection incrementing its own counter and producing a 421/554
//! before the socket closes without a greeting. Once admitted, a
//! per-connection command loop reads CRLF-terminated lines (or raw
//! BDAT chunks) and dispatches to [`crate::extensions`], applying a
//! per-connection command-flood counter and a [`SlowTransferGuard`] on
//! DATA bodies as it goes.

pub mod rbl;

use std::{net::IpAddr, path::PathBuf, sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use dashmap::DashMap;
use hickory_resolver::TokioAsyncResolver;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use trc::Error;
use utils::{
    lineio::{self, LineIoLimits, SlowTransferGuard},
    listener::{
        blocked::BlockedIps,
        limiter::{ConcurrencyLimiter, InFlight, RateLimiter, Tarpit},
        ServerInstance, ServerProtocol,
    },
    tls,
};

use crate::{
    extensions::{
        handle_auth_digest_md5, handle_auth_login, handle_auth_plain, handle_bdat, handle_data,
        handle_ehlo, handle_help, handle_lhlo, handle_mail, handle_quit, handle_rcpt, handle_rset,
        handle_starttls, handle_xclient,
    },
    relay::RelayDispatch,
    session::{Direction, Session},
    storage::Chain,
};

/// Blanket trait so the command loop can own either a raw [`TcpStream`]
/// or a TLS-wrapped one behind a single boxed type, letting STARTTLS
/// replace the box in place instead of threading a generic through the
/// whole module.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

/// Admission rejections, each mapped to the response the listener
/// writes before closing (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejection {
    Blocked,
    RblListed,
    ConnectionLimit,
    RateLimited,
}

impl AdmissionRejection {
    pub fn response(&self) -> &'static str {
        match self {
            AdmissionRejection::Blocked => "554 5.7.1 connection refused",
            AdmissionRejection::RblListed => "554 5.7.1 listed in a DNS blocklist",
            AdmissionRejection::ConnectionLimit => "421 4.3.2 too many connections, try again later",
            AdmissionRejection::RateLimited => "421 4.7.0 rate limit exceeded, try again later",
        }
    }

    fn event(&self) -> &'static str {
        match self {
            AdmissionRejection::Blocked => "blocklist",
            AdmissionRejection::RblListed => "rbl",
            AdmissionRejection::ConnectionLimit => "connection-limit",
            AdmissionRejection::RateLimited => "rate-limit",
        }
    }
}

/// Per-listener admission state: the static blocklist and RBL config
/// are shared read-only; rate limiters and tarpits are created lazily,
/// one per source IP (§4.9).
pub struct Admission {
    pub blocked: BlockedIps,
    pub rbl: rbl::RblConfig,
    pub dns: Option<TokioAsyncResolver>,
    pub conn_limiter: ConcurrencyLimiter,
    pub rate_limiters: DashMap<IpAddr, Arc<RateLimiter>>,
    pub rate_limit: usize,
    pub rate_window: Duration,
    pub tarpits: DashMap<IpAddr, Arc<Tarpit>>,
    pub tarpit_base: Duration,
    pub tarpit_max: Duration,
}

impl Admission {
    /// Evaluates every control in §4.9's order, returning the acquired
    /// concurrency slot on success. A rate-limit violation is tarpitted
    /// (delayed) before the rejection is reported, so repeated abuse
    /// from one source gets progressively slower instead of an instant
    /// retry loop.
    pub async fn check(&self, ip: IpAddr) -> Result<InFlight, AdmissionRejection> {
        if self.blocked.is_blocked(&ip) {
            trc::event!(trc::EventType::ListenerReject, "reason" = "blocklist");
            return Err(AdmissionRejection::Blocked);
        }
        if self.rbl.is_enabled() {
            if let Some(dns) = &self.dns {
                if rbl::is_listed(dns, &self.rbl, ip).await {
                    trc::event!(trc::EventType::ListenerReject, "reason" = "rbl");
                    return Err(AdmissionRejection::RblListed);
                }
            }
        }
        let guard = self.conn_limiter.try_acquire().ok_or_else(|| {
            trc::event!(trc::EventType::ListenerReject, "reason" = "connection-limit");
            AdmissionRejection::ConnectionLimit
        })?;
        let limiter = self
            .rate_limiters
            .entry(ip)
            .or_insert_with(|| Arc::new(RateLimiter::new(self.rate_limit, self.rate_window)))
            .clone();
        if !limiter.check() {
            let tarpit = self
                .tarpits
                .entry(ip)
                .or_insert_with(|| Arc::new(Tarpit::new(self.tarpit_base, self.tarpit_max)))
                .clone();
            tokio::time::sleep(tarpit.next_delay()).await;
            trc::event!(trc::EventType::ListenerReject, "reason" = "rate-limit");
            return Err(AdmissionRejection::RateLimited);
        }
        Ok(guard)
    }
}

/// Everything the per-connection command loop needs besides the
/// session and the socket itself.
pub struct ListenerContext {
    pub instance: Arc<ServerInstance>,
    pub data: common::Data,
    pub spool_dir: PathBuf,
    pub chain: Arc<Chain>,
    pub relay: Arc<RelayDispatch>,
    pub bots: Arc<crate::bots::BotExecutor>,
    pub proxy: Arc<crate::proxy::ProxyRouter>,
    pub tls_acceptor: Option<TlsAcceptor>,
    pub xclient_enabled: bool,
    pub io_limits: LineIoLimits,
    pub slow_transfer_window: Duration,
    pub slow_transfer_min_bytes: u64,
}

async fn write_response<S: AsyncStream + ?Sized>(stream: &mut S, response: &str) -> Result<(), Error> {
    stream.write_all(response.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

/// Drains up to `n` bytes already buffered by a prior [`lineio::read_line`]
/// call before reading the remainder straight off the wire; used by
/// BDAT, which switches from line-oriented to fixed-size reads mid-stream.
async fn read_exact_buffered<S: AsyncStream + ?Sized>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    n: usize,
) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(n);
    let take = n.min(buf.len());
    out.extend(buf.drain(..take));
    if out.len() < n {
        let mut rest = vec![0u8; n - out.len()];
        stream.read_exact(&mut rest).await?;
        out.extend(rest);
    }
    Ok(out)
}

fn parse_command(line: &[u8]) -> (String, String) {
    let line = String::from_utf8_lossy(line);
    match line.split_once(' ') {
        Some((verb, rest)) => (verb.to_ascii_uppercase(), rest.trim().to_string()),
        None => (line.trim().to_ascii_uppercase(), String::new()),
    }
}

fn parse_xclient(arg: &str) -> (Option<String>, Option<IpAddr>, Option<String>) {
    let mut name = None;
    let mut addr = None;
    let mut helo = None;
    for pair in arg.split_whitespace() {
        if let Some((key, value)) = pair.split_once('=') {
            match key.to_ascii_uppercase().as_str() {
                "NAME" if value != "[UNAVAILABLE]" => name = Some(value.to_string()),
                "ADDR" => addr = value.parse().ok(),
                "HELO" => helo = Some(value.to_string()),
                _ => {}
            }
        }
    }
    (name, addr, helo)
}

/// Extracts `username`/`nonce` from a decoded DIGEST-MD5 client
/// response (`key="value",key=value,...`), the only two fields the
/// subsequent-auth fast path (§8 E6) needs.
fn parse_digest_response(decoded: &str) -> Option<(String, String)> {
    let mut username = None;
    let mut nonce = None;
    for field in decoded.split(',') {
        let field = field.trim();
        if let Some((key, value)) = field.split_once('=') {
            let value = value.trim_matches('"');
            match key {
                "username" => username = Some(value.to_string()),
                "nonce" => nonce = Some(value.to_string()),
                _ => {}
            }
        }
    }
    Some((username?, nonce?))
}

/// Reads a DATA body: CRLF lines accumulate until the bare `.`
/// terminator, undoing transparency dot-stuffing on lines that start
/// with an escaped `..` (RFC 5321 §4.5.2). Feeds a slow-transfer guard
/// so an attacker trickling bytes in gets disconnected (§4.9).
async fn read_data_body<S: AsyncStream + ?Sized>(
    stream: &mut S,
    buf: &mut Vec<u8>,
    limits: &LineIoLimits,
    slow_transfer: &mut SlowTransferGuard,
) -> Result<Vec<u8>, Error> {
    let mut body = Vec::new();
    loop {
        let line = lineio::read_line(stream, buf, limits.max_line_length, limits.data_timeout)
            .await?
            .ok_or_else(|| Error::local_transient("connection closed mid-DATA"))?;
        if line == b"." {
            return Ok(body);
        }
        let unstuffed: &[u8] = if line.starts_with(b"..") { &line[1..] } else { &line[..] };
        if slow_transfer.record(unstuffed.len()) {
            trc::event!(trc::EventType::SlowTransfer);
            return Err(Error::policy(421, "4.4.2", true, "transfer too slow"));
        }
        body.extend_from_slice(unstuffed);
        body.extend_from_slice(b"\r\n");
    }
}

/// Runs the full command loop for one admitted connection until QUIT,
/// an unrecoverable error, or the error limit is hit (§4.2), returning
/// the session so the caller can log/finalize it.
pub async fn run_session(
    mut stream: Box<dyn AsyncStream>,
    mut session: Session,
    ctx: Arc<ListenerContext>,
) -> Result<Session, Error> {
    let greeting = format!(
        "220 {} {} ready",
        session.hostname,
        if ctx.instance.protocol == ServerProtocol::Lmtp { "LMTP" } else { "ESMTP" }
    );
    write_response(stream.as_mut(), &greeting).await?;
    session.record("CONNECT", &greeting, false);

    let mut buf = Vec::new();
    let mut pending_bdat = Vec::new();
    let mut command_count: u32 = 0;

    loop {
        if ctx.instance.is_shutting_down() {
            write_response(stream.as_mut(), "421 4.3.2 server shutting down").await?;
            break;
        }

        let line = match lineio::read_line(
            stream.as_mut(),
            &mut buf,
            ctx.io_limits.max_line_length,
            ctx.io_limits.command_timeout,
        )
        .await
        {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                let response = err.smtp_reply();
                write_response(stream.as_mut(), &response).await.ok();
                if session.register_error(&err) {
                    break;
                }
                continue;
            }
        };

        command_count += 1;
        if command_count > session.core.limits.command_flood_limit {
            write_response(stream.as_mut(), "421 4.7.0 too many commands").await?;
            trc::event!(trc::EventType::ListenerReject, "reason" = "command-flood");
            break;
        }

        let (verb, arg) = parse_command(&line);
        let outcome: Result<Option<String>, Error> = match verb.as_str() {
            "EHLO" => handle_ehlo(&mut session, &arg).await.map(Some),
            "HELO" => handle_ehlo(&mut session, &arg).await.map(Some),
            "LHLO" => handle_lhlo(&mut session, &arg).await.map(Some),
            "MAIL" => handle_mail(&mut session, &arg).await.map(Some),
            "RCPT" => handle_rcpt(&mut session, &arg, &ctx.proxy).await.map(Some),
            "STARTTLS" => match handle_starttls(&mut session, ctx.tls_acceptor.is_some()).await {
                Ok(response) => {
                    write_response(stream.as_mut(), &response).await?;
                    if let Some(acceptor) = &ctx.tls_acceptor {
                        trc::event!(trc::EventType::TlsHandshakeStart);
                        let old = stream;
                        match tls::accept(acceptor, old).await {
                            Ok(upgraded) => {
                                stream = Box::new(upgraded);
                                buf.clear();
                                trc::event!(trc::EventType::TlsHandshakeSuccess);
                            }
                            Err(err) => {
                                trc::event!(trc::EventType::TlsHandshakeError);
                                return Err(err);
                            }
                        }
                    }
                    Ok(None)
                }
                Err(err) => Err(err),
            },
            "AUTH" => handle_auth_command(stream.as_mut(), &mut session, &arg, &ctx).await.map(Some),
            "DATA" => {
                let body = read_data_body(
                    stream.as_mut(),
                    &mut buf,
                    &ctx.io_limits,
                    &mut SlowTransferGuard::new(ctx.slow_transfer_window, ctx.slow_transfer_min_bytes),
                )
                .await;
                match body {
                    Ok(body) => {
                        write_response(stream.as_mut(), "354 start mail input; end with <CRLF>.<CRLF>").await?;
                        handle_data(&mut session, body, &ctx.spool_dir, &ctx.chain, &ctx.relay, &ctx.bots)
                            .await
                            .map(Some)
                    }
                    Err(err) => Err(err),
                }
            }
            "BDAT" => handle_bdat_command(stream.as_mut(), &mut session, &arg, &mut buf, &mut pending_bdat, &ctx)
                .await
                .map(Some),
            "RSET" => handle_rset(&mut session).await.map(Some),
            "QUIT" => handle_quit(&mut session).await.map(Some),
            "HELP" => handle_help(&mut session).await.map(Some),
            "NOOP" => Ok(Some("250 2.0.0 OK".to_string())),
            "XCLIENT" => {
                let (name, addr, helo) = parse_xclient(&arg);
                handle_xclient(&mut session, ctx.xclient_enabled, name.as_deref(), addr, helo.as_deref())
                    .await
                    .map(Some)
            }
            _ => Err(Error::protocol(500, "5.5.2", "command not recognized")),
        };

        match outcome {
            Ok(Some(response)) => {
                write_response(stream.as_mut(), &response).await?;
                if verb == "QUIT" {
                    break;
                }
            }
            Ok(None) => {}
            Err(err) => {
                let response = err.smtp_reply();
                write_response(stream.as_mut(), &response).await?;
                if session.register_error(&err) {
                    trc::event!(trc::EventType::SessionError, "reason" = err.message.clone());
                    break;
                }
            }
        }
    }

    Ok(session)
}

/// AUTH's multi-step SASL exchanges. `PLAIN`/`LOGIN` may carry an
/// initial response on the command line; otherwise a `334` prompt asks
/// for it. DIGEST-MD5 always issues a challenge first.
async fn handle_auth_command<S: AsyncStream + ?Sized>(
    stream: &mut S,
    session: &mut Session,
    arg: &str,
    ctx: &ListenerContext,
) -> Result<String, Error> {
    let (mechanism, initial) = match arg.split_once(' ') {
        Some((m, rest)) => (m.to_ascii_uppercase(), Some(rest.trim().to_string())),
        None => (arg.trim().to_ascii_uppercase(), None),
    };

    match mechanism.as_str() {
        "PLAIN" => {
            let response = match initial {
                Some(r) => r,
                None => prompt(stream, "334 ", ctx).await?,
            };
            handle_auth_plain(session, &response).await
        }
        "LOGIN" => {
            let username = match initial {
                Some(r) => r,
                None => prompt(stream, "334 VXNlcm5hbWU6", ctx).await?,
            };
            let password = prompt(stream, "334 UGFzc3dvcmQ6", ctx).await?;
            handle_auth_login(session, &username, &password).await
        }
        "DIGEST-MD5" => {
            let challenge = crate::extensions::auth::issue_digest_challenge(&*session, "");
            let response_b64 = prompt(stream, &format!("334 {}", STANDARD.encode(challenge)), ctx).await?;
            let decoded = STANDARD
                .decode(response_b64.trim())
                .map_err(|_| Error::protocol(501, "5.5.2", "invalid base64 in AUTH response"))?;
            let decoded = String::from_utf8_lossy(&decoded);
            let (username, nonce) = parse_digest_response(&decoded)
                .ok_or_else(|| Error::protocol(501, "5.5.2", "malformed DIGEST-MD5 response"))?;
            handle_auth_digest_md5(session, &username, &nonce).await
        }
        _ => Err(Error::protocol(504, "5.5.4", "unrecognized authentication mechanism")),
    }
}

async fn prompt<S: AsyncStream + ?Sized>(stream: &mut S, challenge: &str, ctx: &ListenerContext) -> Result<String, Error> {
    write_response(stream, challenge).await?;
    let mut buf = Vec::new();
    lineio::read_line(stream, &mut buf, ctx.io_limits.max_line_length, ctx.io_limits.command_timeout)
        .await?
        .ok_or_else(|| Error::local_transient("connection closed mid-AUTH"))
        .map(|line| String::from_utf8_lossy(&line).into_owned())
}

async fn handle_bdat_command<S: AsyncStream + ?Sized>(
    stream: &mut S,
    session: &mut Session,
    arg: &str,
    buf: &mut Vec<u8>,
    pending: &mut Vec<u8>,
    ctx: &ListenerContext,
) -> Result<String, Error> {
    let mut parts = arg.split_whitespace();
    let size: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol(501, "5.5.4", "malformed BDAT size"))?;
    let last = parts.next().map(|s| s.eq_ignore_ascii_case("LAST")).unwrap_or(false);

    let chunk = read_exact_buffered(stream, buf, size).await?;
    handle_bdat(session, chunk, last, pending, &ctx.spool_dir, &ctx.chain, &ctx.relay, &ctx.bots).await
}

/// Accepts connections for one listener (§4.9), applying [`Admission`]
/// before a [`Session`] is ever constructed and spawning [`run_session`]
/// per connection. Implicit-TLS listeners wrap the raw socket before the
/// greeting is written; STARTTLS-capable ones greet in the clear.
pub async fn run_listener(
    listener: TcpListener,
    instance: Arc<ServerInstance>,
    admission: Arc<Admission>,
    ctx: Arc<ListenerContext>,
) -> Result<(), Error> {
    loop {
        if instance.is_shutting_down() {
            return Ok(());
        }
        let (socket, peer): (TcpStream, std::net::SocketAddr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(_) => continue,
        };
        let peer_ip = peer.ip();
        let local_addr = socket.local_addr().map(|a| a.ip()).unwrap_or(peer_ip);

        let guard = match admission.check(peer_ip).await {
            Ok(guard) => guard,
            Err(rejection) => {
                let mut socket = socket;
                let _ = socket.write_all(rejection.response().as_bytes()).await;
                let _ = socket.write_all(b"\r\n").await;
                trc::event!(trc::EventType::ListenerReject, "reason" = rejection.event());
                continue;
            }
        };

        trc::event!(trc::EventType::ListenerAccept, "peer" = peer_ip.to_string());

        let instance = instance.clone();
        let ctx = ctx.clone();
        let core = ctx.data.current();
        tokio::spawn(async move {
            let _guard = guard;
            let stream: Box<dyn AsyncStream> = if instance.is_tls_implicit {
                match &ctx.tls_acceptor {
                    Some(acceptor) => match tls::accept(acceptor, socket).await {
                        Ok(tls_stream) => Box::new(tls_stream),
                        Err(_) => return,
                    },
                    None => return,
                }
            } else {
                Box::new(socket)
            };

            let hostname = instance.hostname.clone();
            let mut session = Session::new(rand::random::<u64>(), core, Direction::Inbound, peer_ip, local_addr, hostname);
            session.tls = instance.is_tls_implicit;
            trc::event!(trc::EventType::SessionStart, "peer" = peer_ip.to_string());

            match run_session(stream, session, ctx).await {
                Ok(_session) => trc::event!(trc::EventType::SessionEnd),
                Err(_) => trc::event!(trc::EventType::SessionError),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Direction;
    use common::{
        digest_cache::DigestCache, limits::Limits, metrics::Metrics, scenario::ScenarioTable,
        webhook::WebhookConfig, Core,
    };
    use directory::{static_list::StaticList, DirectoryChain};
    use std::net::Ipv4Addr;
    use store::queue::memory::MemoryQueue;
    use tokio::io::duplex;
    use tokio::sync::watch;

    fn core_with_directory() -> Arc<Core> {
        let directory = Arc::new(StaticList::new(
            "static",
            vec![("jane".into(), "secret".into(), vec!["jane@x.com".into()])],
        ));
        Arc::new(Core {
            scenarios: ScenarioTable::new(),
            webhooks: WebhookConfig::default(),
            directory: Arc::new(DirectoryChain::new(vec![directory])),
            queue: Arc::new(MemoryQueue::new()),
            limits: Limits::default(),
            metrics: Arc::new(Metrics::new()),
            digest_cache: Arc::new(DigestCache::new()),
        })
    }

    fn instance() -> Arc<ServerInstance> {
        let (_tx, rx) = watch::channel(false);
        Arc::new(ServerInstance {
            id: "smtp-test".into(),
            listener_id: 25,
            protocol: ServerProtocol::Smtp,
            hostname: "mx.example.com".into(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            is_tls_implicit: false,
            limiter: ConcurrencyLimiter::new(16),
            shutdown_rx: rx,
        })
    }

    fn context() -> Arc<ListenerContext> {
        Arc::new(ListenerContext {
            instance: instance(),
            data: common::Data::new(Core {
                scenarios: ScenarioTable::new(),
                webhooks: WebhookConfig::default(),
                directory: Arc::new(DirectoryChain::new(vec![])),
                queue: Arc::new(MemoryQueue::new()),
                limits: Limits::default(),
                metrics: Arc::new(Metrics::new()),
                digest_cache: Arc::new(DigestCache::new()),
            }),
            spool_dir: std::env::temp_dir().join(format!("listener-test-{}", std::process::id())),
            chain: Arc::new(Chain::new(vec![])),
            relay: Arc::new(crate::relay::RelayDispatch::new(
                Default::default(),
                "mx.example.com",
                crate::resolver::Resolver::new().unwrap(),
            )),
            bots: Arc::new(crate::bots::BotExecutor::new(
                Vec::new(),
                std::env::temp_dir().join(format!("listener-test-bots-{}", std::process::id())),
            )),
            proxy: Arc::new(crate::proxy::ProxyRouter::new(Vec::new())),
            tls_acceptor: None,
            xclient_enabled: false,
            io_limits: LineIoLimits::default(),
            slow_transfer_window: Duration::from_secs(30),
            slow_transfer_min_bytes: 256,
        })
    }

    fn session(core: Arc<Core>) -> Session {
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
    async fn full_transaction_over_duplex_stream() {
        let (client, server) = duplex(8192);
        let ctx = context();
        let server_task = tokio::spawn(run_session(Box::new(server), session(core_with_directory()), ctx));

        let mut client = client;
        let mut read_buf = vec![0u8; 4096];
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("220"));

        client.write_all(b"EHLO client.example.com\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("250"));

        client.write_all(b"MAIL FROM:<s@x.com>\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("250"));

        client.write_all(b"RCPT TO:<jane@x.com>\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("250"));

        client.write_all(b"DATA\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("354"));

        client.write_all(b"Subject: hi\r\n\r\nbody\r\n.\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("250"));

        client.write_all(b"QUIT\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("221"));

        let session = server_task.await.unwrap().unwrap();
        assert_eq!(session.envelopes.len(), 1);
        let _ = std::fs::remove_dir_all(&context().spool_dir);
    }

    #[tokio::test]
    async fn unknown_command_gets_500() {
        let (client, server) = duplex(8192);
        let ctx = context();
        tokio::spawn(run_session(Box::new(server), session(core_with_directory()), ctx));

        let mut client = client;
        let mut read_buf = vec![0u8; 4096];
        client.read(&mut read_buf).await.unwrap();

        client.write_all(b"BOGUS\r\n").await.unwrap();
        let n = client.read(&mut read_buf).await.unwrap();
        assert!(String::from_utf8_lossy(&read_buf[..n]).starts_with("500"));
    }

    #[tokio::test]
    async fn admission_blocks_listed_ip_before_connection_limit() {
        let admission = Admission {
            blocked: BlockedIps::from_entries(["10.0.0.0/8".to_string()]),
            rbl: rbl::RblConfig::default(),
            dns: None,
            conn_limiter: ConcurrencyLimiter::new(16),
            rate_limiters: DashMap::new(),
            rate_limit: 100,
            rate_window: Duration::from_secs(1),
            tarpits: DashMap::new(),
            tarpit_base: Duration::from_millis(1),
            tarpit_max: Duration::from_secs(1),
        };
        let result = admission.check(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))).await;
        assert_eq!(result.unwrap_err(), AdmissionRejection::Blocked);
    }

    #[tokio::test]
    async fn admission_rate_limits_after_burst() {
        let admission = Admission {
            blocked: BlockedIps::default(),
            rbl: rbl::RblConfig::default(),
            dns: None,
            conn_limiter: ConcurrencyLimiter::new(16),
            rate_limiters: DashMap::new(),
            rate_limit: 1,
            rate_window: Duration::from_secs(60),
            tarpits: DashMap::new(),
            tarpit_base: Duration::from_millis(1),
            tarpit_max: Duration::from_millis(5),
        };
        let ip = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9));
        assert!(admission.check(ip).await.is_ok());
        assert_eq!(admission.check(ip).await.unwrap_err(), AdmissionRejection::RateLimited);
    }
}
