/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Proxy mode (§4.10): first-match-wins rule matching on IP/EHLO/MAIL/
//! RCPT patterns plus direction, routing the envelope to an upstream
//! `(hosts[], port, protocol, tls, auth)`. Connections are keyed by
//! the rule's destination hash and reused across envelopes within the
//! worker's lifetime.

use std::{net::IpAddr, sync::Arc, time::Duration};

use dashmap::DashMap;
use regex::Regex;
use tokio::{
    io::AsyncWriteExt,
    net::TcpStream,
    sync::Mutex,
};
use trc::Error;
use utils::lineio::read_line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Both,
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Smtp,
    Lmtp,
}

#[derive(Clone)]
pub struct ProxyRule {
    pub name: String,
    pub direction: Direction,
    pub ip_pattern: Option<utils::listener::blocked::Cidr>,
    pub ehlo_pattern: Option<Regex>,
    pub mail_pattern: Option<Regex>,
    pub rcpt_pattern: Option<Regex>,
    pub hosts: Vec<String>,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub tls: bool,
}

pub struct ProxyMatch<'a> {
    pub peer_ip: IpAddr,
    pub ehlo: Option<&'a str>,
    pub sender: &'a str,
    pub recipient: &'a str,
    pub direction: Direction,
}

impl ProxyRule {
    pub fn matches(&self, input: &ProxyMatch<'_>) -> bool {
        if self.direction != Direction::Both && self.direction != input.direction {
            return false;
        }
        if let Some(cidr) = &self.ip_pattern {
            if !cidr.contains(&input.peer_ip) {
                return false;
            }
        }
        if let Some(pattern) = &self.ehlo_pattern {
            if !input.ehlo.map(|e| pattern.is_match(e)).unwrap_or(false) {
                return false;
            }
        }
        if let Some(pattern) = &self.mail_pattern {
            if !pattern.is_match(input.sender) {
                return false;
            }
        }
        if let Some(pattern) = &self.rcpt_pattern {
            if !pattern.is_match(input.recipient) {
                return false;
            }
        }
        true
    }

    /// Hash identifying the rule's destination tuple for connection
    /// reuse keying (§4.10 "Connections keyed by the rule's
    /// destination hash").
    pub fn destination_key(&self) -> String {
        format!(
            "{}|{}|{:?}|{}",
            self.hosts.join(","),
            self.port,
            self.protocol,
            self.tls
        )
    }
}

/// A pooled upstream connection plus the leftover-bytes buffer
/// `read_line` needs across calls, so a reused connection doesn't lose
/// bytes buffered from a previous command's response.
struct PooledConnection {
    stream: TcpStream,
    buf: Vec<u8>,
}

/// First-match-wins rule table plus a pool of reused connections keyed
/// by destination hash (§4.10).
pub struct ProxyRouter {
    rules: Vec<ProxyRule>,
    pool: DashMap<String, Arc<Mutex<PooledConnection>>>,
}

impl ProxyRouter {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        ProxyRouter {
            rules,
            pool: DashMap::new(),
        }
    }

    pub fn route(&self, input: &ProxyMatch<'_>) -> Option<&ProxyRule> {
        self.rules.iter().find(|rule| rule.matches(input))
    }

    /// Returns an existing pooled connection for the rule's
    /// destination, or dials and inserts a new one.
    async fn connection_for(&self, rule: &ProxyRule) -> Result<Arc<Mutex<PooledConnection>>, Error> {
        let key = rule.destination_key();
        if let Some(existing) = self.pool.get(&key) {
            return Ok(existing.clone());
        }
        let host = rule
            .hosts
            .first()
            .ok_or_else(|| Error::local_permanent("proxy rule has no upstream hosts"))?;
        let stream = TcpStream::connect((host.as_str(), rule.port))
            .await
            .map_err(|e| Error::relay_transient(format!("proxy upstream connect {host}: {e}")))?;
        let wrapped = Arc::new(Mutex::new(PooledConnection {
            stream,
            buf: Vec::new(),
        }));
        self.pool.insert(key, wrapped.clone());
        Ok(wrapped)
    }

    /// Forwards one command line to the rule's upstream over its
    /// pooled connection and returns the single response line it sends
    /// back, evicting the pooled entry on any I/O error so the next
    /// call redials rather than reusing a dead socket.
    pub async fn forward_command(&self, rule: &ProxyRule, command: &str) -> Result<String, Error> {
        let conn = self.connection_for(rule).await?;
        let mut guard = conn.lock().await;
        let result: Result<String, Error> = async {
            guard.stream.write_all(command.as_bytes()).await?;
            guard.stream.write_all(b"\r\n").await?;
            let line = read_line(&mut guard.stream, &mut guard.buf, 4096, Duration::from_secs(30)).await?;
            line.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .ok_or_else(|| Error::relay_transient("proxy upstream closed the connection"))
        }
        .await;
        if result.is_err() {
            self.pool.remove(&rule.destination_key());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn base_rule() -> ProxyRule {
        ProxyRule {
            name: "r1".into(),
            direction: Direction::Both,
            ip_pattern: None,
            ehlo_pattern: None,
            mail_pattern: None,
            rcpt_pattern: Some(Regex::new(r"@example\.com$").unwrap()),
            hosts: vec!["upstream.example.com".into()],
            port: 25,
            protocol: ProxyProtocol::Smtp,
            tls: false,
        }
    }

    #[test]
    fn first_match_wins_among_ordered_rules() {
        let specific = base_rule();
        let mut catch_all = base_rule();
        catch_all.rcpt_pattern = None;
        catch_all.name = "catch-all".into();
        let router = ProxyRouter::new(vec![specific, catch_all]);

        let input = ProxyMatch {
            peer_ip: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            ehlo: None,
            sender: "s@x.com",
            recipient: "r@example.com",
            direction: Direction::Inbound,
        };
        let matched = router.route(&input).unwrap();
        assert_eq!(matched.name, "r1");
    }

    #[test]
    fn direction_mismatch_excludes_rule() {
        let mut rule = base_rule();
        rule.direction = Direction::Outbound;
        let router = ProxyRouter::new(vec![rule]);
        let input = ProxyMatch {
            peer_ip: IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)),
            ehlo: None,
            sender: "s@x.com",
            recipient: "r@example.com",
            direction: Direction::Inbound,
        };
        assert!(router.route(&input).is_none());
    }

    #[test]
    fn destination_key_is_stable_for_identical_targets() {
        let a = base_rule();
        let b = base_rule();
        assert_eq!(a.destination_key(), b.destination_key());
    }

    #[tokio::test]
    async fn forward_command_relays_the_upstream_response_over_a_pooled_connection() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            for _ in 0..2 {
                let mut line = String::new();
                if reader.read_line(&mut line).await.unwrap() == 0 {
                    break;
                }
                write_half.write_all(b"250 2.1.5 OK\r\n").await.unwrap();
            }
        });

        let mut rule = base_rule();
        rule.hosts = vec![addr.ip().to_string()];
        rule.port = addr.port();
        let router = ProxyRouter::new(vec![rule.clone()]);

        let first = router.forward_command(&rule, "RCPT TO:<r@example.com>").await.unwrap();
        assert_eq!(first, "250 2.1.5 OK");
        assert_eq!(router.pool.len(), 1);

        let second = router.forward_command(&rule, "RCPT TO:<r2@example.com>").await.unwrap();
        assert_eq!(second, "250 2.1.5 OK");
        assert_eq!(router.pool.len(), 1);
    }
}
