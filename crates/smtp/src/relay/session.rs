/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! A single outbound relay attempt (§4.8). `RelaySession` is the unit
//! serialized into a queue row when an attempt fails transiently — it
//! carries everything needed to retry without touching the original
//! `Envelope`/session objects, which do not outlive the connection.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use trc::Error;
use utils::lineio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayProtocol {
    Smtp,
    Esmtp,
    Lmtp,
}

/// Enough to retry an outbound delivery from the queue without
/// re-deriving it from a live session (§6 "Queue record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySession {
    pub sender: String,
    pub recipients: Vec<String>,
    pub body_path: String,
    pub target_host: String,
    pub target_port: u16,
    pub protocol: RelayProtocol,
    pub implicit_tls: bool,
    pub local_hostname: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Success,
    Transient(String),
    Permanent(String),
}

impl RelaySession {
    /// Attempts one delivery. MTA-STS enforcement that rejected every
    /// MX candidate is represented upstream as no viable target rather
    /// than as a relay failure, so this only classifies the wire-level
    /// outcome (§4.8, §4.7 "enforcement may cause the client to refuse
    /// a target").
    pub async fn attempt(&self) -> Result<RelayOutcome, Error> {
        trc::event!(
            trc::EventType::RelayAttempt,
            "target" = format!("{}:{}", self.target_host, self.target_port)
        );

        let stream = match TcpStream::connect((self.target_host.as_str(), self.target_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                return Ok(RelayOutcome::Transient(format!("connect failed: {e}")));
            }
        };

        match self.run(stream).await {
            Ok(outcome) => {
                match &outcome {
                    RelayOutcome::Success => trc::event!(trc::EventType::RelaySuccess),
                    RelayOutcome::Transient(reason) => {
                        trc::event!(trc::EventType::RelayTransientFailure, "reason" = reason.clone())
                    }
                    RelayOutcome::Permanent(reason) => {
                        trc::event!(trc::EventType::RelayPermanentFailure, "reason" = reason.clone())
                    }
                }
                Ok(outcome)
            }
            Err(e) if e.is_transient() => Ok(RelayOutcome::Transient(e.message)),
            Err(e) => Ok(RelayOutcome::Permanent(e.message)),
        }
    }

    async fn run(&self, mut stream: TcpStream) -> Result<RelayOutcome, Error> {
        let data = tokio::fs::read(&self.body_path).await?;
        let greeting = read_reply(&mut stream).await?;
        if !greeting.starts_with('2') {
            return Ok(RelayOutcome::Transient(greeting));
        }

        let hello_verb = if self.protocol == RelayProtocol::Lmtp {
            "LHLO"
        } else {
            "EHLO"
        };
        send(&mut stream, &format!("{hello_verb} {}", self.local_hostname)).await?;
        read_multiline(&mut stream).await?;

        send(&mut stream, &format!("MAIL FROM:<{}>", self.sender)).await?;
        let reply = read_reply(&mut stream).await?;
        if !reply.starts_with('2') {
            return Ok(classify(&reply));
        }

        let mut any_accepted = false;
        for rcpt in &self.recipients {
            send(&mut stream, &format!("RCPT TO:<{rcpt}>")).await?;
            let reply = read_reply(&mut stream).await?;
            any_accepted |= reply.starts_with('2');
        }
        if !any_accepted {
            return Ok(RelayOutcome::Permanent("all recipients rejected".into()));
        }

        send(&mut stream, "DATA").await?;
        let reply = read_reply(&mut stream).await?;
        if !reply.starts_with('3') {
            return Ok(classify(&reply));
        }

        use tokio::io::AsyncWriteExt;
        stream.write_all(&data).await?;
        if !data.ends_with(b"\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;

        let reply = read_reply(&mut stream).await?;
        send(&mut stream, "QUIT").await.ok();
        Ok(classify(&reply))
    }
}

fn classify(reply: &str) -> RelayOutcome {
    match reply.as_bytes().first() {
        Some(b'2') => RelayOutcome::Success,
        Some(b'4') => RelayOutcome::Transient(reply.to_string()),
        _ => RelayOutcome::Permanent(reply.to_string()),
    }
}

async fn send(stream: &mut TcpStream, line: &str) -> Result<(), Error> {
    use tokio::io::AsyncWriteExt;
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

async fn read_reply(stream: &mut TcpStream) -> Result<String, Error> {
    let mut buf = Vec::new();
    let line = lineio::read_line(stream, &mut buf, 4096, Duration::from_secs(60))
        .await?
        .ok_or_else(|| Error::relay_transient("connection closed before a reply"))?;
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_multiline(stream: &mut TcpStream) -> Result<(), Error> {
    loop {
        let line = read_reply(stream).await?;
        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_leading_response_digit() {
        assert_eq!(classify("250 OK"), RelayOutcome::Success);
        assert_eq!(
            classify("450 4.3.0 try later"),
            RelayOutcome::Transient("450 4.3.0 try later".into())
        );
        assert_eq!(
            classify("550 5.1.1 no such user"),
            RelayOutcome::Permanent("550 5.1.1 no such user".into())
        );
    }

    #[test]
    fn round_trips_through_bincode() {
        let session = RelaySession {
            sender: "a@x.com".into(),
            recipients: vec!["b@y.com".into()],
            body_path: "/tmp/msg.eml".into(),
            target_host: "mx.y.com".into(),
            target_port: 25,
            protocol: RelayProtocol::Esmtp,
            implicit_tls: false,
            local_hostname: "mx.x.com".into(),
        };
        let encoded = bincode::serialize(&session).unwrap();
        let decoded: RelaySession = bincode::deserialize(&encoded).unwrap();
        assert_eq!(decoded.sender, session.sender);
        assert_eq!(decoded.recipients, session.recipients);
    }
}
