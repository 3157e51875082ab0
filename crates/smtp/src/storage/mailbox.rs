/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Mailbox delivery backend (§4.6): LMTP preferred, LDA fallback.
//! LMTP speaks LHLO/MAIL/RCPT/DATA against each configured server and
//! collects one result per recipient; LDA invokes an external binary
//! per recipient with the artifact piped on stdin and maps its exit
//! code to success/retry/permanent. Both share `inlineSaveMaxAttempts`,
//! `inlineSaveRetryDelay`, `failureBehaviour`, `maxRetryCount`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    process::Command,
};
use trc::Error;

use crate::{
    envelope::Envelope,
    storage::{Processor, ProcessorOutcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureBehaviour {
    Retry,
    Bounce,
}

#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub lmtp_enabled: bool,
    pub lmtp_servers: Vec<String>,
    pub lda_enabled: bool,
    pub lda_binary: Option<String>,
    pub inline_save_max_attempts: u32,
    pub inline_save_retry_delay: Duration,
    pub failure_behaviour: FailureBehaviour,
    pub max_retry_count: u32,
    pub local_hostname: String,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        MailboxConfig {
            lmtp_enabled: true,
            lmtp_servers: vec!["127.0.0.1:24".into()],
            lda_enabled: false,
            lda_binary: None,
            inline_save_max_attempts: 3,
            inline_save_retry_delay: Duration::from_secs(5),
            failure_behaviour: FailureBehaviour::Retry,
            max_retry_count: 5,
            local_hostname: "localhost".into(),
        }
    }
}

/// Per-recipient delivery outcome (§8 property 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientResult {
    Delivered,
    Retry(String),
    Permanent(String),
}

pub struct MailboxProcessor {
    config: MailboxConfig,
}

impl MailboxProcessor {
    pub fn new(config: MailboxConfig) -> Self {
        MailboxProcessor { config }
    }

    async fn deliver(&self, envelope: &Envelope, data: &[u8]) -> Result<Vec<RecipientResult>, Error> {
        if self.config.lmtp_enabled {
            self.deliver_lmtp(envelope, data).await
        } else if self.config.lda_enabled {
            self.deliver_lda(envelope, data).await
        } else {
            Err(Error::local_permanent("no mailbox delivery backend configured"))
        }
    }

    /// Speaks LHLO/MAIL/RCPT/DATA against the first reachable LMTP
    /// server, collecting one response per recipient (§4.6, §8
    /// property 7).
    async fn deliver_lmtp(
        &self,
        envelope: &Envelope,
        data: &[u8],
    ) -> Result<Vec<RecipientResult>, Error> {
        let server = self
            .config
            .lmtp_servers
            .first()
            .ok_or_else(|| Error::local_permanent("no LMTP servers configured"))?;
        let mut stream = TcpStream::connect(server)
            .await
            .map_err(|e| Error::local_transient(format!("lmtp connect {server}: {e}")))?;

        read_reply(&mut stream).await?;
        send_line(&mut stream, &format!("LHLO {}", self.config.local_hostname)).await?;
        read_multiline_reply(&mut stream).await?;

        send_line(&mut stream, &format!("MAIL FROM:<{}>", envelope.sender)).await?;
        read_reply(&mut stream).await?;

        let mut accepted = Vec::with_capacity(envelope.recipients.len());
        for rcpt in &envelope.recipients {
            send_line(&mut stream, &format!("RCPT TO:<{rcpt}>")).await?;
            let reply = read_reply(&mut stream).await?;
            accepted.push(reply.starts_with('2'));
        }

        send_line(&mut stream, "DATA").await?;
        read_reply(&mut stream).await?;
        stream.write_all(data).await?;
        if !data.ends_with(b"\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;

        let mut results = Vec::with_capacity(envelope.recipients.len());
        for accepted in accepted {
            if !accepted {
                results.push(RecipientResult::Permanent("550 5.1.1 recipient rejected".into()));
                continue;
            }
            let reply = read_reply(&mut stream).await?;
            results.push(classify_lmtp_reply(&reply));
        }

        send_line(&mut stream, "QUIT").await?;
        Ok(results)
    }

    /// Invokes the LDA binary once per recipient with the artifact on
    /// stdin; exit code 0 is success, 75 (`EX_TEMPFAIL`) is retryable,
    /// anything else is permanent (§4.6).
    async fn deliver_lda(
        &self,
        envelope: &Envelope,
        data: &[u8],
    ) -> Result<Vec<RecipientResult>, Error> {
        let binary = self
            .config
            .lda_binary
            .as_deref()
            .ok_or_else(|| Error::local_permanent("no LDA binary configured"))?;

        let mut results = Vec::with_capacity(envelope.recipients.len());
        for rcpt in &envelope.recipients {
            let mut child = Command::new(binary)
                .arg(rcpt)
                .stdin(std::process::Stdio::piped())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::piped())
                .spawn()
                .map_err(|e| Error::local_transient(format!("lda spawn: {e}")))?;

            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(data).await?;
            }
            let output = child
                .wait_with_output()
                .await
                .map_err(|e| Error::local_transient(format!("lda wait: {e}")))?;

            results.push(match output.status.code() {
                Some(0) => RecipientResult::Delivered,
                Some(75) => RecipientResult::Retry("LDA temporary failure".into()),
                _ => RecipientResult::Permanent(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ),
            });
        }
        Ok(results)
    }
}

fn classify_lmtp_reply(reply: &str) -> RecipientResult {
    match reply.as_bytes().first() {
        Some(b'2') => RecipientResult::Delivered,
        Some(b'4') => RecipientResult::Retry(reply.to_string()),
        _ => RecipientResult::Permanent(reply.to_string()),
    }
}

async fn send_line(stream: &mut TcpStream, line: &str) -> Result<(), Error> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    Ok(())
}

async fn read_reply(stream: &mut TcpStream) -> Result<String, Error> {
    let mut buf = Vec::new();
    let line = utils::lineio::read_line(stream, &mut buf, 4096, Duration::from_secs(30))
        .await?
        .ok_or_else(|| Error::local_transient("lmtp server closed connection"))?;
    Ok(String::from_utf8_lossy(&line).into_owned())
}

async fn read_multiline_reply(stream: &mut TcpStream) -> Result<(), Error> {
    loop {
        let line = read_reply(stream).await?;
        if line.len() < 4 || line.as_bytes()[3] != b'-' {
            return Ok(());
        }
    }
}

#[async_trait]
impl Processor for MailboxProcessor {
    fn name(&self) -> &'static str {
        "MailboxStorageProcessor"
    }

    fn reject_response(&self) -> &'static str {
        "451 4.3.0 mailbox delivery unavailable"
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        let artifact = match &envelope.body {
            Some(artifact) => artifact.clone(),
            None => return Ok(ProcessorOutcome::Continue),
        };
        let data = tokio::fs::read(artifact.path()).await?;

        let results = self.deliver(envelope, &data).await?;
        for (rcpt, result) in envelope.recipients.iter().zip(results.iter()) {
            let (verb, failed) = match result {
                RecipientResult::Delivered => ("LMTP-DELIVER", false),
                RecipientResult::Retry(_) => ("LMTP-RETRY", true),
                RecipientResult::Permanent(_) => ("LMTP-PERMFAIL", true),
            };
            envelope.record(verb, rcpt, failed);
        }

        if results.iter().all(|r| *r == RecipientResult::Delivered) {
            trc::event!(trc::EventType::MailboxDeliver, "recipients" = envelope.recipients.len());
            Ok(ProcessorOutcome::Continue)
        } else if results
            .iter()
            .any(|r| matches!(r, RecipientResult::Permanent(_)))
            && self.config.failure_behaviour == FailureBehaviour::Bounce
        {
            trc::event!(trc::EventType::MailboxError, "reason" = "permanent");
            Ok(ProcessorOutcome::RejectPermanent(self.reject_response().into()))
        } else {
            trc::event!(trc::EventType::MailboxError, "reason" = "transient");
            Ok(ProcessorOutcome::RejectTransient(self.reject_response().into()))
        }
    }
}
