/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! AV daemon client (§2 "Scanners": stream scan) and the AV storage
//! processor that drives it (§4.5 `AVScan`). Speaks the clamd
//! `INSTREAM` protocol directly over a TCP socket — the same raw-line
//! idiom used for the Dovecot SASL socket.

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use trc::Error;

use crate::{
    envelope::{Envelope, ScanResult},
    storage::{Processor, ProcessorOutcome},
};

const CHUNK_SIZE: usize = 8192;

pub struct ClamdClient {
    pub addr: String,
}

impl ClamdClient {
    pub fn new(addr: impl Into<String>) -> Self {
        ClamdClient { addr: addr.into() }
    }

    /// Streams `data` to clamd using `INSTREAM` framing: each chunk is
    /// a 4-byte big-endian length prefix followed by the chunk bytes,
    /// terminated by a zero-length chunk.
    pub async fn scan(&self, data: &[u8]) -> Result<AvVerdict, Error> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| Error::local_transient(format!("clamd connect: {e}")))?;
        stream.write_all(b"zINSTREAM\0").await?;

        for chunk in data.chunks(CHUNK_SIZE) {
            stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
            stream.write_all(chunk).await?;
        }
        stream.write_all(&0u32.to_be_bytes()).await?;

        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await?;
        let reply = String::from_utf8_lossy(&reply);
        Ok(AvVerdict::parse(reply.trim_end_matches('\0').trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvVerdict {
    Clean,
    Infected(String),
}

impl AvVerdict {
    /// clamd replies `stream: OK` when clean, `stream: <name> FOUND`
    /// when infected.
    fn parse(reply: &str) -> Self {
        let body = reply.strip_prefix("stream:").unwrap_or(reply).trim();
        match body.strip_suffix("FOUND").map(str::trim) {
            Some(name) => AvVerdict::Infected(name.to_string()),
            None => AvVerdict::Clean,
        }
    }
}

pub struct AvProcessor {
    client: ClamdClient,
}

impl AvProcessor {
    pub fn new(client: ClamdClient) -> Self {
        AvProcessor { client }
    }
}

#[async_trait]
impl Processor for AvProcessor {
    fn name(&self) -> &'static str {
        "AVStorageProcessor"
    }

    fn reject_response(&self) -> &'static str {
        "554 5.7.1 virus rejected"
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        let artifact = match &envelope.body {
            Some(artifact) => artifact.clone(),
            None => return Ok(ProcessorOutcome::Continue),
        };
        let data = tokio::fs::read(artifact.path()).await?;
        trc::event!(trc::EventType::ScanStart, "scanner" = "clamd");
        let verdict = self.client.scan(&data).await?;
        match verdict {
            AvVerdict::Clean => {
                envelope.push_scan_result(ScanResult::Av {
                    scanner: "clamd".into(),
                    infected: false,
                    parts: vec![],
                    virus_names: vec![],
                });
                Ok(ProcessorOutcome::Continue)
            }
            AvVerdict::Infected(name) => {
                trc::event!(trc::EventType::ScanVirus, "virus" = name.clone());
                envelope.push_scan_result(ScanResult::Av {
                    scanner: "clamd".into(),
                    infected: true,
                    parts: vec![],
                    virus_names: vec![name],
                });
                Ok(ProcessorOutcome::RejectPermanent(self.reject_response().into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_reply() {
        assert_eq!(AvVerdict::parse("stream: OK"), AvVerdict::Clean);
    }

    #[test]
    fn parses_infected_reply() {
        assert_eq!(
            AvVerdict::parse("stream: Eicar-Test-Signature FOUND"),
            AvVerdict::Infected("Eicar-Test-Signature".into())
        );
    }
}
