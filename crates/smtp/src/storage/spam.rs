/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Spam daemon client (§2 "Scanners": HTTP scan) and the spam storage
//! processor that drives it (§4.5 `SpamScan`). Speaks a rspamd-style
//! `checkv2` HTTP contract: POST the raw message, get back a JSON
//! verdict with a score and a symbol map.

use ahash::AHashMap;
use async_trait::async_trait;
use serde::Deserialize;
use trc::Error;

use crate::{
    envelope::{Envelope, ScanResult},
    storage::{Processor, ProcessorOutcome},
};

pub struct SpamdClient {
    pub url: String,
    pub threshold: f32,
    client: reqwest::Client,
}

impl SpamdClient {
    pub fn new(url: impl Into<String>, threshold: f32) -> Self {
        SpamdClient {
            url: url.into(),
            threshold,
            client: reqwest::Client::new(),
        }
    }

    pub async fn scan(&self, data: &[u8]) -> Result<SpamVerdict, Error> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(data.to_vec())
            .send()
            .await
            .map_err(|e| Error::local_transient(format!("spamd call failed: {e}")))?;
        let body: SpamdResponse = response
            .json()
            .await
            .map_err(|e| Error::local_transient(format!("spamd response decode failed: {e}")))?;
        Ok(SpamVerdict {
            spam: body.score >= self.threshold,
            score: body.score,
            symbols: body.symbols.into_keys().map(|k| (k, 1.0)).collect(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SpamdResponse {
    score: f32,
    #[serde(default)]
    symbols: AHashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpamVerdict {
    pub spam: bool,
    pub score: f32,
    pub symbols: AHashMap<String, f32>,
}

pub struct SpamProcessor {
    client: SpamdClient,
}

impl SpamProcessor {
    pub fn new(client: SpamdClient) -> Self {
        SpamProcessor { client }
    }
}

#[async_trait]
impl Processor for SpamProcessor {
    fn name(&self) -> &'static str {
        "SpamStorageProcessor"
    }

    fn reject_response(&self) -> &'static str {
        "550 5.7.1 message filtered as spam"
    }

    async fn process(&self, envelope: &mut Envelope) -> Result<ProcessorOutcome, Error> {
        let artifact = match &envelope.body {
            Some(artifact) => artifact.clone(),
            None => return Ok(ProcessorOutcome::Continue),
        };
        let data = tokio::fs::read(artifact.path()).await?;
        trc::event!(trc::EventType::ScanStart, "scanner" = "spamd");
        let verdict = self.client.scan(&data).await?;
        envelope.push_scan_result(ScanResult::Spam {
            scanner: "spamd".into(),
            score: verdict.score,
            spam: verdict.spam,
            symbols: verdict.symbols.clone(),
        });
        if verdict.spam {
            trc::event!(trc::EventType::ScanSpam, "score" = verdict.score);
            Ok(ProcessorOutcome::RejectPermanent(self.reject_response().into()))
        } else {
            Ok(ProcessorOutcome::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_flags_spam_at_threshold() {
        let verdict = SpamVerdict {
            spam: 12.0 >= 8.0,
            score: 12.0,
            symbols: AHashMap::new(),
        };
        assert!(verdict.spam);
    }
}
