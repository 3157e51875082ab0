/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! DATA and BDAT/CHUNKING (§4.3, §6). Both terminate in the same
//! place: the accumulated body is written to a [`BodyArtifact`] and
//! run through the storage chain (§4.5). BDAT additionally accepts
//! chunks across multiple commands, only running the chain once the
//! `LAST` flag is seen.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use trc::Error;

use crate::{
    bots::BotExecutor,
    envelope::BodyArtifact,
    relay::RelayDispatch,
    session::{Session, State},
    storage::{Chain, ProcessorOutcome},
};

async fn write_artifact(
    session: &Session,
    envelope_id: u64,
    data: &[u8],
    spool_dir: &std::path::Path,
) -> Result<BodyArtifact, Error> {
    tokio::fs::create_dir_all(spool_dir).await?;
    let path: PathBuf = spool_dir.join(format!("{}.{}.eml", session.id, envelope_id));
    tokio::fs::write(&path, data).await?;
    let sha256 = hex::encode(Sha256::digest(data));
    Ok(BodyArtifact::new(path, data.len() as u64, sha256, true))
}

/// Resolves and enqueues any recipient not delivered locally, logging
/// rather than failing the envelope on a resolution error — a dead
/// remote domain shouldn't undo local delivery or the scan that already
/// ran for the other recipients (§2 "storage processors (sync) ->
/// bots/queue (async) -> relay pipeline").
async fn dispatch_remote_recipients(
    session: &Session,
    envelope: &crate::envelope::Envelope,
    remote_recipients: &[String],
    relay: &RelayDispatch,
) {
    let Some(artifact) = envelope.body.as_ref() else { return };
    for recipient in remote_recipients {
        let outcome = relay
            .enqueue(&*session.core.queue, &envelope.sender, recipient, artifact.path())
            .await;
        match outcome {
            Ok(()) => trc::event!(trc::EventType::RelayAttempt, "queued_for" = recipient.clone()),
            Err(e) => trc::event!(trc::EventType::RelayTransientFailure, "reason" = e.message),
        }
    }
}

/// Runs the committed envelope's body through the storage chain and
/// returns the final SMTP response, advancing the session back to
/// `Ehloed` on both success and chain-rejected paths (§4.2). Recipients
/// outside the configured local domains are stripped before the chain
/// runs (so mailbox delivery never sees them) and handed to the relay
/// pipeline instead (§4.7, §4.8).
async fn finish_envelope(
    session: &mut Session,
    data: Vec<u8>,
    spool_dir: &std::path::Path,
    chain: &Chain,
    relay: &RelayDispatch,
    bots: &BotExecutor,
) -> Result<String, Error> {
    if data.len() as u64 > session.core.limits.message_size_limit {
        session.reset_envelope();
        let response = "552 5.3.4 message size exceeds fixed limit".to_string();
        session.record("DATA", &response, true);
        return Ok(response);
    }

    session.commit_envelope()?;
    let envelope = session.envelopes.last_mut().expect("just committed");
    let artifact = write_artifact(session, envelope.id, &data, spool_dir).await?;
    envelope.body = Some(artifact);

    let (local_recipients, remote_recipients) = relay.partition(&envelope.recipients);
    envelope.recipients = local_recipients;

    let outcome = chain.run(envelope).await?;
    let response = match outcome {
        ProcessorOutcome::Continue => "250 2.0.0 message accepted".to_string(),
        ProcessorOutcome::Discard => "250 2.0.0 message accepted".to_string(),
        ProcessorOutcome::RejectPermanent(reason) => reason,
        ProcessorOutcome::RejectTransient(reason) => reason,
    };
    let failed = !response.starts_with('2');
    session.record("DATA", &response, failed);

    if !failed {
        let envelope = session.envelopes.last().expect("just committed");
        if !remote_recipients.is_empty() {
            dispatch_remote_recipients(session, envelope, &remote_recipients, relay).await;
        }
        bots.schedule(session, envelope);
    }

    session.after_commit();
    Ok(response)
}

pub async fn handle_data(
    session: &mut Session,
    body: Vec<u8>,
    spool_dir: &std::path::Path,
    chain: &Chain,
    relay: &RelayDispatch,
    bots: &BotExecutor,
) -> Result<String, Error> {
    if let Some(overridden) = super::resolve_verb_override(session, "DATA").await? {
        session.reset_envelope();
        session.record("DATA", &overridden, !overridden.starts_with('2'));
        return Ok(overridden);
    }
    if session.current.is_none() || session.state == State::Greeted || session.state == State::Ehloed {
        return Err(Error::protocol(503, "5.5.1", "RCPT required before DATA"));
    }
    trc::event!(trc::EventType::DataStart);
    let response = finish_envelope(session, body, spool_dir, chain, relay, bots).await?;
    trc::event!(trc::EventType::DataEnd);
    Ok(response)
}

/// `chunk` is one BDAT command's payload; `last` is true on the final
/// chunk (§4.3 "BDAT ... LAST"). Intermediate chunks are acknowledged
/// individually; only the last one runs the storage chain.
pub async fn handle_bdat(
    session: &mut Session,
    chunk: Vec<u8>,
    last: bool,
    pending: &mut Vec<u8>,
    spool_dir: &std::path::Path,
    chain: &Chain,
    relay: &RelayDispatch,
    bots: &BotExecutor,
) -> Result<String, Error> {
    pending.extend_from_slice(&chunk);
    trc::event!(trc::EventType::BdatChunk, "bytes" = chunk.len());
    if !last {
        return Ok(format!("250 2.0.0 {} bytes received", chunk.len()));
    }
    let body = std::mem::take(pending);
    let response = finish_envelope(session, body, spool_dir, chain, relay, bots).await?;
    Ok(response)
}
