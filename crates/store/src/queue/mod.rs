/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The persistent retry queue (§4.8, §3 "Queue item"). The queue is
//! the only shared writable store in the system: it serializes writes
//! internally and must tolerate a restart mid-operation, so `ack`
//! happens only after a delivery attempt genuinely succeeds — never
//! speculatively (§8 property 5, idempotence).

pub mod file;
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use trc::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: u64,
    /// Opaque serialization of the relay session, sufficient for
    /// reconstruction (§6 "Queue record").
    pub data: Vec<u8>,
    pub created_at: i64,
    pub attempt_count: u32,
    pub next_attempt_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    File,
    Postgres,
    MySql,
    Memory,
}

/// Storage contract every queue backend implements. Selection order
/// (§4.8): embedded file-backed primary, then MariaDB, then
/// PostgreSQL, then in-memory fallback — whichever is configured and
/// reachable at startup wins.
#[async_trait]
pub trait Queue: Send + Sync {
    async fn enqueue(&self, item: QueueItem) -> Result<u64, Error>;
    async fn dequeue_ready(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, Error>;
    async fn ack(&self, id: u64) -> Result<(), Error>;
    async fn reschedule(&self, id: u64, when_millis: i64, attempt_count: u32)
        -> Result<(), Error>;
    fn backend(&self) -> QueueBackend;
}
