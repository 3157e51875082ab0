/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Twitter-snowflake-style monotonic id generator: `epoch_ms << 22 |
/// node_id << 12 | sequence`. Used for session ids, envelope ids, and
/// queue item ids — all need to sort roughly by creation time without
/// a central counter.
pub struct SnowflakeIdGenerator {
    node_id: u64,
    counter: AtomicU64,
}

const EPOCH_MS: u64 = 1_700_000_000_000;

impl SnowflakeIdGenerator {
    pub fn with_node_id(node_id: u64) -> Self {
        SnowflakeIdGenerator {
            node_id: node_id & 0x3FF,
            counter: AtomicU64::new(0),
        }
    }

    pub fn generate(&self) -> u64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
            .saturating_sub(EPOCH_MS);
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) & 0xFFF;
        (now << 22) | (self.node_id << 12) | seq
    }
}

impl Default for SnowflakeIdGenerator {
    fn default() -> Self {
        Self::with_node_id(0)
    }
}

impl Clone for SnowflakeIdGenerator {
    fn clone(&self) -> Self {
        SnowflakeIdGenerator {
            node_id: self.node_id,
            counter: AtomicU64::new(self.counter.load(Ordering::Relaxed)),
        }
    }
}
