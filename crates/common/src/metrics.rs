/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Pluggable counter registry (§2 "Metrics counters"). Every
//! subsystem increments named counters here rather than holding its
//! own atomics, so the Prometheus remote-write encoder and Graphite
//! shipper (external collaborators, §1) can enumerate and ship them
//! uniformly without this crate knowing either exists.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

#[derive(Default)]
pub struct Metrics {
    counters: DashMap<&'static str, AtomicU64>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub fn incr(&self, name: &'static str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &'static str, delta: u64) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// A point-in-time snapshot suitable for handing to a remote-write
    /// encoder or health endpoint.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect()
    }
}

/// Well-known counter names referenced across the core.
pub mod names {
    pub const AV_REJECTIONS: &str = "storage.av_rejections";
    pub const SPAM_REJECTIONS: &str = "storage.spam_rejections";
    pub const SLOW_TRANSFER: &str = "session.slow_transfer";
    pub const RATE_LIMIT_REJECT: &str = "listener.rate_limit_reject";
    pub const CONN_LIMIT_REJECT: &str = "listener.conn_limit_reject";
    pub const BLOCKLIST_REJECT: &str = "listener.blocklist_reject";
    pub const TARPIT_DELAY: &str = "listener.tarpit_delay";
    pub const COMMAND_FLOOD_REJECT: &str = "listener.command_flood_reject";
    pub const QUEUE_BOUNCE: &str = "queue.bounce";
    pub const QUEUE_RETRY: &str = "queue.retry";
    pub const RELAY_SUCCESS: &str = "relay.success";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_accumulate() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get(names::AV_REJECTIONS), 0);
        metrics.incr(names::AV_REJECTIONS);
        metrics.incr_by(names::AV_REJECTIONS, 2);
        assert_eq!(metrics.get(names::AV_REJECTIONS), 3);
    }

    #[test]
    fn snapshot_reflects_all_touched_counters() {
        let metrics = Metrics::new();
        metrics.incr(names::SLOW_TRANSFER);
        metrics.incr(names::QUEUE_BOUNCE);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
    }
}
