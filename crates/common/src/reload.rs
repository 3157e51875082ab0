/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! A single cooperative timer wheel drives every background ticker —
//! queue cron, metrics push, configuration reload (§5, §9 "Scheduled
//! background tasks"). Cancellation is by shutting the whole wheel
//! down rather than per-ticker tokens, matching the one-scheduler-
//! per-process model the source assumes.

use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::{sync::watch, time::MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

pub struct TimerWheel {
    next_token: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TimerWheel {
    pub fn new() -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        TimerWheel {
            next_token: AtomicU64::new(1),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Schedules `task` to run every `interval`, first firing after
    /// `initial_delay`. Every call spawns against the wheel's one
    /// shutdown signal, so [`TimerWheel::shutdown`] stops the queue
    /// cron, metrics push, and config reload ticker together.
    pub fn schedule<F, Fut>(
        &self,
        initial_delay: Duration,
        interval: Duration,
        mut task: F,
    ) -> TimerToken
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let token = TimerToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => task().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        token
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn ticker_fires_repeatedly_until_shutdown() {
        let wheel = TimerWheel::new();
        let hits = Arc::new(AtomicU64::new(0));
        let counted = hits.clone();
        wheel.schedule(Duration::from_millis(1), Duration::from_millis(5), move || {
            let hits = counted.clone();
            async move {
                hits.fetch_add(1, Ordering::Relaxed);
            }
        });
        tokio::time::sleep(Duration::from_millis(40)).await;
        wheel.shutdown();
        assert!(hits.load(Ordering::Relaxed) >= 2);
    }
}
