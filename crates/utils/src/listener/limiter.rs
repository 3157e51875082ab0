/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Connection/command/rate limits and the progressive tarpit, in the
//! order §4.9 evaluates admission controls.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

/// A pool-wide bound on concurrent connections. Cloning shares the
/// counter; dropping the [`InFlight`] guard releases a slot.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    max: Arc<AtomicUsize>,
    current: Arc<AtomicUsize>,
}

pub struct InFlight {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::Relaxed);
    }
}

impl ConcurrencyLimiter {
    pub fn new(max: usize) -> Self {
        ConcurrencyLimiter {
            max: Arc::new(AtomicUsize::new(max)),
            current: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.current.load(Ordering::Relaxed) > 0
    }

    /// Attempts to reserve a slot. `None` means the pool is at capacity
    /// (a 421/554 admission rejection should follow).
    pub fn try_acquire(&self) -> Option<InFlight> {
        let max = self.max.load(Ordering::Relaxed);
        if max == 0 {
            return Some(InFlight {
                current: self.current.clone(),
            });
        }
        loop {
            let current = self.current.load(Ordering::Relaxed);
            if current >= max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(InFlight {
                    current: self.current.clone(),
                });
            }
        }
    }
}

/// Sliding-window rate limiter: at most `limit` events per `window`.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    events: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        RateLimiter {
            limit,
            window,
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub fn check(&self) -> bool {
        let now = Instant::now();
        let mut events = self.events.lock();
        while let Some(&front) = events.front() {
            if now.duration_since(front) > self.window {
                events.pop_front();
            } else {
                break;
            }
        }
        if events.len() >= self.limit {
            false
        } else {
            events.push_back(now);
            true
        }
    }
}

/// Progressive tarpit: each successive violation from the same source
/// sleeps longer, up to `max_delay`, before the rejection response is
/// written.
pub struct Tarpit {
    base: Duration,
    max: Duration,
    violations: AtomicUsize,
}

impl Tarpit {
    pub fn new(base: Duration, max: Duration) -> Self {
        Tarpit {
            base,
            max,
            violations: AtomicUsize::new(0),
        }
    }

    pub fn next_delay(&self) -> Duration {
        let n = self.violations.fetch_add(1, Ordering::Relaxed) as u32;
        let scaled = self.base.saturating_mul(1 << n.min(10));
        scaled.min(self.max)
    }

    pub fn reset(&self) {
        self.violations.store(0, Ordering::Relaxed);
    }
}
