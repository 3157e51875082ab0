/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Queue retry cron (§4.8, §8 E5). Runs at `queueInitialDelay`, then
//! every `queueInterval`, dequeuing up to `maxDequeuePerTick` items
//! whose `next_attempt_at <= now`. On permanent failure or
//! `attempt >= maxRetryCount`, a bounce is synthesized (if configured)
//! and the row is deleted; on success the row is deleted; on a
//! transient failure within budget the row is rescheduled.

use std::{sync::Arc, time::Duration};

use common::reload::{TimerToken, TimerWheel};
use store::queue::Queue;
use trc::Error;

use super::session::{RelayOutcome, RelaySession};

#[derive(Debug, Clone)]
pub struct CronConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub max_dequeue_per_tick: usize,
    pub max_retry_count: u32,
    pub retry_backoff: Duration,
    pub bounce_enabled: bool,
}

impl Default for CronConfig {
    fn default() -> Self {
        CronConfig {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(60),
            max_dequeue_per_tick: 50,
            max_retry_count: 5,
            retry_backoff: Duration::from_secs(300),
            bounce_enabled: true,
        }
    }
}

/// Generates a bounce message's envelope (MAIL FROM `<>`, RCPT TO the
/// original sender) — the cron only decides that one is due; handing
/// it back to the caller keeps this module free of any dependency on
/// the storage/ingestion stack.
#[derive(Debug, Clone)]
pub struct Bounce {
    pub original_sender: String,
    pub reason: String,
}

pub fn spawn(
    wheel: &TimerWheel,
    queue: Arc<dyn Queue>,
    config: CronConfig,
    on_bounce: impl Fn(Bounce) + Send + Sync + 'static,
) -> TimerToken {
    let on_bounce = Arc::new(on_bounce);
    wheel.schedule(config.initial_delay, config.interval, move || {
        let queue = queue.clone();
        let config = config.clone();
        let on_bounce = on_bounce.clone();
        async move {
            if let Err(e) = run_tick(&*queue, &config, &*on_bounce).await {
                trc::event!(trc::EventType::QueueBounce, "tick_error" = e.to_string());
            }
        }
    })
}

async fn run_tick(
    queue: &dyn Queue,
    config: &CronConfig,
    on_bounce: &(impl Fn(Bounce) + Send + Sync),
) -> Result<(), Error> {
    let now = now_millis();
    let items = queue.dequeue_ready(now, config.max_dequeue_per_tick).await?;
    trc::event!(trc::EventType::QueueDequeue, "count" = items.len());

    for item in items {
        let session: RelaySession = bincode::deserialize(&item.data)
            .map_err(|e| Error::local_permanent(format!("corrupt queue row {}: {e}", item.id)))?;
        let sender = session.sender.clone();

        match session.attempt().await? {
            RelayOutcome::Success => {
                queue.ack(item.id).await?;
            }
            RelayOutcome::Permanent(reason) => {
                if config.bounce_enabled && !sender.is_empty() {
                    on_bounce(Bounce {
                        original_sender: sender,
                        reason,
                    });
                }
                queue.ack(item.id).await?;
            }
            RelayOutcome::Transient(reason) => {
                if item.attempt_count + 1 >= config.max_retry_count {
                    if config.bounce_enabled && !sender.is_empty() {
                        on_bounce(Bounce {
                            original_sender: sender,
                            reason,
                        });
                    }
                    queue.ack(item.id).await?;
                } else {
                    let next = now + config.retry_backoff.as_millis() as i64;
                    queue
                        .reschedule(item.id, next, item.attempt_count + 1)
                        .await?;
                }
            }
        }
    }
    Ok(())
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
