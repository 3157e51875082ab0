/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The fallback backend when neither an embedded file store nor a SQL
//! connection could be established. No durability across restarts;
//! intended for tests and last-resort degraded operation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use trc::Error;

use super::{Queue, QueueBackend, QueueItem};

#[derive(Default)]
pub struct MemoryQueue {
    items: Mutex<Vec<QueueItem>>,
    next_id: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    async fn enqueue(&self, mut item: QueueItem) -> Result<u64, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        item.id = id;
        self.items.lock().push(item);
        Ok(id)
    }

    async fn dequeue_ready(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, Error> {
        let items = self.items.lock();
        Ok(items
            .iter()
            .filter(|i| i.next_attempt_at <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ack(&self, id: u64) -> Result<(), Error> {
        self.items.lock().retain(|i| i.id != id);
        Ok(())
    }

    async fn reschedule(
        &self,
        id: u64,
        when_millis: i64,
        attempt_count: u32,
    ) -> Result<(), Error> {
        let mut items = self.items.lock();
        if let Some(item) = items.iter_mut().find(|i| i.id == id) {
            item.next_attempt_at = when_millis;
            item.attempt_count = attempt_count;
        }
        Ok(())
    }

    fn backend(&self) -> QueueBackend {
        QueueBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_dequeue_ready() {
        let queue = MemoryQueue::new();
        let id = queue
            .enqueue(QueueItem {
                id: 0,
                data: vec![1, 2, 3],
                created_at: 0,
                attempt_count: 0,
                next_attempt_at: 100,
            })
            .await
            .unwrap();

        assert!(queue.dequeue_ready(50, 10).await.unwrap().is_empty());
        let ready = queue.dequeue_ready(100, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, id);

        queue.ack(id).await.unwrap();
        assert!(queue.dequeue_ready(100, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reschedule_updates_next_attempt() {
        let queue = MemoryQueue::new();
        let id = queue
            .enqueue(QueueItem {
                id: 0,
                data: vec![],
                created_at: 0,
                attempt_count: 0,
                next_attempt_at: 0,
            })
            .await
            .unwrap();
        queue.reschedule(id, 5_000, 1).await.unwrap();
        assert!(queue.dequeue_ready(1_000, 10).await.unwrap().is_empty());
        let ready = queue.dequeue_ready(5_000, 10).await.unwrap();
        assert_eq!(ready[0].attempt_count, 1);
    }
}
