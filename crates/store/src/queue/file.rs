/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! The primary, embedded queue backend: one file per item under a
//! base directory, named so the id is recoverable from the filename
//! alone. Restart-safe by construction — every write is `enqueue`
//! creating a file, or `ack` removing one; there is no in-place
//! mutation to tear mid-write except `reschedule`, which rewrites the
//! whole file (acceptable: at-least-once, never at-most-once).

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::fs;
use trc::Error;

use super::{Queue, QueueBackend, QueueItem};

pub struct FileQueue {
    base_dir: PathBuf,
    next_id: AtomicU64,
    write_lock: Mutex<()>,
}

impl FileQueue {
    pub async fn open(base_dir: impl AsRef<Path>) -> Result<Self, Error> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir).await?;
        let mut max_id = 0;
        let mut entries = fs::read_dir(&base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(id) = parse_id(&entry.file_name().to_string_lossy()) {
                max_id = max_id.max(id);
            }
        }
        Ok(FileQueue {
            base_dir,
            next_id: AtomicU64::new(max_id),
            write_lock: Mutex::new(()),
        })
    }

    fn path_for(&self, id: u64) -> PathBuf {
        self.base_dir.join(format!("{id:020}.queue"))
    }
}

fn parse_id(name: &str) -> Option<u64> {
    name.strip_suffix(".queue")?.parse().ok()
}

#[async_trait]
impl Queue for FileQueue {
    async fn enqueue(&self, mut item: QueueItem) -> Result<u64, Error> {
        let id = {
            let _guard = self.write_lock.lock();
            self.next_id.fetch_add(1, Ordering::SeqCst) + 1
        };
        item.id = id;
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::local_permanent(format!("queue serialize failed: {e}")))?;
        fs::write(self.path_for(id), bytes).await?;
        Ok(id)
    }

    async fn dequeue_ready(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, Error> {
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if out.len() >= limit {
                break;
            }
            if parse_id(&entry.file_name().to_string_lossy()).is_none() {
                continue;
            }
            let bytes = match fs::read(entry.path()).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            if let Ok(item) = bincode::deserialize::<QueueItem>(&bytes) {
                if item.next_attempt_at <= now {
                    out.push(item);
                }
            }
        }
        out.sort_by_key(|i| i.next_attempt_at);
        Ok(out)
    }

    async fn ack(&self, id: u64) -> Result<(), Error> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn reschedule(
        &self,
        id: u64,
        when_millis: i64,
        attempt_count: u32,
    ) -> Result<(), Error> {
        let path = self.path_for(id);
        let bytes = fs::read(&path).await?;
        let mut item: QueueItem = bincode::deserialize(&bytes)
            .map_err(|e| Error::local_permanent(format!("queue deserialize failed: {e}")))?;
        item.next_attempt_at = when_millis;
        item.attempt_count = attempt_count;
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::local_permanent(format!("queue serialize failed: {e}")))?;
        fs::write(&path, bytes).await?;
        Ok(())
    }

    fn backend(&self) -> QueueBackend {
        QueueBackend::File
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir();
        {
            let queue = FileQueue::open(&dir).await.unwrap();
            queue
                .enqueue(QueueItem {
                    id: 0,
                    data: b"hello".to_vec(),
                    created_at: 0,
                    attempt_count: 0,
                    next_attempt_at: 0,
                })
                .await
                .unwrap();
        }
        let queue = FileQueue::open(&dir).await.unwrap();
        let ready = queue.dequeue_ready(1, 10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].data, b"hello");
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let dir = tempdir();
        let queue = FileQueue::open(&dir).await.unwrap();
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
        queue.ack(id).await.unwrap();
        queue.ack(id).await.unwrap();
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("queue-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
