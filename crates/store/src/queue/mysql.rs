/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! MariaDB/MySQL-backed queue, same logical schema as the PostgreSQL
//! backend but with `longblob`/`bigint` column types (§6).

use async_trait::async_trait;
use mysql_async::{prelude::*, Pool};
use trc::Error;

use super::{Queue, QueueBackend, QueueItem};

pub struct MySqlQueue {
    pool: Pool,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS relay_queue (
    id BIGINT UNSIGNED PRIMARY KEY AUTO_INCREMENT,
    data LONGBLOB NOT NULL,
    created_at BIGINT NOT NULL,
    attempt_count INT NOT NULL DEFAULT 0,
    next_attempt_at BIGINT NOT NULL
)";

impl MySqlQueue {
    pub async fn connect(pool: Pool) -> Result<Self, Error> {
        let mut conn = pool
            .get_conn()
            .await
            .map_err(|e| Error::local_transient(format!("mysql pool: {e}")))?;
        conn.query_drop(SCHEMA)
            .await
            .map_err(|e| Error::local_permanent(format!("mysql schema: {e}")))?;
        Ok(MySqlQueue { pool })
    }
}

#[async_trait]
impl Queue for MySqlQueue {
    async fn enqueue(&self, item: QueueItem) -> Result<u64, Error> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        conn.exec_drop(
            "INSERT INTO relay_queue (data, created_at, attempt_count, next_attempt_at)
             VALUES (?, ?, ?, ?)",
            (item.data, item.created_at, item.attempt_count, item.next_attempt_at),
        )
        .await
        .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(conn.last_insert_id().unwrap_or(0))
    }

    async fn dequeue_ready(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, Error> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        let rows: Vec<(u64, Vec<u8>, i64, u32, i64)> = conn
            .exec(
                "SELECT id, data, created_at, attempt_count, next_attempt_at FROM relay_queue
                 WHERE next_attempt_at <= ? ORDER BY next_attempt_at ASC LIMIT ?",
                (now, limit as u64),
            )
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|(id, data, created_at, attempt_count, next_attempt_at)| QueueItem {
                id,
                data,
                created_at,
                attempt_count,
                next_attempt_at,
            })
            .collect())
    }

    async fn ack(&self, id: u64) -> Result<(), Error> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        conn.exec_drop("DELETE FROM relay_queue WHERE id = ?", (id,))
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: u64,
        when_millis: i64,
        attempt_count: u32,
    ) -> Result<(), Error> {
        let mut conn = self
            .pool
            .get_conn()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        conn.exec_drop(
            "UPDATE relay_queue SET next_attempt_at = ?, attempt_count = ? WHERE id = ?",
            (when_millis, attempt_count, id),
        )
        .await
        .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(())
    }

    fn backend(&self) -> QueueBackend {
        QueueBackend::MySql
    }
}
