/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! PostgreSQL-backed queue, schema per §6: `(id bigserial PK, data
//! bytea, created_at timestamp default now)`, extended with the two
//! columns the retry cron needs to find ready work without a
//! secondary index scan.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use trc::Error;

use super::{Queue, QueueBackend, QueueItem};

pub struct PostgresQueue {
    pool: Pool,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS relay_queue (
    id BIGSERIAL PRIMARY KEY,
    data BYTEA NOT NULL,
    created_at BIGINT NOT NULL,
    attempt_count INT NOT NULL DEFAULT 0,
    next_attempt_at BIGINT NOT NULL
)";

impl PostgresQueue {
    pub async fn connect(pool: Pool) -> Result<Self, Error> {
        let client = pool
            .get()
            .await
            .map_err(|e| Error::local_transient(format!("postgres pool: {e}")))?;
        client
            .batch_execute(SCHEMA)
            .await
            .map_err(|e| Error::local_permanent(format!("postgres schema: {e}")))?;
        Ok(PostgresQueue { pool })
    }
}

#[async_trait]
impl Queue for PostgresQueue {
    async fn enqueue(&self, item: QueueItem) -> Result<u64, Error> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        let row = client
            .query_one(
                "INSERT INTO relay_queue (data, created_at, attempt_count, next_attempt_at)
                 VALUES ($1, $2, $3, $4) RETURNING id",
                &[
                    &item.data,
                    &item.created_at,
                    &(item.attempt_count as i32),
                    &item.next_attempt_at,
                ],
            )
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        let id: i64 = row.get(0);
        Ok(id as u64)
    }

    async fn dequeue_ready(&self, now: i64, limit: usize) -> Result<Vec<QueueItem>, Error> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        let rows = client
            .query(
                "SELECT id, data, created_at, attempt_count, next_attempt_at FROM relay_queue
                 WHERE next_attempt_at <= $1 ORDER BY next_attempt_at ASC LIMIT $2",
                &[&now, &(limit as i64)],
            )
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| QueueItem {
                id: row.get::<_, i64>(0) as u64,
                data: row.get(1),
                created_at: row.get(2),
                attempt_count: row.get::<_, i32>(3) as u32,
                next_attempt_at: row.get(4),
            })
            .collect())
    }

    async fn ack(&self, id: u64) -> Result<(), Error> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        client
            .execute("DELETE FROM relay_queue WHERE id = $1", &[&(id as i64)])
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
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        client
            .execute(
                "UPDATE relay_queue SET next_attempt_at = $1, attempt_count = $2 WHERE id = $3",
                &[&when_millis, &(attempt_count as i32), &(id as i64)],
            )
            .await
            .map_err(|e| Error::local_transient(e.to_string()))?;
        Ok(())
    }

    fn backend(&self) -> QueueBackend {
        QueueBackend::Postgres
    }
}
