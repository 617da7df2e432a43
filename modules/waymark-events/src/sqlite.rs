//! Durable buffer backed by an embedded SQLite table.
//!
//! Rows are keyed by an auto-incrementing id. A drain deletes and returns rows
//! in a single statement inside a transaction, so concurrent drains never hand
//! out the same record twice. A row that no longer decodes is dropped with an
//! error rather than left at the head of the queue.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use tracing::{debug, error};

use crate::error::BufferError;
use crate::store::BufferStore;
use crate::types::{BufferRecord, DestinationId, Event, Parameters};

// ---------------------------------------------------------------------------
// SqliteBuffer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteBuffer {
    pool: SqlitePool,
}

impl SqliteBuffer {
    /// Open (or create) a buffer file on disk.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Private in-memory database. Lives as long as this buffer (and its clones).
    pub async fn in_memory() -> Result<Self, BufferError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        // Every connection to :memory: is its own database, so pin exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await?;

        Self::from_pool(pool).await
    }

    /// Connect with a sqlx URL, e.g. `sqlite://buffer.db?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self, BufferError> {
        let pool = SqlitePool::connect(url).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool. Creates the table if it does not exist yet.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, BufferError> {
        let buffer = Self { pool };
        buffer.migrate().await?;
        Ok(buffer)
    }

    async fn migrate(&self) -> Result<(), BufferError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buffer_records (
                id           INTEGER  PRIMARY KEY AUTOINCREMENT,
                destination  TEXT     NOT NULL,
                event_name   TEXT     NOT NULL,
                parameters   BLOB     NOT NULL,
                timestamp    INTEGER  NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS buffer_records_timestamp ON buffer_records (timestamp, id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close every pooled connection. Pending records stay on disk.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Delete every buffered record.
    pub async fn clear(&self) -> Result<(), BufferError> {
        sqlx::query("DELETE FROM buffer_records")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl BufferStore for SqliteBuffer {
    async fn save(&self, records: Vec<BufferRecord>) -> Result<(), BufferError> {
        if records.is_empty() {
            return Ok(());
        }

        // Encode everything up front so a bad record never opens a transaction.
        let rows = records
            .iter()
            .map(|record| -> Result<_, BufferError> {
                record.check_storable()?;
                let timestamp = record
                    .timestamp
                    .timestamp_nanos_opt()
                    .ok_or(BufferError::Timestamp(record.timestamp))?;
                let parameters = serde_json::to_vec(record.event.parameters())?;
                Ok((record, parameters, timestamp))
            })
            .collect::<Result<Vec<_>, BufferError>>()?;

        let mut tx = self.pool.begin().await?;
        for (record, parameters, timestamp) in rows {
            sqlx::query(
                r#"
                INSERT INTO buffer_records (destination, event_name, parameters, timestamp)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(record.destination.as_str())
            .bind(record.event.name())
            .bind(parameters)
            .bind(timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(records = records.len(), "Buffered records");
        Ok(())
    }

    async fn load(&self, limit: Option<usize>) -> Result<Vec<BufferRecord>, BufferError> {
        // SQLite treats a negative LIMIT as "no limit".
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

        let mut tx = self.pool.begin().await?;
        let mut rows = sqlx::query_as::<_, BufferRow>(
            r#"
            DELETE FROM buffer_records
            WHERE id IN (
                SELECT id FROM buffer_records
                ORDER BY timestamp ASC, id ASC
                LIMIT $1
            )
            RETURNING id, destination, event_name, parameters, timestamp
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        // RETURNING order is unspecified.
        rows.sort_by_key(|row| (row.timestamp, row.id));

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match row.into_record() {
                Ok(record) => records.push(record),
                Err(e) => error!(row = id, error = %e, "Dropping undecodable buffered record"),
            }
        }
        tx.commit().await?;

        debug!(records = records.len(), "Drained records from buffer");
        Ok(records)
    }

    async fn count(&self) -> Result<usize, BufferError> {
        let row = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM buffer_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(row.0).unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

struct BufferRow {
    id: i64,
    destination: String,
    event_name: String,
    parameters: Vec<u8>,
    timestamp: i64,
}

impl BufferRow {
    fn into_record(self) -> Result<BufferRecord, BufferError> {
        let parameters: Parameters = serde_json::from_slice(&self.parameters)?;
        Ok(BufferRecord::new(
            DestinationId::from(self.destination),
            Event::with_parameters(self.event_name, parameters),
            DateTime::from_timestamp_nanos(self.timestamp),
        ))
    }
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for BufferRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(BufferRow {
            id: row.try_get("id")?,
            destination: row.try_get("destination")?,
            event_name: row.try_get("event_name")?,
            parameters: row.try_get("parameters")?,
            timestamp: row.try_get("timestamp")?,
        })
    }
}
