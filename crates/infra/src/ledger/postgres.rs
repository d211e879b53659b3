//! Postgres-backed ledger store.
//!
//! ## Error mapping
//!
//! | SQLx error | Code | `LedgerStoreError` |
//! |------------|------|--------------------|
//! | unique violation | `23505` | `Concurrency` (another writer took the sequence number) |
//! | check violation | `23514` | `InvalidAppend` |
//! | other database error | any | `Unavailable` |
//! | pool closed, io, timeout | n/a | `Unavailable` |
//!
//! ## Ordering
//!
//! Appends take a transaction-scoped advisory lock before reading the stream
//! version. Positions (`BIGSERIAL`) are therefore committed in the order they
//! are assigned, and a reader tailing with `read_after` never sees position
//! `n + 1` before `n` is visible.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::instrument;
use uuid::Uuid;

use stockroom_core::{ExpectedVersion, LocationId, MaterialId, MovementId, UserId};
use stockroom_inventory::{MovementKind, MovementRecord, MovementRecorded, StockKey};

use super::query::{LedgerFilter, LedgerOrdering, LedgerPage, Pagination};
use super::{LedgerStore, LedgerStoreError, validate_batch};

const SCHEMA: &str = include_str!("schema.sql");

/// Advisory lock key serializing ledger appends.
const APPEND_LOCK_KEY: i64 = 0x5354_4f43_4b4c_4447;

const SELECT_COLUMNS: &str = "position, id, sequence_number, material_id, location_id, entry_type, \
     quantity, worker_name, reason, user_id, idempotency_key, created_at";

#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
    /// Runtime the pool was created on, for callers on plain threads.
    runtime: Option<Handle>,
}

impl PostgresLedgerStore {
    /// Must be called inside the tokio runtime that owns `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            runtime: Handle::try_current().ok(),
        }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, LedgerStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger table and indexes if missing.
    pub async fn migrate(&self) -> Result<(), LedgerStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, entries),
        fields(stream = %key, entries = entries.len(), expected = ?expected),
        err
    )]
    pub async fn append_entries(
        &self,
        key: StockKey,
        entries: Vec<MovementRecorded>,
        expected: ExpectedVersion,
    ) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        if entries.is_empty() {
            return Ok(vec![]);
        }
        validate_batch(key, &entries)?;

        let stream_id = *key.stream_id().as_uuid();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("advisory_lock", e))?;

        let current = stream_version(&mut tx, stream_id).await?;
        if !expected.matches(current) {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(LedgerStoreError::Concurrency(format!(
                "stream {key}: expected {expected:?}, found {current}"
            )));
        }

        if let Some(token) = entries[0].idempotency_key {
            let seen: Option<i64> = sqlx::query_scalar(
                "SELECT position FROM inventory_entries WHERE idempotency_key = $1 LIMIT 1",
            )
            .bind(token)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("check_idempotency_key", e))?;
            if seen.is_some() {
                tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(LedgerStoreError::DuplicateIdempotencyKey(token));
            }
        }

        let mut created_at = next_created_at(&mut tx).await?;
        let mut committed = Vec::with_capacity(entries.len());
        for (offset, entry) in entries.into_iter().enumerate() {
            let sequence_number = current + offset as u64 + 1;
            let position: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO inventory_entries (
                    id, stream_id, sequence_number, material_id, location_id, entry_type,
                    quantity, worker_name, reason, user_id, idempotency_key, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING position
                "#,
            )
            .bind(entry.movement_id.as_uuid())
            .bind(stream_id)
            .bind(sequence_number as i64)
            .bind(entry.material_id.as_uuid())
            .bind(entry.location_id.as_uuid())
            .bind(entry.kind.as_str())
            .bind(entry.quantity)
            .bind(entry.worker_name.as_deref())
            .bind(entry.reason.as_deref())
            .bind(entry.user_id.as_uuid())
            .bind(entry.idempotency_key)
            .bind(created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_entry", e))?;

            committed.push(entry.commit(sequence_number, position as u64, created_at));
            created_at += Duration::microseconds(1);
        }

        tx.commit().await.map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(committed)
    }

    #[instrument(skip(self), fields(stream = %key), err)]
    pub async fn load_entries(&self, key: StockKey) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_entries WHERE stream_id = $1 ORDER BY sequence_number ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(key.stream_id().as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_stream", e))?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn query_entries(
        &self,
        filter: &LedgerFilter,
        ordering: LedgerOrdering,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        const WHERE: &str = r#"
            WHERE ($1::uuid IS NULL OR material_id = $1)
              AND ($2::uuid IS NULL OR location_id = $2)
              AND ($3::text IS NULL OR entry_type = $3)
              AND ($4::timestamptz IS NULL OR created_at >= $4)
              AND ($5::timestamptz IS NULL OR created_at <= $5)
        "#;
        let material = filter.material_id.map(|m| *m.as_uuid());
        let location = filter.location_id.map(|l| *l.as_uuid());
        let kind = filter.kind.map(MovementKind::as_str);

        let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM inventory_entries {WHERE}"))
            .bind(material)
            .bind(location)
            .bind(kind)
            .bind(filter.created_after)
            .bind(filter.created_before)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_entries", e))?;

        let direction = match ordering {
            LedgerOrdering::OldestFirst => "ASC",
            LedgerOrdering::NewestFirst => "DESC",
        };
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_entries {WHERE} ORDER BY position {direction} LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query(&sql)
            .bind(material)
            .bind(location)
            .bind(kind)
            .bind(filter.created_after)
            .bind(filter.created_before)
            .bind(i64::from(pagination.limit))
            .bind(i64::from(pagination.offset))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("query_entries", e))?;

        Ok(LedgerPage {
            records: rows.iter().map(record_from_row).collect::<Result<_, _>>()?,
            total: total as u64,
            pagination,
        })
    }

    pub async fn entries_after(&self, after: u64, limit: usize) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_entries WHERE position > $1 ORDER BY position ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(after as i64)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("read_after", e))?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn entries_for_idempotency_key(&self, token: Uuid) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM inventory_entries WHERE idempotency_key = $1 ORDER BY position ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(token)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn max_position(&self) -> Result<u64, LedgerStoreError> {
        let head: Option<i64> = sqlx::query_scalar("SELECT MAX(position) FROM inventory_entries")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("head_position", e))?;
        Ok(head.unwrap_or(0) as u64)
    }
}

async fn stream_version(tx: &mut Transaction<'_, Postgres>, stream_id: Uuid) -> Result<u64, LedgerStoreError> {
    let current: Option<i64> =
        sqlx::query_scalar("SELECT MAX(sequence_number) FROM inventory_entries WHERE stream_id = $1")
            .bind(stream_id)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("stream_version", e))?;
    Ok(current.unwrap_or(0) as u64)
}

/// Database clock, bumped past the newest entry so timestamps never repeat.
async fn next_created_at(tx: &mut Transaction<'_, Postgres>) -> Result<DateTime<Utc>, LedgerStoreError> {
    let row = sqlx::query(
        r#"
        SELECT
            clock_timestamp() AS now,
            (SELECT created_at FROM inventory_entries ORDER BY position DESC LIMIT 1) AS last
        "#,
    )
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("next_created_at", e))?;

    let now: DateTime<Utc> = row.try_get("now").map_err(|e| map_sqlx_error("next_created_at", e))?;
    let last: Option<DateTime<Utc>> = row.try_get("last").map_err(|e| map_sqlx_error("next_created_at", e))?;
    Ok(match last {
        Some(last) if now <= last => last + Duration::microseconds(1),
        _ => now,
    })
}

fn record_from_row(row: &PgRow) -> Result<MovementRecord, LedgerStoreError> {
    let decode = |e: sqlx::Error| LedgerStoreError::Unavailable(format!("failed to decode ledger row: {e}"));

    let entry_type: String = row.try_get("entry_type").map_err(decode)?;
    let kind = MovementKind::from_str(&entry_type)
        .map_err(|e| LedgerStoreError::Unavailable(format!("failed to decode ledger row: {e}")))?;
    let position: i64 = row.try_get("position").map_err(decode)?;
    let sequence_number: i64 = row.try_get("sequence_number").map_err(decode)?;

    Ok(MovementRecord {
        id: MovementId::from_uuid(row.try_get("id").map_err(decode)?),
        material_id: MaterialId::from_uuid(row.try_get("material_id").map_err(decode)?),
        location_id: LocationId::from_uuid(row.try_get("location_id").map_err(decode)?),
        kind,
        quantity: row.try_get("quantity").map_err(decode)?,
        worker_name: row.try_get("worker_name").map_err(decode)?,
        reason: row.try_get("reason").map_err(decode)?,
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(decode)?),
        idempotency_key: row.try_get("idempotency_key").map_err(decode)?,
        sequence_number: sequence_number as u64,
        position: position as u64,
        created_at: row.try_get("created_at").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerStoreError::Concurrency(msg),
                Some("23514") => LedgerStoreError::InvalidAppend(msg),
                _ => LedgerStoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolClosed => LedgerStoreError::Unavailable(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => LedgerStoreError::Unavailable(format!("connection pool timed out in {operation}")),
        other => LedgerStoreError::Unavailable(format!("sqlx error in {operation}: {other}")),
    }
}

impl PostgresLedgerStore {
    /// Drive an async store call from the synchronous `LedgerStore` trait.
    ///
    /// - inside a multi-threaded runtime the worker is parked with `block_in_place`
    /// - on a plain thread (refresh worker) the owning runtime's handle is used
    /// - inside a current-thread runtime the call is refused
    fn block_on<F, T>(&self, fut: F) -> Result<T, LedgerStoreError>
    where
        F: Future<Output = Result<T, LedgerStoreError>>,
    {
        match Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::CurrentThread => Err(LedgerStoreError::Unavailable(
                "PostgresLedgerStore needs a multi-threaded tokio runtime".to_string(),
            )),
            Ok(handle) => tokio::task::block_in_place(|| handle.block_on(fut)),
            Err(_) => match &self.runtime {
                Some(handle) => handle.block_on(fut),
                None => Err(LedgerStoreError::Unavailable(
                    "PostgresLedgerStore was created outside a tokio runtime".to_string(),
                )),
            },
        }
    }
}

impl LedgerStore for PostgresLedgerStore {
    fn append_atomic(
        &self,
        key: StockKey,
        entries: Vec<MovementRecorded>,
        expected: ExpectedVersion,
    ) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        self.block_on(self.append_entries(key, entries, expected))
    }

    fn load_stream(&self, key: StockKey) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        self.block_on(self.load_entries(key))
    }

    fn query(
        &self,
        filter: &LedgerFilter,
        ordering: LedgerOrdering,
        pagination: Pagination,
    ) -> Result<LedgerPage, LedgerStoreError> {
        self.block_on(self.query_entries(filter, ordering, pagination))
    }

    fn read_after(&self, after: u64, limit: usize) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        self.block_on(self.entries_after(after, limit))
    }

    fn find_by_idempotency_key(&self, key: Uuid) -> Result<Vec<MovementRecord>, LedgerStoreError> {
        self.block_on(self.entries_for_idempotency_key(key))
    }

    fn head_position(&self) -> Result<u64, LedgerStoreError> {
        self.block_on(self.max_position())
    }
}
