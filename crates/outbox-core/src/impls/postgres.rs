//! PostgresStore - OutboxStore backed by PostgreSQL via sqlx.
//!
//! Claim uses `FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... RETURNING`
//! statement, so concurrent dispatchers (in any process) skip rows another
//! claim is already taking instead of blocking on them or double-claiming.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::{LockId, Message, Record, RecordId, RecordState};
use crate::error::StoreError;
use crate::ports::{OutboxStore, RemovedRecords};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db) if db.is_unique_violation() => {
                StoreError::Persistence(format!("duplicate record id: {db}"))
            }
            _ => StoreError::Persistence(err.to_string()),
        }
    }
}

type RecordRow = (
    String,
    String,
    String,
    Json<HashMap<String, String>>,
    Vec<u8>,
    String,
    DateTime<Utc>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const RECORD_COLUMNS: &str =
    "id, topic, key, headers, body, state, created_on, lock_id, locked_on, processed_on";

fn parse_id<T: std::str::FromStr>(raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|_| StoreError::Persistence(format!("malformed id {raw:?}")))
}

fn into_record(row: RecordRow) -> Result<Record, StoreError> {
    let (id, topic, key, Json(headers), body, state, created_on, lock_id, locked_on, processed_on) =
        row;
    Ok(Record {
        id: parse_id(&id)?,
        message: Message::new(topic, key, body).with_headers(headers),
        state: state.parse()?,
        created_on,
        lock_id: lock_id.as_deref().map(parse_id::<LockId>).transpose()?,
        locked_on,
        processed_on,
    })
}

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Table and indexes expected by this store. Apply it with whatever
    /// migration tooling the application already uses.
    pub const SCHEMA: &'static str = r#"
        CREATE TABLE IF NOT EXISTS outbox_records (
            id           TEXT PRIMARY KEY,
            topic        TEXT NOT NULL,
            key          TEXT NOT NULL,
            headers      JSONB NOT NULL DEFAULT '{}'::jsonb,
            body         BYTEA NOT NULL,
            state        TEXT NOT NULL,
            created_on   TIMESTAMPTZ NOT NULL,
            lock_id      TEXT,
            locked_on    TIMESTAMPTZ,
            processed_on TIMESTAMPTZ,
            CHECK ((lock_id IS NULL) = (locked_on IS NULL)),
            CHECK ((state = 'processed') = (processed_on IS NOT NULL))
        );
        CREATE INDEX IF NOT EXISTS outbox_records_pending_idx
            ON outbox_records (created_on, id) WHERE state = 'pending_delivery';
        CREATE INDEX IF NOT EXISTS outbox_records_locked_idx
            ON outbox_records (locked_on) WHERE state = 'locked';
        CREATE INDEX IF NOT EXISTS outbox_records_created_idx
            ON outbox_records (created_on);
    "#;

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Start a transaction the caller can share with its own writes.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        Ok(self.pool.begin().await?)
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    type Tx = Transaction<'static, Postgres>;

    async fn add_record_tx(&self, record: &Record, tx: &mut Self::Tx) -> Result<(), StoreError> {
        record.ensure_new()?;
        sqlx::query(
            r#"
            INSERT INTO outbox_records
                (id, topic, key, headers, body, state, created_on, lock_id, locked_on, processed_on)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id.as_ulid().to_string())
        .bind(record.message.topic())
        .bind(record.message.key())
        .bind(Json(record.message.headers().clone()))
        .bind(record.message.body())
        .bind(record.state.as_str())
        .bind(record.created_on)
        .bind(record.lock_id.map(|l| l.as_ulid().to_string()))
        .bind(record.locked_on)
        .bind(record.processed_on)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn claim_batch(
        &self,
        limit: usize,
        lock_id: LockId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Record>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            r#"
            UPDATE outbox_records
            SET state = 'locked', lock_id = $1, locked_on = GREATEST($2, created_on)
            WHERE id IN (
                SELECT id FROM outbox_records
                WHERE state = 'pending_delivery'
                ORDER BY created_on ASC, id ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RECORD_COLUMNS}
            "#
        );
        let rows: Vec<RecordRow> = sqlx::query_as(&sql)
            .bind(lock_id.as_ulid().to_string())
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        // RETURNING does not preserve the subquery order.
        let mut records = rows.into_iter().map(into_record).collect::<Result<Vec<_>, _>>()?;
        records.sort_by_key(|r| (r.created_on, r.id));
        Ok(records)
    }

    async fn mark_processed(&self, id: RecordId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let raw_id = id.as_ulid().to_string();
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET state = 'processed', processed_on = GREATEST($2, locked_on, created_on)
            WHERE id = $1 AND state = 'locked'
            "#,
        )
        .bind(&raw_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM outbox_records WHERE id = $1")
                .bind(&raw_id)
                .fetch_optional(&self.pool)
                .await?;

        match state {
            None => Err(StoreError::NotFound(id)),
            Some(state) => Err(StoreError::InvalidState {
                id,
                expected: RecordState::Locked,
                actual: state.parse()?,
            }),
        }
    }

    async fn clear_locks_with_duration_before_date(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_records
            SET state = 'pending_delivery', lock_id = NULL, locked_on = NULL
            WHERE state = 'locked' AND locked_on < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn remove_records_before_datetime(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<RemovedRecords, StoreError> {
        let states: Vec<String> =
            sqlx::query_scalar("DELETE FROM outbox_records WHERE created_on < $1 RETURNING state")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        let mut removed = RemovedRecords::default();
        for state in states {
            if state.parse::<RecordState>()? == RecordState::Processed {
                removed.processed += 1;
            } else {
                removed.undelivered += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn row(state: &str, lock_id: Option<String>) -> RecordRow {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        (
            Ulid(7).to_string(),
            "orders".to_string(),
            "42".to_string(),
            Json(HashMap::from([("trace".to_string(), "abc".to_string())])),
            b"x".to_vec(),
            state.to_string(),
            at,
            lock_id.clone(),
            lock_id.map(|_| at),
            None,
        )
    }

    #[test]
    fn rows_map_onto_records() {
        let record = into_record(row("locked", Some(Ulid(9).to_string()))).unwrap();

        assert_eq!(record.id, RecordId::from_ulid(Ulid(7)));
        assert_eq!(record.state, RecordState::Locked);
        assert_eq!(record.lock_id, Some(LockId::from_ulid(Ulid(9))));
        assert_eq!(record.message.headers()["trace"], "abc");
        assert_eq!(record.message.body(), b"x");
    }

    #[test]
    fn unknown_state_is_a_persistence_error() {
        let err = into_record(row("archived", None)).unwrap_err();
        assert!(matches!(err, StoreError::Persistence(_)));
    }

    async fn fresh_store() -> PostgresStore {
        use sqlx::Executor;

        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.unwrap();
        pool.execute(PostgresStore::SCHEMA).await.unwrap();
        pool.execute("TRUNCATE outbox_records").await.unwrap();
        PostgresStore::new(pool)
    }

    fn pending(n: u128, created_on: DateTime<Utc>) -> Record {
        Record::new(
            RecordId::from_ulid(Ulid(n)),
            Message::new("orders", n.to_string(), b"x".to_vec()).with_header("trace", "abc"),
            created_on,
        )
    }

    // One test per table: the cases below share `outbox_records`.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // Requires Postgres at DATABASE_URL
    async fn postgres_store_against_live_database() {
        use std::collections::HashSet;
        use std::sync::Arc;

        use chrono::Duration;

        let store = Arc::new(fresh_store().await);
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        // Rolled back inserts stay invisible.
        let mut tx = store.begin().await.unwrap();
        store.add_record_tx(&pending(999, t0), &mut tx).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        for n in 1..=100 {
            store
                .add_record_tx(&pending(n, t0 + Duration::milliseconds(n as i64)), &mut tx)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        // Concurrent claims never hand out the same record.
        let mut joins = Vec::new();
        for worker in 0..8u128 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                loop {
                    let batch = store
                        .claim_batch(7, LockId::from_ulid(Ulid(1_000 + worker)), t0 + Duration::seconds(1))
                        .await
                        .unwrap();
                    if batch.is_empty() {
                        break mine;
                    }
                    mine.extend(batch.into_iter().map(|r| r.id));
                }
            }));
        }
        let mut seen = HashSet::new();
        for join in joins {
            for id in join.await.unwrap() {
                assert!(seen.insert(id), "record {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 100);
        assert!(!seen.contains(&RecordId::from_ulid(Ulid(999))));

        // Lagging clocks are clamped to the record's own timeline.
        let mut tx = store.begin().await.unwrap();
        store.add_record_tx(&pending(500, t0), &mut tx).await.unwrap();
        tx.commit().await.unwrap();
        let claimed = store
            .claim_batch(1, LockId::from_ulid(Ulid(2_000)), t0 - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].locked_on, Some(t0));
        assert_eq!(claimed[0].message.headers()["trace"], "abc");

        let id = RecordId::from_ulid(Ulid(500));
        store.mark_processed(id, t0 - Duration::minutes(11)).await.unwrap();
        assert!(matches!(
            store.mark_processed(id, t0).await,
            Err(StoreError::InvalidState { actual: RecordState::Processed, .. })
        ));
        assert!(matches!(
            store.mark_processed(RecordId::from_ulid(Ulid(77_777)), t0).await,
            Err(StoreError::NotFound(_))
        ));

        // Stale locks go back to pending; the rest stay locked.
        let reclaimed = store
            .clear_locks_with_duration_before_date(t0 + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(reclaimed, 0);
        let reclaimed = store
            .clear_locks_with_duration_before_date(t0 + Duration::seconds(2))
            .await
            .unwrap();
        assert_eq!(reclaimed, 100);

        let removed = store
            .remove_records_before_datetime(t0 + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(removed, RemovedRecords { processed: 1, undelivered: 100 });
    }
}
