//! PostgreSQL implementation of the counter range ledger.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::entities::CounterRange;
use crate::domain::repositories::{LedgerError, RangeLedger};

/// Range ledger stored in the `counter_ranges` table.
///
/// Counters are stored as `BIGINT`, so every value handed to this ledger must
/// fit in an `i64`.
pub struct PgRangeLedger {
    pool: Arc<PgPool>,
}

impl PgRangeLedger {
    /// Creates a new ledger with a database connection pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct RangeRow {
    range_start: i64,
    range_end: i64,
    last_used: Option<i64>,
}

impl TryFrom<RangeRow> for CounterRange {
    type Error = LedgerError;

    fn try_from(row: RangeRow) -> Result<Self, Self::Error> {
        let start = from_db(row.range_start)?;
        let end = from_db(row.range_end)?;
        let last_used = row.last_used.map(from_db).transpose()?;
        Ok(CounterRange::with_watermark(start, end, last_used))
    }
}

fn to_db(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::OutOfRange(value))
}

fn from_db(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Corrupt(format!("negative counter {value}")))
}

fn into_ranges(rows: Vec<RangeRow>) -> Result<Vec<CounterRange>, LedgerError> {
    rows.into_iter().map(CounterRange::try_from).collect()
}

#[async_trait]
impl RangeLedger for PgRangeLedger {
    async fn count_ranges(&self) -> Result<u64, LedgerError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM counter_ranges")
            .fetch_one(self.pool.as_ref())
            .await?;

        from_db(count)
    }

    async fn load_active_ranges(&self, space_size: u64) -> Result<Vec<CounterRange>, LedgerError> {
        let rows = sqlx::query_as::<_, RangeRow>(
            r#"
            SELECT range_start, range_end, last_used
            FROM counter_ranges
            WHERE range_start < $1
              AND COALESCE(last_used, range_start - 1) < LEAST(range_end, $1) - 1
            ORDER BY range_start
            "#,
        )
        .bind(to_db(space_size)?)
        .fetch_all(self.pool.as_ref())
        .await?;

        into_ranges(rows)
    }

    async fn seed_all_ranges(
        &self,
        range_size: u64,
        space_size: u64,
    ) -> Result<Vec<CounterRange>, LedgerError> {
        if range_size == 0 || range_size > space_size {
            return Err(LedgerError::OutOfRange(range_size));
        }

        let mut tx = self.pool.begin().await?;

        // Concurrent seeders must see each other's rows before the check.
        sqlx::query("LOCK TABLE counter_ranges IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let stray: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT range_start
            FROM counter_ranges
            WHERE range_start >= $2
               OR range_start % $1 <> 0
               OR range_end <> LEAST(range_start, $2 - $1) + $1
            ORDER BY range_start
            LIMIT 1
            "#,
        )
        .bind(to_db(range_size)?)
        .bind(to_db(space_size)?)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(start) = stray {
            let start = from_db(start)?;
            tracing::error!(
                range_start = start,
                range_size,
                space_size,
                "Refusing to seed: ledger was partitioned differently"
            );
            return Err(LedgerError::PartitionMismatch {
                start,
                range_size,
                space_size,
            });
        }

        // LEAST(s, M - R) + R == LEAST(s + R, M) without overflowing BIGINT.
        let inserted = sqlx::query(
            r#"
            INSERT INTO counter_ranges (range_start, range_end)
            SELECT s, LEAST(s, $2 - $1) + $1
            FROM generate_series(0::BIGINT, $2 - 1, $1) AS s
            ON CONFLICT (range_start) DO NOTHING
            "#,
        )
        .bind(to_db(range_size)?)
        .bind(to_db(space_size)?)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let rows = sqlx::query_as::<_, RangeRow>(
            "SELECT range_start, range_end, last_used FROM counter_ranges ORDER BY range_start",
        )
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(inserted, total = rows.len(), "Counter range ledger seeded");
        into_ranges(rows)
    }

    async fn persist(&self, range: &CounterRange) -> Result<(), LedgerError> {
        let last_used = range.last_used.map(to_db).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO counter_ranges (range_start, range_end, last_used, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (range_start) DO UPDATE
            SET last_used = GREATEST(counter_ranges.last_used, EXCLUDED.last_used),
                updated_at = NOW()
            "#,
        )
        .bind(to_db(range.start)?)
        .bind(to_db(range.end)?)
        .bind(last_used)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn list_ranges(&self) -> Result<Vec<CounterRange>, LedgerError> {
        let rows = sqlx::query_as::<_, RangeRow>(
            "SELECT range_start, range_end, last_used FROM counter_ranges ORDER BY range_start",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        into_ranges(rows)
    }
}
