use super::resample;
use crate::error::{QueryError, StorageError, StoreError};
use crate::models::{EquitySample, OhlcBucket, Position, PriceSample};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

const BUSY_TIMEOUT_SECS: u64 = 5;
const MAX_CONNECTIONS: u32 = 5;

/// SQLite-backed time-series store for price and equity samples
///
/// Each operation is a single statement, so a concurrent reader never sees a
/// half-written row. No retries happen here; callers decide what to do with
/// a [`StorageError`].
///
/// `captured_at` is stored as Unix nanoseconds, so a sample reads back with
/// exactly the timestamp it was written with. Writes outside 1677..2262 are
/// rejected with [`QueryError::TimestampOutOfRange`].
#[derive(Clone)]
pub struct SampleStore {
    pool: SqlitePool,
}

impl SampleStore {
    /// Open (or create) the store and run migrations
    ///
    /// # Arguments
    /// * `database_url` - e.g. `sqlite://crypto_dashboard.db` or `sqlite::memory:`
    pub async fn open(database_url: &str) -> Result<Self, StorageError> {
        let in_memory = database_url.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(BUSY_TIMEOUT_SECS));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database lives and dies with its connection
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(MAX_CONNECTIONS)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Opened sample store at {}", database_url);

        Ok(Self { pool })
    }

    /// Append one price sample
    pub async fn record_price(&self, price: Decimal, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO price_samples (captured_at, price) VALUES (?, ?)")
            .bind(storable_nanos(at)?)
            .bind(price.to_string())
            .execute(&self.pool)
            .await?;

        tracing::debug!("Recorded price {} at {}", price, at);
        Ok(())
    }

    /// Append one equity sample
    pub async fn record_equity(
        &self,
        equity: Decimal,
        position: Position,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO equity_samples (captured_at, equity, position) VALUES (?, ?, ?)")
            .bind(storable_nanos(at)?)
            .bind(equity.to_string())
            .bind(position.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!("Recorded equity {} ({}) at {}", equity, position, at);
        Ok(())
    }

    /// Price samples with `start <= captured_at <= end`, oldest first
    ///
    /// Rejects `start > end` with [`QueryError::InvertedRange`].
    pub async fn query_prices(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>, StoreError> {
        check_range(start, end)?;

        let rows = sqlx::query(
            r#"
            SELECT captured_at, price
            FROM price_samples
            WHERE captured_at BETWEEN ? AND ?
            ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(bound_nanos(start))
        .bind(bound_nanos(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(price_from_row).collect()
    }

    /// Equity samples with `start <= captured_at <= end`, oldest first
    pub async fn query_equity(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<EquitySample>, StoreError> {
        check_range(start, end)?;

        let rows = sqlx::query(
            r#"
            SELECT captured_at, equity, position
            FROM equity_samples
            WHERE captured_at BETWEEN ? AND ?
            ORDER BY captured_at ASC, id ASC
            "#,
        )
        .bind(bound_nanos(start))
        .bind(bound_nanos(end))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(equity_from_row).collect()
    }

    /// OHLC buckets of width `bucket_width` covering `[start, end]`
    pub async fn resample_ohlc(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bucket_width: Duration,
    ) -> Result<Vec<OhlcBucket>, StoreError> {
        if bucket_width <= Duration::zero() {
            return Err(QueryError::NonPositiveBucket(bucket_width).into());
        }
        let samples = self.query_prices(start, end).await?;
        Ok(resample::resample_ohlc(&samples, start, end, bucket_width)?)
    }

    /// Delete every sample captured before `now - horizon`
    ///
    /// Rows exactly on the boundary are kept. A horizon reaching past the
    /// earliest representable time deletes nothing. Returns
    /// `(prices_deleted, equity_deleted)`.
    pub async fn purge_older_than(
        &self,
        horizon: Duration,
        now: DateTime<Utc>,
    ) -> Result<(u64, u64), StoreError> {
        let boundary = now
            .checked_sub_signed(horizon)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let cutoff = bound_nanos(boundary);

        let prices = sqlx::query("DELETE FROM price_samples WHERE captured_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        let equity = sqlx::query("DELETE FROM equity_samples WHERE captured_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if prices > 0 || equity > 0 {
            tracing::debug!(
                "Purged {} price and {} equity samples older than {}",
                prices,
                equity,
                boundary
            );
        }

        Ok((prices, equity))
    }

    /// Number of stored price samples
    pub async fn count_prices(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM price_samples")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    /// Number of stored equity samples
    pub async fn count_equity(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM equity_samples")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(count as u64)
    }

    /// Most recently captured price sample, if any
    pub async fn latest_price(&self) -> Result<Option<PriceSample>, StoreError> {
        let row = sqlx::query(
            "SELECT captured_at, price FROM price_samples ORDER BY captured_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(price_from_row).transpose()
    }

    /// Most recently captured equity sample, if any
    pub async fn latest_equity(&self) -> Result<Option<EquitySample>, StoreError> {
        let row = sqlx::query(
            "SELECT captured_at, equity, position FROM equity_samples ORDER BY captured_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(equity_from_row).transpose()
    }

    /// Close the pool; every later call fails with a storage error
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Sample store closed");
    }
}

fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), QueryError> {
    if start > end {
        return Err(QueryError::InvertedRange { start, end });
    }
    Ok(())
}

fn storable_nanos(at: DateTime<Utc>) -> Result<i64, QueryError> {
    at.timestamp_nanos_opt()
        .ok_or(QueryError::TimestampOutOfRange(at))
}

/// Range bounds saturate, so a bound past the storable range still matches every row on its side
fn bound_nanos(at: DateTime<Utc>) -> i64 {
    match at.timestamp_nanos_opt() {
        Some(nanos) => nanos,
        None if at < DateTime::UNIX_EPOCH => i64::MIN,
        None => i64::MAX,
    }
}

fn decimal_from_text(text: &str) -> Result<Decimal, StorageError> {
    Decimal::from_str(text)
        .map_err(|e| StorageError::CorruptRow(format!("bad decimal {text:?}: {e}")))
}

fn price_from_row(row: &SqliteRow) -> Result<PriceSample, StoreError> {
    let captured_at: i64 = row.try_get("captured_at")?;
    let price: String = row.try_get("price")?;

    Ok(PriceSample {
        captured_at: DateTime::from_timestamp_nanos(captured_at),
        price: decimal_from_text(&price)?,
    })
}

fn equity_from_row(row: &SqliteRow) -> Result<EquitySample, StoreError> {
    let captured_at: i64 = row.try_get("captured_at")?;
    let equity: String = row.try_get("equity")?;
    let position: String = row.try_get("position")?;

    Ok(EquitySample {
        captured_at: DateTime::from_timestamp_nanos(captured_at),
        equity: decimal_from_text(&equity)?,
        position: position.parse().map_err(StorageError::CorruptRow)?,
    })
}
