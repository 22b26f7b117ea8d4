//! Summary and alert persistence.
//!
//! [`SummaryStore`] is the seam the pipeline writes through; [`Storage`] is
//! the SQLite implementation.
//!
//! - `daily_summaries`: one row per (city, date), replaced wholesale at each
//!   window finalization
//! - `alerts`: append-only log, never touched by finalization

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::error::StoreError;
use crate::model::{Alert, DailySummary, Metric};

/// Persistence for finalized summaries and alerts.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    /// Insert a summary, replacing any existing row for the same city and date.
    async fn upsert_summary(&self, summary: &DailySummary) -> Result<(), StoreError>;

    /// Delete every stored summary.
    async fn clear_all_summaries(&self) -> Result<(), StoreError>;

    /// Replace the whole summary set in one step.
    ///
    /// Readers observe either the previous set or the new one, never an
    /// empty or partial set.
    async fn replace_summaries(&self, summaries: &[DailySummary]) -> Result<(), StoreError>;

    /// All summaries ordered by date, then city.
    async fn list_summaries(&self) -> Result<Vec<DailySummary>, StoreError>;

    /// The most recent summary per city, newest first.
    async fn latest_summaries(&self) -> Result<Vec<DailySummary>, StoreError>;

    /// Append an alert record.
    async fn upsert_alert(&self, alert: &Alert) -> Result<(), StoreError>;

    /// Up to `limit` alerts, newest first.
    async fn list_alerts(&self, limit: u32) -> Result<Vec<Alert>, StoreError>;
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:weatherwatch.db"
    ///   or "sqlite::memory:")
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        // Every connection to an in-memory URL opens its own database.
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            5
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS daily_summaries (
                city TEXT NOT NULL,
                date TEXT NOT NULL,
                avg_temp REAL NOT NULL,
                max_temp REAL NOT NULL,
                min_temp REAL NOT NULL,
                dominant_condition TEXT NOT NULL,
                icon TEXT NOT NULL,
                sample_count INTEGER NOT NULL,
                PRIMARY KEY (city, date)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                city TEXT NOT NULL,
                message TEXT NOT NULL,
                ts_ms INTEGER NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                threshold REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for newest-first alert listing
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_ts
            ON alerts(ts_ms)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

const UPSERT_SUMMARY: &str = r#"
    INSERT INTO daily_summaries
        (city, date, avg_temp, max_temp, min_temp, dominant_condition, icon, sample_count)
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(city, date) DO UPDATE SET
        avg_temp = excluded.avg_temp,
        max_temp = excluded.max_temp,
        min_temp = excluded.min_temp,
        dominant_condition = excluded.dominant_condition,
        icon = excluded.icon,
        sample_count = excluded.sample_count
"#;

const SUMMARY_COLUMNS: &str =
    "city, date, avg_temp, max_temp, min_temp, dominant_condition, icon, sample_count";

fn bind_summary<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    summary: &'q DailySummary,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&summary.city)
        .bind(summary.date.format("%Y-%m-%d").to_string())
        .bind(summary.avg_temp)
        .bind(summary.max_temp)
        .bind(summary.min_temp)
        .bind(&summary.dominant_condition)
        .bind(&summary.icon)
        .bind(i64::from(summary.sample_count))
}

fn summary_from_row(row: &SqliteRow) -> Result<DailySummary, StoreError> {
    let date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d").map_err(|_| StoreError::InvalidRow {
        column: "date",
        value: date.clone(),
    })?;

    let sample_count: i64 = row.try_get("sample_count")?;
    let sample_count = u32::try_from(sample_count).map_err(|_| StoreError::InvalidRow {
        column: "sample_count",
        value: sample_count.to_string(),
    })?;

    Ok(DailySummary {
        city: row.try_get("city")?,
        date,
        avg_temp: row.try_get("avg_temp")?,
        max_temp: row.try_get("max_temp")?,
        min_temp: row.try_get("min_temp")?,
        dominant_condition: row.try_get("dominant_condition")?,
        icon: row.try_get("icon")?,
        sample_count,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, StoreError> {
    let ts_ms: i64 = row.try_get("ts_ms")?;
    let timestamp =
        DateTime::<Utc>::from_timestamp_millis(ts_ms).ok_or_else(|| StoreError::InvalidRow {
            column: "ts_ms",
            value: ts_ms.to_string(),
        })?;

    let metric: String = row.try_get("metric")?;
    let metric: Metric = metric.parse().map_err(|_| StoreError::InvalidRow {
        column: "metric",
        value: metric.clone(),
    })?;

    Ok(Alert {
        city: row.try_get("city")?,
        message: row.try_get("message")?,
        timestamp,
        metric,
        value: row.try_get("value")?,
        threshold: row.try_get("threshold")?,
    })
}

#[async_trait]
impl SummaryStore for Storage {
    async fn upsert_summary(&self, summary: &DailySummary) -> Result<(), StoreError> {
        bind_summary(sqlx::query(UPSERT_SUMMARY), summary)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear_all_summaries(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM daily_summaries")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_summaries(&self, summaries: &[DailySummary]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM daily_summaries")
            .execute(&mut *tx)
            .await?;
        for summary in summaries {
            bind_summary(sqlx::query(UPSERT_SUMMARY), summary)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_summaries(&self) -> Result<Vec<DailySummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM daily_summaries ORDER BY date ASC, city ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn latest_summaries(&self) -> Result<Vec<DailySummary>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SUMMARY_COLUMNS}
            FROM daily_summaries AS s
            WHERE s.date = (
                SELECT MAX(date) FROM daily_summaries WHERE city = s.city
            )
            ORDER BY date DESC, city ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(summary_from_row).collect()
    }

    async fn upsert_alert(&self, alert: &Alert) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO alerts (city, message, ts_ms, metric, value, threshold)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.city)
        .bind(&alert.message)
        .bind(alert.timestamp.timestamp_millis())
        .bind(alert.metric.label())
        .bind(alert.value)
        .bind(alert.threshold)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_alerts(&self, limit: u32) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT city, message, ts_ms, metric, value, threshold
            FROM alerts
            ORDER BY ts_ms DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }
}
