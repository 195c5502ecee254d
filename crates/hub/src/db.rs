use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::OffsetDateTime;

use crate::chart::Timestamped;
use crate::pid::Gains;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct TemperatureRow {
    pub present_value: f64,
    pub controller_output: f64,
    pub set_point: f64,
    pub created_at: i64,
}

/// Row of a single-value series (humidity, moisture).
#[derive(Debug, Clone, Copy, PartialEq, FromRow)]
pub struct ScalarRow {
    pub present_value: f64,
    pub created_at: i64,
}

impl Timestamped for TemperatureRow {
    fn timestamp_ms(&self) -> i64 {
        self.created_at
    }
}

impl Timestamped for ScalarRow {
    fn timestamp_ms(&self) -> i64 {
        self.created_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarSeries {
    Humidity,
    Moisture,
}

impl ScalarSeries {
    fn table(self) -> &'static str {
        match self {
            ScalarSeries::Humidity => "humidity",
            ScalarSeries::Moisture => "moisture",
        }
    }
}

/// Current wall-clock time as Unix epoch milliseconds.
pub fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/greenhouse/greenhouse.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        // Every connection to an in-memory database gets its own empty
        // database, so those are pinned to a single long-lived connection.
        let in_memory = db_url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 5 });
        if in_memory {
            pool_options = pool_options
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>);
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    // ----------------------------
    // Appends
    // ----------------------------

    pub async fn insert_temperature(
        &self,
        ts: i64,
        present_value: f64,
        controller_output: f64,
        set_point: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO temperature (present_value, controller_output, set_point, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(present_value)
        .bind(controller_output)
        .bind(set_point)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("insert_temperature failed")?;
        Ok(())
    }

    pub async fn insert_humidity(&self, ts: i64, present_value: f64) -> Result<()> {
        self.insert_scalar(ScalarSeries::Humidity, ts, present_value).await
    }

    pub async fn insert_moisture(&self, ts: i64, present_value: f64) -> Result<()> {
        self.insert_scalar(ScalarSeries::Moisture, ts, present_value).await
    }

    async fn insert_scalar(&self, series: ScalarSeries, ts: i64, present_value: f64) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (present_value, created_at) VALUES (?, ?)",
            series.table()
        );
        sqlx::query(&sql)
            .bind(present_value)
            .bind(ts)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert into {} failed", series.table()))?;
        Ok(())
    }

    pub async fn insert_tune_profile(&self, ts: i64, gains: &Gains) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tune_profile (proportional_gain, integral_gain, derivative_gain, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(gains.kp)
        .bind(gains.ki)
        .bind(gains.kd)
        .bind(ts)
        .execute(&self.pool)
        .await
        .context("insert_tune_profile failed")?;
        Ok(())
    }

    // ----------------------------
    // Window queries (oldest first)
    // ----------------------------

    pub async fn temperature_since(&self, since_ms: i64) -> Result<Vec<TemperatureRow>> {
        sqlx::query_as::<_, TemperatureRow>(
            r#"
            SELECT present_value, controller_output, set_point, created_at
            FROM temperature
            WHERE created_at >= ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(since_ms)
        .fetch_all(&self.pool)
        .await
        .context("temperature_since failed")
    }

    pub async fn humidity_since(&self, since_ms: i64) -> Result<Vec<ScalarRow>> {
        self.scalar_since(ScalarSeries::Humidity, since_ms).await
    }

    pub async fn moisture_since(&self, since_ms: i64) -> Result<Vec<ScalarRow>> {
        self.scalar_since(ScalarSeries::Moisture, since_ms).await
    }

    async fn scalar_since(&self, series: ScalarSeries, since_ms: i64) -> Result<Vec<ScalarRow>> {
        let sql = format!(
            "SELECT present_value, created_at FROM {} WHERE created_at >= ? ORDER BY created_at ASC, id ASC",
            series.table()
        );
        sqlx::query_as::<_, ScalarRow>(&sql)
            .bind(since_ms)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("{}_since failed", series.table()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
