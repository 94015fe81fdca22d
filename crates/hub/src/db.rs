use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;

use crate::settings::Settings;

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TemperatureSample {
    pub date: String,     // YYYY/MM/DD
    pub datetime: String, // YYYY/MM/DD HH:MM
    pub temperature: f64,
    pub humidity: f64,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LightEvent {
    pub date: String,
    pub datetime: String,
    pub value: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct SummaryRow {
    pub date: String,
    pub max_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub mean_temp: Option<f64>,
    pub lighting_minutes: Option<i64>,
    pub sunrise_time: Option<String>,
    pub sunset_time: Option<String>,
    pub moon_phase: Option<f64>,
}

/// Tables the bulk delete clears.  `config` is never touched.
const DATED_TABLES: [&str; 3] = ["temperature", "light", "summary"];

impl Db {
    /// db_url examples:
    /// - "sqlite:/home/pi/terrarium/terrarium.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
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
    // Settings
    // ----------------------------

    pub async fn load_settings(&self) -> Result<Settings> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM config ORDER BY key")
                .fetch_all(&self.pool)
                .await
            .context("load_settings failed")?;
        Ok(rows.into_iter().collect())
    }

    /// Replace the whole settings record in one transaction.
    pub async fn save_settings(&self, settings: &Settings) -> Result<()> {
        let mut tx = self.pool.begin().await.context("save_settings: begin")?;

        sqlx::query("DELETE FROM config")
            .execute(&mut *tx)
            .await
            .context("save_settings: clear")?;

        for (key, value) in settings.iter() {
            sqlx::query("INSERT INTO config (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("save_settings: insert {key}"))?;
        }

        tx.commit().await.context("save_settings: commit")?;
        Ok(())
    }

    // ----------------------------
    // Raw samples and events
    // ----------------------------

    pub async fn insert_temperature(
        &self,
        date: &str,
        datetime: &str,
        temperature: f64,
        humidity: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO temperature (date, datetime, temperature, humidity)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(date)
        .bind(datetime)
        .bind(temperature)
        .bind(humidity)
        .execute(&self.pool)
        .await
        .context("insert_temperature failed")?;
        Ok(())
    }

    pub async fn temperatures_on(&self, date: &str) -> Result<Vec<TemperatureSample>> {
        sqlx::query_as(
            r#"
            SELECT date, datetime, temperature, humidity
            FROM temperature
            WHERE date = ?
            ORDER BY datetime ASC, id ASC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .context("temperatures_on failed")
    }

    pub async fn insert_light(&self, date: &str, datetime: &str, on: bool) -> Result<()> {
        sqlx::query("INSERT INTO light (date, datetime, value) VALUES (?, ?, ?)")
            .bind(date)
            .bind(datetime)
            .bind(i64::from(on))
            .execute(&self.pool)
            .await
            .context("insert_light failed")?;
        Ok(())
    }

    pub async fn light_events_on(&self, date: &str) -> Result<Vec<LightEvent>> {
        sqlx::query_as(
            r#"
            SELECT date, datetime, value
            FROM light
            WHERE date = ?
            ORDER BY datetime ASC, id ASC
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .context("light_events_on failed")
    }

    // ----------------------------
    // Summary upserts
    // ----------------------------

    pub async fn upsert_temperature_summary(
        &self,
        date: &str,
        max_temp: f64,
        min_temp: f64,
        mean_temp: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary (date, max_temp, min_temp, mean_temp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(date) DO UPDATE SET
              max_temp=excluded.max_temp,
              min_temp=excluded.min_temp,
              mean_temp=excluded.mean_temp
            "#,
        )
        .bind(date)
        .bind(max_temp)
        .bind(min_temp)
        .bind(mean_temp)
        .execute(&self.pool)
        .await
        .context("upsert_temperature_summary failed")?;
        Ok(())
    }

    pub async fn upsert_lighting_minutes(&self, date: &str, minutes: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary (date, lighting_minutes)
            VALUES (?, ?)
            ON CONFLICT(date) DO UPDATE SET
              lighting_minutes=excluded.lighting_minutes
            "#,
        )
        .bind(date)
        .bind(minutes)
        .execute(&self.pool)
        .await
        .context("upsert_lighting_minutes failed")?;
        Ok(())
    }

    /// New rows start with zero lighting minutes; existing rows keep theirs.
    pub async fn upsert_ephemeris(
        &self,
        date: &str,
        sunrise_time: &str,
        sunset_time: &str,
        moon_phase: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO summary (date, sunrise_time, sunset_time, moon_phase, lighting_minutes)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(date) DO UPDATE SET
              sunrise_time=excluded.sunrise_time,
              sunset_time=excluded.sunset_time,
              moon_phase=excluded.moon_phase
            "#,
        )
        .bind(date)
        .bind(sunrise_time)
        .bind(sunset_time)
        .bind(moon_phase)
        .execute(&self.pool)
        .await
        .context("upsert_ephemeris failed")?;
        Ok(())
    }

    // ----------------------------
    // Summary reads
    // ----------------------------

    pub async fn get_summary(&self, date: &str) -> Result<Option<SummaryRow>> {
        sqlx::query_as(
            r#"
            SELECT date, max_temp, min_temp, mean_temp, lighting_minutes,
                   sunrise_time, sunset_time, moon_phase
            FROM summary
            WHERE date = ?
            "#,
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .context("get_summary failed")
    }

    /// Rows with `from <= date <= to`, compared as strings, ascending.
    pub async fn summary_range(&self, from: &str, to: &str) -> Result<Vec<SummaryRow>> {
        sqlx::query_as(
            r#"
            SELECT date, max_temp, min_temp, mean_temp, lighting_minutes,
                   sunrise_time, sunset_time, moon_phase
            FROM summary
            WHERE date BETWEEN ? AND ?
            ORDER BY date ASC
            "#,
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .context("summary_range failed")
    }

    // ----------------------------
    // Bulk delete
    // ----------------------------

    /// Delete every dated row on or before `cutoff`.  Returns rows removed.
    pub async fn delete_through(&self, cutoff: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await.context("delete_through: begin")?;
        let mut removed = 0;
        for table in DATED_TABLES {
            let sql = format!("DELETE FROM {table} WHERE date <= ?");
            removed += sqlx::query(&sql)
                .bind(cutoff)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("delete_through: {table}"))?
                .rows_affected();
        }
        tx.commit().await.context("delete_through: commit")?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    async fn test_db() -> Db {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db
    }

    // -- Settings ---------------------------------------------------------

    #[tokio::test]
    async fn settings_round_trip() {
        let db = test_db().await;
        let mut settings = Settings::defaults(date!(2024 - 01 - 01));
        settings.insert("note", "north bench");

        db.save_settings(&settings).await.unwrap();
        assert_eq!(db.load_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn save_replaces_wholesale() {
        let db = test_db().await;
        let mut first = Settings::default();
        first.insert("a", "1");
        first.insert("b", "2");
        db.save_settings(&first).await.unwrap();

        let mut second = Settings::default();
        second.insert("b", "3");
        db.save_settings(&second).await.unwrap();

        let loaded = db.load_settings().await.unwrap();
        assert_eq!(loaded.get("a"), None);
        assert_eq!(loaded.get("b"), Some("3"));
    }

    // -- Samples ----------------------------------------------------------

    #[tokio::test]
    async fn temperatures_filtered_and_ordered() {
        let db = test_db().await;
        db.insert_temperature("2024/06/21", "2024/06/21 12:00", 28.0, 60.0)
            .await
            .unwrap();
        db.insert_temperature("2024/06/21", "2024/06/21 06:00", 21.0, 70.0)
            .await
            .unwrap();
        db.insert_temperature("2024/06/22", "2024/06/22 06:00", 22.0, 70.0)
            .await
            .unwrap();

        let rows = db.temperatures_on("2024/06/21").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].datetime, "2024/06/21 06:00");
        assert_eq!(rows[1].temperature, 28.0);
    }

    #[tokio::test]
    async fn light_events_keep_insert_order_within_minute() {
        let db = test_db().await;
        db.insert_light("2024/06/21", "2024/06/21 08:00", true).await.unwrap();
        db.insert_light("2024/06/21", "2024/06/21 08:00", false).await.unwrap();

        let rows = db.light_events_on("2024/06/21").await.unwrap();
        let values: Vec<i64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![1, 0]);
    }

    // -- Summary upserts --------------------------------------------------

    #[tokio::test]
    async fn partial_upserts_leave_other_columns() {
        let db = test_db().await;
        db.upsert_lighting_minutes("2024/06/21", 45).await.unwrap();

        let row = db.get_summary("2024/06/21").await.unwrap().unwrap();
        assert_eq!(row.lighting_minutes, Some(45));
        assert_eq!(row.max_temp, None);

        db.upsert_temperature_summary("2024/06/21", 30.0, 20.0, 25.0)
            .await
            .unwrap();
        let row = db.get_summary("2024/06/21").await.unwrap().unwrap();
        assert_eq!(row.lighting_minutes, Some(45));
        assert_eq!(row.mean_temp, Some(25.0));
    }

    #[tokio::test]
    async fn ephemeris_seeds_zero_minutes_only_on_insert() {
        let db = test_db().await;
        db.upsert_ephemeris("2024/06/21", "04:38", "19:10", 15.2)
            .await
            .unwrap();
        let row = db.get_summary("2024/06/21").await.unwrap().unwrap();
        assert_eq!(row.lighting_minutes, Some(0));
        assert_eq!(row.sunrise_time.as_deref(), Some("04:38"));

        db.upsert_lighting_minutes("2024/06/21", 90).await.unwrap();
        db.upsert_ephemeris("2024/06/21", "04:39", "19:10", 15.3)
            .await
            .unwrap();
        let row = db.get_summary("2024/06/21").await.unwrap().unwrap();
        assert_eq!(row.lighting_minutes, Some(90));
        assert_eq!(row.sunrise_time.as_deref(), Some("04:39"));
    }

    #[tokio::test]
    async fn summary_range_is_inclusive_and_sorted() {
        let db = test_db().await;
        for (d, m) in [("2024/06/23", 3), ("2024/06/21", 1), ("2024/06/22", 2), ("2024/06/24", 4)] {
            db.upsert_lighting_minutes(d, m).await.unwrap();
        }
        let rows = db.summary_range("2024/06/21", "2024/06/23").await.unwrap();
        let dates: Vec<&str> = rows.iter().map(|r| r.date.as_str()).collect();
        assert_eq!(dates, vec!["2024/06/21", "2024/06/22", "2024/06/23"]);
    }

    // -- Delete -----------------------------------------------------------

    #[tokio::test]
    async fn delete_through_spares_config_and_later_rows() {
        let db = test_db().await;
        db.save_settings(&Settings::defaults(date!(2024 - 01 - 01)))
            .await
            .unwrap();
        db.insert_temperature("2024/06/20", "2024/06/20 06:00", 20.0, 60.0)
            .await
            .unwrap();
        db.insert_light("2024/06/21", "2024/06/21 06:00", true).await.unwrap();
        db.upsert_lighting_minutes("2024/06/21", 10).await.unwrap();
        db.upsert_lighting_minutes("2024/06/22", 20).await.unwrap();

        let removed = db.delete_through("2024/06/21").await.unwrap();
        assert_eq!(removed, 3);

        assert!(db.temperatures_on("2024/06/20").await.unwrap().is_empty());
        assert!(db.light_events_on("2024/06/21").await.unwrap().is_empty());
        assert!(db.get_summary("2024/06/21").await.unwrap().is_none());
        assert!(db.get_summary("2024/06/22").await.unwrap().is_some());
        assert!(!db.load_settings().await.unwrap().is_empty());
    }
}
