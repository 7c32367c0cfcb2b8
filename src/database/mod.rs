use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::alerts::{AlertRecord, Severity};
use crate::screener::{RunStatus, ScreenResultRecord, ScreenRunRecord};
use crate::types::{Interval, MarketBar, Period, PredictionResult, Symbol};

/// Cached bar payload plus the time it was fetched, for TTL checks.
#[derive(Debug, Clone)]
pub struct CachedBars {
    pub bars: Vec<MarketBar>,
    pub fetched_at: DateTime<Utc>,
}

/// Persisted ensemble model blob plus its training metadata.
#[derive(Debug, Clone)]
pub struct StoredModel {
    pub key: String,
    pub symbol: Symbol,
    pub weights_json: String,
    pub validation_mse: f64,
    pub trained_at: DateTime<Utc>,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Initialize database with schema
    pub async fn new(db_path: &str) -> Result<Self> {
        info!("Initializing SQLite database at: {}", db_path);

        let options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.create_schema().await?;

        info!("Database initialized successfully");
        Ok(db)
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bar_cache (
                key TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                period TEXT NOT NULL,
                interval TEXT NOT NULL,
                bars_json TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_bar_cache_symbol ON bar_cache(symbol)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS models (
                key TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                weights_json TEXT NOT NULL,
                validation_mse REAL NOT NULL,
                trained_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                generated_at TEXT NOT NULL,
                horizon_bars INTEGER NOT NULL,
                last_close TEXT NOT NULL,
                predicted_close TEXT NOT NULL,
                predicted_return_pct TEXT NOT NULL,
                confidence TEXT NOT NULL,
                sentiment_adjustment TEXT NOT NULL,
                model_kind TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_predictions_symbol ON predictions(symbol, generated_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS screen_runs (
                id TEXT PRIMARY KEY,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                status TEXT NOT NULL,
                symbols_total INTEGER NOT NULL,
                symbols_failed INTEGER NOT NULL DEFAULT 0,
                error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS screen_results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                rank INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                score TEXT NOT NULL,
                predicted_return_pct TEXT NOT NULL,
                rsi TEXT,
                adx TEXT,
                volume_ratio TEXT,
                close TEXT NOT NULL,
                direction TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_screen_results_run ON screen_results(run_id, rank)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backtest_runs (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                started_at TEXT NOT NULL,
                params_json TEXT NOT NULL,
                report_json TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                severity TEXT NOT NULL,
                kind TEXT NOT NULL,
                message TEXT NOT NULL,
                acknowledged INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_timestamp ON alerts(timestamp DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // --- bar cache ---

    pub async fn put_cached_bars(
        &self,
        key: &str,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
        bars: &[MarketBar],
    ) -> Result<()> {
        let bars_json = serde_json::to_string(bars)?;
        sqlx::query(
            r#"
            INSERT INTO bar_cache (key, symbol, period, interval, bars_json, fetched_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                bars_json = excluded.bars_json,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(key)
        .bind(symbol.as_str())
        .bind(period.as_str())
        .bind(interval.as_str())
        .bind(bars_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_cached_bars(&self, key: &str) -> Result<Option<CachedBars>> {
        let row = sqlx::query(
            r#"
            SELECT bars_json, fetched_at FROM bar_cache WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let bars: Vec<MarketBar> = serde_json::from_str(row.get("bars_json"))?;
                let fetched_at =
                    DateTime::parse_from_rfc3339(row.get("fetched_at"))?.with_timezone(&Utc);
                Ok(Some(CachedBars { bars, fetched_at }))
            }
            None => Ok(None),
        }
    }

    // --- models ---

    pub async fn save_model(
        &self,
        key: &str,
        symbol: &Symbol,
        weights_json: &str,
        validation_mse: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO models (key, symbol, weights_json, validation_mse, trained_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                weights_json = excluded.weights_json,
                validation_mse = excluded.validation_mse,
                trained_at = excluded.trained_at
            "#,
        )
        .bind(key)
        .bind(symbol.as_str())
        .bind(weights_json)
        .bind(validation_mse)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_model(&self, key: &str) -> Result<Option<StoredModel>> {
        let row = sqlx::query(
            r#"
            SELECT key, symbol, weights_json, validation_mse, trained_at
            FROM models WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(StoredModel {
                key: row.get("key"),
                symbol: Symbol::parse(row.get("symbol"))?,
                weights_json: row.get("weights_json"),
                validation_mse: row.get("validation_mse"),
                trained_at: DateTime::parse_from_rfc3339(row.get("trained_at"))?
                    .with_timezone(&Utc),
            })),
            None => Ok(None),
        }
    }

    // --- predictions ---

    pub async fn save_prediction(&self, prediction: &PredictionResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO predictions (
                symbol, generated_at, horizon_bars, last_close, predicted_close,
                predicted_return_pct, confidence, sentiment_adjustment, model_kind
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(prediction.symbol.as_str())
        .bind(prediction.generated_at.to_rfc3339())
        .bind(prediction.horizon_bars as i64)
        .bind(prediction.last_close.to_string())
        .bind(prediction.predicted_close.to_string())
        .bind(prediction.predicted_return_pct.to_string())
        .bind(prediction.confidence.to_string())
        .bind(prediction.sentiment_adjustment.to_string())
        .bind(&prediction.model_kind)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_prediction(&self, symbol: &Symbol) -> Result<Option<PredictionResult>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, generated_at, horizon_bars, last_close, predicted_close,
                   predicted_return_pct, confidence, sentiment_adjustment, model_kind
            FROM predictions
            WHERE symbol = ?
            ORDER BY generated_at DESC
            LIMIT 1
            "#,
        )
        .bind(symbol.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(PredictionResult {
                symbol: Symbol::parse(row.get("symbol"))?,
                generated_at: DateTime::parse_from_rfc3339(row.get("generated_at"))?
                    .with_timezone(&Utc),
                horizon_bars: row.get::<i64, _>("horizon_bars") as usize,
                last_close: Decimal::from_str(row.get("last_close"))?,
                predicted_close: Decimal::from_str(row.get("predicted_close"))?,
                predicted_return_pct: Decimal::from_str(row.get("predicted_return_pct"))?,
                confidence: Decimal::from_str(row.get("confidence"))?,
                sentiment_adjustment: Decimal::from_str(row.get("sentiment_adjustment"))?,
                model_kind: row.get("model_kind"),
            })),
            None => Ok(None),
        }
    }

    // --- screen runs ---

    pub async fn insert_screen_run(&self, run: &ScreenRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO screen_runs (id, started_at, finished_at, status, symbols_total, symbols_failed, error)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.id.to_string())
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .bind(run.status.as_str())
        .bind(run.symbols_total as i64)
        .bind(run.symbols_failed as i64)
        .bind(&run.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn finish_screen_run(
        &self,
        id: Uuid,
        status: RunStatus,
        symbols_failed: u32,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE screen_runs
            SET finished_at = ?, status = ?, symbols_failed = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(status.as_str())
        .bind(symbols_failed as i64)
        .bind(error)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_screen_run(&self) -> Result<Option<ScreenRunRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, started_at, finished_at, status, symbols_total, symbols_failed, error
            FROM screen_runs
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(parse_screen_run(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn insert_screen_results(&self, results: &[ScreenResultRecord]) -> Result<()> {
        for result in results {
            sqlx::query(
                r#"
                INSERT INTO screen_results (
                    run_id, rank, symbol, score, predicted_return_pct,
                    rsi, adx, volume_ratio, close, direction
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(result.run_id.to_string())
            .bind(result.rank as i64)
            .bind(result.symbol.as_str())
            .bind(result.score.to_string())
            .bind(result.predicted_return_pct.to_string())
            .bind(result.rsi.map(|v| v.to_string()))
            .bind(result.adx.map(|v| v.to_string()))
            .bind(result.volume_ratio.map(|v| v.to_string()))
            .bind(result.close.to_string())
            .bind(&result.direction)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn screen_results(&self, run_id: Uuid) -> Result<Vec<ScreenResultRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, rank, symbol, score, predicted_return_pct,
                   rsi, adx, volume_ratio, close, direction
            FROM screen_results
            WHERE run_id = ?
            ORDER BY rank ASC
            "#,
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut results = Vec::new();
        for row in rows {
            results.push(ScreenResultRecord {
                run_id: Uuid::parse_str(row.get("run_id"))?,
                rank: row.get::<i64, _>("rank") as u32,
                symbol: Symbol::parse(row.get("symbol"))?,
                score: Decimal::from_str(row.get("score"))?,
                predicted_return_pct: Decimal::from_str(row.get("predicted_return_pct"))?,
                rsi: row
                    .get::<Option<String>, _>("rsi")
                    .and_then(|s| Decimal::from_str(&s).ok()),
                adx: row
                    .get::<Option<String>, _>("adx")
                    .and_then(|s| Decimal::from_str(&s).ok()),
                volume_ratio: row
                    .get::<Option<String>, _>("volume_ratio")
                    .and_then(|s| Decimal::from_str(&s).ok()),
                close: Decimal::from_str(row.get("close"))?,
                direction: row.get("direction"),
            });
        }
        Ok(results)
    }

    // --- backtests ---

    pub async fn save_backtest_run(
        &self,
        id: Uuid,
        symbol: &Symbol,
        params_json: &str,
        report_json: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backtest_runs (id, symbol, started_at, params_json, report_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(symbol.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(params_json)
        .bind(report_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- alerts ---

    pub async fn insert_alert(&self, alert: &AlertRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, timestamp, severity, kind, message, acknowledged)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(alert.timestamp.to_rfc3339())
        .bind(alert.severity.as_str())
        .bind(&alert.kind)
        .bind(&alert.message)
        .bind(alert.acknowledged as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_alerts(&self, limit: u32) -> Result<Vec<AlertRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp, severity, kind, message, acknowledged
            FROM alerts
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::new();
        for row in rows {
            alerts.push(AlertRecord {
                id: Uuid::parse_str(row.get("id"))?,
                timestamp: DateTime::parse_from_rfc3339(row.get("timestamp"))?
                    .with_timezone(&Utc),
                severity: Severity::parse(row.get("severity"))
                    .unwrap_or(Severity::Info),
                kind: row.get("kind"),
                message: row.get("message"),
                acknowledged: row.get::<i64, _>("acknowledged") != 0,
            });
        }
        Ok(alerts)
    }

    pub async fn acknowledge_alert(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET acknowledged = 1 WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn parse_screen_run(row: &sqlx::sqlite::SqliteRow) -> Result<ScreenRunRecord> {
    Ok(ScreenRunRecord {
        id: Uuid::parse_str(row.get("id"))?,
        started_at: DateTime::parse_from_rfc3339(row.get("started_at"))?.with_timezone(&Utc),
        finished_at: row
            .get::<Option<String>, _>("finished_at")
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.with_timezone(&Utc)),
        status: RunStatus::parse(row.get("status")).unwrap_or(RunStatus::Failed),
        symbols_total: row.get::<i64, _>("symbols_total") as u32,
        symbols_failed: row.get::<i64, _>("symbols_failed") as u32,
        error: row.get("error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    async fn test_db() -> Database {
        Database::new("sqlite::memory:").await.unwrap()
    }

    fn sample_bars(symbol: &Symbol) -> Vec<MarketBar> {
        (0..3)
            .map(|i| MarketBar {
                symbol: symbol.clone(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 2 + i, 0, 0, 0).unwrap(),
                open: dec!(100) + Decimal::from(i),
                high: dec!(102) + Decimal::from(i),
                low: dec!(99) + Decimal::from(i),
                close: dec!(101) + Decimal::from(i),
                volume: 1_000 * (i as u64 + 1),
            })
            .collect()
    }

    #[tokio::test]
    async fn bar_cache_round_trip() {
        let db = test_db().await;
        let symbol = Symbol::parse("AAPL").unwrap();
        let bars = sample_bars(&symbol);

        db.put_cached_bars("k1", &symbol, Period::Y1, Interval::D1, &bars)
            .await
            .unwrap();
        let cached = db.get_cached_bars("k1").await.unwrap().unwrap();

        assert_eq!(cached.bars.len(), bars.len());
        assert_eq!(cached.bars[2].close, bars[2].close);
        assert_eq!(cached.bars[2].volume, bars[2].volume);
        assert!(db.get_cached_bars("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn bar_cache_upsert_replaces() {
        let db = test_db().await;
        let symbol = Symbol::parse("AAPL").unwrap();
        let bars = sample_bars(&symbol);

        db.put_cached_bars("k1", &symbol, Period::Y1, Interval::D1, &bars[..1])
            .await
            .unwrap();
        db.put_cached_bars("k1", &symbol, Period::Y1, Interval::D1, &bars)
            .await
            .unwrap();
        let cached = db.get_cached_bars("k1").await.unwrap().unwrap();
        assert_eq!(cached.bars.len(), 3);
    }

    #[tokio::test]
    async fn prediction_round_trip() {
        let db = test_db().await;
        let symbol = Symbol::parse("CBA.AX").unwrap();
        let prediction = PredictionResult {
            symbol: symbol.clone(),
            generated_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap(),
            horizon_bars: 1,
            last_close: dec!(110.50),
            predicted_close: dec!(112.25),
            predicted_return_pct: dec!(1.58),
            confidence: dec!(0.62),
            sentiment_adjustment: dec!(1.02),
            model_kind: "ensemble-v1".to_string(),
        };

        db.save_prediction(&prediction).await.unwrap();
        let loaded = db.latest_prediction(&symbol).await.unwrap().unwrap();

        assert_eq!(loaded.predicted_close, prediction.predicted_close);
        assert_eq!(loaded.confidence, prediction.confidence);
        assert_eq!(loaded.model_kind, prediction.model_kind);
    }

    #[tokio::test]
    async fn model_store_round_trip() {
        let db = test_db().await;
        let symbol = Symbol::parse("MSFT").unwrap();

        db.save_model("mk1", &symbol, r#"{"w":[1.0,2.0]}"#, 0.0042)
            .await
            .unwrap();
        let stored = db.load_model("mk1").await.unwrap().unwrap();
        assert_eq!(stored.weights_json, r#"{"w":[1.0,2.0]}"#);
        assert!((stored.validation_mse - 0.0042).abs() < 1e-12);
        assert!(db.load_model("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn screen_run_lifecycle() {
        let db = test_db().await;
        let run = ScreenRunRecord::start(5);
        db.insert_screen_run(&run).await.unwrap();

        let results = vec![ScreenResultRecord {
            run_id: run.id,
            rank: 1,
            symbol: Symbol::parse("NVDA").unwrap(),
            score: dec!(0.87),
            predicted_return_pct: dec!(2.1),
            rsi: Some(dec!(58.3)),
            adx: Some(dec!(31.0)),
            volume_ratio: Some(dec!(1.4)),
            close: dec!(880.10),
            direction: "up".to_string(),
        }];
        db.insert_screen_results(&results).await.unwrap();
        db.finish_screen_run(run.id, RunStatus::Completed, 1, None)
            .await
            .unwrap();

        let latest = db.latest_screen_run().await.unwrap().unwrap();
        assert_eq!(latest.id, run.id);
        assert_eq!(latest.status, RunStatus::Completed);
        assert_eq!(latest.symbols_failed, 1);

        let loaded = db.screen_results(run.id).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol.as_str(), "NVDA");
        assert_eq!(loaded[0].score, dec!(0.87));
    }

    #[tokio::test]
    async fn alert_insert_and_acknowledge() {
        let db = test_db().await;
        let alert = AlertRecord::new(Severity::Warning, "large_move", "NVDA moved 8.2% in a day");
        db.insert_alert(&alert).await.unwrap();

        let alerts = db.recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].acknowledged);
        assert_eq!(alerts[0].severity, Severity::Warning);

        assert!(db.acknowledge_alert(alert.id).await.unwrap());
        let alerts = db.recent_alerts(10).await.unwrap();
        assert!(alerts[0].acknowledged);
        assert!(!db.acknowledge_alert(Uuid::new_v4()).await.unwrap());
    }
}
