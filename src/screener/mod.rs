use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alerts::{AlertKind, AlertManager};
use crate::config::{AppConfig, ConfigManager};
use crate::database::Database;
use crate::indicators::IndicatorSnapshot;
use crate::marketdata::MarketDataService;
use crate::ml::ModelStore;
use crate::sentiment::SentimentAnalyzer;
use crate::types::{BarSeries, PredictionResult, Symbol};

const LARGE_MOVE_PCT: Decimal = dec!(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// One screening run, as persisted and reported by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenRunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub symbols_total: u32,
    pub symbols_failed: u32,
    pub error: Option<String>,
}

impl ScreenRunRecord {
    pub fn start(symbols_total: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            symbols_total,
            symbols_failed: 0,
            error: None,
        }
    }
}

/// One ranked symbol in a screening run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenResultRecord {
    pub run_id: Uuid,
    pub rank: u32,
    pub symbol: Symbol,
    pub score: Decimal,
    pub predicted_return_pct: Decimal,
    pub rsi: Option<Decimal>,
    pub adx: Option<Decimal>,
    pub volume_ratio: Option<Decimal>,
    pub close: Decimal,
    pub direction: String,
}

/// Symbol that survived the data and indicator stages.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub symbol: Symbol,
    pub snapshot: IndicatorSnapshot,
    pub prediction: PredictionResult,
}

/// Composite ranking score in [0, 1]: predicted return dominates, with RSI
/// positioning, trend strength and volume confirmation as tiebreakers.
pub fn composite_score(candidate: &Candidate) -> Decimal {
    let snapshot = &candidate.snapshot;

    // Predicted return mapped from [-5, 5] pct onto [0, 1].
    let ret = candidate
        .prediction
        .predicted_return_pct
        .max(dec!(-5))
        .min(dec!(5));
    let return_score = (ret + dec!(5)) / dec!(10);

    // RSI positioning: best around the low 50s, worst at the extremes.
    let rsi_score = snapshot
        .rsi_14
        .map(|rsi| {
            let centre = dec!(52.5);
            Decimal::ONE - (rsi - centre).abs() / centre
        })
        .unwrap_or(dec!(0.5))
        .max(Decimal::ZERO);

    // Trend strength: ADX saturating at 50, with an uptrend bonus.
    let adx_score = snapshot
        .adx_14
        .map(|adx| (adx / dec!(50)).min(Decimal::ONE))
        .unwrap_or(Decimal::ZERO);
    let trend_score = if snapshot.in_uptrend() {
        (adx_score + dec!(0.25)).min(Decimal::ONE)
    } else {
        adx_score / dec!(2)
    };

    // Volume confirmation: ratio saturating at 2x average.
    let volume_score = snapshot
        .volume_ratio_20
        .map(|vr| (vr / dec!(2)).min(Decimal::ONE))
        .unwrap_or(dec!(0.5));

    dec!(0.5) * return_score
        + dec!(0.2) * rsi_score
        + dec!(0.15) * trend_score
        + dec!(0.15) * volume_score
}

/// Sort candidates by composite score and keep the top N.
pub fn rank_candidates(
    run_id: Uuid,
    mut candidates: Vec<Candidate>,
    top_n: usize,
) -> Vec<ScreenResultRecord> {
    let mut scored: Vec<(Decimal, Candidate)> = candidates
        .drain(..)
        .map(|c| (composite_score(&c), c))
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(top_n)
        .enumerate()
        .map(|(i, (score, c))| ScreenResultRecord {
            run_id,
            rank: (i + 1) as u32,
            symbol: c.symbol.clone(),
            score: score.round_dp(4),
            predicted_return_pct: c.prediction.predicted_return_pct,
            rsi: c.snapshot.rsi_14,
            adx: c.snapshot.adx_14,
            volume_ratio: c.snapshot.volume_ratio_20,
            close: c.snapshot.close,
            direction: c.prediction.direction().as_str().to_string(),
        })
        .collect()
}

/// The overnight screening pipeline: refresh data, compute indicators, score
/// sentiment, predict, rank and persist.
pub struct Screener {
    data: MarketDataService,
    db: Arc<Database>,
    models: Arc<ModelStore>,
    sentiment: Arc<SentimentAnalyzer>,
    alerts: Arc<AlertManager>,
    config: Arc<ConfigManager>,
}

impl Screener {
    pub fn new(
        data: MarketDataService,
        db: Arc<Database>,
        models: Arc<ModelStore>,
        sentiment: Arc<SentimentAnalyzer>,
        alerts: Arc<AlertManager>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            data,
            db,
            models,
            sentiment,
            alerts,
            config,
        }
    }

    /// Run the full pipeline. The returned record carries the final status;
    /// a top-level failure is recorded rather than propagated.
    pub async fn run(&self) -> Result<ScreenRunRecord> {
        let config = self.config.get().await;
        let symbols: Vec<Symbol> = config
            .watchlist
            .iter()
            .filter_map(|entry| entry.symbol().ok())
            .filter(|s| !s.is_index())
            .collect();

        let mut run = ScreenRunRecord::start(symbols.len() as u32);
        self.db.insert_screen_run(&run).await?;
        info!(run_id = %run.id, symbols = symbols.len(), "screen run started");

        match self.run_stages(&run, &symbols, &config).await {
            Ok(failed) => {
                run.symbols_failed = failed;
                run.status = RunStatus::Completed;
                run.finished_at = Some(Utc::now());
                self.db
                    .finish_screen_run(run.id, RunStatus::Completed, failed, None)
                    .await?;
                info!(run_id = %run.id, failed, "screen run completed");
            }
            Err(e) => {
                let message = e.to_string();
                error!(run_id = %run.id, "screen run failed: {}", message);
                run.status = RunStatus::Failed;
                run.finished_at = Some(Utc::now());
                run.error = Some(message.clone());
                self.db
                    .finish_screen_run(run.id, RunStatus::Failed, run.symbols_failed, Some(&message))
                    .await?;
                self.write_error_report(&config.screener.report_dir, &run, &message);
                self.alerts
                    .raise(AlertKind::PipelineFailed {
                        run_id: run.id.to_string(),
                        error: message,
                    })
                    .await;
            }
        }
        Ok(run)
    }

    async fn run_stages(
        &self,
        run: &ScreenRunRecord,
        symbols: &[Symbol],
        config: &AppConfig,
    ) -> Result<u32> {
        let period = config.prediction_period();
        let interval = config.prediction_interval();
        let horizon = config.prediction.horizon_bars;
        let mut failed = 0u32;

        // Stage 1: refresh bar history for the watchlist.
        info!(run_id = %run.id, "stage 1/5: refreshing bar history");
        let mut histories: Vec<(Symbol, BarSeries)> = Vec::new();
        for symbol in symbols {
            match self.data.get_history(symbol, period, interval).await {
                Ok(series) => histories.push((symbol.clone(), series)),
                Err(e) => {
                    warn!(symbol = %symbol, "skipping symbol, history fetch failed: {}", e);
                    self.alerts
                        .raise(AlertKind::DataFailure {
                            symbol: symbol.clone(),
                            error: e.to_string(),
                        })
                        .await;
                    failed += 1;
                }
            }
        }
        if histories.is_empty() {
            return Err(anyhow!("no symbol could be fetched"));
        }

        // Stage 2: indicator snapshots plus the liquidity filter.
        info!(run_id = %run.id, "stage 2/5: computing indicator snapshots");
        let mut snapshots: Vec<(Symbol, BarSeries, IndicatorSnapshot)> = Vec::new();
        for (symbol, series) in histories {
            let volumes = series.volumes();
            let avg_volume = if volumes.is_empty() {
                0
            } else {
                volumes.iter().sum::<u64>() / volumes.len() as u64
            };
            if avg_volume < config.screener.min_avg_volume {
                info!(symbol = %symbol, avg_volume, "skipping symbol, below volume floor");
                continue;
            }
            match IndicatorSnapshot::compute(&series) {
                Some(snapshot) => snapshots.push((symbol, series, snapshot)),
                None => {
                    warn!(symbol = %symbol, "skipping symbol, empty series");
                    failed += 1;
                }
            }
        }

        // Stage 3: market sentiment (one blended score per symbol).
        info!(run_id = %run.id, "stage 3/5: scoring market sentiment");
        let mut sentiments: Vec<f64> = Vec::with_capacity(snapshots.len());
        for (symbol, _, _) in &snapshots {
            let score = self.sentiment.symbol_sentiment(symbol).await;
            sentiments.push(score.score);
        }

        // Stage 4: train or load the ensemble and predict per symbol.
        info!(run_id = %run.id, "stage 4/5: generating predictions");
        let mut candidates: Vec<Candidate> = Vec::new();
        for ((symbol, series, snapshot), sentiment) in
            snapshots.into_iter().zip(sentiments.into_iter())
        {
            let model = match self
                .models
                .get_or_train(&symbol, period, interval, &series, horizon)
                .await
            {
                Ok(model) => model,
                Err(e) => {
                    warn!(symbol = %symbol, "skipping symbol, model unavailable: {}", e);
                    failed += 1;
                    continue;
                }
            };
            match self
                .models
                .predict(&symbol, &series, &model, horizon, Some(sentiment))
                .await
            {
                Ok(prediction) => {
                    if let Some(change) = snapshot.change_5d_pct {
                        if change.abs() > LARGE_MOVE_PCT {
                            self.alerts
                                .raise(AlertKind::LargeMove {
                                    symbol: symbol.clone(),
                                    change_pct: change.round_dp(2),
                                })
                                .await;
                        }
                    }
                    candidates.push(Candidate {
                        symbol,
                        snapshot,
                        prediction,
                    });
                }
                Err(e) => {
                    warn!(symbol = %symbol, "skipping symbol, prediction failed: {}", e);
                    failed += 1;
                }
            }
        }

        // Stage 5: rank, persist and report.
        info!(run_id = %run.id, "stage 5/5: ranking and persisting results");
        let results = rank_candidates(run.id, candidates, config.screener.top_n);
        for result in &results {
            if result.predicted_return_pct > config.screener.entry_threshold_pct {
                self.alerts
                    .raise(AlertKind::StrongSignal {
                        symbol: result.symbol.clone(),
                        predicted_return_pct: result.predicted_return_pct.round_dp(2),
                    })
                    .await;
            }
        }
        self.db.insert_screen_results(&results).await?;
        self.write_report(&config.screener.report_dir, run, &results);
        self.alerts
            .raise(AlertKind::ScreenCompleted {
                run_id: run.id.to_string(),
                symbols_ranked: results.len(),
            })
            .await;

        Ok(failed)
    }

    fn write_report(&self, dir: &str, run: &ScreenRunRecord, results: &[ScreenResultRecord]) {
        #[derive(Serialize)]
        struct Report<'a> {
            run_id: Uuid,
            generated_at: DateTime<Utc>,
            results: &'a [ScreenResultRecord],
        }
        let report = Report {
            run_id: run.id,
            generated_at: Utc::now(),
            results,
        };
        if let Err(e) = self.write_json(dir, &format!("screen_{}.json", run.id), &report) {
            warn!("failed to write screen report: {}", e);
        }
    }

    fn write_error_report(&self, dir: &str, run: &ScreenRunRecord, message: &str) {
        #[derive(Serialize)]
        struct ErrorReport<'a> {
            run_id: Uuid,
            failed_at: DateTime<Utc>,
            error: &'a str,
        }
        let report = ErrorReport {
            run_id: run.id,
            failed_at: Utc::now(),
            error: message,
        };
        if let Err(e) = self.write_json(dir, &format!("screen_{}_error.json", run.id), &report) {
            warn!("failed to write error report: {}", e);
        }
    }

    fn write_json<T: Serialize>(&self, dir: &str, filename: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = Path::new(dir).join(filename);
        std::fs::write(&path, serde_json::to_vec_pretty(value)?)?;
        info!("wrote report {}", path.display());
        Ok(())
    }
}
