use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::ensemble::EnsembleModel;
use super::features::{build_dataset, latest_features};
use crate::database::Database;
use crate::marketdata::cache_key;
use crate::types::{BarSeries, Interval, Period, PredictionResult, Symbol};

const MAX_PREDICTED_RETURN_PCT: f64 = 10.0;

/// Keyed model persistence: load a stored ensemble when it is fresh enough,
/// otherwise retrain and save.
pub struct ModelStore {
    db: Arc<Database>,
    max_age_hours: i64,
}

impl ModelStore {
    pub fn new(db: Arc<Database>, max_age_hours: i64) -> Self {
        Self { db, max_age_hours }
    }

    pub async fn get_or_train(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
        series: &BarSeries,
        horizon: usize,
    ) -> Result<EnsembleModel> {
        let key = cache_key(symbol, period, interval);

        if let Some(stored) = self.db.load_model(&key).await? {
            let age = Utc::now() - stored.trained_at;
            if age < Duration::hours(self.max_age_hours) {
                debug!(symbol = %symbol, age_hours = age.num_hours(), "model cache hit");
                return EnsembleModel::from_json(&stored.weights_json);
            }
            debug!(symbol = %symbol, age_hours = age.num_hours(), "model stale, retraining");
        }

        let dataset = build_dataset(series, horizon);
        let (model, report) = EnsembleModel::train(&dataset)?;
        info!(
            symbol = %symbol,
            samples = report.samples,
            validation_mse = report.validation_mse,
            "trained ensemble for storage"
        );
        self.db
            .save_model(&key, symbol, &model.to_json()?, model.validation_mse)
            .await?;
        Ok(model)
    }

    /// Run one prediction and persist it. The sentiment score in [0, 1]
    /// scales the raw model output; a neutral 0.5 leaves it unchanged.
    pub async fn predict(
        &self,
        symbol: &Symbol,
        series: &BarSeries,
        model: &EnsembleModel,
        horizon: usize,
        sentiment_score: Option<f64>,
    ) -> Result<PredictionResult> {
        let prediction = make_prediction(symbol, series, model, horizon, sentiment_score)?;
        self.db.save_prediction(&prediction).await?;
        Ok(prediction)
    }
}

pub fn make_prediction(
    symbol: &Symbol,
    series: &BarSeries,
    model: &EnsembleModel,
    horizon: usize,
    sentiment_score: Option<f64>,
) -> Result<PredictionResult> {
    let last = series
        .last()
        .ok_or_else(|| anyhow!("no bars for {}", symbol))?;
    let row =
        latest_features(series).ok_or_else(|| anyhow!("not enough history for {}", symbol))?;

    let raw_return = model
        .predict(&row)
        .clamp(-MAX_PREDICTED_RETURN_PCT, MAX_PREDICTED_RETURN_PCT);

    // Score 0.5 is neutral; the band is deliberately narrow so sentiment
    // nudges rather than overrides the model.
    let adjustment = sentiment_score
        .map(|s| 0.8 + 0.4 * s.clamp(0.0, 1.0))
        .unwrap_or(1.0);
    let adjusted_return =
        (raw_return * adjustment).clamp(-MAX_PREDICTED_RETURN_PCT, MAX_PREDICTED_RETURN_PCT);

    let last_close: f64 = last
        .close
        .try_into()
        .map_err(|_| anyhow!("close out of f64 range"))?;
    let predicted_close = last_close * (1.0 + adjusted_return / 100.0);

    let rmse = model.validation_mse.max(0.0).sqrt();
    let confidence = (1.0 / (1.0 + rmse)).clamp(0.05, 0.95);

    let to_decimal = |v: f64, what: &str| -> Result<Decimal> {
        Decimal::from_f64_retain(v)
            .map(|d| d.round_dp(6))
            .ok_or_else(|| anyhow!("{} not representable: {}", what, v))
    };

    Ok(PredictionResult {
        symbol: symbol.clone(),
        generated_at: Utc::now(),
        horizon_bars: horizon,
        last_close: last.close,
        predicted_close: to_decimal(predicted_close, "predicted close")?,
        predicted_return_pct: to_decimal(adjusted_return, "predicted return")?,
        confidence: to_decimal(confidence, "confidence")?,
        sentiment_adjustment: to_decimal(adjustment, "sentiment adjustment")?,
        model_kind: EnsembleModel::KIND.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::build_dataset;
    use crate::types::MarketBar;
    use chrono::TimeZone;

    fn trending_series(n: usize) -> BarSeries {
        let symbol = Symbol::parse("TEST").unwrap();
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let mut series = BarSeries::new(n);
        for i in 0..n {
            let base = 100.0 + i as f64 * 0.4 + 4.0 * ((i as f64) * 0.5).sin();
            let close = Decimal::from_f64_retain(base).unwrap();
            series.push(MarketBar {
                symbol: symbol.clone(),
                timestamp: start + chrono::Duration::days(i as i64),
                open: close - Decimal::ONE,
                high: close + Decimal::from(2),
                low: close - Decimal::from(2),
                close,
                volume: 20_000,
            });
        }
        series
    }

    #[test]
    fn prediction_is_clamped_and_confident() {
        let series = trending_series(250);
        let dataset = build_dataset(&series, 1);
        let (model, _) = EnsembleModel::train(&dataset).unwrap();

        let prediction = make_prediction(
            &Symbol::parse("TEST").unwrap(),
            &series,
            &model,
            1,
            Some(0.5),
        )
        .unwrap();

        let max = Decimal::from_f64_retain(MAX_PREDICTED_RETURN_PCT).unwrap();
        assert!(prediction.predicted_return_pct.abs() <= max);
        assert!(prediction.confidence > Decimal::ZERO);
        assert!(prediction.confidence < Decimal::ONE);
        // Neutral sentiment leaves the model output untouched.
        assert_eq!(prediction.sentiment_adjustment, Decimal::ONE);
    }

    #[test]
    fn bullish_sentiment_scales_return_up() {
        let series = trending_series(250);
        let dataset = build_dataset(&series, 1);
        let (model, _) = EnsembleModel::train(&dataset).unwrap();
        let symbol = Symbol::parse("TEST").unwrap();

        let neutral = make_prediction(&symbol, &series, &model, 1, Some(0.5)).unwrap();
        let bullish = make_prediction(&symbol, &series, &model, 1, Some(1.0)).unwrap();

        if neutral.predicted_return_pct > Decimal::ZERO {
            assert!(bullish.predicted_return_pct >= neutral.predicted_return_pct);
        } else {
            assert!(bullish.predicted_return_pct <= neutral.predicted_return_pct);
        }
    }

    #[tokio::test]
    async fn store_round_trips_through_sqlite() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let store = ModelStore::new(db.clone(), 24);
        let symbol = Symbol::parse("TEST").unwrap();
        let series = trending_series(250);

        let model = store
            .get_or_train(&symbol, Period::Y1, Interval::D1, &series, 1)
            .await
            .unwrap();
        // Second call must come from the store, not a retrain.
        let cached = store
            .get_or_train(&symbol, Period::Y1, Interval::D1, &series, 1)
            .await
            .unwrap();

        let row = latest_features(&series).unwrap();
        assert!((model.predict(&row) - cached.predict(&row)).abs() < 1e-12);

        let prediction = store
            .predict(&symbol, &series, &model, 1, None)
            .await
            .unwrap();
        let loaded = db.latest_prediction(&symbol).await.unwrap().unwrap();
        assert_eq!(loaded.predicted_close, prediction.predicted_close);
    }
}
