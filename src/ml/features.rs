use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::indicators::{sma, Adx, Atr, BollingerBands, Macd, Rsi, VolumeRatio};
use crate::types::BarSeries;

/// Fixed-size feature vector extracted per bar for the regressors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub ret_1: f64,
    pub ret_5: f64,
    pub rsi_14: f64,
    pub macd_hist_pct: f64,
    pub percent_b: f64,
    pub volume_ratio: f64,
    pub atr_pct: f64,
    pub adx_14: f64,
    pub sma20_ratio: f64,
    pub sma50_ratio: f64,
    pub day_of_week: f64,
}

impl FeatureRow {
    pub const NUM_FEATURES: usize = 11;

    pub fn to_array(&self) -> [f64; Self::NUM_FEATURES] {
        [
            self.ret_1,
            self.ret_5,
            self.rsi_14,
            self.macd_hist_pct,
            self.percent_b,
            self.volume_ratio,
            self.atr_pct,
            self.adx_14,
            self.sma20_ratio,
            self.sma50_ratio,
            self.day_of_week,
        ]
    }

    pub fn feature_names() -> Vec<String> {
        [
            "ret_1",
            "ret_5",
            "rsi_14",
            "macd_hist_pct",
            "percent_b",
            "volume_ratio",
            "atr_pct",
            "adx_14",
            "sma20_ratio",
            "sma50_ratio",
            "day_of_week",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

/// Supervised dataset: one feature row per bar once all indicators are warm,
/// with the forward pct return over `horizon` bars as the target.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<FeatureRow>,
    pub targets: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Build the supervised dataset by sliding over history. Indicators run
/// incrementally in one pass; rows before warm-up are dropped.
pub fn build_dataset(series: &BarSeries, horizon: usize) -> Dataset {
    let rows = feature_rows(series);
    let closes = series.closes();

    let mut dataset = Dataset::default();
    for (bar_idx, row) in rows {
        let future_idx = bar_idx + horizon;
        if future_idx >= closes.len() {
            break;
        }
        let now: f64 = match closes[bar_idx].try_into() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let future: f64 = match closes[future_idx].try_into() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if now.abs() < f64::EPSILON {
            continue;
        }
        dataset.features.push(row);
        dataset.targets.push((future - now) / now * 100.0);
    }
    dataset
}

/// Feature row for the most recent bar, used at prediction time.
pub fn latest_features(series: &BarSeries) -> Option<FeatureRow> {
    let (idx, row) = feature_rows(series).pop()?;
    // Only trust a row computed on the actual last bar.
    if idx + 1 == series.len() {
        Some(row)
    } else {
        None
    }
}

fn feature_rows(series: &BarSeries) -> Vec<(usize, FeatureRow)> {
    let mut rsi = Rsi::new(14);
    let mut macd = Macd::default_params();
    let mut bollinger = BollingerBands::default_params();
    let mut atr = Atr::new(14);
    let mut adx = Adx::new(14);
    let mut volume_ratio = VolumeRatio::new(20);

    let mut closes: Vec<rust_decimal::Decimal> = Vec::with_capacity(series.len());
    let mut rows = Vec::new();

    for (bar_idx, bar) in series.bars.iter().enumerate() {
        rsi.update(bar.close);
        macd.update(bar.close);
        bollinger.update(bar.close);
        atr.update(bar.high, bar.low, bar.close);
        adx.update(bar.high, bar.low, bar.close);
        volume_ratio.update(bar.volume);
        closes.push(bar.close);

        let close: f64 = match bar.close.try_into() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if close.abs() < f64::EPSILON {
            continue;
        }

        let row = (|| {
            let n = closes.len();
            let ret_n = |lag: usize| -> Option<f64> {
                if n <= lag {
                    return None;
                }
                let prev: f64 = closes[n - 1 - lag].try_into().ok()?;
                if prev.abs() < f64::EPSILON {
                    return None;
                }
                Some((close - prev) / prev * 100.0)
            };

            let sma_ratio = |period: usize| -> Option<f64> {
                let avg: f64 = sma(&closes, period)?.try_into().ok()?;
                if avg.abs() < f64::EPSILON {
                    return None;
                }
                Some(close / avg)
            };

            Some(FeatureRow {
                ret_1: ret_n(1)?,
                ret_5: ret_n(5)?,
                rsi_14: rsi.value()?.try_into().ok()?,
                macd_hist_pct: {
                    let hist: f64 = macd.histogram()?.try_into().ok()?;
                    hist / close * 100.0
                },
                percent_b: bollinger.percent_b()?.try_into().ok()?,
                volume_ratio: volume_ratio.value()?.try_into().ok()?,
                atr_pct: atr.pct_of_price(bar.close)?.try_into().ok()?,
                adx_14: adx.value()?.try_into().ok()?,
                sma20_ratio: sma_ratio(20)?,
                sma50_ratio: sma_ratio(50)?,
                day_of_week: bar.timestamp.weekday().num_days_from_monday() as f64,
            })
        })();

        if let Some(row) = row {
            rows.push((bar_idx, row));
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketBar, Symbol};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn synthetic_series(n: usize) -> BarSeries {
        let symbol = Symbol::parse("TEST").unwrap();
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let mut series = BarSeries::new(n);
        for i in 0..n {
            // Gentle oscillation so every indicator sees both directions.
            let base = 100.0 + (i as f64 * 0.3) + 5.0 * ((i as f64) * 0.37).sin();
            let close = Decimal::from_f64_retain(base).unwrap();
            series.push(MarketBar {
                symbol: symbol.clone(),
                timestamp: start + Duration::days(i as i64),
                open: close - Decimal::ONE,
                high: close + Decimal::from(2),
                low: close - Decimal::from(2),
                close,
                volume: 10_000 + (i as u64 % 7) * 1_000,
            });
        }
        series
    }

    #[test]
    fn dataset_drops_warmup_and_tail() {
        let series = synthetic_series(120);
        let dataset = build_dataset(&series, 1);
        assert!(!dataset.is_empty());
        assert_eq!(dataset.features.len(), dataset.targets.len());
        // Warm-up (50-bar SMA and ADX) plus the unlabelled tail must be gone.
        assert!(dataset.len() < 120 - 50);
    }

    #[test]
    fn latest_features_available_with_enough_history() {
        let series = synthetic_series(80);
        let row = latest_features(&series).unwrap();
        assert!(row.rsi_14 >= 0.0 && row.rsi_14 <= 100.0);
        assert!(row.sma20_ratio > 0.5 && row.sma20_ratio < 2.0);
        assert!(row.day_of_week >= 0.0 && row.day_of_week <= 6.0);
    }

    #[test]
    fn short_history_yields_nothing() {
        let series = synthetic_series(30);
        assert!(latest_features(&series).is_none());
        assert!(build_dataset(&series, 1).is_empty());
    }
}
