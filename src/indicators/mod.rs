pub mod ema;
pub mod rsi;
pub mod macd;
pub mod bollinger;
pub mod atr;
pub mod adx;
pub mod volume;

pub use ema::*;
pub use rsi::*;
pub use macd::*;
pub use bollinger::*;
pub use atr::*;
pub use adx::*;
pub use volume::*;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::BarSeries;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}

pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values.iter().rev().take(period).sum();
    Some(sum / Decimal::from(period as u32))
}

pub fn highest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).max().copied()
}

pub fn lowest(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    values.iter().rev().take(period).min().copied()
}

pub fn stddev(values: &[Decimal], period: usize) -> Option<Decimal> {
    if values.len() < period {
        return None;
    }
    let mean = sma(values, period)?;
    let variance: Decimal = values
        .iter()
        .rev()
        .take(period)
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum::<Decimal>()
        / Decimal::from(period as u32);

    Some(sqrt_decimal(variance))
}

/// Newton's method square root; Decimal has no intrinsic sqrt.
pub(crate) fn sqrt_decimal(value: Decimal) -> Decimal {
    if value.is_zero() || value.is_sign_negative() {
        return Decimal::ZERO;
    }

    let mut guess = value / Decimal::from(2);
    if guess.is_zero() {
        guess = value;
    }
    let epsilon = Decimal::new(1, 10);

    for _ in 0..50 {
        let new_guess = (guess + value / guess) / Decimal::from(2);
        if (new_guess - guess).abs() < epsilon {
            return new_guess;
        }
        guess = new_guess;
    }
    guess
}

/// Full indicator row computed over a bar series, as served by the API and
/// consumed by the screener and the feature builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub close: Decimal,
    pub sma_20: Option<Decimal>,
    pub sma_50: Option<Decimal>,
    pub ema_12: Option<Decimal>,
    pub ema_26: Option<Decimal>,
    pub rsi_14: Option<Decimal>,
    pub macd_line: Option<Decimal>,
    pub macd_signal: Option<Decimal>,
    pub macd_histogram: Option<Decimal>,
    pub bollinger_upper: Option<Decimal>,
    pub bollinger_middle: Option<Decimal>,
    pub bollinger_lower: Option<Decimal>,
    pub bollinger_percent_b: Option<Decimal>,
    pub bollinger_bandwidth: Option<Decimal>,
    pub atr_14: Option<Decimal>,
    pub atr_pct: Option<Decimal>,
    pub adx_14: Option<Decimal>,
    pub obv: Decimal,
    pub volume_ratio_20: Option<Decimal>,
    pub change_5d_pct: Option<Decimal>,
    pub change_20d_pct: Option<Decimal>,
}

impl IndicatorSnapshot {
    pub fn compute(series: &BarSeries) -> Option<Self> {
        let last = series.last()?;
        let closes = series.closes();

        let mut ema_12 = Ema::new(12);
        let mut ema_26 = Ema::new(26);
        let mut rsi = Rsi::new(14);
        let mut macd = Macd::default_params();
        let mut bollinger = BollingerBands::default_params();
        let mut atr = Atr::new(14);
        let mut adx = Adx::new(14);
        let mut obv = Obv::new();
        let mut volume_ratio = VolumeRatio::new(20);

        for bar in &series.bars {
            ema_12.update(bar.close);
            ema_26.update(bar.close);
            rsi.update(bar.close);
            macd.update(bar.close);
            bollinger.update(bar.close);
            atr.update(bar.high, bar.low, bar.close);
            adx.update(bar.high, bar.low, bar.close);
            obv.update(bar.close, bar.volume);
            volume_ratio.update(bar.volume);
        }

        Some(Self {
            close: last.close,
            sma_20: sma(&closes, 20),
            sma_50: sma(&closes, 50),
            ema_12: ema_12.value(),
            ema_26: ema_26.value(),
            rsi_14: rsi.value(),
            macd_line: macd.macd_line(),
            macd_signal: macd.signal_line(),
            macd_histogram: macd.histogram(),
            bollinger_upper: bollinger.upper(),
            bollinger_middle: bollinger.middle(),
            bollinger_lower: bollinger.lower(),
            bollinger_percent_b: bollinger.percent_b(),
            bollinger_bandwidth: bollinger.bandwidth(),
            atr_14: atr.value(),
            atr_pct: atr.pct_of_price(last.close),
            adx_14: adx.value(),
            obv: obv.value(),
            volume_ratio_20: volume_ratio.value(),
            change_5d_pct: series.trailing_change_pct(5),
            change_20d_pct: series.trailing_change_pct(20),
        })
    }

    /// Above both moving averages and the fast one leads.
    pub fn in_uptrend(&self) -> bool {
        match (self.sma_20, self.sma_50) {
            (Some(fast), Some(slow)) => self.close > fast && fast > slow,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketBar, Symbol};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn synthetic_series(n: usize) -> BarSeries {
        let symbol = Symbol::parse("TEST").unwrap();
        let start = Utc.with_ymd_and_hms(2023, 1, 2, 0, 0, 0).unwrap();
        let bars = (0..n)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.3 + 4.0 * ((i as f64) * 0.2).sin();
                let close = Decimal::from_f64_retain(base).unwrap().round_dp(4);
                MarketBar {
                    symbol: symbol.clone(),
                    timestamp: start + Duration::days(i as i64),
                    open: close - dec!(0.5),
                    high: close + dec!(1),
                    low: close - dec!(1),
                    close,
                    volume: 40_000 + (i as u64 % 7) * 2_000,
                }
            })
            .collect();
        BarSeries::from_bars(bars)
    }

    #[test]
    fn snapshot_fields_are_consistent_with_enough_history() {
        let series = synthetic_series(80);
        let snapshot = IndicatorSnapshot::compute(&series).unwrap();

        assert_eq!(snapshot.close, series.last().unwrap().close);
        assert!(snapshot.sma_20.is_some());
        assert!(snapshot.sma_50.is_some());
        assert!(snapshot.ema_12.is_some());
        assert!(snapshot.ema_26.is_some());
        assert!(snapshot.adx_14.is_some());
        assert!(snapshot.volume_ratio_20.is_some());
        assert!(snapshot.change_5d_pct.is_some());
        assert!(snapshot.change_20d_pct.is_some());

        let rsi = snapshot.rsi_14.unwrap();
        assert!(rsi >= Decimal::ZERO && rsi <= dec!(100));

        let line = snapshot.macd_line.unwrap();
        let signal = snapshot.macd_signal.unwrap();
        assert_eq!(snapshot.macd_histogram, Some(line - signal));

        let atr = snapshot.atr_14.unwrap();
        assert_eq!(
            snapshot.atr_pct,
            Some(atr / snapshot.close * Decimal::from(100))
        );

        let upper = snapshot.bollinger_upper.unwrap();
        let middle = snapshot.bollinger_middle.unwrap();
        let lower = snapshot.bollinger_lower.unwrap();
        assert!(upper >= middle && middle >= lower);
    }

    #[test]
    fn snapshot_of_empty_series_is_none() {
        assert!(IndicatorSnapshot::compute(&BarSeries::new(10)).is_none());
    }

    #[test]
    fn short_series_leaves_slow_fields_unset() {
        let series = synthetic_series(10);
        let snapshot = IndicatorSnapshot::compute(&series).unwrap();
        assert!(snapshot.sma_50.is_none());
        assert!(snapshot.change_20d_pct.is_none());
        assert_eq!(snapshot.close, series.last().unwrap().close);
    }

    #[test]
    fn sma_over_window() {
        let values = vec![dec!(1), dec!(2), dec!(3), dec!(4)];
        assert_eq!(sma(&values, 2), Some(dec!(3.5)));
        assert_eq!(sma(&values, 5), None);
    }

    #[test]
    fn sqrt_converges() {
        let root = sqrt_decimal(dec!(144));
        assert!((root - dec!(12)).abs() < dec!(0.0001));
        assert_eq!(sqrt_decimal(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn stddev_of_constant_series_is_zero() {
        let values = vec![dec!(5); 10];
        assert_eq!(stddev(&values, 10), Some(Decimal::ZERO));
    }
}
