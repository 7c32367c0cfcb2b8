use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Symbol;

/// One OHLCV price bar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketBar {
    pub symbol: Symbol,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
}

impl MarketBar {
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    pub fn change(&self) -> Decimal {
        self.close - self.open
    }

    pub fn change_pct(&self) -> Decimal {
        if self.open.is_zero() {
            return Decimal::ZERO;
        }
        (self.close - self.open) / self.open * Decimal::from(100)
    }

    pub fn is_up(&self) -> bool {
        self.close > self.open
    }

    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// Gap from a previous close to this bar's open, as a percentage.
    pub fn gap_pct(&self, prev_close: Decimal) -> Decimal {
        if prev_close.is_zero() {
            return Decimal::ZERO;
        }
        (self.open - prev_close) / prev_close * Decimal::from(100)
    }
}

/// Bounded, chronologically ordered buffer of bars.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    pub bars: Vec<MarketBar>,
    pub max_size: usize,
}

impl BarSeries {
    pub fn new(max_size: usize) -> Self {
        Self {
            bars: Vec::with_capacity(max_size),
            max_size,
        }
    }

    pub fn from_bars(bars: Vec<MarketBar>) -> Self {
        let max_size = bars.len().max(1);
        Self { bars, max_size }
    }

    pub fn push(&mut self, bar: MarketBar) {
        if self.max_size > 0 && self.bars.len() >= self.max_size {
            self.bars.remove(0);
        }
        self.bars.push(bar);
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn last(&self) -> Option<&MarketBar> {
        self.bars.last()
    }

    pub fn last_n(&self, n: usize) -> &[MarketBar] {
        let len = self.bars.len();
        if n >= len {
            &self.bars[..]
        } else {
            &self.bars[len - n..]
        }
    }

    pub fn closes(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn highs(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<Decimal> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn volumes(&self) -> Vec<u64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Close-to-close percentage change over the last `n` bars.
    pub fn trailing_change_pct(&self, n: usize) -> Option<Decimal> {
        if self.bars.len() < n + 1 {
            return None;
        }
        let first = self.bars[self.bars.len() - n - 1].close;
        let last = self.bars.last()?.close;
        if first.is_zero() {
            return None;
        }
        Some((last - first) / first * Decimal::from(100))
    }
}

/// Bar granularity in Yahoo chart-API notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    H1,
    D1,
    W1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::H1 => "1h",
            Interval::D1 => "1d",
            Interval::W1 => "1wk",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1h" => Some(Interval::H1),
            "1d" => Some(Interval::D1),
            "1wk" => Some(Interval::W1),
            _ => None,
        }
    }

    /// Bars per trading year, used for annualizing returns.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Interval::H1 => 252.0 * 6.5,
            Interval::D1 => 252.0,
            Interval::W1 => 52.0,
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lookback range in Yahoo chart-API notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Period {
    M1,
    M3,
    M6,
    Y1,
    Y2,
    Y5,
    Max,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::M1 => "1mo",
            Period::M3 => "3mo",
            Period::M6 => "6mo",
            Period::Y1 => "1y",
            Period::Y2 => "2y",
            Period::Y5 => "5y",
            Period::Max => "max",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1mo" => Some(Period::M1),
            "3mo" => Some(Period::M3),
            "6mo" => Some(Period::M6),
            "1y" => Some(Period::Y1),
            "2y" => Some(Period::Y2),
            "5y" => Some(Period::Y5),
            "max" => Some(Period::Max),
            _ => None,
        }
    }

    pub fn approx_days(&self) -> i64 {
        match self {
            Period::M1 => 30,
            Period::M3 => 91,
            Period::M6 => 182,
            Period::Y1 => 365,
            Period::Y2 => 730,
            Period::Y5 => 1825,
            Period::Max => 3650,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Latest quote snapshot derived from the most recent bars.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub price: Decimal,
    pub change: Decimal,
    pub change_pct: Decimal,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn bar(open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> MarketBar {
        MarketBar {
            symbol: Symbol::parse("AAPL").unwrap(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000,
        }
    }

    #[test]
    fn change_pct_and_direction() {
        let b = bar(dec!(100), dec!(106), dec!(99), dec!(105));
        assert_eq!(b.change_pct(), dec!(5));
        assert!(b.is_up());
        assert_eq!(b.range(), dec!(7));
    }

    #[test]
    fn series_is_bounded() {
        let mut series = BarSeries::new(3);
        for i in 0..5u32 {
            let price = Decimal::from(100 + i);
            series.push(bar(price, price, price, price));
        }
        assert_eq!(series.len(), 3);
        assert_eq!(series.last().unwrap().close, dec!(104));
    }

    #[test]
    fn interval_and_period_round_trip() {
        for iv in [Interval::H1, Interval::D1, Interval::W1] {
            assert_eq!(Interval::parse(iv.as_str()), Some(iv));
        }
        for p in [
            Period::M1,
            Period::M3,
            Period::M6,
            Period::Y1,
            Period::Y2,
            Period::Y5,
            Period::Max,
        ] {
            assert_eq!(Period::parse(p.as_str()), Some(p));
        }
    }

    #[test]
    fn trailing_change_needs_enough_bars() {
        let mut series = BarSeries::new(10);
        series.push(bar(dec!(100), dec!(100), dec!(100), dec!(100)));
        assert!(series.trailing_change_pct(1).is_none());
        series.push(bar(dec!(100), dec!(110), dec!(100), dec!(110)));
        assert_eq!(series.trailing_change_pct(1), Some(dec!(10)));
    }
}
