use rust_decimal::Decimal;
use super::{sma, stddev, Indicator};

/// Bollinger Bands over a rolling close window.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    period: usize,
    std_multiplier: Decimal,
    closes: Vec<Decimal>,
    last_close: Option<Decimal>,
}

impl BollingerBands {
    pub fn new(period: usize, std_multiplier: Decimal) -> Self {
        Self {
            period,
            std_multiplier,
            closes: Vec::new(),
            last_close: None,
        }
    }

    /// Standard 20-period, 2-sigma configuration.
    pub fn default_params() -> Self {
        Self::new(20, Decimal::from(2))
    }

    pub fn update(&mut self, close: Decimal) {
        self.last_close = Some(close);
        self.closes.push(close);
        if self.closes.len() > self.period {
            self.closes.remove(0);
        }
    }

    pub fn middle(&self) -> Option<Decimal> {
        sma(&self.closes, self.period)
    }

    pub fn upper(&self) -> Option<Decimal> {
        let mid = self.middle()?;
        let sd = stddev(&self.closes, self.period)?;
        Some(mid + sd * self.std_multiplier)
    }

    pub fn lower(&self) -> Option<Decimal> {
        let mid = self.middle()?;
        let sd = stddev(&self.closes, self.period)?;
        Some(mid - sd * self.std_multiplier)
    }

    /// %B: where the close sits within the bands. 0 at the lower band,
    /// 1 at the upper. Undefined when the bands collapse.
    pub fn percent_b(&self) -> Option<Decimal> {
        let close = self.last_close?;
        let upper = self.upper()?;
        let lower = self.lower()?;
        let width = upper - lower;
        if width.is_zero() {
            return None;
        }
        Some((close - lower) / width)
    }

    /// Band width relative to the middle band.
    pub fn bandwidth(&self) -> Option<Decimal> {
        let upper = self.upper()?;
        let lower = self.lower()?;
        let mid = self.middle()?;
        if mid.is_zero() {
            return None;
        }
        Some((upper - lower) / mid)
    }
}

impl Indicator for BollingerBands {
    fn name(&self) -> &'static str {
        "BollingerBands"
    }

    fn is_ready(&self) -> bool {
        self.closes.len() >= self.period
    }

    fn reset(&mut self) {
        self.closes.clear();
        self.last_close = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn constant_prices_collapse_bands() {
        let mut bb = BollingerBands::new(5, Decimal::from(2));
        for _ in 0..5 {
            bb.update(dec!(50));
        }
        assert_eq!(bb.middle(), Some(dec!(50)));
        assert_eq!(bb.upper(), Some(dec!(50)));
        assert_eq!(bb.percent_b(), None);
    }

    #[test]
    fn percent_b_formula() {
        let mut bb = BollingerBands::new(4, Decimal::from(2));
        for p in [dec!(10), dec!(12), dec!(14), dec!(16)] {
            bb.update(p);
        }
        let upper = bb.upper().unwrap();
        let lower = bb.lower().unwrap();
        let expected = (dec!(16) - lower) / (upper - lower);
        assert_eq!(bb.percent_b(), Some(expected));
        assert!(upper > bb.middle().unwrap());
        assert!(lower < bb.middle().unwrap());
    }

    #[test]
    fn not_ready_until_window_fills() {
        let mut bb = BollingerBands::new(20, Decimal::from(2));
        for i in 0..19u32 {
            bb.update(Decimal::from(100 + i));
        }
        assert!(!bb.is_ready());
        assert_eq!(bb.middle(), None);
        bb.update(dec!(120));
        assert!(bb.is_ready());
    }
}
