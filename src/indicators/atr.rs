use rust_decimal::Decimal;
use super::Indicator;

/// Average True Range with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    prev_close: Option<Decimal>,
    value: Option<Decimal>,
    tr_sum: Decimal,
    count: usize,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            value: None,
            tr_sum: Decimal::ZERO,
            count: 0,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        let tr = match self.prev_close {
            Some(prev) => {
                let hl = high - low;
                let hc = (high - prev).abs();
                let lc = (low - prev).abs();
                hl.max(hc).max(lc)
            }
            None => high - low,
        };
        self.prev_close = Some(close);
        self.count += 1;

        let period = Decimal::from(self.period as u32);
        if self.count < self.period {
            self.tr_sum += tr;
            return None;
        }
        if self.count == self.period {
            self.tr_sum += tr;
            self.value = Some(self.tr_sum / period);
            return self.value;
        }

        if let Some(prev) = self.value {
            self.value = Some((prev * (period - Decimal::ONE) + tr) / period);
        }
        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    /// ATR as a percentage of the given price, the volatility gauge used by
    /// the screener and position sizing.
    pub fn pct_of_price(&self, price: Decimal) -> Option<Decimal> {
        if price.is_zero() {
            return None;
        }
        self.value.map(|v| v / price * Decimal::from(100))
    }
}

impl Indicator for Atr {
    fn name(&self) -> &'static str {
        "ATR"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.value = None;
        self.tr_sum = Decimal::ZERO;
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn warms_up_over_period_bars() {
        let mut atr = Atr::new(3);
        assert_eq!(atr.update(dec!(102), dec!(98), dec!(100)), None);
        assert_eq!(atr.update(dec!(103), dec!(99), dec!(101)), None);
        assert!(atr.update(dec!(104), dec!(100), dec!(102)).is_some());
    }

    #[test]
    fn constant_range_converges_to_range() {
        let mut atr = Atr::new(3);
        for _ in 0..20 {
            atr.update(dec!(104), dec!(100), dec!(102));
        }
        assert_eq!(atr.value(), Some(dec!(4)));
    }

    #[test]
    fn true_range_includes_gaps() {
        let mut atr = Atr::new(2);
        atr.update(dec!(101), dec!(99), dec!(100));
        // Gap up: TR must use the previous close, not just high - low.
        atr.update(dec!(111), dec!(109), dec!(110));
        let v = atr.value().unwrap();
        assert!(v > dec!(2));
    }

    #[test]
    fn pct_of_price() {
        let mut atr = Atr::new(2);
        atr.update(dec!(102), dec!(98), dec!(100));
        atr.update(dec!(102), dec!(98), dec!(100));
        assert_eq!(atr.pct_of_price(dec!(100)), Some(dec!(4)));
        assert_eq!(atr.pct_of_price(Decimal::ZERO), None);
    }
}
