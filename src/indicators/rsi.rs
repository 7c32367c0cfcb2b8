use rust_decimal::Decimal;
use super::Indicator;

/// Relative Strength Index with Wilder smoothing.
#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    prev_close: Option<Decimal>,
    avg_gain: Decimal,
    avg_loss: Decimal,
    count: usize,
    value: Option<Decimal>,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            avg_gain: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
            count: 0,
            value: None,
        }
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let prev = match self.prev_close.replace(close) {
            Some(p) => p,
            None => return None,
        };

        let change = close - prev;
        let gain = if change > Decimal::ZERO { change } else { Decimal::ZERO };
        let loss = if change < Decimal::ZERO { -change } else { Decimal::ZERO };

        self.count += 1;
        let period = Decimal::from(self.period as u32);

        if self.count < self.period {
            self.avg_gain += gain;
            self.avg_loss += loss;
            return None;
        }
        if self.count == self.period {
            self.avg_gain = (self.avg_gain + gain) / period;
            self.avg_loss = (self.avg_loss + loss) / period;
        } else {
            self.avg_gain = (self.avg_gain * (period - Decimal::ONE) + gain) / period;
            self.avg_loss = (self.avg_loss * (period - Decimal::ONE) + loss) / period;
        }

        let hundred = Decimal::from(100);
        let rsi = if self.avg_loss.is_zero() {
            hundred
        } else {
            let rs = self.avg_gain / self.avg_loss;
            hundred - hundred / (Decimal::ONE + rs)
        };

        self.value = Some(rsi);
        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    pub fn is_oversold(&self, threshold: Decimal) -> bool {
        self.value.map(|v| v < threshold).unwrap_or(false)
    }

    pub fn is_overbought(&self, threshold: Decimal) -> bool {
        self.value.map(|v| v > threshold).unwrap_or(false)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &'static str {
        "RSI"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.avg_gain = Decimal::ZERO;
        self.avg_loss = Decimal::ZERO;
        self.count = 0;
        self.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn needs_period_plus_one_closes() {
        let mut rsi = Rsi::new(3);
        assert_eq!(rsi.update(dec!(100)), None);
        assert_eq!(rsi.update(dec!(101)), None);
        assert_eq!(rsi.update(dec!(102)), None);
        assert!(rsi.update(dec!(103)).is_some());
    }

    #[test]
    fn all_gains_hits_hundred() {
        let mut rsi = Rsi::new(3);
        for p in [dec!(100), dec!(101), dec!(102), dec!(103), dec!(104)] {
            rsi.update(p);
        }
        assert_eq!(rsi.value(), Some(dec!(100)));
        assert!(rsi.is_overbought(dec!(70)));
    }

    #[test]
    fn stays_within_bounds() {
        let mut rsi = Rsi::new(14);
        let mut price = dec!(100);
        for i in 0..200u32 {
            price += if i % 3 == 0 { dec!(-1.7) } else { dec!(1.1) };
            if let Some(v) = rsi.update(price) {
                assert!(v >= Decimal::ZERO && v <= dec!(100));
            }
        }
        assert!(rsi.is_ready());
    }

    #[test]
    fn all_losses_hits_zero() {
        let mut rsi = Rsi::new(3);
        for p in [dec!(100), dec!(99), dec!(98), dec!(97), dec!(96)] {
            rsi.update(p);
        }
        assert_eq!(rsi.value(), Some(Decimal::ZERO));
        assert!(rsi.is_oversold(dec!(30)));
    }
}
