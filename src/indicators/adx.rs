use rust_decimal::Decimal;
use super::Indicator;

/// Average Directional Index, Wilder's trend-strength measure.
///
/// Smoothed +DM / -DM and TR produce +DI / -DI; the ADX is a Wilder-smoothed
/// average of the DX series derived from them.
#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    prev_high: Option<Decimal>,
    prev_low: Option<Decimal>,
    prev_close: Option<Decimal>,
    smoothed_tr: Decimal,
    smoothed_plus_dm: Decimal,
    smoothed_minus_dm: Decimal,
    dm_count: usize,
    adx: Option<Decimal>,
    dx_sum: Decimal,
    dx_count: usize,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_high: None,
            prev_low: None,
            prev_close: None,
            smoothed_tr: Decimal::ZERO,
            smoothed_plus_dm: Decimal::ZERO,
            smoothed_minus_dm: Decimal::ZERO,
            dm_count: 0,
            adx: None,
            dx_sum: Decimal::ZERO,
            dx_count: 0,
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) -> Option<Decimal> {
        let (prev_high, prev_low, prev_close) =
            match (self.prev_high, self.prev_low, self.prev_close) {
                (Some(h), Some(l), Some(c)) => (h, l, c),
                _ => {
                    self.prev_high = Some(high);
                    self.prev_low = Some(low);
                    self.prev_close = Some(close);
                    return None;
                }
            };

        let up_move = high - prev_high;
        let down_move = prev_low - low;
        let plus_dm = if up_move > down_move && up_move > Decimal::ZERO {
            up_move
        } else {
            Decimal::ZERO
        };
        let minus_dm = if down_move > up_move && down_move > Decimal::ZERO {
            down_move
        } else {
            Decimal::ZERO
        };

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        self.prev_high = Some(high);
        self.prev_low = Some(low);
        self.prev_close = Some(close);
        self.dm_count += 1;

        let period = Decimal::from(self.period as u32);

        if self.dm_count <= self.period {
            self.smoothed_tr += tr;
            self.smoothed_plus_dm += plus_dm;
            self.smoothed_minus_dm += minus_dm;
            if self.dm_count < self.period {
                return None;
            }
        } else {
            self.smoothed_tr = self.smoothed_tr - self.smoothed_tr / period + tr;
            self.smoothed_plus_dm = self.smoothed_plus_dm - self.smoothed_plus_dm / period + plus_dm;
            self.smoothed_minus_dm =
                self.smoothed_minus_dm - self.smoothed_minus_dm / period + minus_dm;
        }

        if self.smoothed_tr.is_zero() {
            return self.adx;
        }

        let hundred = Decimal::from(100);
        let plus_di = hundred * self.smoothed_plus_dm / self.smoothed_tr;
        let minus_di = hundred * self.smoothed_minus_dm / self.smoothed_tr;
        let di_sum = plus_di + minus_di;
        if di_sum.is_zero() {
            return self.adx;
        }
        let dx = hundred * (plus_di - minus_di).abs() / di_sum;

        match self.adx {
            None => {
                self.dx_sum += dx;
                self.dx_count += 1;
                if self.dx_count == self.period {
                    self.adx = Some(self.dx_sum / period);
                }
            }
            Some(prev) => {
                self.adx = Some((prev * (period - Decimal::ONE) + dx) / period);
            }
        }
        self.adx
    }

    pub fn value(&self) -> Option<Decimal> {
        self.adx
    }

    /// Conventional reading: ADX above 25 marks a trending market.
    pub fn is_trending(&self) -> bool {
        self.adx.map(|v| v > Decimal::from(25)).unwrap_or(false)
    }
}

impl Indicator for Adx {
    fn name(&self) -> &'static str {
        "ADX"
    }

    fn is_ready(&self) -> bool {
        self.adx.is_some()
    }

    fn reset(&mut self) {
        *self = Self::new(self.period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stays_within_bounds() {
        let mut adx = Adx::new(14);
        let mut price = dec!(100);
        for i in 0..200u32 {
            price += if i % 5 == 0 { dec!(-2.3) } else { dec!(1.4) };
            if let Some(v) = adx.update(price + dec!(1), price - dec!(1), price) {
                assert!(v >= Decimal::ZERO && v <= dec!(100));
            }
        }
        assert!(adx.is_ready());
    }

    #[test]
    fn strong_trend_reads_high() {
        let mut adx = Adx::new(14);
        for i in 1..=120u32 {
            let p = Decimal::from(100 + i * 2);
            adx.update(p + dec!(1), p - dec!(1), p);
        }
        assert!(adx.value().unwrap() > dec!(25));
        assert!(adx.is_trending());
    }

    #[test]
    fn needs_long_warmup() {
        let mut adx = Adx::new(14);
        for i in 1..=20u32 {
            let p = Decimal::from(100 + i);
            adx.update(p + dec!(1), p - dec!(1), p);
        }
        // 2 * period bars are needed before the first ADX value.
        assert!(!adx.is_ready());
    }
}
