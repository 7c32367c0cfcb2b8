use rust_decimal::Decimal;
use super::Indicator;

/// Exponential moving average seeded with an SMA over the first period.
#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    multiplier: Decimal,
    value: Option<Decimal>,
    count: usize,
    seed_sum: Decimal,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        let multiplier = Decimal::from(2) / Decimal::from(period as u32 + 1);
        Self {
            period,
            multiplier,
            value: None,
            count: 0,
            seed_sum: Decimal::ZERO,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Option<Decimal> {
        self.count += 1;

        if self.count < self.period {
            self.seed_sum += price;
            return None;
        }
        if self.count == self.period {
            self.seed_sum += price;
            self.value = Some(self.seed_sum / Decimal::from(self.period as u32));
            return self.value;
        }

        if let Some(prev) = self.value {
            self.value = Some((price - prev) * self.multiplier + prev);
        }
        self.value
    }

    pub fn value(&self) -> Option<Decimal> {
        self.value
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> &'static str {
        "EMA"
    }

    fn is_ready(&self) -> bool {
        self.value.is_some()
    }

    fn reset(&mut self) {
        self.value = None;
        self.count = 0;
        self.seed_sum = Decimal::ZERO;
    }
}

/// Fast/slow EMA pair with spread helpers.
#[derive(Debug, Clone)]
pub struct EmaPair {
    fast: Ema,
    slow: Ema,
}

impl EmaPair {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
        }
    }

    pub fn update(&mut self, price: Decimal) -> (Option<Decimal>, Option<Decimal>) {
        (self.fast.update(price), self.slow.update(price))
    }

    pub fn fast_value(&self) -> Option<Decimal> {
        self.fast.value()
    }

    pub fn slow_value(&self) -> Option<Decimal> {
        self.slow.value()
    }

    pub fn spread_pct(&self) -> Option<Decimal> {
        match (self.fast.value(), self.slow.value()) {
            (Some(fast), Some(slow)) if !slow.is_zero() => {
                Some((fast - slow) / slow * Decimal::from(100))
            }
            _ => None,
        }
    }

    pub fn fast_above_slow(&self) -> Option<bool> {
        match (self.fast.value(), self.slow.value()) {
            (Some(fast), Some(slow)) => Some(fast > slow),
            _ => None,
        }
    }
}

impl Indicator for EmaPair {
    fn name(&self) -> &'static str {
        "EmaPair"
    }

    fn is_ready(&self) -> bool {
        self.fast.is_ready() && self.slow.is_ready()
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
    }
}
