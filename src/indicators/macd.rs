use rust_decimal::Decimal;
use super::{Ema, Indicator};

/// MACD: fast EMA minus slow EMA, with an EMA signal line over the MACD itself.
#[derive(Debug, Clone)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
    macd_line: Option<Decimal>,
    signal_line: Option<Decimal>,
}

impl Macd {
    pub fn new(fast_period: usize, slow_period: usize, signal_period: usize) -> Self {
        Self {
            fast: Ema::new(fast_period),
            slow: Ema::new(slow_period),
            signal: Ema::new(signal_period),
            macd_line: None,
            signal_line: None,
        }
    }

    /// Standard 12/26/9 configuration.
    pub fn default_params() -> Self {
        Self::new(12, 26, 9)
    }

    pub fn update(&mut self, close: Decimal) -> Option<Decimal> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);

        if let (Some(f), Some(s)) = (fast, slow) {
            let line = f - s;
            self.macd_line = Some(line);
            self.signal_line = self.signal.update(line);
        }
        self.macd_line
    }

    pub fn macd_line(&self) -> Option<Decimal> {
        self.macd_line
    }

    pub fn signal_line(&self) -> Option<Decimal> {
        self.signal_line
    }

    pub fn histogram(&self) -> Option<Decimal> {
        match (self.macd_line, self.signal_line) {
            (Some(line), Some(signal)) => Some(line - signal),
            _ => None,
        }
    }

    pub fn is_bullish(&self) -> Option<bool> {
        self.histogram().map(|h| h > Decimal::ZERO)
    }
}

impl Indicator for Macd {
    fn name(&self) -> &'static str {
        "MACD"
    }

    fn is_ready(&self) -> bool {
        self.signal_line.is_some()
    }

    fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.signal.reset();
        self.macd_line = None;
        self.signal_line = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn histogram_is_line_minus_signal() {
        let mut macd = Macd::new(3, 6, 3);
        let mut price = dec!(100);
        for i in 0..40u32 {
            price += if i % 2 == 0 { dec!(2) } else { dec!(-0.5) };
            macd.update(price);
        }
        assert!(macd.is_ready());
        let line = macd.macd_line().unwrap();
        let signal = macd.signal_line().unwrap();
        assert_eq!(macd.histogram(), Some(line - signal));
    }

    #[test]
    fn sustained_rally_is_bullish() {
        let mut macd = Macd::new(3, 6, 3);
        for i in 1..=40u32 {
            macd.update(Decimal::from(100 + i * 2));
        }
        assert!(macd.macd_line().unwrap() > Decimal::ZERO);
        assert_eq!(macd.is_bullish(), Some(true));
    }

    #[test]
    fn not_ready_before_slow_warmup() {
        let mut macd = Macd::default_params();
        for i in 1..=20u32 {
            macd.update(Decimal::from(100 + i));
        }
        assert!(!macd.is_ready());
    }
}
