use rust_decimal::Decimal;
use super::Indicator;

/// On-Balance Volume: cumulative volume signed by the close-to-close move.
#[derive(Debug, Clone, Default)]
pub struct Obv {
    prev_close: Option<Decimal>,
    value: Decimal,
}

impl Obv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, close: Decimal, volume: u64) -> Decimal {
        if let Some(prev) = self.prev_close {
            let vol = Decimal::from(volume);
            if close > prev {
                self.value += vol;
            } else if close < prev {
                self.value -= vol;
            }
        }
        self.prev_close = Some(close);
        self.value
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

impl Indicator for Obv {
    fn name(&self) -> &'static str {
        "OBV"
    }

    fn is_ready(&self) -> bool {
        self.prev_close.is_some()
    }

    fn reset(&mut self) {
        self.prev_close = None;
        self.value = Decimal::ZERO;
    }
}

/// Latest volume relative to its rolling average. Values above 1 mark
/// unusually heavy trading.
#[derive(Debug, Clone)]
pub struct VolumeRatio {
    period: usize,
    volumes: Vec<u64>,
}

impl VolumeRatio {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            volumes: Vec::new(),
        }
    }

    pub fn update(&mut self, volume: u64) {
        self.volumes.push(volume);
        if self.volumes.len() > self.period {
            self.volumes.remove(0);
        }
    }

    pub fn value(&self) -> Option<Decimal> {
        if self.volumes.len() < self.period {
            return None;
        }
        let last = *self.volumes.last()?;
        let sum: u64 = self.volumes.iter().sum();
        if sum == 0 {
            return None;
        }
        let avg = Decimal::from(sum) / Decimal::from(self.period as u32);
        Some(Decimal::from(last) / avg)
    }
}

impl Indicator for VolumeRatio {
    fn name(&self) -> &'static str {
        "VolumeRatio"
    }

    fn is_ready(&self) -> bool {
        self.volumes.len() >= self.period
    }

    fn reset(&mut self) {
        self.volumes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn obv_accumulates_signed_volume() {
        let mut obv = Obv::new();
        obv.update(dec!(100), 1_000);
        obv.update(dec!(101), 500);
        obv.update(dec!(100), 300);
        obv.update(dec!(100), 900);
        assert_eq!(obv.value(), dec!(200));
    }

    #[test]
    fn ratio_flags_volume_spike() {
        let mut vr = VolumeRatio::new(4);
        for v in [100u64, 100, 100] {
            vr.update(v);
        }
        assert_eq!(vr.value(), None);
        vr.update(500);
        assert!(vr.value().unwrap() > dec!(2));
    }

    #[test]
    fn zero_volume_window_yields_none() {
        let mut vr = VolumeRatio::new(2);
        vr.update(0);
        vr.update(0);
        assert_eq!(vr.value(), None);
    }
}
