use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// Output of an ensemble prediction for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub symbol: Symbol,
    pub generated_at: DateTime<Utc>,
    pub horizon_bars: usize,
    pub last_close: Decimal,
    pub predicted_close: Decimal,
    pub predicted_return_pct: Decimal,
    /// 0..1, derived from the ensemble's validation error.
    pub confidence: Decimal,
    /// Sentiment multiplier that was applied to the raw model output.
    pub sentiment_adjustment: Decimal,
    pub model_kind: String,
}

impl PredictionResult {
    pub fn direction(&self) -> PredictedDirection {
        use rust_decimal_macros::dec;
        if self.predicted_return_pct > dec!(0.25) {
            PredictedDirection::Up
        } else if self.predicted_return_pct < dec!(-0.25) {
            PredictedDirection::Down
        } else {
            PredictedDirection::Flat
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictedDirection {
    Up,
    Flat,
    Down,
}

impl PredictedDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictedDirection::Up => "up",
            PredictedDirection::Flat => "flat",
            PredictedDirection::Down => "down",
        }
    }
}
