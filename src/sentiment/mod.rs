use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::marketdata::MarketDataService;
use crate::types::{Interval, Period, Symbol};

const BULLISH_WORDS: &[&str] = &[
    "surge", "surges", "rally", "rallies", "gain", "gains", "beat", "beats", "upgrade",
    "upgraded", "growth", "profit", "profits", "strong", "record", "buy", "outperform",
    "bullish", "soar", "soars", "jump", "jumps", "rise", "rises", "boom",
];

const BEARISH_WORDS: &[&str] = &[
    "fall", "falls", "drop", "drops", "miss", "misses", "downgrade", "downgraded", "loss",
    "losses", "weak", "decline", "declines", "sell", "underperform", "bearish", "plunge",
    "plunges", "crash", "crashes", "slump", "slumps", "cut", "cuts", "fear",
];

const PER_HIT_WEIGHT: f64 = 0.08;
const MOOD_PER_PCT: f64 = 0.05;

/// Blended sentiment for one symbol with its components exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentScore {
    pub symbol: Symbol,
    pub score: f64,
    pub news_score: f64,
    pub market_mood: f64,
    pub generated_at: DateTime<Utc>,
}

/// Keyword sentiment plus an index-change market mood. Anything that cannot
/// be scored degrades to the neutral 0.5, never to fabricated data.
pub struct SentimentAnalyzer {
    data: MarketDataService,
    news_weight: f64,
    market_weight: f64,
}

impl SentimentAnalyzer {
    pub fn new(data: MarketDataService, news_weight: f64, market_weight: f64) -> Self {
        Self {
            data,
            news_weight,
            market_weight,
        }
    }

    /// Keyword-count score in [0, 1]; 0.5 is neutral. Empty or unscoreable
    /// text is neutral by definition.
    pub fn score_text(text: &str) -> f64 {
        if text.trim().is_empty() {
            return 0.5;
        }
        let mut bull_hits = 0i64;
        let mut bear_hits = 0i64;
        for word in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let lower = word.to_ascii_lowercase();
            if BULLISH_WORDS.contains(&lower.as_str()) {
                bull_hits += 1;
            } else if BEARISH_WORDS.contains(&lower.as_str()) {
                bear_hits += 1;
            }
        }
        let raw = 0.5 + PER_HIT_WEIGHT * (bull_hits - bear_hits) as f64;
        raw.clamp(0.0, 1.0)
    }

    /// Average keyword score across headlines; neutral for an empty set.
    pub fn score_headlines(headlines: &[String]) -> f64 {
        if headlines.is_empty() {
            return 0.5;
        }
        let total: f64 = headlines.iter().map(|h| Self::score_text(h)).sum();
        total / headlines.len() as f64
    }

    /// Market mood from the trailing 5-day change of the relevant index:
    /// ASX 200 for ASX symbols, S&P 500 otherwise. Fetch failure is neutral.
    pub async fn market_mood(&self, symbol: &Symbol) -> f64 {
        let index = if symbol.is_asx() { "^AXJO" } else { "^GSPC" };
        let index_symbol = match Symbol::parse(index) {
            Ok(s) => s,
            Err(_) => return 0.5,
        };

        match self
            .data
            .get_history(&index_symbol, Period::M1, Interval::D1)
            .await
        {
            Ok(series) => match series.trailing_change_pct(5) {
                Some(change) => {
                    let change: f64 = change.try_into().unwrap_or(0.0);
                    (0.5 + change * MOOD_PER_PCT).clamp(0.0, 1.0)
                }
                None => 0.5,
            },
            Err(e) => {
                warn!(symbol = %symbol, index, "market mood fetch failed, using neutral: {}", e);
                0.5
            }
        }
    }

    /// Fetch headlines and blend their keyword score with the market mood.
    /// A failed headline fetch degrades to the neutral news score.
    pub async fn symbol_sentiment(&self, symbol: &Symbol) -> SentimentScore {
        let news_score = match self.data.get_headlines(symbol).await {
            Ok(headlines) => Self::score_headlines(&headlines),
            Err(e) => {
                warn!(symbol = %symbol, "headline fetch failed, using neutral: {}", e);
                0.5
            }
        };
        let market_mood = self.market_mood(symbol).await;

        let weight_total = self.news_weight + self.market_weight;
        let score = if weight_total > 0.0 {
            (self.news_weight * news_score + self.market_weight * market_mood) / weight_total
        } else {
            0.5
        };

        SentimentScore {
            symbol: symbol.clone(),
            score: score.clamp(0.0, 1.0),
            news_score,
            market_mood,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bullish_text_scores_above_neutral() {
        let score = SentimentAnalyzer::score_text("Shares surge after record profit beat");
        assert!(score > 0.5);
    }

    #[test]
    fn bearish_text_scores_below_neutral() {
        let score = SentimentAnalyzer::score_text("Stock plunges on downgrade, fear of losses");
        assert!(score < 0.5);
    }

    #[test]
    fn empty_text_is_neutral() {
        assert_eq!(SentimentAnalyzer::score_text(""), 0.5);
        assert_eq!(SentimentAnalyzer::score_text("   "), 0.5);
        assert_eq!(SentimentAnalyzer::score_headlines(&[]), 0.5);
    }

    #[test]
    fn opposing_words_cancel() {
        let score = SentimentAnalyzer::score_text("gain and loss");
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn score_is_clamped() {
        let very_bullish = "surge rally gain beat upgrade growth profit strong record buy";
        assert!(SentimentAnalyzer::score_text(very_bullish) <= 1.0);
        let very_bearish = "fall drop miss downgrade loss weak decline sell plunge crash";
        assert!(SentimentAnalyzer::score_text(very_bearish) >= 0.0);
    }

    #[test]
    fn punctuation_does_not_hide_keywords() {
        let score = SentimentAnalyzer::score_text("Profit! Growth; upgrade.");
        assert!(score > 0.6);
    }

    #[test]
    fn headline_average_blends() {
        let headlines = vec![
            "record profit surge".to_string(),
            "shares crash on weak outlook".to_string(),
        ];
        let score = SentimentAnalyzer::score_headlines(&headlines);
        assert!(score > 0.3 && score < 0.7);
    }
}
