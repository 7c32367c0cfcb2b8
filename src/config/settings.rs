use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::backtest::BacktestConfig;
use crate::types::{Interval, Period, SymbolInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub data: DataSettings,
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<SymbolInfo>,
    #[serde(default)]
    pub prediction: PredictionSettings,
    #[serde(default)]
    pub screener: ScreenerSettings,
    #[serde(default)]
    pub sentiment: SentimentSettings,
    #[serde(default)]
    pub backtest: BacktestConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            database: DatabaseSettings::default(),
            data: DataSettings::default(),
            watchlist: default_watchlist(),
            prediction: PredictionSettings::default(),
            screener: ScreenerSettings::default(),
            sentiment: SentimentSettings::default(),
            backtest: BacktestConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file; a missing path falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let config: AppConfig =
                    toml::from_str(&raw).with_context(|| "parsing config TOML")?;
                info!("Loaded configuration from {}", path.display());
                config
            }
            None => {
                info!("No config file given, using defaults");
                AppConfig::default()
            }
        };
        if let Err(errors) = config.validate() {
            anyhow::bail!("invalid configuration: {}", errors.join("; "));
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be non-zero".to_string());
        }
        if self.database.path.trim().is_empty() {
            errors.push("database.path must not be empty".to_string());
        }
        if self.data.timeout_secs == 0 {
            errors.push("data.timeout_secs must be at least 1".to_string());
        }
        if self.data.cache_ttl_minutes <= 0 {
            errors.push("data.cache_ttl_minutes must be positive".to_string());
        }
        if self.watchlist.is_empty() {
            errors.push("watchlist must not be empty".to_string());
        }
        for entry in &self.watchlist {
            if entry.symbol().is_err() {
                errors.push(format!("watchlist ticker invalid: {:?}", entry.ticker));
            }
        }
        if Period::parse(&self.prediction.period).is_none() {
            errors.push(format!(
                "prediction.period not recognised: {:?}",
                self.prediction.period
            ));
        }
        if Interval::parse(&self.prediction.interval).is_none() {
            errors.push(format!(
                "prediction.interval not recognised: {:?}",
                self.prediction.interval
            ));
        }
        if self.prediction.horizon_bars == 0 {
            errors.push("prediction.horizon_bars must be at least 1".to_string());
        }
        if self.prediction.model_max_age_hours <= 0 {
            errors.push("prediction.model_max_age_hours must be positive".to_string());
        }
        if self.screener.top_n == 0 {
            errors.push("screener.top_n must be at least 1".to_string());
        }
        if self.screener.entry_threshold_pct <= Decimal::ZERO {
            errors.push("screener.entry_threshold_pct must be positive".to_string());
        }
        if self.sentiment.news_weight < 0.0 || self.sentiment.market_weight < 0.0 {
            errors.push("sentiment weights must not be negative".to_string());
        }
        if self.sentiment.news_weight + self.sentiment.market_weight <= 0.0 {
            errors.push("sentiment weights must not both be zero".to_string());
        }
        if let Err(backtest_errors) = self.backtest.validate() {
            errors.extend(backtest_errors.into_iter().map(|e| format!("backtest: {}", e)));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn prediction_period(&self) -> Period {
        Period::parse(&self.prediction.period).unwrap_or(Period::Y2)
    }

    pub fn prediction_interval(&self) -> Interval {
        Interval::parse(&self.prediction.interval).unwrap_or(Interval::D1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "sqlite:stockpulse.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Override for the chart API base URL, mainly for tests.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub cache_ttl_minutes: i64,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 10,
            cache_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSettings {
    pub period: String,
    pub interval: String,
    pub horizon_bars: usize,
    pub model_max_age_hours: i64,
}

impl Default for PredictionSettings {
    fn default() -> Self {
        Self {
            period: "2y".to_string(),
            interval: "1d".to_string(),
            horizon_bars: 1,
            model_max_age_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenerSettings {
    pub top_n: usize,
    pub min_avg_volume: u64,
    pub entry_threshold_pct: Decimal,
    pub report_dir: String,
}

impl Default for ScreenerSettings {
    fn default() -> Self {
        Self {
            top_n: 10,
            min_avg_volume: 100_000,
            entry_threshold_pct: dec!(0.75),
            report_dir: "reports".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSettings {
    pub news_weight: f64,
    pub market_weight: f64,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            news_weight: 0.6,
            market_weight: 0.4,
        }
    }
}

fn default_watchlist() -> Vec<SymbolInfo> {
    vec![
        SymbolInfo::new("AAPL", "Apple Inc.", "NASDAQ"),
        SymbolInfo::new("MSFT", "Microsoft Corporation", "NASDAQ"),
        SymbolInfo::new("NVDA", "NVIDIA Corporation", "NASDAQ"),
        SymbolInfo::new("GOOGL", "Alphabet Inc.", "NASDAQ"),
        SymbolInfo::new("AMZN", "Amazon.com Inc.", "NASDAQ"),
        SymbolInfo::new("CBA.AX", "Commonwealth Bank of Australia", "ASX"),
        SymbolInfo::new("BHP.AX", "BHP Group Limited", "ASX"),
        SymbolInfo::new("CSL.AX", "CSL Limited", "ASX"),
        SymbolInfo::new("WES.AX", "Wesfarmers Limited", "ASX"),
        SymbolInfo::new("WBC.AX", "Westpac Banking Corporation", "ASX"),
        SymbolInfo::new("^GSPC", "S&P 500 Index", "INDEX"),
        SymbolInfo::new("^AXJO", "S&P/ASX 200 Index", "INDEX"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig {
            watchlist: default_watchlist(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.prediction_period(), Period::Y2);
        assert_eq!(config.prediction_interval(), Interval::D1);
    }

    #[test]
    fn validation_collects_all_errors() {
        let mut config = AppConfig {
            watchlist: default_watchlist(),
            ..Default::default()
        };
        config.server.port = 0;
        config.prediction.period = "fortnight".to_string();
        config.screener.top_n = 0;
        config.sentiment.news_weight = -1.0;

        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 4);
        assert!(errors.iter().any(|e| e.contains("server.port")));
        assert!(errors.iter().any(|e| e.contains("prediction.period")));
    }

    #[test]
    fn toml_round_trip() {
        let config = AppConfig {
            watchlist: default_watchlist(),
            ..Default::default()
        };
        let raw = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.watchlist.len(), config.watchlist.len());
        assert_eq!(parsed.screener.entry_threshold_pct, config.screener.entry_threshold_pct);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            [server]
            host = "127.0.0.1"
            port = 9001
        "#;
        let parsed: AppConfig = toml::from_str(raw).unwrap();
        assert_eq!(parsed.server.port, 9001);
        assert_eq!(parsed.data.timeout_secs, 10);
        assert!(!parsed.watchlist.is_empty());
    }

    #[test]
    fn bad_watchlist_ticker_is_rejected() {
        let mut config = AppConfig {
            watchlist: default_watchlist(),
            ..Default::default()
        };
        config.watchlist.push(SymbolInfo::new("NOT A TICKER", "", ""));
        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("watchlist")));
    }
}
