use serde::{Deserialize, Serialize};
use std::fmt;

use crate::marketdata::DataError;

/// A validated ticker symbol, e.g. "AAPL", "CBA.AX" or "^AXJO".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Result<Self, DataError> {
        let ticker = raw.trim().to_uppercase();
        if ticker.is_empty() || ticker.len() > 12 {
            return Err(DataError::InvalidSymbol(raw.to_string()));
        }
        let valid = ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
        if !valid {
            return Err(DataError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(ticker))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Index symbols start with a caret in Yahoo notation.
    pub fn is_index(&self) -> bool {
        self.0.starts_with('^')
    }

    /// ASX-listed symbols carry the ".AX" suffix.
    pub fn is_asx(&self) -> bool {
        self.0.ends_with(".AX") || self.0 == "^AXJO"
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Watchlist entry: ticker plus display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub ticker: String,
    pub name: String,
    pub exchange: String,
}

impl SymbolInfo {
    pub fn new(ticker: &str, name: &str, exchange: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
            exchange: exchange.to_string(),
        }
    }

    pub fn symbol(&self) -> Result<Symbol, DataError> {
        Symbol::parse(&self.ticker)
    }
}
