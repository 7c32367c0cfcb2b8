pub mod cache;
pub mod yahoo;

pub use cache::*;
pub use yahoo::*;

use thiserror::Error;

/// Failure taxonomy for market data retrieval. The web layer maps these onto
/// HTTP statuses, so variants stay distinct rather than collapsing into one
/// opaque error.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("malformed chart payload: {0}")]
    Malformed(String),

    #[error("no usable bars returned for {0}")]
    EmptySeries(String),
}
