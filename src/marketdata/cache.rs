use anyhow::Result;
use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

use super::yahoo::{quote_from_bars, YahooClient};
use crate::database::Database;
use crate::types::{BarSeries, Interval, Period, Quote, Symbol};

/// Cache key for one (symbol, period, interval) request shape.
pub fn cache_key(symbol: &Symbol, period: Period, interval: Interval) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{}",
        symbol.as_str(),
        period.as_str(),
        interval.as_str()
    ));
    hex::encode(hasher.finalize())
}

/// Fetch layer that consults the SQLite bar cache before going to the
/// network. A hit younger than the TTL short-circuits the request.
#[derive(Clone)]
pub struct MarketDataService {
    client: YahooClient,
    db: Arc<Database>,
    ttl_minutes: i64,
}

impl MarketDataService {
    pub fn new(client: YahooClient, db: Arc<Database>, ttl_minutes: i64) -> Self {
        Self {
            client,
            db,
            ttl_minutes,
        }
    }

    pub async fn get_history(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
    ) -> Result<BarSeries> {
        let key = cache_key(symbol, period, interval);

        if let Some(cached) = self.db.get_cached_bars(&key).await? {
            let age = Utc::now() - cached.fetched_at;
            if age < Duration::minutes(self.ttl_minutes) {
                debug!(symbol = %symbol, age_mins = age.num_minutes(), "bar cache hit");
                return Ok(BarSeries::from_bars(cached.bars));
            }
            debug!(symbol = %symbol, age_mins = age.num_minutes(), "bar cache stale");
        }

        let bars = self.client.fetch_history(symbol, period, interval).await?;
        info!(symbol = %symbol, bars = bars.len(), %period, %interval, "fetched history");
        self.db
            .put_cached_bars(&key, symbol, period, interval, &bars)
            .await?;
        Ok(BarSeries::from_bars(bars))
    }

    /// Latest quote. Served from a short daily history so the bar cache does
    /// the heavy lifting here too.
    pub async fn get_quote(&self, symbol: &Symbol) -> Result<Quote> {
        let series = self
            .get_history(symbol, Period::M1, Interval::D1)
            .await?;
        Ok(quote_from_bars(symbol, &series.bars)?)
    }

    /// Recent headlines for the sentiment scorer. Not cached: the feed is
    /// small and goes stale faster than bars.
    pub async fn get_headlines(&self, symbol: &Symbol) -> Result<Vec<String>> {
        Ok(self.client.fetch_headlines(symbol).await?)
    }
}
