use chrono::{TimeZone, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::DataError;
use crate::types::{Interval, MarketBar, Period, Quote, Symbol};

const YAHOO_CHART_API: &str = "https://query1.finance.yahoo.com";
const USER_AGENT: &str = "Mozilla/5.0 (compatible; stockpulse/0.1)";

/// Client for the Yahoo Finance chart and search endpoints.
#[derive(Debug, Clone)]
pub struct YahooClient {
    client: Client,
    base_url: String,
}

impl YahooClient {
    pub fn new(base_url: Option<&str>, timeout_secs: u64) -> Result<Self, DataError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or(YAHOO_CHART_API).to_string(),
        })
    }

    /// Fetch OHLCV history for one symbol. Rows with null quote entries are
    /// skipped rather than failing the whole series.
    pub async fn fetch_history(
        &self,
        symbol: &Symbol,
        period: Period,
        interval: Interval,
    ) -> Result<Vec<MarketBar>, DataError> {
        let url = format!(
            "{}/v8/finance/chart/{}?range={}&interval={}",
            self.base_url,
            symbol.as_str(),
            period.as_str(),
            interval.as_str()
        );
        debug!(symbol = %symbol, %period, %interval, "fetching chart data");

        let response = self.client.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::SymbolNotFound(symbol.to_string()));
        }
        let body = response.text().await?;
        parse_chart_response(symbol, &body)
    }

    /// Latest quote derived from the tail of a short daily history.
    pub async fn fetch_quote(&self, symbol: &Symbol) -> Result<Quote, DataError> {
        let bars = self
            .fetch_history(symbol, Period::M1, Interval::D1)
            .await?;
        quote_from_bars(symbol, &bars)
    }

    /// Recent news headlines for a symbol from the search endpoint. A symbol
    /// with no coverage yields an empty list rather than an error.
    pub async fn fetch_headlines(&self, symbol: &Symbol) -> Result<Vec<String>, DataError> {
        let url = format!(
            "{}/v1/finance/search?q={}&newsCount=12&quotesCount=0",
            self.base_url,
            symbol.as_str()
        );
        debug!(symbol = %symbol, "fetching headlines");

        let response = self.client.get(&url).send().await?;
        let body = response.text().await?;
        parse_search_response(&body)
    }
}

pub(crate) fn quote_from_bars(symbol: &Symbol, bars: &[MarketBar]) -> Result<Quote, DataError> {
    let last = bars
        .last()
        .ok_or_else(|| DataError::EmptySeries(symbol.to_string()))?;
    let prev_close = if bars.len() >= 2 {
        bars[bars.len() - 2].close
    } else {
        last.open
    };
    let change = last.close - prev_close;
    let change_pct = if prev_close.is_zero() {
        Decimal::ZERO
    } else {
        change / prev_close * Decimal::from(100)
    };
    Ok(Quote {
        symbol: symbol.clone(),
        price: last.close,
        change,
        change_pct,
        volume: last.volume,
        timestamp: last.timestamp,
    })
}

/// Parse the chart JSON body into bars, skipping rows where any OHLC entry is
/// null. Yahoo pads partially-traded sessions with nulls.
pub fn parse_chart_response(symbol: &Symbol, body: &str) -> Result<Vec<MarketBar>, DataError> {
    let envelope: ChartEnvelope = serde_json::from_str(body)
        .map_err(|e| DataError::Malformed(format!("chart json: {}", e)))?;

    if let Some(err) = envelope.chart.error {
        if err.code.eq_ignore_ascii_case("not found") {
            return Err(DataError::SymbolNotFound(symbol.to_string()));
        }
        return Err(DataError::Malformed(format!(
            "{}: {}",
            err.code, err.description
        )));
    }

    let result = envelope
        .chart
        .result
        .and_then(|mut r| if r.is_empty() { None } else { Some(r.remove(0)) })
        .ok_or_else(|| DataError::SymbolNotFound(symbol.to_string()))?;

    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| DataError::Malformed("missing quote block".to_string()))?;

    let mut bars = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let row = (
            quote.open.get(i).copied().flatten(),
            quote.high.get(i).copied().flatten(),
            quote.low.get(i).copied().flatten(),
            quote.close.get(i).copied().flatten(),
        );
        let (open, high, low, close) = match row {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => continue,
        };
        let (open, high, low, close) = match (
            Decimal::from_f64_retain(open),
            Decimal::from_f64_retain(high),
            Decimal::from_f64_retain(low),
            Decimal::from_f64_retain(close),
        ) {
            (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
            _ => continue,
        };
        let timestamp = match Utc.timestamp_opt(*ts, 0).single() {
            Some(t) => t,
            None => continue,
        };
        let volume = quote
            .volume
            .get(i)
            .copied()
            .flatten()
            .unwrap_or_default();

        bars.push(MarketBar {
            symbol: symbol.clone(),
            timestamp,
            open: open.round_dp(6),
            high: high.round_dp(6),
            low: low.round_dp(6),
            close: close.round_dp(6),
            volume,
        });
    }

    if bars.is_empty() {
        return Err(DataError::EmptySeries(symbol.to_string()));
    }
    Ok(bars)
}

/// Pull headline titles out of the search JSON, dropping entries without a
/// usable title.
pub fn parse_search_response(body: &str) -> Result<Vec<String>, DataError> {
    let envelope: SearchEnvelope = serde_json::from_str(body)
        .map_err(|e| DataError::Malformed(format!("search json: {}", e)))?;
    Ok(envelope
        .news
        .into_iter()
        .filter_map(|item| item.title)
        .filter(|title| !title.trim().is_empty())
        .collect())
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    #[serde(default)]
    news: Vec<NewsItem>,
}

#[derive(Debug, Deserialize)]
struct NewsItem {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: ChartBody,
}

#[derive(Debug, Deserialize)]
struct ChartBody {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp: Option<Vec<i64>>,
    indicators: ChartIndicators,
}

#[derive(Debug, Deserialize)]
struct ChartIndicators {
    quote: Vec<ChartQuote>,
}

#[derive(Debug, Deserialize, Default)]
struct ChartQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<u64>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::parse("AAPL").unwrap()
    }

    fn chart_body(timestamps: &str, quote: &str) -> String {
        format!(
            r#"{{"chart":{{"result":[{{"meta":{{}},"timestamp":{},"indicators":{{"quote":[{}]}}}}],"error":null}}}}"#,
            timestamps, quote
        )
    }

    #[test]
    fn parses_plain_rows() {
        let body = chart_body(
            "[1704153600,1704240000]",
            r#"{"open":[185.0,186.5],"high":[187.0,188.0],"low":[184.0,185.5],"close":[186.0,187.5],"volume":[1000,2000]}"#,
        );
        let bars = parse_chart_response(&sym(), &body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, dec!(186.0));
        assert_eq!(bars[1].volume, 2000);
    }

    #[test]
    fn skips_null_rows() {
        let body = chart_body(
            "[1704153600,1704240000,1704326400]",
            r#"{"open":[185.0,null,187.0],"high":[187.0,null,189.0],"low":[184.0,null,186.0],"close":[186.0,null,188.0],"volume":[1000,null,3000]}"#,
        );
        let bars = parse_chart_response(&sym(), &body).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, dec!(188.0));
    }

    #[test]
    fn null_volume_defaults_to_zero() {
        let body = chart_body(
            "[1704153600]",
            r#"{"open":[185.0],"high":[187.0],"low":[184.0],"close":[186.0],"volume":[null]}"#,
        );
        let bars = parse_chart_response(&sym(), &body).unwrap();
        assert_eq!(bars[0].volume, 0);
    }

    #[test]
    fn yahoo_error_maps_to_symbol_not_found() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart_response(&sym(), body).unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound(_)));
    }

    #[test]
    fn all_null_rows_is_empty_series() {
        let body = chart_body(
            "[1704153600]",
            r#"{"open":[null],"high":[null],"low":[null],"close":[null],"volume":[null]}"#,
        );
        let err = parse_chart_response(&sym(), &body).unwrap_err();
        assert!(matches!(err, DataError::EmptySeries(_)));
    }

    #[test]
    fn garbage_body_is_malformed() {
        let err = parse_chart_response(&sym(), "<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, DataError::Malformed(_)));
    }

    #[test]
    fn parses_headline_titles() {
        let body = r#"{"news":[{"uuid":"a","title":"Apple beats on earnings","publisher":"X"},{"uuid":"b","title":"iPhone demand surges"}],"quotes":[]}"#;
        let headlines = parse_search_response(body).unwrap();
        assert_eq!(headlines.len(), 2);
        assert_eq!(headlines[0], "Apple beats on earnings");
    }

    #[test]
    fn skips_missing_or_blank_titles() {
        let body = r#"{"news":[{"uuid":"a"},{"uuid":"b","title":"  "},{"uuid":"c","title":"Only real headline"}]}"#;
        let headlines = parse_search_response(body).unwrap();
        assert_eq!(headlines, vec!["Only real headline".to_string()]);
    }

    #[test]
    fn missing_news_block_is_empty_not_error() {
        let headlines = parse_search_response(r#"{"quotes":[]}"#).unwrap();
        assert!(headlines.is_empty());
    }

    #[test]
    fn garbage_search_body_is_malformed() {
        let err = parse_search_response("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, DataError::Malformed(_)));
    }

    #[test]
    fn quote_uses_previous_close_for_change() {
        let body = chart_body(
            "[1704153600,1704240000]",
            r#"{"open":[100.0,101.0],"high":[102.0,106.0],"low":[99.0,100.5],"close":[100.0,105.0],"volume":[1000,2000]}"#,
        );
        let bars = parse_chart_response(&sym(), &body).unwrap();
        let quote = quote_from_bars(&sym(), &bars).unwrap();
        assert_eq!(quote.price, dec!(105.0));
        assert_eq!(quote.change, dec!(5.0));
        assert_eq!(quote.change_pct, dec!(5.0));
    }
}
