mod alerts;
mod backtest;
mod config;
mod database;
mod indicators;
mod marketdata;
mod ml;
mod screener;
mod sentiment;
mod types;
mod web;

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use alerts::AlertManager;
use backtest::BacktestEngine;
use config::{AppConfig, ConfigManager};
use database::Database;
use indicators::IndicatorSnapshot;
use marketdata::{MarketDataService, YahooClient};
use ml::ModelStore;
use screener::Screener;
use sentiment::SentimentAnalyzer;
use types::{Interval, Period, Symbol};
use web::{start_server, AppState};

#[derive(Parser)]
#[command(name = "stockpulse")]
#[command(version = "0.1.0")]
#[command(about = "Stock screening, prediction and backtesting service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and dashboard
    Serve {
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the screening pipeline once and print the ranking
    Screen,
    /// Backtest the prediction strategy on historical data
    Backtest {
        /// Ticker to backtest
        #[arg(short, long)]
        symbol: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,
        /// Run walk-forward validation with N windows
        #[arg(long)]
        walk_forward: Option<usize>,
    },
    /// Train (or load) the model for one symbol and print a prediction
    Predict {
        /// Ticker to predict
        symbol: String,
    },
    /// Show current quotes
    Quote {
        /// Tickers to quote; the watchlist when omitted
        symbols: Vec<String>,
    },
    /// Print recent bar history for a symbol
    History {
        /// Ticker to fetch
        symbol: String,
        /// History period (1mo, 3mo, 6mo, 1y, 2y, 5y, max)
        #[arg(short, long, default_value = "3mo")]
        period: String,
        /// Bar interval (1h, 1d, 1wk)
        #[arg(short, long, default_value = "1d")]
        interval: String,
    },
}

struct Services {
    db: Arc<Database>,
    data: MarketDataService,
    models: Arc<ModelStore>,
    sentiment: Arc<SentimentAnalyzer>,
    alerts: Arc<AlertManager>,
    config: Arc<ConfigManager>,
}

async fn build_services(config: AppConfig) -> Result<Services> {
    let db = Arc::new(Database::new(&config.database.path).await?);
    let client = YahooClient::new(config.data.base_url.as_deref(), config.data.timeout_secs)?;
    let data = MarketDataService::new(client, db.clone(), config.data.cache_ttl_minutes);
    let models = Arc::new(ModelStore::new(
        db.clone(),
        config.prediction.model_max_age_hours,
    ));
    let sentiment = Arc::new(SentimentAnalyzer::new(
        data.clone(),
        config.sentiment.news_weight,
        config.sentiment.market_weight,
    ));
    let alerts = Arc::new(AlertManager::new(Some(db.clone())));
    let config = Arc::new(ConfigManager::new(config));
    Ok(Services {
        db,
        data,
        models,
        sentiment,
        alerts,
        config,
    })
}

fn make_screener(services: &Services) -> Arc<Screener> {
    Arc::new(Screener::new(
        services.data.clone(),
        services.db.clone(),
        services.models.clone(),
        services.sentiment.clone(),
        services.alerts.clone(),
        services.config.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { port } => {
            run_server(config, port).await?;
        }
        Commands::Screen => {
            run_screen(config).await?;
        }
        Commands::Backtest {
            symbol,
            start,
            end,
            walk_forward,
        } => {
            run_backtest(config, &symbol, start, end, walk_forward).await?;
        }
        Commands::Predict { symbol } => {
            run_predict(config, &symbol).await?;
        }
        Commands::Quote { symbols } => {
            run_quote(config, symbols).await?;
        }
        Commands::History {
            symbol,
            period,
            interval,
        } => {
            run_history(config, &symbol, &period, &interval).await?;
        }
    }

    Ok(())
}

async fn run_server(config: AppConfig, port_override: Option<u16>) -> Result<()> {
    let host = config.server.host.clone();
    let port = port_override.unwrap_or(config.server.port);
    let services = build_services(config).await?;
    let screener = make_screener(&services);

    let state = AppState::new(
        services.db,
        services.data,
        services.models,
        services.sentiment,
        services.alerts,
        services.config,
        screener,
    );
    start_server(state, &host, port).await
}

async fn run_screen(config: AppConfig) -> Result<()> {
    let services = build_services(config).await?;
    let screener = make_screener(&services);

    let run = screener.run().await?;
    if let Some(error) = &run.error {
        return Err(anyhow!("screen run {} failed: {}", run.id, error));
    }

    let results = services.db.screen_results(run.id).await?;
    println!("\nScreen run {} ({} symbols, {} failed)", run.id, run.symbols_total, run.symbols_failed);
    println!("{:<4} {:<10} {:>8} {:>10} {:>7} {:>7} {:>10} {:>6}",
        "#", "Symbol", "Score", "Pred %", "RSI", "ADX", "Close", "Dir");
    for r in &results {
        println!(
            "{:<4} {:<10} {:>8} {:>10} {:>7} {:>7} {:>10} {:>6}",
            r.rank,
            r.symbol.as_str(),
            r.score,
            r.predicted_return_pct,
            r.rsi.map(|v| v.round_dp(1).to_string()).unwrap_or_else(|| "-".to_string()),
            r.adx.map(|v| v.round_dp(1).to_string()).unwrap_or_else(|| "-".to_string()),
            r.close,
            r.direction,
        );
    }
    Ok(())
}

async fn run_backtest(
    config: AppConfig,
    symbol: &str,
    start: Option<String>,
    end: Option<String>,
    walk_forward: Option<usize>,
) -> Result<()> {
    let symbol = Symbol::parse(symbol)?;
    let interval = config.prediction_interval();
    let mut backtest_config = config.backtest.clone();
    if let Some(start) = start {
        backtest_config.start_date = Some(parse_date(&start)?);
    }
    if let Some(end) = end {
        backtest_config.end_date = Some(parse_date(&end)?);
    }
    if walk_forward.is_some() {
        backtest_config.walk_forward_windows = walk_forward;
    }
    if let Err(errors) = backtest_config.validate() {
        return Err(anyhow!("invalid backtest parameters: {}", errors.join("; ")));
    }

    let services = build_services(config).await?;
    let series = services
        .data
        .get_history(&symbol, Period::Y5, interval)
        .await?;
    info!(symbol = %symbol, bars = series.bars.len(), "running backtest");

    let walk_forward = backtest_config.walk_forward_windows.is_some();
    let engine = BacktestEngine::new(backtest_config);
    if walk_forward {
        let report = engine.run_walk_forward(&symbol, &series.bars)?;
        report.print_summary();
    } else {
        let report = engine.run(&symbol, &series.bars)?;
        report.print_summary();
    }
    Ok(())
}

async fn run_predict(config: AppConfig, symbol: &str) -> Result<()> {
    let symbol = Symbol::parse(symbol)?;
    let period = config.prediction_period();
    let interval = config.prediction_interval();
    let horizon = config.prediction.horizon_bars;
    let services = build_services(config).await?;

    let series = services.data.get_history(&symbol, period, interval).await?;
    let sentiment = services.sentiment.symbol_sentiment(&symbol).await;
    let model = services
        .models
        .get_or_train(&symbol, period, interval, &series, horizon)
        .await?;
    let prediction = services
        .models
        .predict(&symbol, &series, &model, horizon, Some(sentiment.score))
        .await?;

    println!("\nPrediction for {}", symbol);
    println!("  Last close:        {}", prediction.last_close);
    println!("  Predicted close:   {}", prediction.predicted_close);
    println!("  Predicted return:  {}%", prediction.predicted_return_pct);
    println!("  Direction:         {}", prediction.direction().as_str());
    println!("  Confidence:        {}", prediction.confidence);
    println!("  Sentiment adjust:  {}", prediction.sentiment_adjustment);
    println!("  Model:             {}", prediction.model_kind);
    Ok(())
}

async fn run_quote(config: AppConfig, symbols: Vec<String>) -> Result<()> {
    let tickers: Vec<String> = if symbols.is_empty() {
        config.watchlist.iter().map(|s| s.ticker.clone()).collect()
    } else {
        symbols
    };
    let services = build_services(config).await?;

    println!("{:<10} {:>12} {:>10} {:>9} {:>14}", "Symbol", "Price", "Change", "Chg %", "Volume");
    for ticker in tickers {
        let symbol = match Symbol::parse(&ticker) {
            Ok(s) => s,
            Err(e) => {
                warn!(ticker = %ticker, "skipping: {}", e);
                continue;
            }
        };
        match services.data.get_quote(&symbol).await {
            Ok(q) => println!(
                "{:<10} {:>12} {:>10} {:>8}% {:>14}",
                q.symbol.as_str(),
                q.price,
                q.change,
                q.change_pct,
                q.volume
            ),
            Err(e) => warn!(symbol = %symbol, "quote failed: {}", e),
        }
    }
    Ok(())
}

async fn run_history(config: AppConfig, symbol: &str, period: &str, interval: &str) -> Result<()> {
    let symbol = Symbol::parse(symbol)?;
    let period = Period::parse(period).ok_or_else(|| anyhow!("unknown period: {}", period))?;
    let interval =
        Interval::parse(interval).ok_or_else(|| anyhow!("unknown interval: {}", interval))?;
    let services = build_services(config).await?;

    let series = services.data.get_history(&symbol, period, interval).await?;
    println!("{:<22} {:>10} {:>10} {:>10} {:>10} {:>12}",
        "Timestamp", "Open", "High", "Low", "Close", "Volume");
    for bar in &series.bars {
        println!(
            "{:<22} {:>10} {:>10} {:>10} {:>10} {:>12}",
            bar.timestamp.format("%Y-%m-%d %H:%M"),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume
        );
    }
    if let Some(snapshot) = IndicatorSnapshot::compute(&series) {
        println!("\nLatest indicators:");
        if let Some(rsi) = snapshot.rsi_14 {
            println!("  RSI(14):  {}", rsi.round_dp(2));
        }
        if let Some(sma) = snapshot.sma_20 {
            println!("  SMA(20):  {}", sma.round_dp(2));
        }
        if let Some(adx) = snapshot.adx_14 {
            println!("  ADX(14):  {}", adx.round_dp(2));
        }
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow!("invalid date {:?} (expected YYYY-MM-DD): {}", raw, e))
}
