use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::alerts::AlertKind;
use crate::backtest::{BacktestConfig, BacktestEngine};
use crate::config::AppConfig;
use crate::indicators::IndicatorSnapshot;
use crate::marketdata::DataError;
use crate::types::{Interval, Period, Symbol};
use super::AppState;

/// Map a service-layer error onto an HTTP status. Upstream data problems
/// surface as 502, unknown symbols as 404, everything else as 500.
fn error_response(e: &anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e.downcast_ref::<DataError>() {
        Some(DataError::SymbolNotFound(_)) | Some(DataError::EmptySeries(_)) => {
            StatusCode::NOT_FOUND
        }
        Some(DataError::InvalidSymbol(_)) => StatusCode::BAD_REQUEST,
        Some(DataError::Http(_)) | Some(DataError::Malformed(_)) => StatusCode::BAD_GATEWAY,
        None => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": e.to_string()})))
}

fn parse_symbol(raw: &str) -> Result<Symbol, (StatusCode, Json<serde_json::Value>)> {
    Symbol::parse(raw)
        .map_err(|e| (StatusCode::BAD_REQUEST, Json(json!({"error": e.to_string()}))))
}

// === Health and watchlist ===

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn get_watchlist(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.get().await;
    Json(config.watchlist)
}

// === Market data ===

pub async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    match state.data.get_quote(&symbol).await {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub period: Option<String>,
    pub interval: Option<String>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    let period = match query.period.as_deref() {
        Some(raw) => match Period::parse(raw) {
            Some(p) => p,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown period: {}", raw)})),
                )
                    .into_response();
            }
        },
        None => Period::Y1,
    };
    let interval = match query.interval.as_deref() {
        Some(raw) => match Interval::parse(raw) {
            Some(i) => i,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": format!("unknown interval: {}", raw)})),
                )
                    .into_response();
            }
        },
        None => Interval::D1,
    };

    match state.data.get_history(&symbol, period, interval).await {
        Ok(series) => Json(json!({
            "symbol": symbol,
            "period": period.as_str(),
            "interval": interval.as_str(),
            "bars": series.bars,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn get_indicators(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    let config = state.config.get().await;
    let series = match state
        .data
        .get_history(&symbol, config.prediction_period(), config.prediction_interval())
        .await
    {
        Ok(series) => series,
        Err(e) => return error_response(&e).into_response(),
    };
    match IndicatorSnapshot::compute(&series) {
        Some(snapshot) => Json(json!({
            "symbol": symbol,
            "indicators": snapshot,
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no bars available for {}", symbol)})),
        )
            .into_response(),
    }
}

// === Prediction and sentiment ===

pub async fn get_prediction(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    let config = state.config.get().await;
    let period = config.prediction_period();
    let interval = config.prediction_interval();
    let horizon = config.prediction.horizon_bars;

    let series = match state.data.get_history(&symbol, period, interval).await {
        Ok(series) => series,
        Err(e) => return error_response(&e).into_response(),
    };
    let sentiment = state.sentiment.symbol_sentiment(&symbol).await;
    let model = match state
        .models
        .get_or_train(&symbol, period, interval, &series, horizon)
        .await
    {
        Ok(model) => model,
        Err(e) => return error_response(&e).into_response(),
    };
    match state
        .models
        .predict(&symbol, &series, &model, horizon, Some(sentiment.score))
        .await
    {
        Ok(prediction) => {
            let direction = prediction.direction().as_str();
            Json(json!({
                "prediction": prediction,
                "direction": direction,
                "sentiment": sentiment,
            }))
            .into_response()
        }
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn get_sentiment(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    let score = state.sentiment.symbol_sentiment(&symbol).await;
    Json(score).into_response()
}

// === Screening ===

pub async fn get_screen_latest(State(state): State<AppState>) -> impl IntoResponse {
    let run = match state.db.latest_screen_run().await {
        Ok(Some(run)) => run,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "no screen run recorded yet"})),
            )
                .into_response();
        }
        Err(e) => return error_response(&e).into_response(),
    };
    match state.db.screen_results(run.id).await {
        Ok(results) => Json(json!({
            "run": run,
            "results": results,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

pub async fn post_screen_run(State(state): State<AppState>) -> impl IntoResponse {
    let guard = match state.screen_slot.try_begin() {
        Some(guard) => guard,
        None => {
            return (
                StatusCode::CONFLICT,
                Json(json!({"error": "a screen run is already in progress"})),
            )
                .into_response();
        }
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        // Holds the slot until the run finishes, even if it panics.
        let _guard = guard;
        match task_state.screener.run().await {
            Ok(run) => info!(run_id = %run.id, status = run.status.as_str(), "screen run finished"),
            Err(e) => error!("screen run could not be recorded: {}", e),
        }
    });

    (StatusCode::ACCEPTED, Json(json!({"status": "started"}))).into_response()
}

pub async fn get_screen_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.latest_screen_run().await {
        Ok(run) => Json(json!({
            "in_flight": state.screen_slot.in_flight(),
            "latest_run": run,
        }))
        .into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// === Backtesting ===

#[derive(Deserialize)]
pub struct BacktestRequest {
    pub symbol: String,
    /// Full engine configuration; missing means the configured defaults.
    pub config: Option<BacktestConfig>,
}

pub async fn post_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> impl IntoResponse {
    let symbol = match parse_symbol(&request.symbol) {
        Ok(s) => s,
        Err(resp) => return resp.into_response(),
    };
    let app_config = state.config.get().await;
    let config = request.config.unwrap_or_else(|| app_config.backtest.clone());
    if let Err(errors) = config.validate() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": errors.join(", ")})),
        )
            .into_response();
    }

    let series = match state
        .data
        .get_history(&symbol, Period::Y5, app_config.prediction_interval())
        .await
    {
        Ok(series) => series,
        Err(e) => return error_response(&e).into_response(),
    };

    let engine = BacktestEngine::new(config.clone());
    let run_id = Uuid::new_v4();

    let report_json = if config.walk_forward_windows.is_some() {
        match engine.run_walk_forward(&symbol, &series.bars) {
            Ok(report) => json!({"walk_forward": report}),
            Err(e) => return error_response(&e).into_response(),
        }
    } else {
        match engine.run(&symbol, &series.bars) {
            Ok(report) => json!({"report": report}),
            Err(e) => return error_response(&e).into_response(),
        }
    };

    let params = match serde_json::to_string(&config) {
        Ok(params) => params,
        Err(e) => return error_response(&e.into()).into_response(),
    };
    if let Err(e) = state
        .db
        .save_backtest_run(run_id, &symbol, &params, &report_json.to_string())
        .await
    {
        error!("failed to persist backtest run: {}", e);
    }

    Json(json!({
        "run_id": run_id,
        "symbol": symbol,
        "result": report_json,
    }))
    .into_response()
}

// === Alerts ===

pub async fn get_alerts(State(state): State<AppState>) -> impl IntoResponse {
    let alerts = state.alerts.recent(100).await;
    Json(json!({
        "alerts": alerts,
        "unacknowledged": state.alerts.unacknowledged_count().await,
    }))
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub id: Uuid,
}

pub async fn post_acknowledge_alert(
    State(state): State<AppState>,
    Json(request): Json<AcknowledgeRequest>,
) -> impl IntoResponse {
    if state.alerts.acknowledge(request.id).await {
        Json(json!({"status": "ok"})).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no alert with id {}", request.id)})),
        )
            .into_response()
    }
}

// === Configuration ===

pub async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.config.get().await)
}

pub async fn put_config(
    State(state): State<AppState>,
    Json(new_config): Json<AppConfig>,
) -> impl IntoResponse {
    match state.config.update(new_config).await {
        Ok(()) => {
            state
                .alerts
                .raise(AlertKind::ConfigChanged {
                    setting: "full configuration".to_string(),
                })
                .await;
            Json(json!({"status": "ok"})).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e}))).into_response(),
    }
}
