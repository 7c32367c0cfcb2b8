use axum::{
    response::Html,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use super::{api, AppState};

pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        // Dashboard page
        .route("/", get(serve_dashboard))
        // Market data
        .route("/api/health", get(api::health_check))
        .route("/api/watchlist", get(api::get_watchlist))
        .route("/api/quote/:symbol", get(api::get_quote))
        .route("/api/history/:symbol", get(api::get_history))
        .route("/api/indicators/:symbol", get(api::get_indicators))
        // Prediction and sentiment
        .route("/api/predict/:symbol", get(api::get_prediction))
        .route("/api/sentiment/:symbol", get(api::get_sentiment))
        // Screening
        .route("/api/screen/latest", get(api::get_screen_latest))
        .route("/api/screen/run", post(api::post_screen_run))
        .route("/api/screen/status", get(api::get_screen_status))
        // Backtesting
        .route("/api/backtest", post(api::post_backtest))
        // Alerts
        .route("/api/alerts", get(api::get_alerts))
        .route("/api/alerts/acknowledge", post(api::post_acknowledge_alert))
        // Configuration
        .route("/api/config", get(api::get_config).put(api::put_config))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>StockPulse Dashboard</title>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
            background: #0f1419;
            color: #e7e9ea;
            min-height: 100vh;
        }
        .header {
            background: #16202a;
            padding: 1rem 2rem;
            border-bottom: 1px solid #2f3336;
            display: flex;
            justify-content: space-between;
            align-items: center;
            flex-wrap: wrap;
            gap: 1rem;
        }
        .header h1 { font-size: 1.5rem; color: #1da1f2; }
        .header .meta { color: #71767b; font-size: 0.875rem; }
        .container { padding: 1.5rem; max-width: 1400px; margin: 0 auto; }
        .grid { display: grid; gap: 1.5rem; }
        .grid-2 { grid-template-columns: repeat(2, 1fr); }
        @media (max-width: 900px) { .grid-2 { grid-template-columns: 1fr; } }
        .card {
            background: #16202a;
            border-radius: 12px;
            padding: 1.5rem;
            border: 1px solid #2f3336;
            margin-bottom: 1.5rem;
        }
        .card-title {
            font-size: 0.875rem;
            color: #71767b;
            text-transform: uppercase;
            letter-spacing: 0.5px;
            margin-bottom: 0.75rem;
            display: flex;
            justify-content: space-between;
            align-items: center;
        }
        table { width: 100%; border-collapse: collapse; font-size: 0.9rem; }
        th, td { text-align: left; padding: 0.5rem 0.75rem; border-bottom: 1px solid #2f3336; }
        th { color: #71767b; font-weight: 500; font-size: 0.8rem; text-transform: uppercase; }
        .positive { color: #00ba7c; }
        .negative { color: #f4212e; }
        .neutral { color: #71767b; }
        .badge {
            display: inline-block;
            padding: 0.15rem 0.6rem;
            border-radius: 999px;
            font-size: 0.75rem;
        }
        .badge.up { background: rgba(0, 186, 124, 0.15); color: #00ba7c; }
        .badge.down { background: rgba(244, 33, 46, 0.15); color: #f4212e; }
        .badge.flat { background: rgba(113, 118, 123, 0.15); color: #71767b; }
        .badge.warning { background: rgba(255, 173, 31, 0.15); color: #ffad1f; }
        .badge.critical { background: rgba(244, 33, 46, 0.15); color: #f4212e; }
        .badge.info { background: rgba(29, 161, 242, 0.15); color: #1da1f2; }
        button {
            background: #1da1f2;
            color: #fff;
            border: none;
            border-radius: 8px;
            padding: 0.5rem 1.25rem;
            font-size: 0.9rem;
            cursor: pointer;
        }
        button:disabled { background: #2f3336; color: #71767b; cursor: default; }
        .empty { color: #71767b; padding: 1rem 0; text-align: center; }
    </style>
</head>
<body>
    <div class="header">
        <h1>StockPulse</h1>
        <div class="meta" id="status-line">connecting&hellip;</div>
    </div>
    <div class="container">
        <div class="card">
            <div class="card-title">
                <span>Latest Screen</span>
                <button id="run-screen">Run Screen</button>
            </div>
            <table>
                <thead>
                    <tr>
                        <th>#</th><th>Symbol</th><th>Score</th><th>Pred. Return</th>
                        <th>RSI</th><th>ADX</th><th>Vol. Ratio</th><th>Close</th><th>Direction</th>
                    </tr>
                </thead>
                <tbody id="screen-body"><tr><td colspan="9" class="empty">loading&hellip;</td></tr></tbody>
            </table>
        </div>
        <div class="grid grid-2">
            <div class="card">
                <div class="card-title"><span>Watchlist</span></div>
                <table>
                    <thead><tr><th>Symbol</th><th>Price</th><th>Change</th></tr></thead>
                    <tbody id="watchlist-body"><tr><td colspan="3" class="empty">loading&hellip;</td></tr></tbody>
                </table>
            </div>
            <div class="card">
                <div class="card-title"><span>Alerts</span></div>
                <table>
                    <thead><tr><th>Time</th><th>Severity</th><th>Message</th></tr></thead>
                    <tbody id="alerts-body"><tr><td colspan="3" class="empty">loading&hellip;</td></tr></tbody>
                </table>
            </div>
        </div>
    </div>
    <script>
        const fmt = (v, dp = 2) => v === null || v === undefined ? '-' : Number(v).toFixed(dp);
        const cls = v => Number(v) > 0 ? 'positive' : Number(v) < 0 ? 'negative' : 'neutral';

        async function getJson(url, options) {
            const response = await fetch(url, options);
            if (!response.ok) throw new Error('HTTP ' + response.status);
            return response.json();
        }

        async function refreshScreen() {
            const body = document.getElementById('screen-body');
            try {
                const data = await getJson('/api/screen/latest');
                if (!data.results.length) {
                    body.innerHTML = '<tr><td colspan="9" class="empty">screen run produced no candidates</td></tr>';
                    return;
                }
                body.innerHTML = data.results.map(r => `
                    <tr>
                        <td>${r.rank}</td>
                        <td>${r.symbol}</td>
                        <td>${fmt(r.score, 4)}</td>
                        <td class="${cls(r.predicted_return_pct)}">${fmt(r.predicted_return_pct)}%</td>
                        <td>${fmt(r.rsi, 1)}</td>
                        <td>${fmt(r.adx, 1)}</td>
                        <td>${fmt(r.volume_ratio)}</td>
                        <td>${fmt(r.close)}</td>
                        <td><span class="badge ${r.direction}">${r.direction}</span></td>
                    </tr>`).join('');
            } catch (e) {
                body.innerHTML = '<tr><td colspan="9" class="empty">no screen run yet</td></tr>';
            }
        }

        async function refreshWatchlist() {
            const body = document.getElementById('watchlist-body');
            try {
                const entries = await getJson('/api/watchlist');
                const rows = await Promise.all(entries.map(async entry => {
                    try {
                        const q = await getJson('/api/quote/' + encodeURIComponent(entry.ticker));
                        return `<tr><td>${q.symbol}</td><td>${fmt(q.price)}</td>
                            <td class="${cls(q.change_pct)}">${fmt(q.change_pct)}%</td></tr>`;
                    } catch (e) {
                        return `<tr><td>${entry.ticker}</td><td colspan="2" class="neutral">unavailable</td></tr>`;
                    }
                }));
                body.innerHTML = rows.join('');
            } catch (e) {
                body.innerHTML = '<tr><td colspan="3" class="empty">failed to load watchlist</td></tr>';
            }
        }

        async function refreshAlerts() {
            const body = document.getElementById('alerts-body');
            try {
                const data = await getJson('/api/alerts');
                if (!data.alerts.length) {
                    body.innerHTML = '<tr><td colspan="3" class="empty">no alerts</td></tr>';
                    return;
                }
                body.innerHTML = data.alerts.slice(0, 20).map(a => `
                    <tr>
                        <td>${new Date(a.timestamp).toLocaleTimeString()}</td>
                        <td><span class="badge ${a.severity.toLowerCase()}">${a.severity}</span></td>
                        <td>${a.message}</td>
                    </tr>`).join('');
            } catch (e) {
                body.innerHTML = '<tr><td colspan="3" class="empty">failed to load alerts</td></tr>';
            }
        }

        async function refreshStatus() {
            const line = document.getElementById('status-line');
            const button = document.getElementById('run-screen');
            try {
                const status = await getJson('/api/screen/status');
                button.disabled = status.in_flight;
                if (status.in_flight) {
                    line.textContent = 'screen run in progress';
                } else if (status.latest_run) {
                    line.textContent = 'last screen: ' + status.latest_run.status +
                        ' at ' + new Date(status.latest_run.started_at).toLocaleString();
                } else {
                    line.textContent = 'no screen run yet';
                }
            } catch (e) {
                line.textContent = 'disconnected';
            }
        }

        document.getElementById('run-screen').addEventListener('click', async () => {
            try {
                await getJson('/api/screen/run', { method: 'POST' });
            } catch (e) { /* conflict while a run is in flight */ }
            refreshStatus();
        });

        function refreshAll() {
            refreshStatus();
            refreshScreen();
            refreshWatchlist();
            refreshAlerts();
        }
        refreshAll();
        setInterval(refreshStatus, 5000);
        setInterval(refreshAll, 60000);
    </script>
</body>
</html>"##;
