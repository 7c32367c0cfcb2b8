use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::types::Symbol;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// Events the screener and pipeline raise alerts for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertKind {
    StrongSignal {
        symbol: Symbol,
        predicted_return_pct: Decimal,
    },
    LargeMove {
        symbol: Symbol,
        change_pct: Decimal,
    },
    ScreenCompleted {
        run_id: String,
        symbols_ranked: usize,
    },
    PipelineFailed {
        run_id: String,
        error: String,
    },
    DataFailure {
        symbol: Symbol,
        error: String,
    },
    ConfigChanged {
        setting: String,
    },
}

impl AlertKind {
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertKind::PipelineFailed { .. } => Severity::Critical,
            AlertKind::LargeMove { .. } => Severity::Warning,
            AlertKind::DataFailure { .. } => Severity::Warning,
            _ => Severity::Info,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AlertKind::StrongSignal { .. } => "strong_signal",
            AlertKind::LargeMove { .. } => "large_move",
            AlertKind::ScreenCompleted { .. } => "screen_completed",
            AlertKind::PipelineFailed { .. } => "pipeline_failed",
            AlertKind::DataFailure { .. } => "data_failure",
            AlertKind::ConfigChanged { .. } => "config_changed",
        }
    }

    pub fn message(&self) -> String {
        match self {
            AlertKind::StrongSignal {
                symbol,
                predicted_return_pct,
            } => format!(
                "{}: predicted return {}% clears the signal threshold",
                symbol, predicted_return_pct
            ),
            AlertKind::LargeMove { symbol, change_pct } => {
                format!("{} moved {}% over the last session", symbol, change_pct)
            }
            AlertKind::ScreenCompleted {
                run_id,
                symbols_ranked,
            } => format!("screen run {} ranked {} symbols", run_id, symbols_ranked),
            AlertKind::PipelineFailed { run_id, error } => {
                format!("screen run {} failed: {}", run_id, error)
            }
            AlertKind::DataFailure { symbol, error } => {
                format!("data fetch for {} failed: {}", symbol, error)
            }
            AlertKind::ConfigChanged { setting } => {
                format!("configuration updated: {}", setting)
            }
        }
    }
}

/// One raised alert, as stored in memory and in SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub kind: String,
    pub message: String,
    pub acknowledged: bool,
}

impl AlertRecord {
    pub fn new(severity: Severity, kind: &str, message: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            kind: kind.to_string(),
            message: message.to_string(),
            acknowledged: false,
        }
    }
}

/// In-memory alert ring mirrored to the database.
pub struct AlertManager {
    alerts: Arc<RwLock<Vec<AlertRecord>>>,
    database: Option<Arc<crate::database::Database>>,
    max_alerts: usize,
}

impl AlertManager {
    pub fn new(database: Option<Arc<crate::database::Database>>) -> Self {
        Self {
            alerts: Arc::new(RwLock::new(Vec::new())),
            database,
            max_alerts: 500,
        }
    }

    pub async fn raise(&self, kind: AlertKind) {
        self.raise_with_severity(kind, None).await;
    }

    pub async fn raise_with_severity(&self, kind: AlertKind, severity: Option<Severity>) {
        let severity = severity.unwrap_or_else(|| kind.default_severity());
        let record = AlertRecord::new(severity, kind.name(), &kind.message());

        match severity {
            Severity::Critical => error!(kind = kind.name(), "{}", record.message),
            Severity::Warning => warn!(kind = kind.name(), "{}", record.message),
            Severity::Info => info!(kind = kind.name(), "{}", record.message),
        }

        let mut alerts = self.alerts.write().await;
        alerts.insert(0, record.clone());
        if alerts.len() > self.max_alerts {
            alerts.truncate(self.max_alerts);
        }
        drop(alerts);

        if let Some(db) = &self.database {
            if let Err(e) = db.insert_alert(&record).await {
                error!("Failed to persist alert: {}", e);
            }
        }
    }

    pub async fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        let alerts = self.alerts.read().await;
        alerts.iter().take(limit).cloned().collect()
    }

    pub async fn unacknowledged_count(&self) -> usize {
        let alerts = self.alerts.read().await;
        alerts.iter().filter(|a| !a.acknowledged).count()
    }

    /// Acknowledge in memory and in the database. Returns false when the id
    /// is unknown in both.
    pub async fn acknowledge(&self, id: Uuid) -> bool {
        let mut found = false;
        {
            let mut alerts = self.alerts.write().await;
            if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
                alert.acknowledged = true;
                found = true;
            }
        }
        if let Some(db) = &self.database {
            match db.acknowledge_alert(id).await {
                Ok(hit) => found = found || hit,
                Err(e) => error!("Failed to acknowledge alert in database: {}", e),
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sym() -> Symbol {
        Symbol::parse("NVDA").unwrap()
    }

    #[tokio::test]
    async fn raise_stores_newest_first() {
        let manager = AlertManager::new(None);
        manager
            .raise(AlertKind::LargeMove {
                symbol: sym(),
                change_pct: dec!(8.2),
            })
            .await;
        manager
            .raise(AlertKind::StrongSignal {
                symbol: sym(),
                predicted_return_pct: dec!(2.4),
            })
            .await;

        let recent = manager.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "strong_signal");
        assert_eq!(recent[1].kind, "large_move");
        assert_eq!(recent[1].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn acknowledge_flips_flag() {
        let manager = AlertManager::new(None);
        manager
            .raise(AlertKind::ConfigChanged {
                setting: "screener.top_n".to_string(),
            })
            .await;
        let id = manager.recent(1).await[0].id;

        assert_eq!(manager.unacknowledged_count().await, 1);
        assert!(manager.acknowledge(id).await);
        assert_eq!(manager.unacknowledged_count().await, 0);
        assert!(!manager.acknowledge(Uuid::new_v4()).await);
    }

    #[test]
    fn pipeline_failure_is_critical() {
        let kind = AlertKind::PipelineFailed {
            run_id: "abc".to_string(),
            error: "upstream timeout".to_string(),
        };
        assert_eq!(kind.default_severity(), Severity::Critical);
        assert!(kind.message().contains("upstream timeout"));
    }
}
