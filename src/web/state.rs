use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::alerts::AlertManager;
use crate::config::ConfigManager;
use crate::database::Database;
use crate::marketdata::MarketDataService;
use crate::ml::ModelStore;
use crate::screener::Screener;
use crate::sentiment::SentimentAnalyzer;

/// Single-flight slot for the screening pipeline. The claim is held by a
/// [`ScreenGuard`], so the slot frees itself when the run's task finishes,
/// errors or panics.
#[derive(Clone, Default)]
pub struct ScreenSlot {
    in_flight: Arc<AtomicBool>,
}

impl ScreenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot. Returns `None` when a run is already in flight.
    pub fn try_begin(&self) -> Option<ScreenGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ScreenGuard {
                in_flight: self.in_flight.clone(),
            })
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Releases the screening slot on drop.
pub struct ScreenGuard {
    in_flight: Arc<AtomicBool>,
}

impl Drop for ScreenGuard {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Everything the API handlers need, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub data: MarketDataService,
    pub models: Arc<ModelStore>,
    pub sentiment: Arc<SentimentAnalyzer>,
    pub alerts: Arc<AlertManager>,
    pub config: Arc<ConfigManager>,
    pub screener: Arc<Screener>,
    pub screen_slot: ScreenSlot,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<Database>,
        data: MarketDataService,
        models: Arc<ModelStore>,
        sentiment: Arc<SentimentAnalyzer>,
        alerts: Arc<AlertManager>,
        config: Arc<ConfigManager>,
        screener: Arc<Screener>,
    ) -> Self {
        Self {
            db,
            data,
            models,
            sentiment,
            alerts,
            config,
            screener,
            screen_slot: ScreenSlot::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_run_at_a_time() {
        let slot = ScreenSlot::new();
        let guard = slot.try_begin().unwrap();
        assert!(slot.in_flight());
        assert!(slot.try_begin().is_none());
        drop(guard);
        assert!(!slot.in_flight());
        assert!(slot.try_begin().is_some());
    }

    #[tokio::test]
    async fn slot_frees_when_the_holding_task_panics() {
        let slot = ScreenSlot::new();
        let guard = slot.try_begin().unwrap();
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("screen run blew up");
        });
        assert!(handle.await.is_err());
        assert!(!slot.in_flight());
        assert!(slot.try_begin().is_some());
    }
}
