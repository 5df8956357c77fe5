use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use schemashift_config::GatewayConfig;

/// Shared application state accessible from all request handlers.
pub struct AppState {
    pub config: GatewayConfig,
    reports_received: AtomicU64,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            reports_received: AtomicU64::new(0),
        }
    }

    pub fn record_report(&self) -> u64 {
        self.reports_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reports_received(&self) -> u64 {
        self.reports_received.load(Ordering::Relaxed)
    }
}

pub type SharedState = Arc<AppState>;
