use std::sync::Arc;

use schemashift_common::{Error, Result};
use schemashift_config::GatewayConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Binds to the configured address and serves the report sink.
pub struct GatewayServer {
    config: GatewayConfig,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let state = Arc::new(AppState::new(self.config));
        let app = build_router(state);

        let listener = TcpListener::bind(&addr).await?;
        info!("report sink listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Gateway(format!("server error: {e}")))?;

        Ok(())
    }
}
