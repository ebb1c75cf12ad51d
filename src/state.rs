// Application state shared by every handler.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;

use crate::bridge::ChatBridge;
use crate::config::Config;
use crate::mcp::gateway::McpGateway;
use crate::mcp::pool::ConnectionPool;
use crate::model::{GeminiProvider, ModelProvider};
use crate::store::TurnStore;

/// Central application state. Clone-friendly (all heavy fields behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub pool: Arc<ConnectionPool>,
    pub gateway: McpGateway,
    pub bridge: ChatBridge,
    pub store: Arc<dyn TurnStore>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire the pool, gateway and bridge around an existing provider and store.
    pub fn from_parts(
        pool: Arc<ConnectionPool>,
        provider: Arc<dyn ModelProvider>,
        store: Arc<dyn TurnStore>,
        settings: crate::bridge::BridgeSettings,
    ) -> Self {
        let gateway = McpGateway::new(pool.clone());
        let bridge = ChatBridge::new(gateway.clone(), provider, store.clone(), settings);
        Self {
            pool,
            gateway,
            bridge,
            store,
            start_time: Instant::now(),
        }
    }

    pub fn new(config: &Config, client: Client, store: Arc<dyn TurnStore>) -> Self {
        let pool = Arc::new(ConnectionPool::new(client.clone(), config.client_options()));
        let provider = GeminiProvider::new(client, config.api_key.clone(), config.model.clone())
            .with_generation(config.temperature, config.max_output_tokens);

        tracing::info!(
            "AppState initialised (model: {}, store: {}, connect timeout: {}s, request timeout: {}s)",
            config.model,
            store.kind(),
            config.connect_timeout.as_secs(),
            config.request_timeout.as_secs()
        );

        Self::from_parts(pool, Arc::new(provider), store, config.bridge_settings())
    }
}

/// Shared HTTP client. No global timeout: MCP event streams are long-lived,
/// so deadlines are set per request.
pub fn build_http_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .pool_max_idle_per_host(10)
        .connect_timeout(Duration::from_secs(5))
        .build()
}
