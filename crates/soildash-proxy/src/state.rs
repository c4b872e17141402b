//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::Config;
use crate::middleware::RateLimitState;

/// Shared proxy state.
///
/// The configuration is fixed for the lifetime of the server; restart the
/// proxy to change it.
#[derive(Debug)]
pub struct ProxyState {
    pub config: Config,
    /// Client used for every request to the device.
    pub client: reqwest::Client,
    pub rate_limits: RateLimitState,
}

impl ProxyState {
    /// Create state with a client that applies the device timeout.
    pub fn new(config: Config) -> Result<Arc<Self>, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.device.timeout())
            .build()?;
        Ok(Arc::new(Self {
            config,
            client,
            rate_limits: RateLimitState::new(),
        }))
    }
}
