//! Shared handler state.

use crate::rate_limit::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use unempower::config::ApiConfig;
use unempower::{ChainFallback, CreditPipeline, RpcClient};

#[derive(Clone, Debug)]
pub struct AppState {
    pub pipeline: CreditPipeline,
    /// Live chain access for health checks and the proof fallback. `None` runs store-only.
    pub chain: Option<ChainFallback<RpcClient>>,
    pub chain_id: u64,
    pub limiter: Arc<RateLimiter>,
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        pipeline: CreditPipeline,
        chain: Option<ChainFallback<RpcClient>>,
        chain_id: u64,
        api: &ApiConfig,
    ) -> Self {
        Self {
            pipeline,
            chain,
            chain_id,
            limiter: Arc::new(RateLimiter::new(
                api.rate_limit_requests,
                Duration::from_secs(api.rate_limit_window_secs),
            )),
            admin_token: api.admin_token.as_deref().map(Arc::from),
        }
    }
}
