use std::sync::Arc;

use crate::{cache::CountingCache, config::Config, rate_limit::FixedWindowLimiter};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub limiter: Arc<FixedWindowLimiter<CountingCache>>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(CountingCache::new());
        Self {
            limiter: Arc::new(FixedWindowLimiter::new(
                cache,
                config.ttl,
                config.threshold,
            )),
            config: Arc::new(config),
        }
    }
}
