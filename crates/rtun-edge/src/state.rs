use std::sync::Arc;

use rtun_core::config::Settings;
use rtun_core::firewall::RuleCache;
use rtun_core::store::SharedStore;

use crate::rate_limit::RateLimiter;
use crate::registry::TunnelRegistry;

pub struct EdgeState {
    pub settings: Settings,
    pub store: SharedStore,
    pub registry: TunnelRegistry,
    pub rule_cache: RuleCache,
    pub rate_limiter: RateLimiter,
}

impl EdgeState {
    pub fn new(settings: Settings, store: SharedStore) -> Arc<Self> {
        let rate_limiter = RateLimiter::new(
            settings.edge.rate_limit_max,
            std::time::Duration::from_secs(settings.edge.rate_limit_window_secs),
        );
        Arc::new(Self {
            settings,
            store,
            registry: TunnelRegistry::new(),
            rule_cache: RuleCache::new(),
            rate_limiter,
        })
    }
}
