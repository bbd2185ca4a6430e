pub mod cache;
pub mod controller;
pub mod error;
pub mod provider;
pub mod rate_limit;
pub mod searxng;
pub mod session;
pub mod types;

use std::sync::Arc;

pub use cache::BoundedImageCache;
pub use controller::{AcquisitionController, ControllerStats, FetchOutcome, StopHandle};
pub use error::{AcquireError, AcquireResult, ProviderError};
pub use provider::ImageProvider;
pub use rate_limit::{RateLimitConfig, RateLimitManager};
pub use session::{CollectionLimits, SearchSession, SessionStatus};

/// Shared state for the HTTP host. The controller sits behind a mutex so
/// calls for the one active session are serialized, never interleaved;
/// the stop handle stays outside the lock so cancellation is reachable
/// while a fetch is in flight.
pub struct AppState {
    pub controller: tokio::sync::Mutex<AcquisitionController>,
    pub stop: StopHandle,
    pub default_limits: CollectionLimits,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        rate_config: RateLimitConfig,
        default_limits: CollectionLimits,
    ) -> Self {
        let limiter = Arc::new(RateLimitManager::new(rate_config));
        let cache = Arc::new(BoundedImageCache::new(default_limits.max_cache_bytes));
        let controller = AcquisitionController::new(provider, limiter, cache);
        let stop = controller.stop_handle();
        Self {
            controller: tokio::sync::Mutex::new(controller),
            stop,
            default_limits,
        }
    }
}
