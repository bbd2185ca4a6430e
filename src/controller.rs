use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{BoundedImageCache, CacheStats};
use crate::error::{AcquireError, AcquireResult, ProviderError};
use crate::provider::ImageProvider;
use crate::rate_limit::{RateLimitManager, RateLimitSnapshot};
use crate::session::{CollectionLimits, SearchSession, SessionSnapshot, SessionStatus};
use crate::types::ProviderImage;

/// Consecutive network failures on one page before the session fails;
/// keeps a caller-driven retry loop from spinning forever.
const MAX_NETWORK_FAILURES_PER_PAGE: u32 = 3;

/// Cloneable cancellation flag. The only way to interrupt a fetch that is
/// mid-batch from another task; the controller observes it after every
/// page and stops issuing provider calls.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Result of one `fetch_next_batch` call. `awaiting_confirmation` means
/// the batch stopped at a confirmation gate and may be smaller than the
/// configured batch size.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub images: Vec<ProviderImage>,
    pub awaiting_confirmation: bool,
    pub should_warn: bool,
    pub progress: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ControllerStats {
    pub session: Option<SessionSnapshot>,
    pub rate_limit: RateLimitSnapshot,
    pub cache: CacheStats,
}

/// Orchestrates bounded acquisition: owns the active session, consults the
/// shared rate limiter before each provider page, stores results in the
/// shared cache, and enforces session limits and confirmation gates.
///
/// One controller serves one logical caller; callers needing concurrency
/// wrap it in a mutex (calls must never interleave for the same session).
pub struct AcquisitionController {
    provider: Arc<dyn ImageProvider>,
    limiter: Arc<RateLimitManager>,
    cache: Arc<BoundedImageCache>,
    session: Option<SearchSession>,
    stop: StopHandle,
    network_failures: u32,
    failing_page: u32,
}

impl AcquisitionController {
    pub fn new(
        provider: Arc<dyn ImageProvider>,
        limiter: Arc<RateLimitManager>,
        cache: Arc<BoundedImageCache>,
    ) -> Self {
        Self {
            provider,
            limiter,
            cache,
            session: None,
            stop: StopHandle::default(),
            network_failures: 0,
            failing_page: 0,
        }
    }

    /// Handle other tasks can use to cancel an in-flight fetch.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Begin a new session, replacing any existing one. Fails on invalid
    /// limits without touching the current session.
    pub fn start_search(
        &mut self,
        query: impl Into<String>,
        limits: CollectionLimits,
    ) -> AcquireResult<SessionSnapshot> {
        let session = SearchSession::new(query, limits)?;
        info!(query = session.query(), session_id = %session.id(), "starting search session");
        self.stop.clear();
        self.network_failures = 0;
        self.failing_page = 0;
        let snapshot = session.snapshot();
        self.session = Some(session);
        Ok(snapshot)
    }

    pub fn can_load_more(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.can_load_more())
    }

    /// Resume past a confirmation gate.
    pub fn confirm(&mut self) -> AcquireResult<()> {
        self.observe_stop();
        let session = self.session_mut()?;
        session.confirm()?;
        debug!("confirmation accepted, session active again");
        Ok(())
    }

    /// Abort the session. Idempotent, never blocks.
    pub fn stop(&mut self) {
        self.stop.request_stop();
        if let Some(session) = self.session.as_mut() {
            session.stop();
        }
    }

    pub fn stats(&self) -> ControllerStats {
        ControllerStats {
            session: self.session.as_ref().map(|s| s.snapshot()),
            rate_limit: self.limiter.snapshot(),
            cache: self.cache.stats(),
        }
    }

    /// Fetch up to one batch of images, page by page, in increasing page
    /// order. Stops at session limits, confirmation boundaries, rate-limit
    /// denial, and observed stop requests.
    pub async fn fetch_next_batch(&mut self) -> AcquireResult<FetchOutcome> {
        self.observe_stop();
        {
            let session = self.session_mut()?;
            match session.status() {
                SessionStatus::Active => {}
                // A completed session is the limit condition, not a
                // call-order mistake.
                SessionStatus::Completed => return Err(AcquireError::LimitReached),
                status => return Err(AcquireError::SessionNotFetchable { status }),
            }
            if !session.can_load_more() {
                session.complete();
                return Err(AcquireError::LimitReached);
            }
        }

        let provider = Arc::clone(&self.provider);
        let (query, target) = {
            let session = self.session_mut()?;
            let limits = session.limits();
            let remaining = limits.max_images_per_session - session.images_loaded();
            (session.query().to_string(), limits.batch_size.min(remaining))
        };

        let mut batch: Vec<ProviderImage> = Vec::new();
        while (batch.len() as u32) < target {
            self.observe_stop();
            let (page, needed, status) = {
                let session = self.session_mut()?;
                (
                    session.current_page(),
                    target - batch.len() as u32,
                    session.status(),
                )
            };
            if status != SessionStatus::Active {
                break;
            }

            if !self.limiter.allow() {
                let retry_after = self.limiter.time_until_reset();
                return Err(AcquireError::RateLimited { retry_after });
            }
            // The slot is spent whether or not the call succeeds; failed
            // calls still count against the provider quota.
            self.limiter.record_call();

            match provider.search(&query, page, needed).await {
                Ok(page_result) => {
                    self.network_failures = 0;
                    let mut items = page_result.items;
                    items.truncate(needed as usize);
                    let taken = items.len() as u32;
                    for image in &items {
                        if let Err(e) = self.cache.put(
                            &image.id,
                            Arc::new(image.clone()),
                            image.size_bytes_estimate,
                        ) {
                            // Oversized images degrade to uncached, not to
                            // a failed session.
                            warn!(error = %e, "image not cached");
                        }
                    }
                    batch.extend(items);
                    let session = self.session_mut()?;
                    session.record_loaded(taken);
                    session.record_page();
                    debug!(
                        page,
                        taken,
                        images_loaded = session.images_loaded(),
                        "page fetched"
                    );
                    if taken == 0 {
                        // Provider ran out of results before our limits did.
                        session.complete();
                        break;
                    }
                }
                Err(e) => return self.handle_provider_error(page, e),
            }
        }

        let session = self.session_mut()?;
        Ok(FetchOutcome {
            awaiting_confirmation: session.status() == SessionStatus::AwaitingConfirmation,
            should_warn: session.should_warn(),
            progress: session.progress_text(),
            images: batch,
        })
    }

    fn handle_provider_error(
        &mut self,
        page: u32,
        error: ProviderError,
    ) -> AcquireResult<FetchOutcome> {
        match &error {
            ProviderError::Network(_) => {
                if self.failing_page == page {
                    self.network_failures += 1;
                } else {
                    self.failing_page = page;
                    self.network_failures = 1;
                }
                if self.network_failures >= MAX_NETWORK_FAILURES_PER_PAGE {
                    warn!(
                        page,
                        failures = self.network_failures,
                        "repeated network failures, failing session"
                    );
                    if let Some(session) = self.session.as_mut() {
                        session.fail();
                    }
                }
                // Otherwise the session stays Active so the caller can
                // retry the same batch.
            }
            ProviderError::RateLimitedByProvider => {
                // Expected steady-state condition; session stays Active.
            }
            ProviderError::MalformedResponse(_) | ProviderError::Other(_) => {
                if let Some(session) = self.session.as_mut() {
                    session.fail();
                }
            }
        }
        Err(AcquireError::Provider(error))
    }

    fn observe_stop(&mut self) {
        if self.stop.is_stop_requested() {
            if let Some(session) = self.session.as_mut() {
                session.stop();
            }
        }
    }

    fn session_mut(&mut self) -> AcquireResult<&mut SearchSession> {
        self.session
            .as_mut()
            .ok_or(AcquireError::SessionNotFetchable {
                status: SessionStatus::Idle,
            })
    }
}
