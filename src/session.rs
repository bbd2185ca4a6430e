use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AcquireError, AcquireResult};

/// Per-session acquisition limits, supplied by the caller and immutable
/// for the lifetime of a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionLimits {
    /// Hard ceiling on images acquired in one session.
    #[serde(default = "defaults::max_images")]
    pub max_images_per_session: u32,
    /// Hard ceiling on provider pages consumed.
    #[serde(default = "defaults::max_pages")]
    pub max_pages_per_session: u32,
    /// Images-loaded count at which a soft warning is signaled.
    #[serde(default = "defaults::warn_threshold")]
    pub warn_threshold: u32,
    /// Images fetched per explicit "load more" action.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u32,
    /// Require caller confirmation every N images; 0 disables the gate.
    #[serde(default = "defaults::confirmation_interval")]
    pub confirmation_interval: u32,
    /// Eviction budget for the shared image cache.
    #[serde(default = "defaults::max_cache_bytes")]
    pub max_cache_bytes: u64,
}

mod defaults {
    pub fn max_images() -> u32 {
        200
    }
    pub fn max_pages() -> u32 {
        50
    }
    pub fn warn_threshold() -> u32 {
        100
    }
    pub fn batch_size() -> u32 {
        20
    }
    pub fn confirmation_interval() -> u32 {
        50
    }
    pub fn max_cache_bytes() -> u64 {
        64 * 1024 * 1024
    }
}

impl Default for CollectionLimits {
    fn default() -> Self {
        Self {
            max_images_per_session: defaults::max_images(),
            max_pages_per_session: defaults::max_pages(),
            warn_threshold: defaults::warn_threshold(),
            batch_size: defaults::batch_size(),
            confirmation_interval: defaults::confirmation_interval(),
            max_cache_bytes: defaults::max_cache_bytes(),
        }
    }
}

impl CollectionLimits {
    pub fn validate(&self) -> AcquireResult<()> {
        if self.batch_size == 0 {
            return Err(AcquireError::InvalidLimits(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.warn_threshold > self.max_images_per_session {
            return Err(AcquireError::InvalidLimits(format!(
                "warn_threshold {} exceeds max_images_per_session {}",
                self.warn_threshold, self.max_images_per_session
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    AwaitingConfirmation,
    Completed,
    Aborted,
    Failed,
}

impl SessionStatus {
    /// Terminal sessions accept no further fetches; a fresh search is
    /// required.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Aborted | SessionStatus::Failed
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub query: String,
    pub status: SessionStatus,
    pub images_loaded: u32,
    pub pages_loaded: u32,
    pub current_page: u32,
    pub should_warn: bool,
    pub limits: CollectionLimits,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One bounded search-and-acquire interaction for a single query.
///
/// The session is a state machine, not a loop: every way out of `Active`
/// is an explicit transition, so runaway pagination is impossible by
/// construction. Only the owning controller mutates it.
#[derive(Debug, Clone)]
pub struct SearchSession {
    id: Uuid,
    query: String,
    limits: CollectionLimits,
    images_loaded: u32,
    pages_loaded: u32,
    current_page: u32,
    status: SessionStatus,
    // Next images_loaded boundary at which the confirmation gate fires.
    // Advanced by confirm(), so one crossing fires exactly once.
    next_confirmation_at: u32,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

impl SearchSession {
    pub fn new(query: impl Into<String>, limits: CollectionLimits) -> AcquireResult<Self> {
        limits.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            query: query.into(),
            next_confirmation_at: limits.confirmation_interval,
            limits,
            images_loaded: 0,
            pages_loaded: 0,
            current_page: 1,
            status: SessionStatus::Active,
            created_at: now,
            last_activity_at: now,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn limits(&self) -> &CollectionLimits {
        &self.limits
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn images_loaded(&self) -> u32 {
        self.images_loaded
    }

    pub fn pages_loaded(&self) -> u32 {
        self.pages_loaded
    }

    /// Provider page number the next fetch will request (1-based).
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    /// True only while `Active` and under both the image and page ceilings.
    pub fn can_load_more(&self) -> bool {
        self.status == SessionStatus::Active
            && self.images_loaded < self.limits.max_images_per_session
            && self.pages_loaded < self.limits.max_pages_per_session
    }

    pub fn should_warn(&self) -> bool {
        self.status == SessionStatus::Active && self.images_loaded >= self.limits.warn_threshold
    }

    pub fn requires_confirmation(&self) -> bool {
        self.limits.confirmation_interval > 0
            && self.status == SessionStatus::Active
            && self.images_loaded >= self.next_confirmation_at
    }

    /// Record `n` images loaded. Completes the session at the image
    /// ceiling, otherwise pauses at a confirmation boundary crossing.
    pub fn record_loaded(&mut self, n: u32) {
        if self.status != SessionStatus::Active {
            return;
        }
        self.images_loaded = self
            .images_loaded
            .saturating_add(n)
            .min(self.limits.max_images_per_session);
        self.last_activity_at = Utc::now();
        if self.images_loaded >= self.limits.max_images_per_session {
            self.status = SessionStatus::Completed;
        } else if self.requires_confirmation() {
            self.status = SessionStatus::AwaitingConfirmation;
        }
    }

    /// Record one provider page consumed and advance the page cursor.
    /// Pages are counted even when `record_loaded` just completed or
    /// paused the session, since the page was actually fetched.
    pub fn record_page(&mut self) {
        if matches!(self.status, SessionStatus::Aborted | SessionStatus::Failed) {
            return;
        }
        self.pages_loaded = (self.pages_loaded + 1).min(self.limits.max_pages_per_session);
        self.current_page += 1;
        self.last_activity_at = Utc::now();
        if self.status == SessionStatus::Active
            && self.pages_loaded >= self.limits.max_pages_per_session
        {
            self.status = SessionStatus::Completed;
        }
    }

    /// Resume from the confirmation gate.
    pub fn confirm(&mut self) -> AcquireResult<()> {
        if self.status != SessionStatus::AwaitingConfirmation {
            return Err(AcquireError::SessionNotFetchable {
                status: self.status,
            });
        }
        self.status = SessionStatus::Active;
        self.next_confirmation_at = self
            .next_confirmation_at
            .saturating_add(self.limits.confirmation_interval);
        self.last_activity_at = Utc::now();
        Ok(())
    }

    /// User-initiated abort; idempotent, allowed from any non-terminal
    /// state.
    pub fn stop(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Aborted;
            self.last_activity_at = Utc::now();
        }
    }

    /// Mark the session failed after an unrecoverable fetch error.
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Failed;
            self.last_activity_at = Utc::now();
        }
    }

    /// Mark the session completed (limits reached or results exhausted).
    pub fn complete(&mut self) {
        if !self.status.is_terminal() {
            self.status = SessionStatus::Completed;
            self.last_activity_at = Utc::now();
        }
    }

    pub fn progress_text(&self) -> String {
        format!(
            "{}/{} images",
            self.images_loaded, self.limits.max_images_per_session
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            query: self.query.clone(),
            status: self.status,
            images_loaded: self.images_loaded,
            pages_loaded: self.pages_loaded,
            current_page: self.current_page,
            should_warn: self.should_warn(),
            limits: self.limits.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> CollectionLimits {
        CollectionLimits {
            max_images_per_session: 10,
            max_pages_per_session: 5,
            warn_threshold: 6,
            batch_size: 5,
            confirmation_interval: 0,
            max_cache_bytes: 1024,
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let bad = CollectionLimits {
            batch_size: 0,
            ..limits()
        };
        assert!(matches!(
            SearchSession::new("cat", bad),
            Err(AcquireError::InvalidLimits(_))
        ));
    }

    #[test]
    fn rejects_warn_threshold_above_image_ceiling() {
        let bad = CollectionLimits {
            warn_threshold: 11,
            ..limits()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn completes_at_image_ceiling() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.record_loaded(5);
        assert_eq!(s.status(), SessionStatus::Active);
        assert!(s.can_load_more());
        s.record_loaded(5);
        assert_eq!(s.images_loaded(), 10);
        assert_eq!(s.status(), SessionStatus::Completed);
        assert!(!s.can_load_more());
    }

    #[test]
    fn image_count_never_exceeds_ceiling() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.record_loaded(25);
        assert_eq!(s.images_loaded(), 10);
    }

    #[test]
    fn completes_at_page_ceiling() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        for _ in 0..5 {
            s.record_loaded(1);
            s.record_page();
        }
        assert_eq!(s.pages_loaded(), 5);
        assert_eq!(s.status(), SessionStatus::Completed);
    }

    #[test]
    fn warns_at_threshold_while_active() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.record_loaded(5);
        assert!(!s.should_warn());
        s.record_loaded(1);
        assert!(s.should_warn());
    }

    #[test]
    fn confirmation_fires_on_exact_multiple() {
        let lim = CollectionLimits {
            max_images_per_session: 100,
            warn_threshold: 50,
            confirmation_interval: 20,
            ..limits()
        };
        let mut s = SearchSession::new("cat", lim).unwrap();
        s.record_loaded(20);
        assert_eq!(s.status(), SessionStatus::AwaitingConfirmation);
        s.confirm().unwrap();
        assert_eq!(s.status(), SessionStatus::Active);
        assert!(!s.requires_confirmation());
        s.record_loaded(20);
        assert_eq!(s.status(), SessionStatus::AwaitingConfirmation);
    }

    #[test]
    fn confirmation_fires_once_per_boundary_crossing() {
        let lim = CollectionLimits {
            max_images_per_session: 100,
            warn_threshold: 50,
            confirmation_interval: 20,
            ..limits()
        };
        let mut s = SearchSession::new("cat", lim).unwrap();
        // Overshoot the boundary; the gate still fires exactly once.
        s.record_loaded(27);
        assert_eq!(s.status(), SessionStatus::AwaitingConfirmation);
        s.confirm().unwrap();
        // Same count does not re-trigger.
        assert!(!s.requires_confirmation());
        s.record_loaded(10);
        assert_eq!(s.status(), SessionStatus::Active);
        s.record_loaded(10);
        assert_eq!(s.status(), SessionStatus::AwaitingConfirmation);
    }

    #[test]
    fn decline_at_gate_aborts() {
        let lim = CollectionLimits {
            max_images_per_session: 100,
            warn_threshold: 50,
            confirmation_interval: 5,
            ..limits()
        };
        let mut s = SearchSession::new("cat", lim).unwrap();
        s.record_loaded(5);
        assert_eq!(s.status(), SessionStatus::AwaitingConfirmation);
        s.stop();
        assert_eq!(s.status(), SessionStatus::Aborted);
    }

    #[test]
    fn confirm_outside_gate_is_rejected() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        assert!(matches!(
            s.confirm(),
            Err(AcquireError::SessionNotFetchable { .. })
        ));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.stop();
        assert_eq!(s.status(), SessionStatus::Aborted);
        s.stop();
        assert_eq!(s.status(), SessionStatus::Aborted);
    }

    #[test]
    fn stop_does_not_resurrect_completed_session() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.record_loaded(10);
        assert_eq!(s.status(), SessionStatus::Completed);
        s.stop();
        assert_eq!(s.status(), SessionStatus::Completed);
    }

    #[test]
    fn progress_text_reports_loaded_over_max() {
        let mut s = SearchSession::new("cat", limits()).unwrap();
        s.record_loaded(3);
        assert_eq!(s.progress_text(), "3/10 images");
    }
}
