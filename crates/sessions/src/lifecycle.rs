//! Session expiration: inactivity plus absolute lifetime.
//!
//! Expiry is evaluated on every probe by comparing wall-clock timestamps;
//! there are no timers.  If the session is stale (idle too long or alive too
//! long) the manager mints a new session and links the old id as
//! `previousSession`.

use lm_domain::config::SessionTrackingConfig;

use crate::record::SessionRecord;

/// Reason a session was rotated, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    Inactivity { idle_ms: u64 },
    Lifetime { age_ms: u64 },
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactivity { idle_ms } => write!(f, "inactivity ({idle_ms}ms idle)"),
            Self::Lifetime { age_ms } => write!(f, "lifetime ({age_ms}ms old)"),
        }
    }
}

/// Evaluates whether a session record is still valid.
#[derive(Debug, Clone, Copy)]
pub struct ExpirationPolicy {
    inactivity_ms: u64,
    expiration_ms: u64,
    persistence_buffer_ms: u64,
}

impl ExpirationPolicy {
    pub fn new(inactivity_ms: u64, expiration_ms: u64, persistence_buffer_ms: u64) -> Self {
        Self {
            inactivity_ms,
            expiration_ms,
            persistence_buffer_ms,
        }
    }

    pub fn from_config(config: &SessionTrackingConfig) -> Self {
        Self::new(
            config.inactivity_ms,
            config.expiration_ms,
            config.persistence_buffer_ms,
        )
    }

    /// Returns `Some(reason)` if the record must be replaced at `now`.
    ///
    /// The absolute lifetime is checked first so a session that is both
    /// idle and too old reports the lifetime.
    pub fn check(&self, record: &SessionRecord, now: i64) -> Option<ExpiryReason> {
        let age = elapsed(record.started, now);
        if age >= self.expiration_ms {
            return Some(ExpiryReason::Lifetime { age_ms: age });
        }

        let idle = elapsed(record.last_activity, now);
        if idle >= self.inactivity_ms {
            return Some(ExpiryReason::Inactivity { idle_ms: idle });
        }

        None
    }

    /// A persisted entry older than the lifetime plus the eviction buffer is
    /// unrecoverable: it is purged rather than rotated, so the next session
    /// carries no link to it.
    pub fn is_purgeable(&self, record: &SessionRecord, now: i64) -> bool {
        let limit = self.expiration_ms.saturating_add(self.persistence_buffer_ms);
        elapsed(record.started, now) >= limit
    }
}

impl Default for ExpirationPolicy {
    fn default() -> Self {
        Self::from_config(&SessionTrackingConfig::default())
    }
}

/// Milliseconds from `since` to `now`, clamped at zero for clocks that run
/// behind the writer's.
fn elapsed(since: i64, now: i64) -> u64 {
    u64::try_from(now.saturating_sub(since)).unwrap_or(0)
}
