use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A session with no activity for this long is rotated (15 minutes).
pub const SESSION_INACTIVITY_TIME: u64 = 15 * 60 * 1000;

/// Absolute session lifetime, regardless of activity (4 hours).
pub const SESSION_EXPIRATION_TIME: u64 = 4 * 60 * 60 * 1000;

/// Grace period past the absolute lifetime before a persisted entry is
/// considered unrecoverable and purged (1 minute).
pub const SESSION_PERSISTENCE_TIME_BUFFER: u64 = 60 * 1000;

/// Age past which a persisted entry is purged instead of rotated.
pub const MAX_SESSION_PERSISTENCE_TIME: u64 =
    SESSION_EXPIRATION_TIME + SESSION_PERSISTENCE_TIME_BUFFER;

/// Fixed storage key shared by every execution context of one origin.
pub const STORAGE_KEY: &str = "__lumen_session__";

/// Session tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTrackingConfig {
    /// When `false` no session manager is created and no meta is published.
    #[serde(default = "d_true")]
    pub enabled: bool,

    /// Persist the session record so it survives reloads and is shared by
    /// every context on the same storage scope.  `false` keeps it in memory.
    #[serde(default)]
    pub persistent: bool,

    /// Session to start with when no valid stored session exists.
    #[serde(default)]
    pub session: Option<InitialSession>,

    /// Probability (`0.0`–`1.0`) that a new session is sampled.
    #[serde(default = "d_sampling_rate")]
    pub sampling_rate: f64,

    #[serde(default = "d_inactivity_ms")]
    pub inactivity_ms: u64,

    #[serde(default = "d_expiration_ms")]
    pub expiration_ms: u64,

    /// Eviction grace added to `expiration_ms` for stored entries.
    #[serde(default = "d_persistence_buffer_ms")]
    pub persistence_buffer_ms: u64,

    #[serde(default = "d_storage_key")]
    pub storage_key: String,
}

impl Default for SessionTrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            persistent: false,
            session: None,
            sampling_rate: d_sampling_rate(),
            inactivity_ms: d_inactivity_ms(),
            expiration_ms: d_expiration_ms(),
            persistence_buffer_ms: d_persistence_buffer_ms(),
            storage_key: d_storage_key(),
        }
    }
}

/// Host-provided session identity, e.g. rendered by the server into the page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialSession {
    pub id: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_sampling_rate() -> f64 {
    1.0
}
fn d_inactivity_ms() -> u64 {
    SESSION_INACTIVITY_TIME
}
fn d_expiration_ms() -> u64 {
    SESSION_EXPIRATION_TIME
}
fn d_persistence_buffer_ms() -> u64 {
    SESSION_PERSISTENCE_TIME_BUFFER
}
fn d_storage_key() -> String {
    STORAGE_KEY.into()
}
