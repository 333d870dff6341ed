//! Session lifecycle and identity for the Lumen browser telemetry SDK.
//!
//! Every telemetry event carries the active session's meta.  This crate
//! decides which session is active: it seeds one at startup (resuming a
//! stored one when possible), rotates it after inactivity or once its
//! absolute lifetime is up, applies host overrides, and keeps contexts that
//! share storage converging on the same record.

pub mod activity;
pub mod clock;
pub mod ids;
pub mod lifecycle;
pub mod manager;
pub mod publisher;
pub mod record;
pub mod sampling;
pub mod storage;
pub mod tracking;

pub use activity::ActivityTracker;
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{IdGenerator, ShortIdGenerator};
pub use lifecycle::{ExpirationPolicy, ExpiryReason};
pub use manager::{
    PersistentSessionsManager, SessionDeps, SessionManager, SessionOverride,
    SharedSessionManager, VolatileSessionsManager,
};
pub use publisher::{
    EventSink, MetaPublisher, NoopEventSink, SessionChangeHook, SessionEvent, SessionMetas,
};
pub use record::SessionRecord;
pub use sampling::{FixedSampler, RandomSampler, Sampler};
pub use storage::{FileStorage, MemoryStorage, StorageAdapter};
pub use tracking::SessionTracking;

pub use lm_domain::config::{
    MAX_SESSION_PERSISTENCE_TIME, SESSION_EXPIRATION_TIME, SESSION_INACTIVITY_TIME,
    SESSION_PERSISTENCE_TIME_BUFFER, STORAGE_KEY,
};
