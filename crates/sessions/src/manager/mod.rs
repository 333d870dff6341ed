//! Session managers.
//!
//! Both strategies share one state machine: seed a session at construction,
//! refresh it on every probe, and rotate it once it is idle or too old.  The
//! persistent strategy additionally mirrors the record to storage and
//! reconciles against what other contexts wrote; the volatile one keeps it in
//! memory only.

mod persistent;
mod volatile;

pub use persistent::PersistentSessionsManager;
pub use volatile::VolatileSessionsManager;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use lm_domain::config::SessionTrackingConfig;
use lm_domain::error::Result;
use lm_domain::meta::MetaSession;
use lm_domain::trace::TraceEvent;

use crate::clock::{Clock, SystemClock};
use crate::ids::{IdGenerator, ShortIdGenerator};
use crate::lifecycle::ExpirationPolicy;
use crate::publisher::{
    EventSink, MetaPublisher, NoopEventSink, SessionChangeHook, SessionEvent, SessionMetas,
};
use crate::record::SessionRecord;
use crate::sampling::{RandomSampler, Sampler};
use crate::storage::{MemoryStorage, StorageAdapter};

/// Attribute keys owned by the manager.  Host-supplied values for these are
/// lifted out of the free-form map.
const PREVIOUS_SESSION_ATTR: &str = "previousSession";
const IS_SAMPLED_ATTR: &str = "isSampled";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Collaborators
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything a session manager talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub storage: Arc<dyn StorageAdapter>,
    pub publisher: Arc<dyn MetaPublisher>,
    pub ids: Arc<dyn IdGenerator>,
    pub sampler: Arc<dyn Sampler>,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<dyn EventSink>,
    pub on_session_change: Option<SessionChangeHook>,
}

impl Default for SessionDeps {
    fn default() -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new()),
            publisher: Arc::new(SessionMetas::new()),
            ids: Arc::new(ShortIdGenerator),
            sampler: Arc::new(RandomSampler),
            clock: Arc::new(SystemClock),
            events: Arc::new(NoopEventSink),
            on_session_change: None,
        }
    }
}

impl SessionDeps {
    pub fn with_storage(mut self, storage: Arc<dyn StorageAdapter>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn MetaPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn Sampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn on_session_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&MetaSession>, &MetaSession) + Send + Sync + 'static,
    {
        self.on_session_change = Some(Arc::new(hook));
        self
    }
}

/// Replacement session supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOverride {
    pub id: String,
    pub attributes: BTreeMap<String, String>,
}

impl SessionOverride {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy selection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The configured session strategy.
pub enum SessionManager {
    Persistent(PersistentSessionsManager),
    Volatile(VolatileSessionsManager),
}

/// Handle shared between the activity tracker and host-facing entry points.
/// Calls are serialized by the lock; none may re-enter it.
pub type SharedSessionManager = Arc<Mutex<SessionManager>>;

impl SessionManager {
    /// Pick the strategy from `config.persistent` and seed the first session.
    pub fn from_config(config: &SessionTrackingConfig, deps: SessionDeps) -> Result<Self> {
        if config.persistent {
            PersistentSessionsManager::new(config, deps).map(Self::Persistent)
        } else {
            VolatileSessionsManager::new(config, deps).map(Self::Volatile)
        }
    }

    /// Liveness probe: refresh the active session or rotate it if expired.
    pub fn update_session(&mut self) {
        match self {
            Self::Persistent(m) => m.update_session(),
            Self::Volatile(m) => m.update_session(),
        }
    }

    /// Replace the active session with a host-chosen one.
    pub fn set_session(&mut self, session: SessionOverride) {
        match self {
            Self::Persistent(m) => m.set_session(session),
            Self::Volatile(m) => m.set_session(session),
        }
    }

    pub fn current_session(&self) -> &SessionRecord {
        match self {
            Self::Persistent(m) => m.current_session(),
            Self::Volatile(m) => m.current_session(),
        }
    }

    /// Notification that another context changed storage.  Volatile
    /// sessions are never shared, so they ignore it.
    pub fn on_storage_change(&mut self, key: &str, new_value: Option<&str>) {
        if let Self::Persistent(m) = self {
            m.on_storage_change(key, new_value);
        }
    }

    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }

    pub fn into_shared(self) -> SharedSessionManager {
        Arc::new(Mutex::new(self))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// State and collaborators common to both strategies.
struct SessionCore {
    deps: SessionDeps,
    policy: ExpirationPolicy,
    sampling_rate: f64,
    initial: Option<SessionOverride>,
    persistent: bool,
}

impl SessionCore {
    fn new(config: &SessionTrackingConfig, deps: SessionDeps) -> Result<Self> {
        config.ensure_valid()?;
        Ok(Self {
            deps,
            policy: ExpirationPolicy::from_config(config),
            sampling_rate: config.sampling_rate,
            initial: config.session.as_ref().map(|s| SessionOverride {
                id: s.id.clone(),
                attributes: s.attributes.clone(),
            }),
            persistent: config.persistent,
        })
    }

    fn now(&self) -> i64 {
        self.deps.clock.now_ms()
    }

    /// The first session when nothing can be resumed: the configured one if
    /// any, otherwise a generated id.  Sampling is drawn either way.
    fn mint_initial(&self, now: i64) -> Result<SessionRecord> {
        match &self.initial {
            Some(initial) => Ok(self.build(initial.clone(), None, now)),
            None => self.mint(now, None),
        }
    }

    /// A brand-new record with a generated id.
    fn mint(&self, now: i64, previous_session: Option<String>) -> Result<SessionRecord> {
        let id = self.deps.ids.gen_short_id()?;
        Ok(self.build(SessionOverride::new(id), previous_session, now))
    }

    /// Build a record for `session`, drawing its sampling decision.
    fn build(
        &self,
        session: SessionOverride,
        previous_session: Option<String>,
        now: i64,
    ) -> SessionRecord {
        let mut extra = session.attributes;
        extra.remove(IS_SAMPLED_ATTR);
        let previous_session = extra.remove(PREVIOUS_SESSION_ATTR).or(previous_session);
        let is_sampled = self.deps.sampler.is_sampled(self.sampling_rate);
        SessionRecord::new(session.id, now, is_sampled, previous_session, extra)
    }

    /// Publish a newly created record and fire the change hook.
    fn announce(
        &self,
        old_meta: Option<&MetaSession>,
        record: &SessionRecord,
        event: Option<SessionEvent>,
    ) {
        let meta = record.meta();
        TraceEvent::SessionStarted {
            session_id: record.session_id.clone(),
            is_sampled: record.is_sampled,
            previous_session: meta.attributes.previous_session.clone(),
            persistent: self.persistent,
        }
        .emit();

        self.deps.publisher.set_session_meta(meta.clone());
        if let Some(hook) = &self.deps.on_session_change {
            hook(old_meta, &meta);
        }
        if let Some(event) = event {
            self.deps.events.push_event(event);
        }
    }

    /// Publish an existing record without treating it as a new session.
    fn republish(&self, record: &SessionRecord) {
        self.deps.publisher.set_session_meta(record.meta());
    }

    /// Build the record replacing `current` for a host override.
    ///
    /// Returns `None` for a same-id override, which is applied in place.
    fn overridden(
        &self,
        current: &mut SessionRecord,
        session: SessionOverride,
        now: i64,
    ) -> Option<SessionRecord> {
        if session.id == current.session_id {
            let mut meta = current.meta();
            for (key, value) in session.attributes {
                if key != IS_SAMPLED_ATTR && key != PREVIOUS_SESSION_ATTR {
                    meta.attributes.extra.insert(key, value);
                }
            }
            current.session_meta = Some(meta);
            return None;
        }

        let next = self.build(session, Some(current.session_id.clone()), now);
        TraceEvent::SessionOverridden {
            old_session_id: Some(current.session_id.clone()),
            new_session_id: next.session_id.clone(),
            is_sampled: next.is_sampled,
        }
        .emit();
        Some(next)
    }

    fn current_meta(&self) -> Option<MetaSession> {
        self.deps.publisher.session_meta()
    }
}

fn extend_event(record: &SessionRecord, previous: &str) -> SessionEvent {
    SessionEvent::Extend {
        session_id: record.session_id.clone(),
        previous_session: previous.to_owned(),
    }
}
