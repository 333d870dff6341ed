//! Outbound collaborators: the meta publisher that attaches the active
//! session to events, and the sink receiving session lifecycle events.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use lm_domain::meta::MetaSession;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Meta publisher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives the active session's meta.  Whatever it holds is attached to
/// every subsequent telemetry event.
pub trait MetaPublisher: Send + Sync {
    fn set_session_meta(&self, meta: MetaSession);
    fn session_meta(&self) -> Option<MetaSession>;
}

type MetaListener = Box<dyn Fn(&MetaSession) + Send + Sync>;

/// Default publisher: holds the current meta and notifies listeners.
#[derive(Default)]
pub struct SessionMetas {
    current: RwLock<Option<MetaSession>>,
    listeners: RwLock<Vec<MetaListener>>,
}

impl SessionMetas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback fired after every `set_session_meta`.
    pub fn add_listener<F>(&self, listener: F)
    where
        F: Fn(&MetaSession) + Send + Sync + 'static,
    {
        self.listeners.write().push(Box::new(listener));
    }
}

impl MetaPublisher for SessionMetas {
    fn set_session_meta(&self, meta: MetaSession) {
        *self.current.write() = Some(meta.clone());
        for listener in self.listeners.read().iter() {
            listener(&meta);
        }
    }

    fn session_meta(&self) -> Option<MetaSession> {
        self.current.read().clone()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session lifecycle milestones pushed as telemetry events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A session was created with no predecessor.
    Start { session_id: String },
    /// A persisted session was picked up again after a reload.
    Resume { session_id: String },
    /// An expired session was replaced by a new one.
    Extend {
        session_id: String,
        previous_session: String,
    },
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "session_start",
            Self::Resume { .. } => "session_resume",
            Self::Extend { .. } => "session_extend",
        }
    }

    pub fn attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        match self {
            Self::Start { session_id } | Self::Resume { session_id } => {
                attrs.insert("sessionId".into(), session_id.clone());
            }
            Self::Extend {
                session_id,
                previous_session,
            } => {
                attrs.insert("sessionId".into(), session_id.clone());
                attrs.insert("previousSession".into(), previous_session.clone());
            }
        }
        attrs
    }
}

/// Accepts session lifecycle events, typically forwarding them into the
/// event pipeline.
pub trait EventSink: Send + Sync {
    fn push_event(&self, event: SessionEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn push_event(&self, _event: SessionEvent) {}
}

/// Invoked synchronously on every rotation with the replaced meta (if any)
/// and the new one.  Must not call back into the session manager.
pub type SessionChangeHook = Arc<dyn Fn(Option<&MetaSession>, &MetaSession) + Send + Sync>;
