//! Host-facing entry point: builds the configured session manager and the
//! activity tracker that drives it.

use std::sync::Arc;

use lm_domain::config::{ActivitySignal, Config};
use lm_domain::error::Result;
use lm_domain::meta::MetaSession;

use crate::activity::ActivityTracker;
use crate::manager::{SessionDeps, SessionManager, SessionOverride, SharedSessionManager};
use crate::record::SessionRecord;

/// Session tracking for one execution context.
pub struct SessionTracking {
    manager: SharedSessionManager,
    tracker: Arc<ActivityTracker>,
}

impl SessionTracking {
    /// Seed the session and wire the tracker.  Returns `Ok(None)` when
    /// tracking is disabled; errors only when no session can be created.
    pub fn init(config: &Config, deps: SessionDeps) -> Result<Option<Self>> {
        if !config.session_tracking.enabled {
            tracing::info!("session tracking disabled");
            return Ok(None);
        }

        let clock = deps.clock.clone();
        let manager = SessionManager::from_config(&config.session_tracking, deps)?;
        tracing::info!(
            persistent = manager.is_persistent(),
            session_id = %manager.current_session().session_id,
            "session tracking initialized"
        );

        let manager = manager.into_shared();
        let tracker = Arc::new(ActivityTracker::new(
            manager.clone(),
            clock,
            &config.activity,
        ));
        Ok(Some(Self { manager, tracker }))
    }

    pub fn update_session(&self) {
        self.manager.lock().update_session();
    }

    /// Replace the active session with one chosen by the host.
    pub fn set_session(&self, session: SessionOverride) {
        self.manager.lock().set_session(session);
    }

    pub fn current_session(&self) -> SessionRecord {
        self.manager.lock().current_session().clone()
    }

    pub fn current_meta(&self) -> MetaSession {
        self.manager.lock().current_session().meta()
    }

    pub fn on_activity(&self, signal: ActivitySignal) -> bool {
        self.tracker.on_signal(signal)
    }

    pub fn on_storage_change(&self, key: &str, new_value: Option<&str>) {
        self.manager.lock().on_storage_change(key, new_value);
    }
}
