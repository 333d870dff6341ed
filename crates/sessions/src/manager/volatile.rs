use lm_domain::config::SessionTrackingConfig;
use lm_domain::error::Result;
use lm_domain::trace::TraceEvent;

use super::{extend_event, SessionCore, SessionDeps, SessionOverride};
use crate::lifecycle::ExpiryReason;
use crate::publisher::SessionEvent;
use crate::record::SessionRecord;

/// Keeps the session in process memory only.  Nothing is shared with other
/// contexts and every reload starts a new session.
pub struct VolatileSessionsManager {
    core: SessionCore,
    current: SessionRecord,
}

impl VolatileSessionsManager {
    pub fn new(config: &SessionTrackingConfig, deps: SessionDeps) -> Result<Self> {
        let core = SessionCore::new(config, deps)?;
        let now = core.now();
        let current = core.mint_initial(now)?;
        core.announce(
            None,
            &current,
            Some(SessionEvent::Start {
                session_id: current.session_id.clone(),
            }),
        );
        Ok(Self { core, current })
    }

    pub fn update_session(&mut self) {
        let now = self.core.now();
        match self.core.policy.check(&self.current, now) {
            None => self.current.touch(now),
            Some(reason) => self.rotate(reason, now),
        }
    }

    pub fn set_session(&mut self, session: SessionOverride) {
        let now = self.core.now();
        let old_meta = self.core.current_meta();
        match self.core.overridden(&mut self.current, session, now) {
            None => self.core.republish(&self.current),
            Some(next) => {
                self.core.announce(old_meta.as_ref(), &next, None);
                self.current = next;
            }
        }
    }

    pub fn current_session(&self) -> &SessionRecord {
        &self.current
    }

    fn rotate(&mut self, reason: ExpiryReason, now: i64) {
        let previous = self.current.session_id.clone();
        let next = match self.core.mint(now, Some(previous.clone())) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(session_id = %previous, error = %e, "session rotation failed; keeping expired session");
                return;
            }
        };

        TraceEvent::SessionRotated {
            old_session_id: previous.clone(),
            new_session_id: next.session_id.clone(),
            reason: reason.to_string(),
        }
        .emit();

        let old_meta = self.current.session_meta.take();
        self.core
            .announce(old_meta.as_ref(), &next, Some(extend_event(&next, &previous)));
        self.current = next;
    }
}
