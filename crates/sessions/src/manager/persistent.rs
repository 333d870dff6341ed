use lm_domain::config::SessionTrackingConfig;
use lm_domain::error::Result;
use lm_domain::trace::TraceEvent;

use super::{extend_event, SessionCore, SessionDeps, SessionOverride};
use crate::lifecycle::ExpiryReason;
use crate::publisher::SessionEvent;
use crate::record::SessionRecord;

/// Mirrors the session record to storage under a fixed key so it survives
/// reloads and is shared by every context on the same storage scope.
///
/// There is no cross-context lock.  Each probe reconciles against whatever
/// is stored at that moment and writes the complete record back; when two
/// contexts rotate in the same tick the last write wins.
///
/// When a write fails, storage still holds the record `current` was meant to
/// replace.  That exact record is remembered as stale and never adopted; every
/// later tick keeps `current` and retries the write.  Anything else found under
/// the key was written by another context after the failure and wins as usual.
pub struct PersistentSessionsManager {
    core: SessionCore,
    storage_key: String,
    current: SessionRecord,
    /// Record left in storage by our last failed write.  `None` once a write
    /// succeeds or another context overwrites it.
    stale: Option<SessionRecord>,
}

impl PersistentSessionsManager {
    pub fn new(config: &SessionTrackingConfig, deps: SessionDeps) -> Result<Self> {
        let core = SessionCore::new(config, deps)?;
        let now = core.now();
        let storage_key = config.storage_key.clone();

        let stored = read_record(&core, &storage_key);
        let (current, saved) = match stored {
            Some(stored) if core.policy.is_purgeable(&stored, now) => {
                TraceEvent::SessionPurged {
                    session_id: stored.session_id.clone(),
                    age_ms: now - stored.started,
                }
                .emit();
                if let Err(e) = core.deps.storage.remove(&storage_key) {
                    tracing::debug!(key = %storage_key, error = %e, "failed to purge stored session");
                }
                let fresh = core.mint_initial(now)?;
                let saved = write_record(&core, &storage_key, &fresh);
                core.announce(None, &fresh, Some(start_event(&fresh)));
                (fresh, saved)
            }
            Some(stored) => match core.policy.check(&stored, now) {
                Some(reason) => {
                    let previous = stored.session_id.clone();
                    let next = core.mint(now, Some(previous.clone()))?;
                    TraceEvent::SessionRotated {
                        old_session_id: previous.clone(),
                        new_session_id: next.session_id.clone(),
                        reason: reason.to_string(),
                    }
                    .emit();
                    let saved = write_record(&core, &storage_key, &next);
                    core.announce(
                        stored.session_meta.as_ref(),
                        &next,
                        Some(extend_event(&next, &previous)),
                    );
                    (next, saved)
                }
                None => {
                    let mut resumed = stored;
                    TraceEvent::SessionResumed {
                        session_id: resumed.session_id.clone(),
                        started: resumed.started,
                        last_activity: resumed.last_activity,
                    }
                    .emit();
                    let saved = if now > resumed.last_activity {
                        resumed.touch(now);
                        write_record(&core, &storage_key, &resumed)
                    } else {
                        true
                    };
                    core.republish(&resumed);
                    core.deps.events.push_event(SessionEvent::Resume {
                        session_id: resumed.session_id.clone(),
                    });
                    (resumed, saved)
                }
            },
            None => {
                let fresh = core.mint_initial(now)?;
                let saved = write_record(&core, &storage_key, &fresh);
                core.announce(None, &fresh, Some(start_event(&fresh)));
                (fresh, saved)
            }
        };

        let stale = if saved {
            None
        } else {
            leftover(&core, &storage_key, &current)
        };

        Ok(Self {
            core,
            storage_key,
            current,
            stale,
        })
    }

    pub fn update_session(&mut self) {
        let now = self.core.now();
        let base = self.reconcile();
        match self.core.policy.check(&base, now) {
            Some(reason) => self.rotate(base, reason, now),
            None => {
                let mut refreshed = base;
                refreshed.touch(now);
                self.write(&refreshed);
                self.current = refreshed;
            }
        }
    }

    pub fn set_session(&mut self, session: SessionOverride) {
        let now = self.core.now();
        let mut base = self.reconcile();
        let old_meta = self.core.current_meta();
        match self.core.overridden(&mut base, session, now) {
            None => {
                self.write(&base);
                self.core.republish(&base);
                self.current = base;
            }
            Some(next) => {
                self.write(&next);
                self.core.announce(old_meta.as_ref(), &next, None);
                self.current = next;
            }
        }
    }

    pub fn current_session(&self) -> &SessionRecord {
        &self.current
    }

    /// Handle a storage change made by another context.  A different
    /// session under our key is adopted right away instead of waiting for
    /// the next probe.
    pub fn on_storage_change(&mut self, key: &str, new_value: Option<&str>) {
        if key != self.storage_key {
            return;
        }
        let Some(raw) = new_value else {
            return;
        };
        match SessionRecord::from_json(raw) {
            Ok(record) if record.session_id != self.current.session_id => self.adopt(record),
            Ok(record) => self.current.touch(record.last_activity),
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "ignoring malformed session written by another context");
            }
        }
    }

    /// Pick the record this tick works on.  Storage wins when it holds a
    /// readable record written by someone else since our last failed write;
    /// otherwise the in-memory record carries on.
    fn reconcile(&mut self) -> SessionRecord {
        match read_record(&self.core, &self.storage_key) {
            Some(mut stored) if stored.session_id == self.current.session_id => {
                stored.touch(self.current.last_activity);
                stored
            }
            Some(stored) if self.stale.as_ref() == Some(&stored) => {
                tracing::debug!(
                    stored_session_id = %stored.session_id,
                    session_id = %self.current.session_id,
                    "stored session predates a failed write; keeping in-memory session"
                );
                self.current.clone()
            }
            Some(stored) => {
                self.adopt(stored);
                self.current.clone()
            }
            None => self.current.clone(),
        }
    }

    fn adopt(&mut self, record: SessionRecord) {
        TraceEvent::SessionAdopted {
            old_session_id: self.current.session_id.clone(),
            new_session_id: record.session_id.clone(),
        }
        .emit();
        self.core.republish(&record);
        self.current = record;
        self.stale = None;
    }

    fn rotate(&mut self, base: SessionRecord, reason: ExpiryReason, now: i64) {
        let previous = base.session_id.clone();
        let next = match self.core.mint(now, Some(previous.clone())) {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(session_id = %previous, error = %e, "session rotation failed; keeping expired session");
                self.current = base;
                return;
            }
        };

        TraceEvent::SessionRotated {
            old_session_id: previous.clone(),
            new_session_id: next.session_id.clone(),
            reason: reason.to_string(),
        }
        .emit();

        self.write(&next);
        self.core.announce(
            base.session_meta.as_ref(),
            &next,
            Some(extend_event(&next, &previous)),
        );
        self.current = next;
    }

    fn write(&mut self, record: &SessionRecord) {
        self.stale = if write_record(&self.core, &self.storage_key, record) {
            None
        } else {
            leftover(&self.core, &self.storage_key, record)
        };
    }
}

fn start_event(record: &SessionRecord) -> SessionEvent {
    SessionEvent::Start {
        session_id: record.session_id.clone(),
    }
}

/// Read the stored record.  Missing, unreadable and malformed entries all
/// read as `None`.
fn read_record(core: &SessionCore, key: &str) -> Option<SessionRecord> {
    let raw = match core.deps.storage.get(key) {
        Ok(raw) => raw?,
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "session storage unreadable; using in-memory session");
            return None;
        }
    };
    match SessionRecord::from_json(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::debug!(key = %key, error = %e, "discarding malformed stored session");
            None
        }
    }
}

/// Write the complete record.  Returns `false` when the write failed and the
/// in-memory record is the only copy.
fn write_record(core: &SessionCore, key: &str, record: &SessionRecord) -> bool {
    let result = record
        .to_json()
        .and_then(|json| core.deps.storage.set(key, json));
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(
                key = %key,
                session_id = %record.session_id,
                error = %e,
                "session storage write failed; continuing in memory"
            );
            false
        }
    }
}

/// What a failed write of `record` left in storage, when it belongs to
/// another session.
fn leftover(core: &SessionCore, key: &str, record: &SessionRecord) -> Option<SessionRecord> {
    read_record(core, key).filter(|stored| stored.session_id != record.session_id)
}
