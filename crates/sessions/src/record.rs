//! The session record: what is held in memory and what is persisted under
//! the storage key.
//!
//! A record is replaced, never re-identified: rotation builds a fresh record
//! and keeps the old id only as `previousSession` in the new meta.  Writes
//! always serialize the whole record so a concurrent reader never sees a
//! half-updated entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lm_domain::error::{Error, Result};
use lm_domain::meta::{MetaSession, SessionAttributes};

/// A single session tracked by a session manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    /// Epoch ms of the last observed activity.
    pub last_activity: i64,
    /// Epoch ms at which the session was created.
    pub started: i64,
    pub is_sampled: bool,
    /// Snapshot of the meta published when the record was created.  Records
    /// written by older SDKs may not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_meta: Option<MetaSession>,
}

impl SessionRecord {
    /// Build a fresh record starting at `now`, with its meta snapshot.
    pub fn new(
        session_id: String,
        now: i64,
        is_sampled: bool,
        previous_session: Option<String>,
        extra: BTreeMap<String, String>,
    ) -> Self {
        let meta = MetaSession::new(
            session_id.clone(),
            SessionAttributes {
                previous_session,
                is_sampled: Some(is_sampled),
                extra,
            },
        );
        Self {
            session_id,
            last_activity: now,
            started: now,
            is_sampled,
            session_meta: Some(meta),
        }
    }

    /// The meta to publish for this record.
    ///
    /// The stored snapshot is reused when present, but the id and sampling
    /// flag always come from the record itself.
    pub fn meta(&self) -> MetaSession {
        let mut attributes = self
            .session_meta
            .as_ref()
            .map(|m| m.attributes.clone())
            .unwrap_or_default();
        attributes.is_sampled = Some(self.is_sampled);
        MetaSession::new(self.session_id.clone(), attributes)
    }

    /// Record activity at `now`.  Timestamps never move backwards, so a tab
    /// with a lagging clock cannot undo another tab's refresh.
    pub fn touch(&mut self, now: i64) {
        self.last_activity = self.last_activity.max(now);
    }

    /// Serialize the complete record for storage.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored record, rejecting entries that violate record
    /// invariants.
    pub fn from_json(raw: &str) -> Result<Self> {
        let record: Self = serde_json::from_str(raw)?;
        if record.session_id.is_empty() {
            return Err(Error::Other("stored session has an empty id".into()));
        }
        if record.last_activity < record.started {
            return Err(Error::Other(format!(
                "stored session {} has lastActivity {} before started {}",
                record.session_id, record.last_activity, record.started
            )));
        }
        Ok(record)
    }
}
