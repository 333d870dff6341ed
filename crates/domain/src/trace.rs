use serde::Serialize;

/// Structured trace events emitted across all Lumen crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionStarted {
        session_id: String,
        is_sampled: bool,
        previous_session: Option<String>,
        persistent: bool,
    },
    SessionResumed {
        session_id: String,
        started: i64,
        last_activity: i64,
    },
    SessionRotated {
        old_session_id: String,
        new_session_id: String,
        reason: String,
    },
    SessionOverridden {
        old_session_id: Option<String>,
        new_session_id: String,
        is_sampled: bool,
    },
    SessionAdopted {
        old_session_id: String,
        new_session_id: String,
    },
    SessionPurged {
        session_id: String,
        age_ms: i64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "lm_event");
    }
}
