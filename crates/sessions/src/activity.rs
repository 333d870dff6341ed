//! Activity tracking: turns interaction signals into session probes.
//!
//! The tracker makes no session decisions.  It filters the configured
//! signals and forwards at most one probe per throttle window, which keeps
//! storage writes bounded under bursts of input.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lm_domain::config::{ActivityConfig, ActivitySignal};

use crate::clock::Clock;
use crate::manager::SharedSessionManager;

/// Forwards activity signals to the session manager at a bounded rate.
pub struct ActivityTracker {
    manager: SharedSessionManager,
    clock: Arc<dyn Clock>,
    throttle_ms: u64,
    signals: HashSet<ActivitySignal>,
    /// Epoch ms of the last forwarded probe.
    last_probe: Mutex<Option<i64>>,
}

impl ActivityTracker {
    pub fn new(manager: SharedSessionManager, clock: Arc<dyn Clock>, config: &ActivityConfig) -> Self {
        Self {
            manager,
            clock,
            throttle_ms: config.throttle_ms,
            signals: config.signals.iter().copied().collect(),
            last_probe: Mutex::new(None),
        }
    }

    /// Handle one signal.  Returns `true` if it resulted in a session probe.
    ///
    /// Leading-edge throttle: the first signal of a window reaches the manager
    /// and the rest are dropped, including a burst's trailing signal.  The recorded
    /// `last_activity` can therefore trail real activity by up to one
    /// `throttle_ms` window.
    pub fn on_signal(&self, signal: ActivitySignal) -> bool {
        if !self.signals.contains(&signal) {
            return false;
        }

        let now = self.clock.now_ms();
        {
            let mut last = self.last_probe.lock();
            if let Some(prev) = *last {
                // A clock that went backwards reopens the window.
                if now >= prev && ((now - prev) as u64) < self.throttle_ms {
                    return false;
                }
            }
            *last = Some(now);
        }

        self.manager.lock().update_session();
        true
    }

    /// Consume signals until every sender is dropped.
    pub async fn run(&self, mut rx: mpsc::Receiver<ActivitySignal>) {
        let mut forwarded = 0usize;
        while let Some(signal) = rx.recv().await {
            if self.on_signal(signal) {
                forwarded += 1;
            }
        }
        tracing::debug!(forwarded, "activity channel closed");
    }

    /// Spawn [`run`](Self::run) on the current tokio runtime.
    pub fn spawn(self: Arc<Self>, rx: mpsc::Receiver<ActivitySignal>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(rx).await })
    }
}
