use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Activity tracking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Controls which interaction signals keep a session alive and how often
/// they may probe the session manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityConfig {
    /// Minimum spacing between two session probes, in milliseconds.
    #[serde(default = "d_throttle_ms")]
    pub throttle_ms: u64,

    /// Signals the tracker reacts to.  Others are ignored.
    #[serde(default = "d_signals")]
    pub signals: Vec<ActivitySignal>,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            throttle_ms: d_throttle_ms(),
            signals: d_signals(),
        }
    }
}

/// A user-interaction signal indicating the visit is still going on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySignal {
    Pointer,
    Keyboard,
    RouteChange,
    /// The page became visible again after being hidden.
    VisibilityRegained,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 4] = [
        ActivitySignal::Pointer,
        ActivitySignal::Keyboard,
        ActivitySignal::RouteChange,
        ActivitySignal::VisibilityRegained,
    ];
}

fn d_throttle_ms() -> u64 {
    1000
}

fn d_signals() -> Vec<ActivitySignal> {
    ActivitySignal::ALL.to_vec()
}
