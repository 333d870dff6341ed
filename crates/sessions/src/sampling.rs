//! Per-session sampling decision.
//!
//! The draw is only authoritative when a session record is created; the
//! outcome is stored on the record and never recomputed for that id.

/// Decides whether a new session is sampled.
pub trait Sampler: Send + Sync {
    fn is_sampled(&self, rate: f64) -> bool;
}

/// Draws uniformly from `[0, 1)` and samples when the draw is below `rate`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn is_sampled(&self, rate: f64) -> bool {
        if rate >= 1.0 {
            return true;
        }
        if rate.is_nan() || rate <= 0.0 {
            return false;
        }
        rand::random::<f64>() < rate
    }
}

/// Always returns the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub bool);

impl Sampler for FixedSampler {
    fn is_sampled(&self, _rate: f64) -> bool {
        self.0
    }
}
