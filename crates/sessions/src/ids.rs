//! Session id generation.

use lm_domain::error::{Error, Result};

/// Length of generated session ids.
pub const SHORT_ID_LEN: usize = 10;

/// Mints opaque, short, unique session ids.
pub trait IdGenerator: Send + Sync {
    fn gen_short_id(&self) -> Result<String>;
}

/// Takes the leading characters of a random v4 UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShortIdGenerator;

impl IdGenerator for ShortIdGenerator {
    fn gen_short_id(&self) -> Result<String> {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        raw.get(..SHORT_ID_LEN)
            .map(str::to_owned)
            .ok_or_else(|| Error::IdGeneration(format!("uuid too short: {raw}")))
    }
}
