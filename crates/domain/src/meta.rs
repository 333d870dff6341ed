//! Session meta published for attachment to outgoing telemetry events.
//!
//! The attribute values travel as strings on the wire, so the sampling flag
//! is encoded as `"true"` / `"false"` rather than a JSON boolean.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The session identity attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaSession {
    pub id: String,
    #[serde(default)]
    pub attributes: SessionAttributes,
}

impl MetaSession {
    pub fn new(id: impl Into<String>, attributes: SessionAttributes) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }
}

/// Attributes carried alongside the session id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionAttributes {
    /// Id of the session this one replaced, if any.
    #[serde(
        rename = "previousSession",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_session: Option<String>,

    #[serde(
        rename = "isSampled",
        default,
        skip_serializing_if = "Option::is_none",
        with = "sampled_flag"
    )]
    pub is_sampled: Option<bool>,

    /// Free-form attributes supplied by the host (overrides, config).
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

mod sampled_flag {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(true) => s.serialize_str("true"),
            Some(false) => s.serialize_str("false"),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref() {
            None => Ok(None),
            Some("true") => Ok(Some(true)),
            Some("false") => Ok(Some(false)),
            Some(other) => Err(de::Error::invalid_value(
                de::Unexpected::Str(other),
                &"\"true\" or \"false\"",
            )),
        }
    }
}
