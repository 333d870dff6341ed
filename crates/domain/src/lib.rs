//! Shared types for the Lumen session subsystem: configuration, the common
//! error type, structured trace events and the published session meta.

pub mod config;
pub mod error;
pub mod meta;
pub mod trace;
