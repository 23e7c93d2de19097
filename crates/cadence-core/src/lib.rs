//! # cadence-core
//!
//! Core media types, configuration, and error handling for the Cadence player.

pub mod config;
pub mod error;
pub mod types;

pub use config::{validate_speed, PlayerConfig};
pub use error::{DecodeError, Error, Result};
pub use types::*;
