//! Player configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV: &str = "CADENCE_CONFIG";

/// Slowest and fastest accepted playback speed.
pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 100.0;

/// Tunables for the playback engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Initial playback speed factor.
    pub speed: f64,
    /// Period of the audio worker cycle in milliseconds.
    pub audio_period_ms: u64,
    /// Period of the dispatch/video cycle in milliseconds.
    pub dispatch_period_ms: u64,
    /// Constant lead added to the projected audio clock.
    pub clock_lead_ms: i64,
    /// Most packets the audio worker decodes in a single cycle when starved.
    pub decode_burst: usize,
    /// Buffered filtered audio below which the worker decodes in bursts.
    pub low_watermark_ms: i64,
    /// Buffered filtered audio at which the worker stops decoding.
    pub high_watermark_ms: i64,
    /// Capacity of the software sink, in milliseconds of audio.
    pub virtual_sink_capacity_ms: u64,
    /// Audio kept queued in the output sink ahead of what is audible. The
    /// clock projection counts this backlog, so it bounds the clock's lead.
    pub sink_target_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.0,
            audio_period_ms: 10,
            dispatch_period_ms: 6,
            clock_lead_ms: 15,
            decode_burst: 4,
            low_watermark_ms: 120,
            high_watermark_ms: 400,
            virtual_sink_capacity_ms: 500,
            sink_target_ms: 40,
        }
    }
}

impl PlayerConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "cadence").map(|d| d.config_dir().join("config.json"))
    }

    /// Load from `$CADENCE_CONFIG`, else the default path, else defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path);

        match path {
            Some(path) if path.exists() => Self::from_file(&path),
            Some(path) => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json(&raw)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a JSON document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_speed(self.speed).map_err(|e| Error::Config(e.to_string()))?;
        if self.audio_period_ms == 0 || self.dispatch_period_ms == 0 {
            return Err(Error::Config("worker periods must be non-zero".to_string()));
        }
        if self.decode_burst == 0 {
            return Err(Error::Config("decode_burst must be at least 1".to_string()));
        }
        if self.high_watermark_ms <= self.low_watermark_ms {
            return Err(Error::Config(
                "high_watermark_ms must exceed low_watermark_ms".to_string(),
            ));
        }
        if self.virtual_sink_capacity_ms == 0 {
            return Err(Error::Config(
                "virtual_sink_capacity_ms must be non-zero".to_string(),
            ));
        }
        if self.sink_target_ms == 0 {
            return Err(Error::Config("sink_target_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Check a speed factor against the supported tempo range.
pub fn validate_speed(factor: f64) -> Result<()> {
    if factor.is_finite() && (MIN_SPEED..=MAX_SPEED).contains(&factor) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "speed {factor} outside {MIN_SPEED}..={MAX_SPEED}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.audio_period_ms, 10);
        assert_eq!(config.clock_lead_ms, 15);
        assert_eq!(config.sink_target_ms, 40);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = PlayerConfig::from_json(r#"{ "speed": 1.5 }"#).unwrap();
        assert!((config.speed - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.dispatch_period_ms, 6);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            PlayerConfig::from_json(r#"{ "speed": 0.1 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PlayerConfig::from_json(r#"{ "audio_period_ms": 0 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PlayerConfig::from_json(r#"{ "low_watermark_ms": 500, "high_watermark_ms": 400 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PlayerConfig::from_json(r#"{ "sink_target_ms": 0 }"#),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            PlayerConfig::from_json("not json"),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_validate_speed() {
        assert!(validate_speed(0.5).is_ok());
        assert!(validate_speed(2.0).is_ok());
        assert!(validate_speed(100.0).is_ok());
        assert!(validate_speed(0.49).is_err());
        assert!(validate_speed(f64::NAN).is_err());
        assert!(validate_speed(f64::INFINITY).is_err());
    }
}
