//! Engine configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows requested per physical cursor read.
    pub fetch_size: usize,

    /// Primary backlog length above which the join engine pauses the primary input.
    pub primary_high_watermark: usize,
    /// Primary backlog length below which a paused primary input is resumed.
    pub primary_low_watermark: usize,

    pub secondary_high_watermark: usize,
    pub secondary_low_watermark: usize,

    /// Fail the join when key columns have no common type (or fail to cast) instead of
    /// falling back to raw value comparison.
    pub strict_key_comparison: bool,

    /// Rows requested per `fetch` by output sinks.
    pub output_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_size: 1000,
            primary_high_watermark: 20,
            primary_low_watermark: 10,
            secondary_high_watermark: 100,
            secondary_low_watermark: 50,
            strict_key_comparison: false,
            output_batch_size: 100,
        }
    }
}

impl EngineConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `QUERYPIPE_FETCH_SIZE`: rows per cursor read
    /// - `QUERYPIPE_PRIMARY_HIGH_WATERMARK` / `QUERYPIPE_PRIMARY_LOW_WATERMARK`
    /// - `QUERYPIPE_SECONDARY_HIGH_WATERMARK` / `QUERYPIPE_SECONDARY_LOW_WATERMARK`
    /// - `QUERYPIPE_STRICT_KEY_COMPARISON`: `true` / `false`
    /// - `QUERYPIPE_OUTPUT_BATCH_SIZE`: rows per sink fetch
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("QUERYPIPE_FETCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.fetch_size = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_PRIMARY_HIGH_WATERMARK") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.primary_high_watermark = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_PRIMARY_LOW_WATERMARK") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.primary_low_watermark = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_SECONDARY_HIGH_WATERMARK") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.secondary_high_watermark = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_SECONDARY_LOW_WATERMARK") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.secondary_low_watermark = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_STRICT_KEY_COMPARISON") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.strict_key_comparison = v;
            }
        }

        if let Ok(s) = std::env::var("QUERYPIPE_OUTPUT_BATCH_SIZE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.output_batch_size = v;
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(Error::Config("fetch_size must be positive".into()));
        }
        if self.output_batch_size == 0 {
            return Err(Error::Config("output_batch_size must be positive".into()));
        }
        check_watermarks(
            "primary",
            self.primary_high_watermark,
            self.primary_low_watermark,
        )?;
        check_watermarks(
            "secondary",
            self.secondary_high_watermark,
            self.secondary_low_watermark,
        )
    }
}

fn check_watermarks(side: &str, high: usize, low: usize) -> Result<()> {
    if high == 0 {
        return Err(Error::Config(format!(
            "{} high watermark must be positive",
            side
        )));
    }
    if low == 0 {
        return Err(Error::Config(format!(
            "{} low watermark must be positive",
            side
        )));
    }
    if low > high {
        return Err(Error::Config(format!(
            "{} low watermark ({}) exceeds high watermark ({})",
            side, low, high
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.fetch_size, 1000);
        assert_eq!(cfg.primary_high_watermark, 20);
        assert_eq!(cfg.secondary_low_watermark, 50);
        cfg.validate().expect("defaults validate");
    }

    #[test]
    fn test_inverted_watermarks_rejected() {
        let cfg = EngineConfig {
            secondary_high_watermark: 4,
            secondary_low_watermark: 8,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let cfg: EngineConfig =
            serde_json::from_str(r#"{"fetch_size": 25}"#).expect("deserialize");
        assert_eq!(cfg.fetch_size, 25);
        assert_eq!(cfg.primary_low_watermark, 10);
    }
}
