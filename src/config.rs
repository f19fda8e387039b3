// 7.0 config.rs: resolved network parameters plus engine tuning, loadable from TOML.
// markets carry their own MarketConfig; this is everything that is venue-wide.

use crate::engine::EngineConfig;
use crate::types::MAX_DURATION_SECS;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Network parameters as governance resolved them. The core only reads these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParams {
    /// Smallest liquidity commitment accepted, in settlement asset units.
    #[serde(default = "default_minimum_commitment")]
    pub minimum_lp_commitment: u64,
    /// How often the liquidity fee pool is paid out to LPs.
    #[serde(default = "default_fee_distribution")]
    pub liquidity_fee_distribution_secs: i64,
}

fn default_minimum_commitment() -> u64 {
    1
}

fn default_fee_distribution() -> i64 {
    60
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            minimum_lp_commitment: default_minimum_commitment(),
            liquidity_fee_distribution_secs: default_fee_distribution(),
        }
    }
}

/// Top-level config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub network: NetworkParams,
}

impl VenueConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: VenueConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_closeout_rounds == 0 {
            return Err(ConfigError::Invalid("max_closeout_rounds must be positive"));
        }
        if !(1..=MAX_DURATION_SECS).contains(&self.network.liquidity_fee_distribution_secs) {
            return Err(ConfigError::Invalid("liquidity_fee_distribution_secs out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = VenueConfig::from_toml_str("").unwrap();
        assert_eq!(config, VenueConfig::default());
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = VenueConfig::from_toml_str(
            r#"
            [engine]
            max_closeout_rounds = 4

            [network]
            minimum_lp_commitment = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.max_closeout_rounds, 4);
        assert_eq!(config.network.minimum_lp_commitment, 500);
        assert_eq!(config.network.liquidity_fee_distribution_secs, 60);
    }

    #[test]
    fn zero_rounds_is_rejected() {
        let err = VenueConfig::from_toml_str("[engine]\nmax_closeout_rounds = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
