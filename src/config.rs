//! Sampling configuration.
//!
//! Defaults can be overridden through environment variables; command-line
//! flags take precedence over both.

use thiserror::Error;

use crate::grammar::{SamplingLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_EXPANSIONS};
use crate::sampler::SeededSampler;

pub const ENV_MAX_DEPTH: &str = "GRAMMAR_FORGE_MAX_DEPTH";
pub const ENV_MAX_EXPANSIONS: &str = "GRAMMAR_FORGE_MAX_EXPANSIONS";
pub const ENV_SEED: &str = "GRAMMAR_FORGE_SEED";
pub const ENV_RECORD: &str = "GRAMMAR_FORGE_RECORD";

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Settings shared by every sampling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Depth past which only the shallowest alternatives are taken.
    pub max_depth: usize,
    /// Upper bound on symbol expansions per derivation.
    pub max_expansions: usize,
    /// Root seed. `None` draws one from entropy.
    pub seed: Option<u64>,
    /// Record every draw so derivations can be replayed.
    pub record_choices: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_expansions: DEFAULT_MAX_EXPANSIONS,
            seed: None,
            record_choices: false,
        }
    }
}

impl SamplingConfig {
    /// Loads configuration from environment variables.
    ///
    /// - `GRAMMAR_FORGE_MAX_DEPTH`: depth budget (default: 8)
    /// - `GRAMMAR_FORGE_MAX_EXPANSIONS`: expansion cap (default: 10000)
    /// - `GRAMMAR_FORGE_SEED`: root seed (default: random)
    /// - `GRAMMAR_FORGE_RECORD`: record choice logs (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup(ENV_MAX_DEPTH) {
            config.max_depth = parse_env_value(&val, ENV_MAX_DEPTH)?;
        }

        if let Some(val) = lookup(ENV_MAX_EXPANSIONS) {
            config.max_expansions = parse_env_value(&val, ENV_MAX_EXPANSIONS)?;
        }

        if let Some(val) = lookup(ENV_SEED) {
            config.seed = Some(parse_env_value(&val, ENV_SEED)?);
        }

        if let Some(val) = lookup(ENV_RECORD) {
            config.record_choices = parse_env_bool(&val, ENV_RECORD)?;
        }

        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_expansions == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_expansions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_max_expansions(mut self, max_expansions: usize) -> Self {
        self.max_expansions = max_expansions;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_recording(mut self, record: bool) -> Self {
        self.record_choices = record;
        self
    }

    /// Limits handed to the grammar builder.
    pub fn limits(&self) -> SamplingLimits {
        SamplingLimits {
            max_depth: self.max_depth,
            max_expansions: self.max_expansions,
        }
    }

    /// Creates the root sampler for a run.
    pub fn sampler(&self) -> SeededSampler {
        let sampler = SeededSampler::from_seed_option(self.seed);
        if self.record_choices {
            sampler.recording()
        } else {
            sampler
        }
    }
}

fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
