//! Seeded sampling of grammar choices.
//!
//! This module implements the random source that drives grammar derivation.
//! Every primitive decision goes through the [`Sampler`] trait, tagged with a
//! handle naming the symbol being sampled. [`SeededSampler`] uses ChaCha8 RNG so
//! that the same seed and the same call sequence always produce the same
//! choices; [`ReplaySampler`] replays a recorded [`ChoiceLog`].

pub mod replay;

pub use replay::{ChoiceLog, ChoiceRecord, ChoiceValue, ReplaySampler};

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::SamplingError;
use crate::registry::Distribution;

/// Result type alias for sampling operations.
pub type Result<T> = std::result::Result<T, SamplingError>;

/// Source of the primitive decisions made while deriving a configuration.
///
/// `handle` names the grammar symbol a decision belongs to. Implementations
/// may use it for logging or replay; [`SeededSampler`] ignores it when drawing.
pub trait Sampler {
    /// Uniform index in `0..len`.
    fn choice(&mut self, handle: &str, len: usize) -> Result<usize>;

    /// Index drawn proportionally to `weights`.
    fn weighted_choice(&mut self, handle: &str, weights: &[f64]) -> Result<usize>;

    /// Fair coin.
    fn boolean(&mut self, handle: &str) -> Result<bool>;

    /// Integer in `min..=max`.
    fn discrete(
        &mut self,
        handle: &str,
        min: i64,
        max: i64,
        distribution: Distribution,
    ) -> Result<i64>;

    /// Float in `min..=max`.
    fn continuous(
        &mut self,
        handle: &str,
        min: f64,
        max: f64,
        distribution: Distribution,
    ) -> Result<f64>;

    /// Ascending indices of a subset of `0..len`.
    fn subset(&mut self, handle: &str, len: usize) -> Result<Vec<usize>>;
}

/// Derives an independent child seed from a parent seed and an index.
///
/// Used to hand separate, reproducible streams to concurrent sampling passes.
pub fn derive_seed(parent: u64, index: u64) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(parent.to_le_bytes());
    hasher.update(index.to_le_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Deterministic sampler backed by ChaCha8 RNG.
///
/// # Example
///
/// ```ignore
/// let mut sampler = SeededSampler::new(0);
/// let derivation = grammar.sample(&mut sampler)?;
/// ```
#[derive(Debug, Clone)]
pub struct SeededSampler {
    /// Seed the generator was created from.
    seed: u64,
    /// ChaCha8 random number generator.
    rng: ChaCha8Rng,
    /// Number of primitive decisions made so far.
    draws: u64,
    /// Recorded decisions, when recording is enabled.
    log: Option<ChoiceLog>,
}

impl SeededSampler {
    /// Creates a sampler with an explicit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            draws: 0,
            log: None,
        }
    }

    /// Creates a sampler with a fresh seed from the thread RNG.
    ///
    /// The chosen seed is kept and reported by [`seed`](Self::seed), so a run
    /// can still be reproduced afterwards.
    pub fn unseeded() -> Self {
        let seed = rand::rng().random::<u64>();
        debug!(seed, "Created unseeded sampler");
        Self::new(seed)
    }

    /// Seeded when `seed` is set, unseeded otherwise.
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::new(seed),
            None => Self::unseeded(),
        }
    }

    /// Enables recording of every decision into a [`ChoiceLog`].
    pub fn recording(mut self) -> Self {
        self.log = Some(ChoiceLog::default());
        self
    }

    /// Seed the sampler was created from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of primitive decisions made so far.
    pub fn draws(&self) -> u64 {
        self.draws
    }

    /// The recorded decisions, if recording is enabled.
    pub fn log(&self) -> Option<&ChoiceLog> {
        self.log.as_ref()
    }

    /// Takes the recorded decisions, leaving an empty log behind.
    pub fn take_log(&mut self) -> Option<ChoiceLog> {
        self.log.as_mut().map(std::mem::take)
    }

    /// Creates an independent child sampler for pass number `index`.
    ///
    /// The child seed depends only on this sampler's seed and `index`, never
    /// on how many draws the parent has made.
    pub fn derive(&self, index: u64) -> SeededSampler {
        SeededSampler::new(derive_seed(self.seed, index))
    }

    fn record(&mut self, handle: &str, value: ChoiceValue) {
        self.draws += 1;
        if let Some(log) = self.log.as_mut() {
            log.push(ChoiceRecord {
                handle: handle.to_string(),
                value,
            });
        }
    }
}

impl Sampler for SeededSampler {
    fn choice(&mut self, handle: &str, len: usize) -> Result<usize> {
        if len == 0 {
            return Err(SamplingError::InvalidDomain {
                handle: handle.to_string(),
                message: "cannot choose among zero alternatives".to_string(),
            });
        }
        let index = self.rng.random_range(0..len);
        self.record(handle, ChoiceValue::Index { value: index });
        Ok(index)
    }

    fn weighted_choice(&mut self, handle: &str, weights: &[f64]) -> Result<usize> {
        if weights.is_empty() {
            return Err(SamplingError::InvalidDomain {
                handle: handle.to_string(),
                message: "cannot choose among zero alternatives".to_string(),
            });
        }

        let total_weight: f64 = weights.iter().sum();
        if !total_weight.is_finite() || total_weight <= 0.0 {
            return Err(SamplingError::InvalidDomain {
                handle: handle.to_string(),
                message: "total weight must be positive".to_string(),
            });
        }

        let random_value = self.rng.random::<f64>() * total_weight;
        let mut cumulative = 0.0;
        // Last positive weight; float rounding can leave random_value above the final sum.
        let mut index = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);

        for (i, &weight) in weights.iter().enumerate() {
            cumulative += weight;
            if weight > 0.0 && random_value < cumulative {
                index = i;
                break;
            }
        }

        self.record(handle, ChoiceValue::Index { value: index });
        Ok(index)
    }

    fn boolean(&mut self, handle: &str) -> Result<bool> {
        let value = self.rng.random::<bool>();
        self.record(handle, ChoiceValue::Boolean { value });
        Ok(value)
    }

    fn discrete(
        &mut self,
        handle: &str,
        min: i64,
        max: i64,
        distribution: Distribution,
    ) -> Result<i64> {
        if min > max {
            return Err(SamplingError::InvalidDomain {
                handle: handle.to_string(),
                message: format!("min ({}) must be <= max ({})", min, max),
            });
        }

        let value = match distribution {
            Distribution::Uniform => self.rng.random_range(min..=max),
            Distribution::Normal => {
                // Centered at the midpoint, 99.7% within range
                let mean = (min as f64 + max as f64) / 2.0;
                let std_dev = (max as f64 - min as f64) / 6.0;
                let normal = rand_distr::Normal::new(mean, std_dev).map_err(|e| {
                    SamplingError::InvalidDomain {
                        handle: handle.to_string(),
                        message: e.to_string(),
                    }
                })?;
                let sampled: f64 = self.rng.sample(normal);
                sampled.round().clamp(min as f64, max as f64) as i64
            }
            Distribution::LogUniform => {
                let log_min = (min.max(1) as f64).ln();
                let log_max = (max.max(1) as f64).ln();
                let log_val = self.rng.random_range(log_min..=log_max);
                log_val.exp().round().clamp(min as f64, max as f64) as i64
            }
        };

        self.record(handle, ChoiceValue::Integer { value });
        Ok(value)
    }

    fn continuous(
        &mut self,
        handle: &str,
        min: f64,
        max: f64,
        distribution: Distribution,
    ) -> Result<f64> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(SamplingError::InvalidDomain {
                handle: handle.to_string(),
                message: format!("invalid range [{}, {}]", min, max),
            });
        }

        // Halved bounds keep the width finite for ranges wider than f64::MAX.
        let half_width = max / 2.0 - min / 2.0;
        let value = match distribution {
            Distribution::Uniform if (max - min).is_finite() => self.rng.random_range(min..=max),
            Distribution::Uniform => {
                let u = self.rng.random::<f64>();
                (min + u * half_width + u * half_width).clamp(min, max)
            }
            Distribution::Normal => {
                let mean = min / 2.0 + max / 2.0;
                let std_dev = half_width / 3.0;
                let normal = rand_distr::Normal::new(mean, std_dev).map_err(|e| {
                    SamplingError::InvalidDomain {
                        handle: handle.to_string(),
                        message: e.to_string(),
                    }
                })?;
                let sampled: f64 = self.rng.sample(normal);
                sampled.clamp(min, max)
            }
            Distribution::LogUniform => {
                let log_min = min.max(f64::MIN_POSITIVE).ln();
                let log_max = max.max(f64::MIN_POSITIVE).ln();
                let log_val = self.rng.random_range(log_min..=log_max);
                log_val.exp().clamp(min, max)
            }
        };

        self.record(handle, ChoiceValue::Float { value });
        Ok(value)
    }

    fn subset(&mut self, handle: &str, len: usize) -> Result<Vec<usize>> {
        let value: Vec<usize> = (0..len).filter(|_| self.rng.random::<bool>()).collect();
        self.record(
            handle,
            ChoiceValue::Subset {
                value: value.clone(),
            },
        );
        Ok(value)
    }
}
