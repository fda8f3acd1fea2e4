//! grammar-forge: context-free grammars derived from component signatures.
//!
//! A [`Registry`] describes the constructor signatures of pluggable components.
//! [`generate_cfg`] turns it into a [`Grammar`] rooted at a type or interface,
//! and sampling that grammar with a [`Sampler`] yields [`Derivation`]s:
//! concrete, type-consistent configurations.
//!
//! ```ignore
//! use grammar_forge::{generate_cfg, Registry, SeededSampler};
//!
//! let registry = Registry::from_path("registries/demo.yaml".as_ref())?;
//! let grammar = generate_cfg("Classifier", &registry)?;
//! let config = grammar.sample(&mut SeededSampler::new(0))?;
//! println!("{}", config);
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod grammar;
pub mod registry;
pub mod sampler;

pub use config::{ConfigError, SamplingConfig};
pub use error::{
    GrammarError, IncompatibilityReason, InterfaceIncompatible, RegistryError, SamplingError,
};
pub use grammar::{
    generate_cfg, BuildMode, Derivation, Grammar, GrammarBuild, GrammarBuilder, SamplingLimits,
    Symbol,
};
pub use registry::{ComponentType, Describe, ParamType, Parameter, Registry, RegistryFilter};
pub use sampler::{ChoiceLog, ReplaySampler, Sampler, SeededSampler};
