//! Context-free grammars over component signatures.
//!
//! A [`Grammar`] is built from a [`Registry`](crate::registry::Registry) by
//! [`GrammarBuilder`] (or the [`generate_cfg`] shortcut) and then sampled with
//! any [`Sampler`](crate::sampler::Sampler) to produce [`Derivation`]s.

pub mod builder;
pub mod cfg;
pub mod compat;
pub mod derivation;
pub mod production;

pub use builder::{generate_cfg, BuildMode, GrammarBuild, GrammarBuilder, MULTI_ROOT_START};
pub use cfg::{Grammar, SamplingLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_EXPANSIONS};
pub use compat::{CompatibilityChecker, Resolution};
pub use derivation::{Argument, Derivation, Instance};
pub use production::{Alternative, ArgumentRule, Production, Symbol, Terminal};
