//! Error types for grammar-forge operations.
//!
//! Defines error types for each subsystem:
//! - Registry construction and loading
//! - Interface compatibility of candidate types
//! - Grammar construction
//! - Sampling of derivations

use thiserror::Error;

/// Errors that can occur while building or loading a registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Type '{0}' is already registered")]
    DuplicateType(String),

    #[error("Parameter '{parameter}' is declared twice on type '{type_name}'")]
    DuplicateParameter {
        type_name: String,
        parameter: String,
    },

    #[error("Type names must be non-empty")]
    EmptyTypeName,

    #[error("Name '{name}' is reserved: {message}")]
    ReservedName { name: String, message: String },

    #[error("Invalid domain for parameter '{parameter}' of '{type_name}': {message}")]
    InvalidDomain {
        type_name: String,
        parameter: String,
        message: String,
    },

    #[error("Invalid selection weight {weight} for type '{type_name}': must be finite and positive")]
    InvalidWeight { type_name: String, weight: f64 },

    #[error("Unsupported registry file extension: {0}")]
    UnsupportedFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

/// A candidate type whose signature cannot be resolved against the registry.
///
/// This is the recoverable, per-candidate signal: the builder either collects it
/// and keeps going, or returns it straight away in fail-fast mode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Type '{type_name}' is incompatible: parameter '{parameter}' requires '{required}', which {reason}")]
pub struct InterfaceIncompatible {
    /// The candidate that was rejected.
    pub type_name: String,
    /// The first parameter that could not be resolved.
    pub parameter: String,
    /// The declared type of that parameter.
    pub required: String,
    /// Why nothing could satisfy it.
    pub reason: IncompatibilityReason,
}

/// Why a parameter could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncompatibilityReason {
    /// No registered type conforms to the declared interface.
    NoImplementation,
    /// Conforming types exist but all of them are excluded or incompatible.
    AllCandidatesRejected,
    /// The annotation cannot be represented and there is no default to fall back to.
    Unrepresentable,
    /// Every construction of the type recurses into itself.
    NoFiniteDerivation,
}

impl std::fmt::Display for IncompatibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoImplementation => write!(f, "no registered type provides"),
            Self::AllCandidatesRejected => write!(f, "only excluded or incompatible types provide"),
            Self::Unrepresentable => write!(f, "cannot be represented and has no default"),
            Self::NoFiniteDerivation => write!(f, "can never be constructed without recursing forever"),
        }
    }
}

/// Errors that can occur during grammar construction.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error(transparent)]
    Incompatible(#[from] InterfaceIncompatible),

    #[error("Root '{0}' is neither a registered type nor an interface any registered type implements")]
    UnknownRoot(String),

    #[error("Root '{root}' has no valid alternatives after exclusions and compatibility checks")]
    EmptyRoot { root: String },

    #[error("Root '{root}' has no finite derivation")]
    NoFiniteDerivation { root: String },

    #[error("Rule '{referenced_by}' references undefined symbol '{symbol}'")]
    UndefinedSymbol {
        symbol: String,
        referenced_by: String,
    },

    #[error("Start symbol '{0}' has no rule")]
    MissingStart(String),

    #[error("Rule '{symbol}' is malformed: {message}")]
    MalformedRule { symbol: String, message: String },

    #[error("At least one root is required")]
    NoRoots,
}

/// Errors that can occur while sampling a derivation.
#[derive(Debug, Error)]
pub enum SamplingError {
    #[error("Symbol '{symbol}' has no alternatives to sample (grammar rooted at '{start}')")]
    NoAlternatives { symbol: String, start: String },

    #[error("Symbol '{symbol}' is not defined (grammar rooted at '{start}')")]
    UndefinedSymbol { symbol: String, start: String },

    #[error("Exceeded {limit} expansions while sampling from '{start}'")]
    ExpansionLimit { limit: usize, start: String },

    #[error("Invalid domain at '{handle}': {message}")]
    InvalidDomain { handle: String, message: String },

    #[error("Replay mismatch at position {position}: expected '{expected}', grammar asked for '{actual}'")]
    ReplayMismatch {
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("Replay log exhausted after {0} choices")]
    ReplayExhausted(usize),
}
