//! Command-line interface for grammar-forge.
//!
//! Provides commands for checking registries, printing grammars, sampling
//! configurations and replaying recorded samples.

mod commands;

pub use commands::{parse_cli, read_sample_lines, run_with_cli, Cli, SampleLine};
