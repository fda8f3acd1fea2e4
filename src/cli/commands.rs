//! CLI command definitions for grammar-forge.
//!
//! Commands load a registry document, build grammars from it and sample
//! configurations as JSON lines.

use crate::config::SamplingConfig;
use crate::grammar::{BuildMode, Grammar, GrammarBuilder};
use crate::registry::{Registry, RegistryFilter};
use crate::sampler::{ChoiceLog, ReplaySampler};
use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the default registry document.
const REGISTRY_ENV: &str = "GRAMMAR_FORGE_REGISTRY";

/// Derive grammars from component signatures and sample configurations.
#[derive(Parser)]
#[command(name = "grammar-forge")]
#[command(about = "Derive context-free grammars from component signatures and sample configurations")]
#[command(version)]
#[command(
    long_about = "grammar-forge reads a registry of component signatures, derives a context-free grammar rooted at a type or interface, and samples concrete configurations from it.\n\nExample usage:\n  grammar-forge sample --registry registries/demo.yaml --root Classifier --seed 0 --count 5"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Report which registered types can be constructed.
    Check(CheckArgs),

    /// Print the grammar rooted at one or more names.
    #[command(alias = "cfg")]
    Grammar(GrammarArgs),

    /// Sample configurations as JSON lines.
    Sample(SampleArgs),

    /// Re-derive configurations from recorded choice logs.
    Replay(ReplayArgs),
}

/// Registry selection shared by every command.
#[derive(clap::Args, Debug, Clone)]
pub struct RegistryArgs {
    /// Registry document (.yaml, .yml or .json).
    #[arg(short = 'r', long, env = REGISTRY_ENV)]
    pub registry: PathBuf,

    /// Only keep types whose name matches this pattern.
    #[arg(long)]
    pub include: Option<String>,

    /// Drop types whose name matches this pattern.
    #[arg(long)]
    pub exclude_pattern: Option<String>,

    /// Exclude a type by name. Repeatable.
    #[arg(short = 'x', long = "exclude")]
    pub exclude: Vec<String>,
}

/// Arguments for `grammar-forge check`.
#[derive(Parser, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Output formats for `grammar-forge grammar`.
#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GrammarFormat {
    #[default]
    Bnf,
    Json,
}

/// Arguments for `grammar-forge grammar`.
#[derive(Parser, Debug)]
pub struct GrammarArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Root type or interface. Repeatable.
    #[arg(long, required = true)]
    pub root: Vec<String>,

    /// Output format.
    #[arg(short = 'f', long, value_enum, default_value_t = GrammarFormat::Bnf)]
    pub format: GrammarFormat,

    /// Fail on the first incompatible candidate instead of skipping it.
    #[arg(long)]
    pub fail_fast: bool,
}

/// Arguments for `grammar-forge sample`.
#[derive(Parser, Debug)]
pub struct SampleArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Root type or interface. Repeatable.
    #[arg(long, required = true)]
    pub root: Vec<String>,

    /// Number of configurations to sample.
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u64,

    /// Root seed. Overrides GRAMMAR_FORGE_SEED.
    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// Depth budget. Overrides GRAMMAR_FORGE_MAX_DEPTH.
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// Expansion cap per configuration. Overrides GRAMMAR_FORGE_MAX_EXPANSIONS.
    #[arg(long)]
    pub max_expansions: Option<usize>,

    /// Attach the choice log to every line.
    #[arg(long)]
    pub record: bool,

    /// Write lines to this file instead of stdout.
    #[arg(short = 'o', long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `grammar-forge replay`.
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    #[command(flatten)]
    pub registry: RegistryArgs,

    /// Root type or interface the log was recorded against. Repeatable.
    #[arg(long, required = true)]
    pub root: Vec<String>,

    /// JSON lines produced by `sample --record`.
    #[arg(short = 'i', long)]
    pub input: PathBuf,
}

/// One line of `sample` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleLine {
    pub index: u64,
    pub seed: u64,
    pub grammar: String,
    pub configuration: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<ChoiceLog>,
}

#[derive(Debug, Clone, Serialize)]
struct CheckEntry {
    name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    dropped: Vec<String>,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Check(args) => run_check_command(args),
        Commands::Grammar(args) => run_grammar_command(args),
        Commands::Sample(args) => run_sample_command(args),
        Commands::Replay(args) => run_replay_command(args),
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_check_command(args: CheckArgs) -> anyhow::Result<()> {
    let registry = load_registry(&args.registry)?;
    let entries = check_entries(&registry, &args.registry)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        match (&entry.reason, entry.dropped.is_empty()) {
            (Some(reason), _) => println!("{:<12} {}: {}", entry.status, entry.name, reason),
            (None, false) => println!(
                "{:<12} {} (defaults kept for: {})",
                entry.status,
                entry.name,
                entry.dropped.join(", ")
            ),
            (None, true) => println!("{:<12} {}", entry.status, entry.name),
        }
    }
    let incompatible = entries.iter().filter(|e| e.status == "incompatible").count();
    println!("\n{} types, {} incompatible", entries.len(), incompatible);
    Ok(())
}

fn check_entries(registry: &Registry, args: &RegistryArgs) -> anyhow::Result<Vec<CheckEntry>> {
    let checker = configure_builder(registry, args)?.checker();

    let entries: Vec<CheckEntry> = registry
        .iter()
        .map(|ty| {
            if checker.is_excluded(&ty.name) {
                return CheckEntry {
                    name: ty.name.clone(),
                    status: "excluded",
                    reason: None,
                    dropped: Vec::new(),
                };
            }
            match checker.check(&ty.name) {
                Ok(resolution) => CheckEntry {
                    name: ty.name.clone(),
                    status: "ok",
                    reason: None,
                    dropped: resolution.dropped.clone(),
                },
                Err(err) => CheckEntry {
                    name: ty.name.clone(),
                    status: "incompatible",
                    reason: Some(err.to_string()),
                    dropped: Vec::new(),
                },
            }
        })
        .collect();

    Ok(entries)
}

fn run_grammar_command(args: GrammarArgs) -> anyhow::Result<()> {
    let registry = load_registry(&args.registry)?;
    let mode = if args.fail_fast {
        BuildMode::FailFast
    } else {
        BuildMode::Collect
    };
    let config = SamplingConfig::from_env()?;
    let grammar = build_grammar(&registry, &args.registry, &args.root, mode, &config)?;

    match args.format {
        GrammarFormat::Bnf => print!("{}", grammar),
        GrammarFormat::Json => println!("{}", serde_json::to_string_pretty(&grammar)?),
    }
    Ok(())
}

fn run_sample_command(args: SampleArgs) -> anyhow::Result<()> {
    let mut config = SamplingConfig::from_env()?;
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(max_depth) = args.max_depth {
        config = config.with_max_depth(max_depth);
    }
    if let Some(max_expansions) = args.max_expansions {
        config = config.with_max_expansions(max_expansions);
    }
    if args.record {
        config = config.with_recording(true);
    }
    config.validate()?;

    let registry = load_registry(&args.registry)?;
    let grammar = build_grammar(
        &registry,
        &args.registry,
        &args.root,
        BuildMode::Collect,
        &config,
    )?;
    let fingerprint = grammar.fingerprint();

    let root_sampler = config.sampler();
    info!(
        seed = root_sampler.seed(),
        count = args.count,
        grammar = %fingerprint,
        "Sampling configurations"
    );

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?,
        ),
        None => Box::new(std::io::stdout().lock()),
    };

    for index in 0..args.count {
        let mut sampler = root_sampler.derive(index);
        if config.record_choices {
            sampler = sampler.recording();
        }
        let derivation = grammar
            .sample(&mut sampler)
            .with_context(|| format!("Sample {} failed", index))?;
        let line = SampleLine {
            index,
            seed: sampler.seed(),
            grammar: fingerprint.clone(),
            configuration: derivation.to_json(),
            log: sampler.take_log(),
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }
    out.flush()?;
    Ok(())
}

fn run_replay_command(args: ReplayArgs) -> anyhow::Result<()> {
    let config = SamplingConfig::from_env()?;
    let registry = load_registry(&args.registry)?;
    let grammar = build_grammar(
        &registry,
        &args.registry,
        &args.root,
        BuildMode::Collect,
        &config,
    )?;
    let fingerprint = grammar.fingerprint();

    let file = fs::File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;

    let mut replayed = 0usize;
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: SampleLine = serde_json::from_str(&line)
            .with_context(|| format!("Line {} is not a sample record", lineno + 1))?;
        let Some(log) = record.log else {
            warn!(index = record.index, "Line has no choice log, skipping");
            continue;
        };
        if record.grammar != fingerprint {
            warn!(
                index = record.index,
                recorded = %record.grammar,
                current = %fingerprint,
                "Grammar changed since the log was recorded"
            );
        }

        let mut sampler = ReplaySampler::new(log);
        let derivation = grammar
            .sample(&mut sampler)
            .with_context(|| format!("Replay of sample {} failed", record.index))?;
        let configuration = derivation.to_json();
        if configuration != record.configuration {
            anyhow::bail!(
                "Replay of sample {} produced a different configuration",
                record.index
            );
        }
        println!("{}", serde_json::to_string(&configuration)?);
        replayed += 1;
    }

    info!(replayed, "Replay complete");
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_registry(args: &RegistryArgs) -> anyhow::Result<Registry> {
    let registry = Registry::from_path(&args.registry)
        .with_context(|| format!("Failed to load registry {}", args.registry.display()))?;

    if args.include.is_none() {
        return Ok(registry);
    }
    let mut filter = RegistryFilter::new();
    if let Some(pattern) = &args.include {
        filter = filter.include(pattern)?;
    }
    Ok(registry.filter(&filter))
}

/// Builder carrying the exclusions named on the command line.
fn configure_builder<'r>(
    registry: &'r Registry,
    args: &RegistryArgs,
) -> anyhow::Result<GrammarBuilder<'r>> {
    let builder = GrammarBuilder::new(registry).exclude_all(args.exclude.iter().cloned());
    match &args.exclude_pattern {
        Some(pattern) => Ok(builder.exclude_matching(pattern)?),
        None => Ok(builder),
    }
}

fn build_grammar(
    registry: &Registry,
    args: &RegistryArgs,
    roots: &[String],
    mode: BuildMode,
    config: &SamplingConfig,
) -> anyhow::Result<Grammar> {
    let builder = configure_builder(registry, args)?
        .mode(mode)
        .limits(config.limits());

    let roots: Vec<&str> = roots.iter().map(String::as_str).collect();
    let build = builder.build_many(&roots)?;
    for skipped in &build.skipped {
        warn!("{}", skipped);
    }
    Ok(build.grammar)
}

/// Reads every sample line in a file.
pub fn read_sample_lines(path: &Path) -> anyhow::Result<Vec<SampleLine>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}
