use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use vouch_core::verifier::{self, VerificationResult};
use vouch_core::{
    candidate_from_text, full_spec_digest, hash_spec, CommandGenerator, CompiledContract,
    Contract, DecodeOptions, DecodeResult, Decoder, FsSchemaLoader, Generator, ReplayGenerator,
    Repairer, SchemaLoader, ValidationVerdict,
};

mod config;

/// Vouch: contract-bound generation
///
/// Hash, lint and check contracts; repair candidates; run decode loops.
#[derive(Parser)]
#[command(name = "vouch", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the spec hash of a contract
    Hash {
        /// Path to contract JSON
        file: PathBuf,
        /// Print the full 64-character digest
        #[arg(long)]
        full: bool,
    },

    /// Check a contract for configuration problems
    Lint {
        /// Path to contract JSON
        file: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify a candidate against a contract
    Check {
        /// Path to contract JSON
        file: PathBuf,
        /// Candidate as JSON text, or @path to read it from a file
        #[arg(long)]
        candidate: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply the repair catalog to a candidate
    Repair {
        /// Path to contract JSON
        file: PathBuf,
        /// Candidate as JSON text, or @path to read it from a file
        #[arg(long)]
        candidate: String,
    },

    /// Run the decode loop
    Decode {
        /// Path to contract JSON
        file: PathBuf,
        /// Prompt text, or @path to read it from a file
        #[arg(long)]
        prompt: String,
        /// Replay script (JSON array of steps)
        #[arg(long, conflicts_with = "command")]
        replay: Option<PathBuf>,
        /// Program to run once per round
        #[arg(long)]
        command: Option<String>,
        /// Argument for --command (repeatable)
        #[arg(long = "arg", allow_hyphen_values = true, requires = "command")]
        args: Vec<String>,
        #[arg(long)]
        max_repairs: Option<u32>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        /// Per-call generation timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Deadline for the whole decode
        #[arg(long)]
        deadline_ms: Option<u64>,
        /// TOML config with [decode] and [generator] tables
        #[arg(long)]
        config: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show version information
    Version,
}

fn main() {
    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VOUCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Hash { file, full } => cmd_hash(&file, full),
        Commands::Lint { file, json } => cmd_lint(&file, json),
        Commands::Check {
            file,
            candidate,
            json,
        } => cmd_check(&file, &candidate, json),
        Commands::Repair { file, candidate } => cmd_repair(&file, &candidate),
        Commands::Decode {
            file,
            prompt,
            replay,
            command,
            args,
            max_repairs,
            model,
            temperature,
            timeout_ms,
            deadline_ms,
            config,
            json,
        } => {
            let overrides = DecodeOverrides {
                max_repairs,
                model,
                temperature,
                timeout_ms,
                deadline_ms,
            };
            let source = GeneratorSource {
                replay,
                command,
                args,
            };
            cmd_decode(&file, &prompt, source, overrides, config.as_deref(), json)
        }
        Commands::Version => {
            println!("vouch {} (vouch-core {})", env!("CARGO_PKG_VERSION"), vouch_core::VERSION);
            Ok(0)
        }
    };

    let exit_code = outcome.unwrap_or_else(|message| {
        eprintln!("{} {}", "error:".red().bold(), message);
        2
    });
    process::exit(exit_code);
}

// ── Input helpers ─────────────────────────────────────────

fn load_contract(file: &Path) -> Result<(Contract, FsSchemaLoader), String> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("cannot read {}: {}", file.display(), e))?;
    let contract = Contract::from_json(&text).map_err(|e| format!("{}: {}", file.display(), e))?;
    let base = match file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((contract, FsSchemaLoader::new(base)))
}

fn compile(file: &Path) -> Result<CompiledContract, String> {
    let (contract, loader) = load_contract(file)?;
    CompiledContract::compile(&contract, &loader).map_err(|e| e.to_string())
}

/// `@path` reads the file, anything else is taken literally
fn read_arg(raw: &str) -> Result<String, String> {
    match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path, e)),
        None => Ok(raw.to_string()),
    }
}

fn parse_candidate(raw: &str) -> Result<serde_json::Value, String> {
    Ok(candidate_from_text(&read_arg(raw)?))
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

fn print_violations(verdict: &ValidationVerdict) {
    for violation in &verdict.violations {
        eprintln!("  {} {}", "✗".red(), violation);
    }
}

// ── Commands ──────────────────────────────────────────────

fn cmd_hash(file: &Path, full: bool) -> Result<i32, String> {
    let (contract, _) = load_contract(file)?;
    if full {
        println!("{}", full_spec_digest(&contract));
    } else {
        println!("{}", hash_spec(&contract));
    }
    Ok(0)
}

fn cmd_lint(file: &Path, json: bool) -> Result<i32, String> {
    let (contract, loader) = load_contract(file)?;
    let schema = match &contract.output_schema {
        Some(locator) => Some(loader.load(locator).map_err(|e| e.to_string())?),
        None => None,
    };
    let result = verifier::lint(&contract, schema.as_ref());

    if json {
        let report = serde_json::json!({
            "valid": result.is_valid(),
            "errors": result.errors().len(),
            "warnings": result.warnings().len(),
            "spec_hash": hash_spec(&contract),
            "diagnostics": result.diagnostics,
        });
        println!("{}", to_pretty_json(&report)?);
    } else {
        print_lint(&contract, &result);
    }
    Ok(if result.is_valid() { 0 } else { 1 })
}

fn print_lint(contract: &Contract, result: &VerificationResult) {
    for diagnostic in &result.diagnostics {
        let line = diagnostic.to_string();
        match diagnostic.severity {
            verifier::Severity::Error => eprintln!("{}", line.red()),
            verifier::Severity::Warning => eprintln!("{}", line.yellow()),
        }
    }
    if result.is_valid() {
        println!(
            "{} {} {} is valid ({} warning(s))",
            "✓".green(),
            contract.name,
            contract.version,
            result.warnings().len()
        );
    } else {
        eprintln!(
            "{} {} {}: {} error(s)",
            "✗".red(),
            contract.name,
            contract.version,
            result.errors().len()
        );
    }
}

fn cmd_check(file: &Path, candidate: &str, json: bool) -> Result<i32, String> {
    let compiled = compile(file)?;
    let candidate = parse_candidate(candidate)?;
    let verdict = compiled.verify(&candidate);

    if json {
        let report = serde_json::json!({
            "valid": verdict.passed(),
            "spec_hash": compiled.spec_hash,
            "verification": verdict,
        });
        println!("{}", to_pretty_json(&report)?);
    } else if verdict.passed() {
        println!("{} candidate satisfies {}", "✓".green(), compiled.contract.name);
    } else {
        eprintln!("{} candidate violates {}", "✗".red(), compiled.contract.name);
        print_violations(&verdict);
    }
    Ok(if verdict.passed() { 0 } else { 1 })
}

fn cmd_repair(file: &Path, candidate: &str) -> Result<i32, String> {
    let compiled = compile(file)?;
    let candidate = parse_candidate(candidate)?;
    let before = compiled.verify(&candidate);
    let repaired = Repairer::default().repair(&candidate, &before.violations, &compiled.schema);
    let after = compiled.verify(&repaired);

    let report = serde_json::json!({
        "output": repaired,
        "changed": repaired != candidate,
        "valid": after.passed(),
        "verification": after,
    });
    println!("{}", to_pretty_json(&report)?);
    Ok(if after.passed() { 0 } else { 1 })
}

struct DecodeOverrides {
    max_repairs: Option<u32>,
    model: Option<String>,
    temperature: Option<f64>,
    timeout_ms: Option<u64>,
    deadline_ms: Option<u64>,
}

impl DecodeOverrides {
    fn apply(self, options: &mut DecodeOptions) {
        if let Some(n) = self.max_repairs {
            options.max_repairs = n;
        }
        if self.model.is_some() {
            options.model = self.model;
        }
        if self.temperature.is_some() {
            options.temperature = self.temperature;
        }
        if self.timeout_ms.is_some() {
            options.generation_timeout_ms = self.timeout_ms;
        }
        if self.deadline_ms.is_some() {
            options.deadline_ms = self.deadline_ms;
        }
    }
}

struct GeneratorSource {
    replay: Option<PathBuf>,
    command: Option<String>,
    args: Vec<String>,
}

fn build_generator(source: GeneratorSource, config: config::GeneratorConfig) -> Result<Arc<dyn Generator>, String> {
    // Flags win over the config file, as a pair
    let (replay, command, args) = if source.replay.is_some() || source.command.is_some() {
        (source.replay, source.command, source.args)
    } else {
        (config.replay, config.command, config.args)
    };
    match (replay, command) {
        (Some(path), _) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let generator = ReplayGenerator::from_json(&text).map_err(|e| e.to_string())?;
            Ok(Arc::new(generator))
        }
        (None, Some(program)) => Ok(Arc::new(CommandGenerator::new(program).args(args))),
        (None, None) => Err("no generator: pass --replay or --command (or set [generator] in --config)".into()),
    }
}

fn cmd_decode(
    file: &Path,
    prompt: &str,
    source: GeneratorSource,
    overrides: DecodeOverrides,
    config_path: Option<&Path>,
    json: bool,
) -> Result<i32, String> {
    let config = match config_path {
        Some(path) => config::load_config(path)?,
        None => config::Config::default(),
    };
    let mut options = config.decode;
    overrides.apply(&mut options);
    let generator = build_generator(source, config.generator)?;
    let (contract, loader) = load_contract(file)?;
    let prompt = read_arg(prompt)?;
    tracing::debug!(
        contract = %contract.name,
        max_repairs = options.max_repairs,
        deadline_ms = ?options.deadline_ms,
        "starting decode"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))?;
    let decoder = Decoder::new(generator, loader);
    let result = runtime
        .block_on(decoder.decode(&prompt, &contract, &options))
        .map_err(|e| e.to_string())?;

    if json {
        println!("{}", to_pretty_json(&result)?);
    } else {
        print_decode(&result)?;
    }
    Ok(if result.valid { 0 } else { 1 })
}

fn print_decode(result: &DecodeResult) -> Result<(), String> {
    if result.valid {
        eprintln!(
            "{} accepted after {} repair(s), {} generation(s) [spec {}] in {}ms",
            "✓".green(),
            result.repairs_attempted,
            result.generations,
            result.spec_hash,
            result.latency_ms
        );
    } else {
        eprintln!(
            "{} exhausted after {} repair(s), {} generation(s) [spec {}] in {}ms",
            "✗".red(),
            result.repairs_attempted,
            result.generations,
            result.spec_hash,
            result.latency_ms
        );
        print_violations(&result.verification);
    }
    println!("{}", to_pretty_json(&result.output)?);
    Ok(())
}
