//! routeplan - virtual model route planner
//!
//! Validates route configurations and prints the derived pipeline table or
//! scheduler policy.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use routeplan_core::{
    load_document, ConfigData, ConversionOptions, FanOutStrategy, PolicyConverter,
    ReferenceValidator, RouteFanOut, ValidationReport,
};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// routeplan - virtual model route planner
#[derive(Parser, Debug)]
#[command(name = "routeplan")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate one or more configuration files
    Validate {
        /// Configuration files (JSON or YAML)
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Require the standard virtual models (default, longContext, thinking, ...)
        #[arg(long)]
        standard: bool,

        /// Require a virtual model (repeatable)
        #[arg(long = "require", value_name = "VIRTUAL_MODEL")]
        required: Vec<String>,
    },

    /// Print the pipeline table
    Routes {
        /// Configuration file (JSON or YAML)
        file: PathBuf,

        /// Fan-out strategy: all-keys or declared-key
        #[arg(long, default_value = "all-keys")]
        strategy: FanOutStrategy,

        /// Virtual models processed by declared-key (repeatable; default: the standard ones)
        #[arg(long = "allow", value_name = "VIRTUAL_MODEL")]
        allowed: Vec<String>,

        /// Replace API keys with their last four characters
        #[arg(long)]
        redact: bool,
    },

    /// Print the assembly table and scheduler policy
    Policy {
        /// Configuration file (JSON or YAML)
        file: PathBuf,

        /// Passive health checks only, no auto-recovery
        #[arg(long)]
        no_health_checks: bool,

        #[arg(long)]
        no_error_handling: bool,

        #[arg(long)]
        no_performance: bool,

        #[arg(long)]
        no_monitoring: bool,

        #[arg(long)]
        no_security: bool,

        /// JSON/YAML file with {assemblyConfig?, schedulerConfig?} overrides
        #[arg(long, value_name = "FILE")]
        overrides: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Validate {
            files,
            standard,
            required,
        } => {
            let mut validator = if standard {
                ReferenceValidator::standard()
            } else {
                ReferenceValidator::new()
            };
            if !required.is_empty() {
                let mut ids = validator.required().clone();
                ids.extend(required);
                validator = validator.with_required(ids);
            }
            validate(&validator, &files, cli.format)
        }

        Commands::Routes {
            file,
            strategy,
            allowed,
            redact,
        } => {
            let config = ConfigData::from_file(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let fan_out = RouteFanOut::with_strategy(strategy, &allowed);

            let report = fan_out.generate(&config);
            for warning in &report.warnings {
                eprintln!("warning: {}", warning);
            }
            tracing::info!(
                entries = report.table.len(),
                dropped_targets = report.dropped_targets,
                "Generated routes"
            );

            let mut table = serde_json::to_value(&report.table)?;
            if redact {
                redact_keys(&mut table, &report.table);
            }
            print(&table, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::Policy {
            file,
            no_health_checks,
            no_error_handling,
            no_performance,
            no_monitoring,
            no_security,
            overrides,
        } => {
            let config = ConfigData::from_file(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            let custom_overrides = overrides
                .as_deref()
                .map(|path| {
                    load_document(path)
                        .with_context(|| format!("Failed to load overrides {}", path.display()))
                })
                .transpose()?;

            let options = ConversionOptions {
                include_health_checks: !no_health_checks,
                include_error_handling: !no_error_handling,
                include_performance: !no_performance,
                include_monitoring: !no_monitoring,
                include_security: !no_security,
                custom_overrides,
            };
            let output = PolicyConverter::new().convert(&config, &options)?;
            print(&output, cli.format)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Serialize)]
struct FileReport<'a> {
    file: &'a Path,
    #[serde(flatten)]
    report: ValidationReport,
}

fn validate(validator: &ReferenceValidator, files: &[PathBuf], format: OutputFormat) -> Result<ExitCode> {
    let mut reports = Vec::with_capacity(files.len());
    for file in files {
        let report = match load_document(file) {
            Ok(document) => validator.validate_document(&document),
            Err(e) => ValidationReport {
                valid: false,
                errors: vec![e.to_string()],
                warnings: Vec::new(),
            },
        };
        reports.push(FileReport { file, report });
    }

    let all_valid = reports.iter().all(|r| r.report.valid);
    print(&reports, format)?;
    Ok(if all_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn redact_keys(table: &mut Value, source: &routeplan_core::PipelineTable) {
    for (id, entry) in source.iter() {
        if let Some(metadata) = table.get_mut(&id).and_then(|e| e.get_mut("metadata")) {
            metadata["apiKey"] = Value::String(entry.metadata.api_key.hint());
        }
    }
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let text = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    };
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_routes_strategy() {
        let cli = Cli::try_parse_from([
            "routeplan", "routes", "cfg.yaml", "--strategy", "declared-key", "--allow", "default",
        ])
        .unwrap();
        match cli.command {
            Commands::Routes {
                strategy, allowed, ..
            } => {
                assert_eq!(strategy, FanOutStrategy::DeclaredKey);
                assert_eq!(allowed, vec!["default"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        assert!(Cli::try_parse_from(["routeplan", "routes", "cfg.yaml", "--strategy", "some"]).is_err());
    }

    #[test]
    fn test_declared_key_without_allow_uses_standard_models() {
        let config = ConfigData::from_json(
            r#"{"providers": {"p": {"auth": {"keys": ["k1", "k2"]}, "models": {"m": {}}}},
                "virtualModels": {
                    "default": {"targets": [{"providerId": "p", "modelId": "m"}]},
                    "custom": {"targets": [{"providerId": "p", "modelId": "m"}]}
                }}"#,
        )
        .unwrap();
        let cli = Cli::try_parse_from(["routeplan", "routes", "cfg.yaml", "--strategy", "declared-key"]).unwrap();
        let Commands::Routes { strategy, allowed, .. } = cli.command else {
            panic!("expected routes command");
        };
        assert!(allowed.is_empty());

        let table = RouteFanOut::with_strategy(strategy, &allowed).generate(&config).table;
        assert_eq!(table.len(), 1);
        assert!(table.virtual_model_ids().contains("default"));
        assert!(!table.virtual_model_ids().contains("custom"));
    }

    #[test]
    fn test_redact_keys() {
        let config = ConfigData::from_json(
            r#"{"providers": {"p": {"auth": {"keys": ["sk-abcdef1234"]}, "models": {"m": {}}}},
                "virtualModels": {"default": {"targets": [{"providerId": "p", "modelId": "m"}]}}}"#,
        )
        .unwrap();
        let table = RouteFanOut::all_keys().generate(&config).table;
        let mut value = serde_json::to_value(&table).unwrap();
        redact_keys(&mut value, &table);

        let text = value.to_string();
        assert!(!text.contains("sk-abcdef1234"));
        assert!(text.contains("1234"));
    }
}
