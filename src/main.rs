//! Stackfile - validate and normalize stack manifests
//!
//! This is the main CLI entry point for stackfile.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use stackfile::error::StackError;
use stackfile::stack::{Orchestrator, PlanPrinter, StackLoader, StackParser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Stackfile - stack manifest loader and validator
#[derive(Parser)]
#[command(name = "stackfile")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Validate and normalize container stack manifests", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Stack file (repeat to merge several files)
    #[arg(short = 'f', long = "file", global = true)]
    files: Vec<PathBuf>,

    /// Base directory for relative volume paths
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,

    /// Do not substitute environment variables
    #[arg(long, global = true)]
    no_interpolate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the stack file and print a summary
    Validate,

    /// Print the normalized manifest
    Config {
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
        /// Only print service names
        #[arg(long)]
        services: bool,
    },

    /// Print the service start order
    Plan,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let files = if cli.files.is_empty() {
        let working_dir = std::env::current_dir()?;
        let found = StackParser::find_stack_file(&working_dir)
            .ok_or(StackError::StackFileNotFound(working_dir))?;
        vec![found]
    } else {
        cli.files
    };

    let mut loader = StackLoader::new();
    if let Some(dir) = cli.project_directory {
        loader = loader.project_directory(dir);
    }
    if cli.no_interpolate {
        loader = loader.without_interpolation();
    }

    let manifest = loader.load_files(&files)?;

    match cli.command {
        Commands::Validate => {
            let names: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
            println!(
                "{}: ok ({}, {}, {})",
                names.join(", "),
                count(manifest.services().len(), "service"),
                count(manifest.networks().len(), "network"),
                count(manifest.volumes().len(), "volume")
            );
        }
        Commands::Config { format, services } => {
            if services {
                for name in manifest.services().keys() {
                    println!("{}", name);
                }
                return Ok(());
            }

            let rendered = match format {
                OutputFormat::Yaml => serde_yaml::to_string(&manifest)
                    .context("failed to render manifest as YAML")?,
                OutputFormat::Json => serde_json::to_string_pretty(&manifest)
                    .map(|json| json + "\n")
                    .context("failed to render manifest as JSON")?,
            };
            print!("{}", rendered);
        }
        Commands::Plan => {
            let mut printer = PlanPrinter::new(std::io::stdout().lock());
            printer
                .deploy(&manifest)
                .context("failed to write plan")?;
        }
    }

    Ok(())
}

/// Print every collected problem, one per line
fn report(err: &anyhow::Error) {
    match err.downcast_ref::<StackError>() {
        Some(stack_err) => {
            for line in stack_err.diagnostics() {
                eprintln!("{}", line);
            }
        }
        None => eprintln!("error: {:#}", err),
    }
}

fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_pluralizes() {
        assert_eq!(count(3, "service"), "3 services");
        assert_eq!(count(1, "network"), "1 network");
        assert_eq!(count(0, "volume"), "0 volumes");
    }
}
