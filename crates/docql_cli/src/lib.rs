//! docql CLI library
//!
//! Runs directive-annotated operations against an in-memory store.
//!
//! # Usage
//!
//! ```bash
//! # Run operations against a seeded store
//! docql run --seed seed.json query.json mutation.json
//!
//! # Run with link configuration and shared variables
//! docql run --seed seed.json --config link.json --variables vars.json query.json
//!
//! # Check directive arguments without running anything
//! docql check query.json mutation.json
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use docql_core::{LinkError, Operation, Variables};
use docql_runtime::{DocumentLink, FieldPlan, LinkConfig, MemoryBackend};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// docql - resolve GraphQL-shaped operations against a document store
#[derive(Parser)]
#[command(name = "docql")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run operations against a seeded in-memory store
    Run {
        /// Seed file mapping collection paths to documents
        #[arg(long)]
        seed: PathBuf,

        /// Link configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Variables merged into every operation
        #[arg(long)]
        variables: Option<PathBuf>,

        /// Operation files, run in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Check the directives of operation files
    Check {
        /// Operation files to check
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Runs the CLI with the given arguments.
pub async fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            seed,
            config,
            variables,
            files,
        } => {
            let seed: serde_json::Value = read_json(&seed)?;
            let backend = Arc::new(MemoryBackend::with_seed(&seed)?);
            let config = match config {
                Some(path) => read_json(&path)?,
                None => LinkConfig::default(),
            };
            let variables = match variables {
                Some(path) => read_json(&path)?,
                None => Variables::new(),
            };
            let link = DocumentLink::with_config(backend, config);
            run_files(&link, &files, &variables, cli.quiet).await
        }
        Commands::Check { files } => check_files(&files, cli.verbose),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let value = serde_json::from_str(&source)
        .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
    Ok(value)
}

/// Merges shared variables into an operation. Bindings in the operation win.
pub fn merge_variables(operation: &mut Operation, shared: &Variables) {
    for (name, value) in shared {
        operation
            .variables
            .entry(name.clone())
            .or_insert_with(|| value.clone());
    }
}

/// Runs one operation and returns its first result.
///
/// Live operations are cancelled once the first result is in.
pub async fn run_operation(
    link: &DocumentLink<MemoryBackend>,
    operation: Operation,
) -> Option<Result<serde_json::Value, LinkError>> {
    let mut stream = link.request(operation, None);
    let result = stream.next().await;
    stream.cancel().await;
    result.map(|result| result.map(|response| response.data))
}

async fn run_files(
    link: &DocumentLink<MemoryBackend>,
    files: &[PathBuf],
    variables: &Variables,
    quiet: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut has_errors = false;

    for file in files {
        let mut operation: Operation = read_json(file)?;
        merge_variables(&mut operation, variables);
        debug!(file = %file.display(), "running operation");

        match run_operation(link, operation).await {
            Some(Ok(data)) => {
                if !quiet {
                    println!("{} {}", "OK".green().bold(), file.display());
                }
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Some(Err(err)) => {
                has_errors = true;
                eprintln!("{} {}", "Error".red().bold(), file.display());
                eprintln!("  {} {}", "-->".blue(), err);
            }
            None => {
                if !quiet {
                    println!("{} {} (no result)", "Done".yellow(), file.display());
                }
            }
        }
    }

    Ok(i32::from(has_errors))
}

/// Collects the configuration errors of every field in an operation.
pub fn check_operation(operation: &Operation) -> Vec<String> {
    let mut errors = Vec::new();
    operation.walk(&mut |field| match FieldPlan::parse(field, &operation.variables) {
        Ok(FieldPlan::Mutation(directive)) if directive.mutation_type.is_none() => {
            errors.push(format!(
                "{}: @mutation needs a mutationType",
                field.response_key()
            ));
        }
        Ok(_) => {}
        Err(err) => errors.push(format!("{}: {}", field.response_key(), err)),
    });
    errors
}

fn check_files(files: &[PathBuf], verbose: bool) -> Result<i32, Box<dyn std::error::Error>> {
    let mut has_errors = false;

    for file in files {
        if verbose {
            println!("{} {}", "Checking".blue(), file.display());
        }

        let operation: Operation = read_json(file)?;
        let errors = check_operation(&operation);

        if errors.is_empty() {
            if verbose {
                println!("{} {}", "OK".green(), file.display());
            }
        } else {
            has_errors = true;
            eprintln!("{} {}", "Error".red().bold(), file.display());
            for error in errors {
                eprintln!("  {} {}", "-->".blue(), error);
            }
        }
    }

    if has_errors {
        Ok(1)
    } else {
        println!(
            "{} {} file(s) checked",
            "Success:".green().bold(),
            files.len()
        );
        Ok(0)
    }
}
