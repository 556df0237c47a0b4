use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ctekit_core::{Config, Severity, ValidationReport};
use ctekit_sql::{SqlEngine, SqlParserEngine};
use ctekit_workspace::{CompositionError, FragmentId, TestDataFixture, Workspace, WorkspaceSnapshot};

/// ctekit - compose SQL fragments into executable statements
#[derive(Parser)]
#[command(name = "ctekit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ctekit.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compose a fragment with its dependencies into one statement
    Compose {
        /// Workspace snapshot (.json) or SQL file to decompose
        input: PathBuf,

        /// Fragment to compose (default: the main fragment)
        #[arg(short = 'n', long)]
        fragment: Option<String>,

        /// SQL file holding test-data CTE definitions
        #[arg(long)]
        fixture: Option<PathBuf>,

        /// Filter document, as JSON text or a path to a JSON file
        #[arg(long)]
        filter: Option<String>,

        /// Use positional placeholders for execution
        #[arg(short, long)]
        execution: bool,

        /// Print SQL and parameters as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show fragment graph statistics
    Stats {
        /// Workspace snapshot (.json) or SQL file to decompose
        input: PathBuf,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a filter template for the main fragment
    Template {
        /// Workspace snapshot (.json) or SQL file to decompose
        input: PathBuf,
    },

    /// Compose every fragment and collect the tables it reads
    Validate {
        /// Workspace snapshot (.json) or SQL file to decompose
        input: PathBuf,

        /// Output file for report.json
        #[arg(short, long, default_value = "report.json")]
        output: PathBuf,
    },

    /// Split a SQL statement into fragments and save a workspace snapshot
    Decompose {
        /// SQL file holding one statement
        input: PathBuf,

        /// Output file for the snapshot
        #[arg(short, long, default_value = "workspace.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    // Load config if specified
    let config = if let Some(config_path) = &cli.config {
        Config::from_file(config_path)?
    } else if Path::new("ctekit.toml").exists() {
        Config::from_file(Path::new("ctekit.toml"))?
    } else {
        if cli.verbose {
            eprintln!("{}", "No config file found, using defaults".yellow());
        }
        Config::default()
    };

    if cli.verbose {
        eprintln!("{} dialect: {:?}", "Using".cyan(), config.dialect);
    }

    let engine: Arc<dyn SqlEngine> = Arc::new(SqlParserEngine::new(config.dialect));

    match cli.command {
        Commands::Compose {
            input,
            fragment,
            fixture,
            filter,
            execution,
            json,
        } => {
            let workspace = load_workspace(&input, engine, config, cli.verbose).await?;
            let options = ComposeOptions {
                fragment,
                fixture,
                filter,
                execution,
                json,
            };
            compose_command(workspace, options).await
        }
        Commands::Stats { input, json } => {
            let workspace = load_workspace(&input, engine, config, cli.verbose).await?;
            stats_command(&workspace, json)
        }
        Commands::Template { input } => {
            let workspace = load_workspace(&input, engine, config, cli.verbose).await?;
            println!("{}", workspace.filter_template().await);
            Ok(())
        }
        Commands::Validate { input, output } => {
            let workspace = load_workspace(&input, engine, config, cli.verbose).await?;
            validate_command(&workspace, &output, cli.verbose).await
        }
        Commands::Decompose { input, output } => decompose_command(&input, &output, engine, config).await,
    }
}

/// Snapshots are recognised by their `.json` extension; anything else is SQL
async fn load_workspace(input: &Path, engine: Arc<dyn SqlEngine>, config: Config, verbose: bool) -> Result<Workspace> {
    if verbose {
        eprintln!("{} {}", "Loading workspace from:".cyan(), input.display());
    }

    if is_snapshot(input) {
        let snapshot = WorkspaceSnapshot::from_file(input)
            .with_context(|| format!("Failed to load snapshot {}", input.display()))?;
        return Ok(Workspace::from_snapshot(&snapshot, engine, config)?);
    }

    let sql = std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?;
    Workspace::decompose(&sql, engine, config)
        .await
        .with_context(|| format!("Failed to decompose {}", input.display()))
}

fn is_snapshot(input: &Path) -> bool {
    input
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Filter argument: a readable file, otherwise the JSON text itself
fn read_filter_arg(filter: &str) -> Result<String> {
    let path = Path::new(filter);
    if path.is_file() {
        return std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()));
    }
    Ok(filter.to_string())
}

fn find_fragment(workspace: &Workspace, name: Option<&str>) -> Result<FragmentId> {
    let fragment = match name {
        Some(name) => workspace.fragment_by_name(name),
        None => workspace.main_fragment(),
    };

    fragment.map(|f| f.id()).ok_or_else(|| match name {
        Some(name) => anyhow::anyhow!("Fragment '{}' not found in workspace", name),
        None => anyhow::anyhow!("Workspace has no main fragment"),
    })
}

struct ComposeOptions {
    fragment: Option<String>,
    fixture: Option<PathBuf>,
    filter: Option<String>,
    execution: bool,
    json: bool,
}

/// Compose command - print the composed statement and its parameters
async fn compose_command(mut workspace: Workspace, options: ComposeOptions) -> Result<()> {
    let id = find_fragment(&workspace, options.fragment.as_deref())?;

    if let Some(path) = &options.fixture {
        let body = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        workspace.set_test_data(TestDataFixture::new(body));
    }
    if let Some(filter) = &options.filter {
        workspace.set_filter(read_filter_arg(filter)?);
    }

    let composed = workspace
        .dynamic_sql(
            id,
            Some(workspace.test_data()),
            Some(workspace.filter()),
            options.execution,
        )
        .await;
    let result = match composed {
        Ok(result) => result,
        Err(error) => {
            eprintln!("{} {}", "Error:".red().bold(), composition_failure_message(&error));
            std::process::exit(1);
        }
    };

    if options.json {
        let output = serde_json::json!({
            "sql": result.formatted_sql,
            "params": result.params,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", result.formatted_sql);
    if !result.params.is_empty() {
        eprintln!();
        eprintln!("{}", "Parameters:".bold());
        for (label, value) in result.param_labels.iter().zip(&result.params) {
            eprintln!("  {} = {}", label.cyan(), value);
        }
    }

    Ok(())
}

/// Failure text for a composition error, with the SQL it was composed into
fn composition_failure_message(error: &CompositionError) -> String {
    let diagnostic = error.to_diagnostic();
    let mut message = diagnostic.message.clone();

    if let Some(location) = &diagnostic.location {
        message.push_str(&format!("\n  at {}", location));
    }
    if let Some(sql) = &diagnostic.sql {
        message.push_str(&format!("\n\nComposed SQL:\n{}", sql));
    }
    message
}

/// Stats command - fragment graph statistics
fn stats_command(workspace: &Workspace, json: bool) -> Result<()> {
    let stats = workspace.statistics();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Workspace Statistics".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("  Total models:         {}", stats.total_models);
    println!("  Main queries:         {}", stats.main_queries);
    println!("  CTEs:                 {}", stats.ctes);
    println!("  Max dependency depth: {}", stats.max_dependency_depth);
    println!("  Declared columns:     {}", stats.total_columns);

    if let Some(cycle) = workspace.detect_cycle() {
        println!();
        println!("{} {}", "⚠ Dependency cycle:".yellow().bold(), cycle.join(" -> "));
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
    Ok(())
}

/// Validate command - schema collection over every fragment
async fn validate_command(workspace: &Workspace, output: &Path, verbose: bool) -> Result<()> {
    if verbose {
        eprintln!("{}", "Validating fragments...".cyan());
    }

    let validation = workspace.validate_schemas().await;

    if verbose {
        for fragment in &validation.fragments {
            match &fragment.outcome {
                Ok(tables) => eprintln!("  {} {} ({} tables)", "✓".green(), fragment.fragment, tables.len()),
                Err(message) => eprintln!("  {} {}: {}", "✗".red(), fragment.fragment, message),
            }
        }
    }

    validation.report.save_to_file(output)?;
    if verbose {
        eprintln!("{} {}", "Report saved to:".green(), output.display());
    }

    print_report_summary(&validation.report);

    // Exit with error code if there are errors
    if validation.report.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

/// Decompose command - write a snapshot of the decomposed statement
async fn decompose_command(input: &Path, output: &Path, engine: Arc<dyn SqlEngine>, config: Config) -> Result<()> {
    let sql = std::fs::read_to_string(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let workspace = Workspace::decompose(&sql, engine, config).await?;

    workspace.snapshot().save_to_file(output)?;

    for fragment in workspace.fragments() {
        let dependencies: Vec<&str> = fragment
            .dependencies()
            .iter()
            .filter_map(|&dep| workspace.fragment(dep))
            .map(|dep| dep.name())
            .collect();

        if dependencies.is_empty() {
            println!("  {} {}", fragment.kind(), fragment.name().green());
        } else {
            println!("  {} {} <- {}", fragment.kind(), fragment.name().green(), dependencies.join(", "));
        }
    }

    println!("{} {}", "Snapshot saved to:".green(), output.display());
    Ok(())
}

/// Print report summary to stdout
fn print_report_summary(report: &ValidationReport) {
    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Fragment Validation Report".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Version: {}", report.version);
    println!("Timestamp: {}", report.timestamp);
    println!("Dialect: {:?}", report.dialect);
    println!();

    println!("{}", "Summary:".bold());
    println!(
        "  Fragments: {} checked, {} failed",
        report.summary.fragments_checked, report.summary.fragments_failed
    );
    println!("  Tables:   {}", report.summary.tables_read);
    for fragment in report.failed_fragments() {
        println!("    {} {}", "✗".red(), fragment);
    }

    if report.summary.errors > 0 {
        println!("  Errors:   {}", format!("{}", report.summary.errors).red().bold());
    } else {
        println!("  Errors:   {}", format!("{}", report.summary.errors).green());
    }

    if report.summary.warnings > 0 {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).yellow());
    } else {
        println!("  Warnings: {}", format!("{}", report.summary.warnings).green());
    }
    println!();

    if report.diagnostics.is_empty() {
        println!("{}", "✓ No issues found!".green().bold());
    } else {
        println!("{}", "Diagnostics:".bold());
        for diag in &report.diagnostics {
            let severity_str = match diag.severity {
                Severity::Error => "ERROR".red().bold(),
                Severity::Warn => "WARN".yellow().bold(),
                Severity::Info => "INFO".cyan(),
            };

            println!("  [{}] {}: {}", severity_str, diag.code, diag.message);

            if let Some(loc) = &diag.location {
                println!("    at {}", loc);
            }

            if !diag.impact.is_empty() {
                println!("    Impact: {} dependent fragments", diag.impact.len());
                for fragment in &diag.impact {
                    println!("      - {}", fragment);
                }
            }
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());
}
