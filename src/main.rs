//! Cairn CLI entrypoint.
//!
//! This is the main entrypoint for the cairn command-line tool.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use cairn::cli::{Cli, Commands, OutputFormatter, StateCommands};
use cairn::config::{DocumentParser, DocumentValidator, StackDocument};
use cairn::error::{EXIT_FAILURE, Result};
use cairn::graph::GraphBuilder;
use cairn::provider::SimulatedProvider;
use cairn::reconciler::Reconciler;
use cairn::schema::SchemaRegistry;
use cairn::state::{LocalStateStore, StateSnapshot, StateStore};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` wins over `--verbose`. Logs go to stderr so stdout stays
/// parseable.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Main async entry point; returns the process exit code.
async fn run(cli: Cli) -> Result<u8> {
    let formatter = OutputFormatter::new(cli.output);

    match cli.command {
        Commands::Plan {
            desired,
            state,
            detailed,
        } => cmd_plan(&desired, &state, detailed, &formatter).await,
        Commands::Apply {
            desired,
            state,
            workers,
            max_attempts,
            fail_kinds,
            latency_ms,
        } => {
            let mut document = load_document(&desired)?;
            if let Some(workers) = workers {
                document.deployment.max_workers = workers;
            }
            if let Some(attempts) = max_attempts {
                document.deployment.max_attempts = attempts;
            }
            let rehearsal = Rehearsal {
                fail_kinds,
                latency: latency_ms.map(Duration::from_millis),
            };
            cmd_apply(document, &state, rehearsal, &formatter).await
        }
        Commands::Validate { desired } => cmd_validate(&desired, &formatter),
        Commands::Graph { desired } => cmd_graph(&desired, &formatter),
        Commands::Kinds => {
            println!("{}", formatter.format_kinds(&SchemaRegistry::builtin()));
            Ok(0)
        }
        Commands::State { command } => cmd_state(command, &formatter).await,
    }
}

/// Failure injection for the simulated provider.
struct Rehearsal {
    fail_kinds: Vec<String>,
    latency: Option<Duration>,
}

/// Loads a document, reading `.env` from its directory first.
fn load_document(path: &Path) -> Result<StackDocument> {
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let parser = DocumentParser::new().with_base_path(base);
    parser.load_dotenv()?;
    parser.load_with_env(path)
}

async fn load_snapshot(store: &LocalStateStore, stack: &str) -> Result<StateSnapshot> {
    Ok(store
        .load()
        .await?
        .unwrap_or_else(|| StateSnapshot::new(stack)))
}

/// Print the ordered plan.
async fn cmd_plan(
    desired: &Path,
    state: &Path,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let reconciler = Reconciler::new(load_document(desired)?)?;
    let store = LocalStateStore::with_state_path(state);
    let snapshot = load_snapshot(&store, &reconciler.document().stack).await?;

    if let Some(lock) = store.get_lock_info().await? {
        warn!("State is locked by {} ({})", lock.holder, lock.operation);
    }

    let plan = reconciler.plan(&snapshot)?;
    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(0)
}

/// Plan, execute, and write the state file.
async fn cmd_apply(
    document: StackDocument,
    state: &Path,
    rehearsal: Rehearsal,
    formatter: &OutputFormatter,
) -> Result<u8> {
    let reconciler = Reconciler::new(document)?;
    let store = LocalStateStore::with_state_path(state);
    let prior = load_snapshot(&store, &reconciler.document().stack).await?;

    let mut provider = SimulatedProvider::new(reconciler.registry().clone())
        .with_existing(&prior)
        .with_failing_kinds(rehearsal.fail_kinds);
    if let Some(latency) = rehearsal.latency {
        provider = provider.with_latency(latency);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight actions");
            if cancel_tx.send(true).is_err() {
                debug!("Apply already finished, nothing to cancel");
            }
        }
    });

    let outcome = reconciler
        .apply(&store, Arc::new(provider), Some(cancel_rx))
        .await?;

    println!("{}", formatter.format_report(&outcome.report));
    info!("State written to {}", store.state_path().display());

    Ok(if outcome.report.success() { 0 } else { EXIT_FAILURE })
}

/// Validate a document without touching state.
fn cmd_validate(desired: &Path, formatter: &OutputFormatter) -> Result<u8> {
    let document = load_document(desired)?;
    let registry = SchemaRegistry::builtin().extended_with(&document.kinds)?;
    let report = DocumentValidator::new(&registry).validate(&document)?;
    GraphBuilder::new().build(&document.resources)?;

    println!("{}", formatter.format_validation(&report));
    Ok(0)
}

/// Show the evaluation order.
fn cmd_graph(desired: &Path, formatter: &OutputFormatter) -> Result<u8> {
    let reconciler = Reconciler::new(load_document(desired)?)?;
    println!("{}", formatter.format_graph(reconciler.graph()));
    Ok(0)
}

/// Handle state subcommands.
async fn cmd_state(command: StateCommands, formatter: &OutputFormatter) -> Result<u8> {
    match command {
        StateCommands::Show { state } => {
            let store = LocalStateStore::with_state_path(&state);
            match store.load().await? {
                Some(snapshot) => println!("{}", formatter.format_state(&snapshot)),
                None => eprintln!("No state found at {}", state.display()),
            }
            Ok(0)
        }
        StateCommands::Unlock { state } => {
            let store = LocalStateStore::with_state_path(&state);
            let removed = store.force_unlock().await?;
            debug!("Lock file: {}", store.lock_path().display());
            println!("{}", formatter.format_unlock(removed.as_ref()));
            Ok(0)
        }
    }
}
