//! The `ewer` binary: worker and operator front-end for the engine.
//!
//! Selects a store from a connection string, loads a compiled-in demo
//! script, and dispatches one of the engine commands. Any number of
//! `ewer execute` processes may point at the same store; they coordinate
//! through it with no further configuration.

use std::collections::BTreeMap;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ewer_core::task::TaskRegistry;
use ewer_engine::executor::{execute, ExecuteOptions};
use ewer_engine::invalidate::{invalidate, NamePattern};
use ewer_engine::script::load_script;
use ewer_engine::{commands, EngineError};
use ewer_storage::{select, Store};

use crate::demos::Demo;

mod demos;

// Exit code for a signal-driven stop: 128 + SIGINT.
const SIGNAL_EXIT: i32 = 130;

/// Task-parallel computation over a shared result store.
#[derive(Parser)]
#[command(name = "ewer", about = "Task-parallel computation over a shared result store")]
struct Cli {
    /// Store connection string: a directory path, `in-memory`,
    /// `kv://host[:port]/prefix`, or `kv+object://bucket+host[:port]/prefix`.
    #[arg(short = 'w', long, default_value = "ewer-data")]
    workdir: String,

    /// Which built-in script to load (primes, diamond, phased).
    #[arg(long, default_value = "primes")]
    script: String,

    /// Verbose logging (overridden by RUST_LOG).
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop until quiescent or wait cycles exhaust.
    Execute {
        /// Stalled passes tolerated before giving up.
        #[arg(long, default_value_t = 30)]
        wait_cycles: u32,

        /// Seconds slept between stalled passes.
        #[arg(long, default_value_t = 12)]
        wait_cycle_seconds: u64,

        /// Evict in-memory caches after each task (less memory, more I/O).
        #[arg(long)]
        aggressive_unload: bool,

        /// Check task digests before and after every run.
        #[arg(long)]
        debug: bool,

        /// Log task failures and keep scheduling instead of stopping.
        #[arg(long)]
        keep_going: bool,
    },

    /// Classify every task without executing; print counts.
    Status,

    /// Exit 0 iff every task's result is loadable.
    Check,

    /// Block until every task's result is loadable.
    SleepUntil,

    /// Drop the results of tasks matching a name, and of their dependents.
    Invalidate {
        /// `/regex/`, a qualified name, or a bare function name.
        name: String,
    },

    /// Delete store entries not referenced by the current script.
    Cleanup {
        /// Delete every lock entry instead (crashed-worker recovery).
        #[arg(long)]
        locks_only: bool,
    },

    /// Print per-name task counts.
    Count,
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let script = match demos::find(&cli.script) {
        Some(script) => script,
        None => {
            eprintln!(
                "Error: unknown script '{}'; available: {}",
                cli.script,
                demos::NAMES.join(", ")
            );
            return 1;
        }
    };

    let store = match select(&cli.workdir) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open store '{}': {}", cli.workdir, e);
            return 1;
        }
    };

    // The handler flips a flag the scheduler polls between tasks; the
    // worker then releases its lock and exits cleanly.
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::Relaxed);
        }) {
            eprintln!("Error: failed to install signal handler: {}", e);
            return 1;
        }
    }

    let code = match dispatch(&cli.command, script, store.as_ref(), Arc::clone(&shutdown)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };
    store.close();

    if shutdown.load(Ordering::Relaxed) {
        return SIGNAL_EXIT;
    }
    code
}

fn dispatch(
    command: &Commands,
    script: Demo,
    store: &dyn Store,
    shutdown: Arc<AtomicBool>,
) -> Result<i32, EngineError> {
    match command {
        Commands::Execute {
            wait_cycles,
            wait_cycle_seconds,
            aggressive_unload,
            debug,
            keep_going,
        } => {
            let options = ExecuteOptions {
                wait_cycles: *wait_cycles,
                wait_cycle_seconds: *wait_cycle_seconds,
                aggressive_unload: *aggressive_unload,
                debug: *debug,
                keep_going: *keep_going,
            };
            let executed = execute(&script, store, &options, shutdown)?;
            print_counts("Executed", &executed);
            Ok(0)
        }
        Commands::Status => {
            let registry = load_graph(script, store)?;
            let report = commands::status(registry.tasks(), store)?;
            print_status(&report);
            Ok(0)
        }
        Commands::Check => {
            let registry = load_graph(script, store)?;
            if commands::check(registry.tasks(), store)? {
                Ok(0)
            } else {
                Ok(1)
            }
        }
        Commands::SleepUntil => {
            let registry = load_graph(script, store)?;
            commands::sleep_until(registry.tasks(), store, Duration::from_secs(12))?;
            Ok(0)
        }
        Commands::Invalidate { name } => {
            let registry = load_graph(script, store)?;
            let pattern = NamePattern::parse(name)?;
            let removed = invalidate(registry.tasks(), store, &pattern)?;
            if removed.is_empty() {
                println!("No results invalidated.");
            } else {
                print_counts("Invalidated", &removed);
            }
            Ok(0)
        }
        Commands::Cleanup { locks_only } => {
            let removed = if *locks_only {
                commands::cleanup_locks(store)?
            } else {
                let registry = load_graph(script, store)?;
                commands::cleanup(registry.tasks(), store)?
            };
            println!("Removed {} entries", removed);
            Ok(0)
        }
        Commands::Count => {
            let registry = load_graph(script, store)?;
            print_counts("Count", &commands::count(registry.tasks()));
            Ok(0)
        }
    }
}

/// Loads the script once for a non-executing command. A barrier here is
/// fine: the command operates on the graph built so far.
fn load_graph(script: Demo, store: &dyn Store) -> Result<TaskRegistry, EngineError> {
    let mut registry = TaskRegistry::new();
    load_script(&script, &mut registry, store)?;
    Ok(registry)
}

fn print_counts(title: &str, counts: &BTreeMap<String, usize>) {
    println!("{:<48}  {}", "Task name", title);
    println!("{}", "-".repeat(60));
    for (name, count) in counts {
        println!("{:<48}  {}", name, count);
    }
    let total: usize = counts.values().sum();
    println!("{}", "-".repeat(60));
    println!("{:<48}  {}", "Total", total);
}

fn print_status(report: &BTreeMap<String, commands::StateCounts>) {
    println!(
        "{:<40}  {:>8}  {:>6}  {:>8}  {:>6}",
        "Task name", "Waiting", "Ready", "Finished", "Locked"
    );
    println!("{}", "-".repeat(76));
    for (name, states) in report {
        println!(
            "{:<40}  {:>8}  {:>6}  {:>8}  {:>6}",
            name, states.waiting, states.ready, states.finished, states.locked
        );
    }
}
