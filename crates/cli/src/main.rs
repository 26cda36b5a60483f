//! `maestro`: the command-line surface.
//!
//! Two modes: `run` sends a single request and exits (0 on success, 1 on
//! configuration or connection failure, 2 on task-execution failure);
//! `repl` (the default) opens the interactive loop.

mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use maestro_agent::Agent;
use maestro_domain::config::Config;
use maestro_domain::text;
use maestro_llm::build_client;
use maestro_mcp::ConnectionManager;
use maestro_state::StateStore;

/// Maestro, an agent runtime over MCP tool servers.
#[derive(Debug, Parser)]
#[command(name = "maestro", version, about)]
struct Cli {
    /// Path to the config file (default: $MAESTRO_CONFIG or ./config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Resume a specific session id.
    #[arg(long, global = true)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one request, print the answer, exit.
    Run {
        /// The request to process.
        request: String,
    },
    /// Interactive loop (default when no subcommand is given).
    Repl,
    /// Print version information.
    Version,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("maestro=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    if let Some(Command::Version) = cli.command {
        println!("maestro {}", env!("CARGO_PKG_VERSION"));
        return 0;
    }

    // ── Startup: config, text policy, LLM, tool fleet, state ──────
    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    text::install_policy(config.agent.surrogate_policy);

    let llm = match build_client(&config.llm) {
        Ok(llm) => llm,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let manager = match ConnectionManager::connect(&config.connection).await {
        Ok(manager) => Arc::new(manager),
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let store = match StateStore::initialize(&config.agent.state_dir, cli.session.as_deref()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            manager.close().await;
            return 1;
        }
    };

    let mut agent = Agent::new(config.clone(), store, manager.clone(), llm);

    // ── Dispatch ──────────────────────────────────────────────────
    let code = match cli.command {
        Some(Command::Run { request }) => {
            let code = match agent.process_request(&request).await {
                Ok(answer) => {
                    println!("{answer}");
                    if agent.last_turn_failed() {
                        2
                    } else {
                        0
                    }
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    2
                }
            };
            if let Err(e) = agent.close() {
                tracing::warn!(error = %e, "archiving session on exit");
            }
            code
        }
        // The REPL decides between archiving (quit) and pausing (Ctrl-C).
        None | Some(Command::Repl) => match repl::run(&mut agent, &manager, &config).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("error: {e}");
                2
            }
        },
        Some(Command::Version) => 0,
    };

    manager.close().await;
    code
}
