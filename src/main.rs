use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeep::config::{GatekeepConfig, LoggingConfig};
use gatekeep::ratelimit::{get_identifier, Endpoint};

/// Inspect and operate the Gatekeep attempt limiter.
#[derive(Debug, Parser)]
#[command(name = "gatekeep", version, about)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the state file path
    #[arg(long, global = true)]
    store: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check whether an attempt would be allowed
    Check {
        endpoint: Endpoint,
        identifier: String,
    },
    /// Record the outcome of an attempt
    Record {
        endpoint: Endpoint,
        identifier: String,
        /// The attempt failed
        #[arg(long, conflicts_with = "success")]
        failed: bool,
        /// The attempt succeeded
        #[arg(long)]
        success: bool,
    },
    /// Clear the history for one key, or every key with --all
    Reset {
        #[arg(required_unless_present = "all")]
        endpoint: Option<Endpoint>,
        #[arg(required_unless_present = "all")]
        identifier: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Show the persisted record for a key
    Status {
        endpoint: Endpoint,
        identifier: String,
    },
    /// List currently blocked keys
    Violations,
    /// Derive a tracking identifier
    Identify {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        user_id: Option<String>,
    },
    /// List the active policies
    Policies,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatekeepConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(store) = cli.store {
        config.storage.path = store;
    }

    init_tracing(&config.logging);
    debug!(version = env!("CARGO_PKG_VERSION"), "Starting gatekeep");

    let output = match cli.command {
        Command::Identify { email, user_id } => {
            json!({ "identifier": get_identifier(email.as_deref(), user_id.as_deref()) })
        }
        Command::Policies => {
            let registry = config.registry()?;
            let policies: Vec<_> = registry
                .policies()
                .into_iter()
                .map(|p| {
                    json!({
                        "endpoint": p.endpoint,
                        "maxAttempts": p.max_attempts,
                        "windowSecs": p.window.as_secs(),
                        "baseBlockSecs": p.base_block.as_secs(),
                        "maxBlockSecs": p.max_block.as_secs(),
                        "useExponentialBackoff": p.use_exponential_backoff,
                    })
                })
                .collect();
            json!(policies)
        }
        Command::Check { endpoint, identifier } => {
            let engine = config.engine()?;
            serde_json::to_value(engine.check_rate_limit(endpoint, &identifier))?
        }
        Command::Record {
            endpoint,
            identifier,
            failed,
            success,
        } => {
            anyhow::ensure!(failed || success, "one of --failed or --success is required");
            let engine = config.engine()?;
            engine.record_attempt(endpoint, &identifier, success);
            serde_json::to_value(engine.check_rate_limit(endpoint, &identifier))?
        }
        Command::Reset {
            endpoint,
            identifier,
            all,
        } => {
            let engine = config.engine()?;
            if all {
                json!({ "removed": engine.reset_all()? })
            } else {
                let endpoint = endpoint.context("endpoint is required")?;
                let identifier = identifier.context("identifier is required")?;
                engine.reset_rate_limit(endpoint, &identifier);
                json!({ "reset": format!("{}:{}", endpoint, identifier) })
            }
        }
        Command::Status { endpoint, identifier } => {
            let engine = config.engine()?;
            serde_json::to_value(engine.get_record(endpoint, &identifier))?
        }
        Command::Violations => {
            let engine = config.engine()?;
            serde_json::to_value(engine.get_rate_limit_violations())?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    info!("Done");
    Ok(())
}

/// Initialize tracing to stderr, honouring `RUST_LOG` when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
