//! Granary CLI
//!
//! TigerStyle: Command-line host for Granary grains with explicit error handling.
//!
//! Starts an in-process runtime with the arithmetic grains registered, runs
//! one or more invocations, then shuts the runtime down.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use colored::Colorize;
use granary_core::{init_telemetry, GrainId, GrainKey, GranaryConfig, TelemetryConfig};
use granary_grains::{
    register_arithmetic_grains, CUBE_GRAIN_TYPE, CUBE_METHOD, SQUARE_GRAIN_TYPE, SQUARE_METHOD,
};
use granary_runtime::{Runtime, RuntimeBuilder};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Granary CLI
#[derive(Parser, Debug)]
#[command(name = "granary")]
#[command(about = "Invoke Granary virtual actors from the command line")]
#[command(version)]
struct Cli {
    /// Enable verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Grain key (UUID or string; default: a fresh UUID)
    #[arg(short, long, global = true)]
    key: Option<String>,

    /// Give up on an invocation after this many milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Square one or more integers on a square grain
    Square {
        /// Values to square
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },

    /// Cube one or more integers on a cube grain
    Cube {
        /// Values to cube
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<i64>,
    },

    /// Invoke any method with a raw JSON argument
    Invoke {
        /// Grain type tag
        grain_type: String,

        /// Method selector
        method: String,

        /// JSON argument
        #[arg(allow_hyphen_values = true)]
        argument: String,
    },

    /// List registered grain types
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    init_telemetry(TelemetryConfig::new("granary-cli").with_log_level(level))
        .context("Failed to initialize logging")?;

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GranaryConfig::default(),
    };

    let runtime = register_arithmetic_grains(RuntimeBuilder::new())
        .context("Failed to register grains")?
        .with_config(config)
        .build()
        .context("Failed to start runtime")?;
    debug!(grain_types = ?runtime.grain_types(), "Runtime started");

    let key = parse_key(cli.key.as_deref());
    let timeout = cli.timeout_ms.map(Duration::from_millis);

    let outcome = match cli.command {
        Commands::Square { values } => {
            cmd_power(&runtime, SQUARE_GRAIN_TYPE, SQUARE_METHOD, key, timeout, &values).await
        }
        Commands::Cube { values } => {
            cmd_power(&runtime, CUBE_GRAIN_TYPE, CUBE_METHOD, key, timeout, &values).await
        }
        Commands::Invoke {
            grain_type,
            method,
            argument,
        } => cmd_invoke(&runtime, &grain_type, &method, &argument, key, timeout).await,
        Commands::Types => {
            for grain_type in runtime.grain_types() {
                println!("{}", grain_type);
            }
            Ok(())
        }
    };

    runtime.shutdown().await;
    outcome
}

/// Load and validate a JSON configuration file
fn load_config(path: &Path) -> Result<GranaryConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    GranaryConfig::from_json_str(&text)
        .with_context(|| format!("Invalid config file {}", path.display()))
}

/// UUID keys parse as UUIDs; anything else is a string key
fn parse_key(key: Option<&str>) -> GrainKey {
    match key {
        Some(key) => match Uuid::parse_str(key) {
            Ok(uuid) => GrainKey::Uuid(uuid),
            Err(_) => GrainKey::String(key.to_string()),
        },
        None => GrainKey::random(),
    }
}

async fn cmd_power(
    runtime: &Runtime,
    grain_type: &str,
    method: &str,
    key: GrainKey,
    timeout: Option<Duration>,
    values: &[i64],
) -> Result<()> {
    let mut grain = runtime.grain_by_parts(grain_type, key)?;
    if let Some(timeout) = timeout {
        grain = grain.with_timeout(timeout);
    }

    let mut failures = 0usize;
    for value in values {
        match grain.call::<i64, i64>(method, value).await {
            Ok(result) => println!("{}({}) = {}", method, value, result.to_string().green()),
            Err(e) => {
                failures += 1;
                eprintln!("{}({}) {} {}", method, value, "failed:".red().bold(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} invocations failed", failures, values.len());
    }
    Ok(())
}

async fn cmd_invoke(
    runtime: &Runtime,
    grain_type: &str,
    method: &str,
    argument: &str,
    key: GrainKey,
    timeout: Option<Duration>,
) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(argument)
        .with_context(|| format!("Argument is not valid JSON: {}", argument))?;

    let id = GrainId::new(grain_type, key)?;
    let mut grain = runtime.grain(id.clone());
    if let Some(timeout) = timeout {
        grain = grain.with_timeout(timeout);
    }

    let response = grain
        .invoke(method, Bytes::from(argument.to_string()))
        .await
        .with_context(|| format!("{} on {} failed", method, id))?;

    println!("{}", String::from_utf8_lossy(&response));
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
    fn test_negative_values_parse() {
        let cli = Cli::try_parse_from(["granary", "cube", "-2", "3"]).unwrap();
        match cli.command {
            Commands::Cube { values } => assert_eq!(values, vec![-2, 3]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_key() {
        let uuid = Uuid::new_v4();
        assert_eq!(parse_key(Some(&uuid.to_string())), GrainKey::Uuid(uuid));
        assert_eq!(
            parse_key(Some("alice")),
            GrainKey::String("alice".to_string())
        );
        assert!(matches!(parse_key(None), GrainKey::Uuid(_)));
    }
}
