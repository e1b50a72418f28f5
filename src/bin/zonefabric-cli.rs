//! zonefabric CLI
//!
//! Operator-facing companion to the `zonefabricd` daemon: inspects local
//! configuration and exercises the `/zones` HTTP passthrough without
//! bringing up a full agent.

use clap::{Parser, Subcommand};
use zonefabric::fabric::ZoneManagerConfig;

/// zonefabric - command-line interface for the zone fabric daemon
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Prints the development configuration preset for `zone_name`, as JSON.
    Config {
        /// Dotted zone name the printed configuration applies to.
        zone_name: String,
    },
    /// Queries a running daemon's `/zones/info` endpoint.
    Info {
        /// Base URL of the daemon's HTTP passthrough, e.g. `http://localhost:8080`.
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Config { zone_name }) => {
            let config = ZoneManagerConfig::builder(&zone_name).build()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(Command::Info { url }) => {
            let response = reqwest::get(format!("{url}/zones/info")).await?;
            let body = response.text().await?;
            println!("{body}");
        }
        None => println!("zonefabric {}", env!("CARGO_PKG_VERSION")),
    }

    Ok(())
}
