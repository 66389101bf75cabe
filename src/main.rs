//! # Travis CI Connector Entry Point
//!
//! `serve` runs the HTTP service (the default), `sync` refreshes one table
//! and prints its rows, `schema` prints the table schemas.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use travis_connector::{
    config::ConfigLoader,
    connectors::{ConnectionData, RefreshRequest, TableId, all_schemas, refresh_table},
    server::run_server,
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "travis-connector", version, about = "Travis CI build history connector")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Refresh one table and print its rows as JSON
    Sync {
        /// Repository in owner/repo form
        #[arg(long)]
        repo: String,
        /// Use travis-ci.com with an access token
        #[arg(long)]
        private: bool,
        /// Row budget for the refresh
        #[arg(long)]
        limit: Option<u64>,
        /// Highest build number from the previous refresh
        #[arg(long)]
        last_record: Option<String>,
        /// Travis access token, required with --private
        #[arg(long, env = "TRAVIS_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// builds, commits or jobs
        #[arg(long, default_value = "builds")]
        table: String,
    },
    /// Print the schema of every table
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;

    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config)
            .await
            .map_err(|err| anyhow::anyhow!("server failed: {err}")),
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&all_schemas())?);
            Ok(())
        }
        Command::Sync {
            repo,
            private,
            limit,
            last_record,
            token,
            table,
        } => {
            let table: TableId = table.parse().map_err(|err: String| anyhow::anyhow!(err))?;
            let request = RefreshRequest {
                connection: ConnectionData {
                    repo_slug: repo,
                    is_private: private,
                    limit,
                },
                table,
                last_record,
                token,
            };

            let outcome = refresh_table(&config.travis, request).await;
            if let Some(reason) = outcome.abort_reason {
                eprintln!("{reason}");
                bail!("refresh of {table} aborted");
            }
            println!("{}", serde_json::to_string_pretty(&outcome.rows)?);
            Ok(())
        }
    }
}
