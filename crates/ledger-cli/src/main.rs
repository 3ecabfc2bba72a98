use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use contracts::RankedEntry;
use ledger_api::{
    clear_ledger, seed_ledger, serve, LeaderboardService, ServiceConfig, SqliteLedgerStore,
    DEFAULT_SEED_COUNT,
};
use ledger_core::QueryService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Paid leaderboard service")]
struct Args {
    /// SQLite file; overrides BIDBOARD_DATABASE_PATH.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Overrides BIDBOARD_BIND_ADDR.
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Replace the ledger with demo entries.
    Seed {
        #[arg(long, default_value_t = DEFAULT_SEED_COUNT)]
        count: usize,
    },
    /// Delete every entry and consumed-transaction record.
    Clear,
    /// Print the ranked leaderboard.
    Leaderboard,
    /// Report which settings are present.
    EnvCheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let mut config = ServiceConfig::from_env().context("invalid configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    match args.command {
        Command::Serve { addr } => {
            let addr = addr.unwrap_or(config.bind_addr);
            let service = LeaderboardService::from_config(&config)
                .context("failed to build leaderboard service")?;
            info!(%addr, database = %config.database_path.display(), "starting server");
            serve(addr, Arc::new(service))
                .await
                .context("server stopped with an error")?;
        }
        Command::Seed { count } => {
            let store = open_store(&config)?;
            let inserted = seed_ledger(&store, count).context("seeding failed")?;
            println!("created {inserted} demo entries");
        }
        Command::Clear => {
            let store = open_store(&config)?;
            let removed = clear_ledger(&store).context("clearing failed")?;
            println!("removed {removed} entries");
        }
        Command::Leaderboard => {
            let store = Arc::new(open_store(&config)?);
            let entries = QueryService::new(store)
                .list_ranked()
                .context("failed to read leaderboard")?;
            print_leaderboard(&entries);
        }
        Command::EnvCheck => {
            let report = config.env_report();
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn open_store(config: &ServiceConfig) -> Result<SqliteLedgerStore> {
    SqliteLedgerStore::open(&config.database_path, config.busy_timeout()).with_context(|| {
        format!(
            "failed to open ledger at {}",
            config.database_path.display()
        )
    })
}

fn print_leaderboard(entries: &[RankedEntry]) {
    if entries.is_empty() {
        println!("leaderboard is empty");
        return;
    }
    for (rank, entry) in entries.iter().enumerate() {
        let decoration = if entry.decoration_image.is_some() || entry.decoration_message.is_some()
        {
            " *"
        } else {
            ""
        };
        println!(
            "{:>3}. {:<24} ${}.{:02} ({} contributions){decoration}",
            rank + 1,
            entry.name,
            entry.amount / 100,
            entry.amount % 100,
            entry.contribution_count,
        );
    }
}
