//! Operator CLI for the range shortener.
//!
//! Inspects and seeds the counter range ledger and converts between counters
//! and short codes without going through the HTTP API.
//!
//! # Usage
//!
//! ```bash
//! # Ranges that can still issue codes
//! cargo run --bin admin -- ranges list
//!
//! # Every recorded range, exhausted ones included
//! cargo run --bin admin -- ranges list --all
//!
//! # Seed the ledger ahead of the first server start
//! cargo run --bin admin -- ranges seed --yes
//!
//! # Counter <-> code
//! cargo run --bin admin -- code encode 42
//! cargo run --bin admin -- code decode x7Gk2-0
//!
//! # Check database connection
//! cargo run --bin admin -- db check
//! ```
//!
//! Reads the same environment as the server (see `range_shortener::config`).

use range_shortener::config::{self, Config, mask_connection_string};
use range_shortener::domain::allocation::CodeSpace;
use range_shortener::domain::entities::CounterRange;
use range_shortener::domain::repositories::RangeLedger;
use range_shortener::infrastructure::persistence::PgRangeLedger;
use range_shortener::server::connect_pool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use dialoguer::Confirm;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or seed the counter range ledger
    Ranges {
        #[command(subcommand)]
        action: RangesAction,
    },

    /// Convert between counters and short codes
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum RangesAction {
    /// List ranges with their watermarks
    List {
        /// Include exhausted ranges
        #[arg(short, long)]
        all: bool,
    },

    /// Partition the code space into ranges (empty ledger only)
    Seed {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum CodeAction {
    /// Encode a counter into its short code
    Encode { counter: u64 },

    /// Decode a short code back into its counter
    Decode { code: String },
}

#[derive(Subcommand)]
enum DbAction {
    /// Check database connection
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config = config::load_from_env()?;

    match cli.command {
        Commands::Ranges { action } => {
            let pool = connect_pool(&config).await?;
            handle_ranges_action(action, &config, pool).await?
        }
        Commands::Code { action } => handle_code_action(action, &config.code_space()?)?,
        Commands::Db { action } => handle_db_action(action, &config).await?,
    }

    Ok(())
}

async fn handle_ranges_action(action: RangesAction, config: &Config, pool: PgPool) -> Result<()> {
    let space = config.code_space()?;
    let ledger = PgRangeLedger::new(Arc::new(pool));

    match action {
        RangesAction::List { all } => list_ranges(&ledger, &space, all).await,
        RangesAction::Seed { yes } => seed_ranges(&ledger, config, &space, yes).await,
    }
}

/// Prints the ledger as a table.
///
/// ```text
/// Counter Ranges
///
///   Start            End              Last used        Remaining
///   ────────────────────────────────────────────────────────────────────
///   0                1000000000       41               999999958
///   1000000000       2000000000       -                1000000000
/// ```
async fn list_ranges(ledger: &PgRangeLedger, space: &CodeSpace, all: bool) -> Result<()> {
    println!("{}", "Counter Ranges".bright_blue().bold());
    println!();

    let ranges: Vec<CounterRange> = if all {
        ledger.list_ranges().await
    } else {
        ledger.load_active_ranges(space.size()).await
    }
    .context("Failed to read range ledger")?;

    if ranges.is_empty() {
        println!("{}", "  No ranges found".yellow());
        println!();
        println!(
            "  Seed them with: {} admin ranges seed",
            "cargo run --bin".bright_cyan()
        );
        return Ok(());
    }

    println!(
        "  {:<16} {:<16} {:<16} {:<16}",
        "Start".bright_white().bold(),
        "End".bright_white().bold(),
        "Last used".bright_white().bold(),
        "Remaining".bright_white().bold()
    );
    println!("  {}", "─".repeat(68).bright_black());

    let mut remaining_total: u64 = 0;
    for range in &ranges {
        let remaining = range.remaining(space.size());
        remaining_total = remaining_total.saturating_add(remaining);

        let last_used = range
            .last_used
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let remaining_cell = if remaining == 0 {
            "EXHAUSTED".red()
        } else {
            remaining.to_string().green()
        };

        println!(
            "  {:<16} {:<16} {:<16} {}",
            range.start.to_string().bright_black(),
            range.end.to_string().bright_black(),
            last_used.cyan(),
            remaining_cell
        );
    }

    println!();
    println!(
        "  Ranges: {}   Codes left: {} of {}",
        ranges.len().to_string().bright_white().bold(),
        remaining_total.to_string().bright_white().bold(),
        space.size()
    );
    println!();

    Ok(())
}

async fn seed_ranges(
    ledger: &PgRangeLedger,
    config: &Config,
    space: &CodeSpace,
    skip_confirm: bool,
) -> Result<()> {
    println!("{}", "Seed Counter Ranges".bright_blue().bold());
    println!();

    let existing = ledger
        .count_ranges()
        .await
        .context("Failed to read range ledger")?;
    let planned = space.size().div_ceil(config.range_size);

    println!("  Code space:  {}", space.size().to_string().cyan());
    println!("  Range size:  {}", config.range_size.to_string().cyan());
    println!("  Ranges:      {}", planned.to_string().cyan());
    println!("  Recorded:    {}", existing.to_string().cyan());
    println!();

    if existing > 0 {
        println!(
            "{}",
            "  Ledger already seeded; refusing to partition it again".red()
        );
        println!();
        println!(
            "  Inspect it with: {} admin ranges list --all",
            "cargo run --bin".bright_cyan()
        );
        anyhow::bail!("Range ledger already holds {} ranges", existing);
    }

    if !skip_confirm {
        let confirmed = Confirm::new()
            .with_prompt("Seed the range ledger?")
            .default(true)
            .interact()?;

        if !confirmed {
            println!("{}", "Cancelled".red());
            return Ok(());
        }
    }

    let ranges = ledger
        .seed_all_ranges(config.range_size, space.size())
        .await
        .context("Failed to seed range ledger")?;

    println!();
    println!(
        "{} {} ranges recorded",
        "Done:".green().bold(),
        ranges.len().to_string().bright_white().bold()
    );
    println!();

    Ok(())
}

fn handle_code_action(action: CodeAction, space: &CodeSpace) -> Result<()> {
    match action {
        CodeAction::Encode { counter } => {
            if counter >= space.size() {
                anyhow::bail!(
                    "Counter {} is outside the code space (size {})",
                    counter,
                    space.size()
                );
            }
            println!("{}", space.encode(counter).bright_yellow().bold());
        }
        CodeAction::Decode { code } => {
            let counter = space
                .decode(&code)
                .with_context(|| format!("'{}' is not a valid short code", code))?;
            println!("{}", counter.to_string().bright_yellow().bold());
        }
    }

    Ok(())
}

async fn handle_db_action(action: DbAction, config: &Config) -> Result<()> {
    match action {
        DbAction::Check => {
            println!("{}", "Database Check".bright_blue().bold());
            println!();
            println!("  URL: {}", mask_connection_string(&config.database_url));

            let pool = connect_pool(config).await?;
            let version: String = sqlx::query_scalar("SELECT version()")
                .fetch_one(&pool)
                .await
                .context("Failed to query server version")?;

            let ledger_ready: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'counter_ranges')",
            )
            .fetch_one(&pool)
            .await?;

            println!("  {}", "Connection OK".green().bold());
            println!("  Server: {}", version.bright_black());
            if ledger_ready {
                println!("  Range ledger: {}", "present".green());
            } else {
                println!(
                    "  Range ledger: {} (start the server to run migrations)",
                    "missing".yellow()
                );
            }
            println!();
        }
    }

    Ok(())
}
