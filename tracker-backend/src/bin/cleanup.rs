use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracker_db::{ConsolidationSummary, Database, ProximityOptions};

#[derive(Parser)]
#[command(
    name = "tracker-cleanup",
    about = "Consolidate duplicate player sessions in the tracker database",
    version,
    propagate_version = true
)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "DATABASE_PATH", default_value = "server-tracker.db")]
    database: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge sessions sharing server, player and start time
    Exact {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Merge overlapping or nearly adjacent sessions of the same player.
    ///
    /// Sessions chain into one cluster while each starts no later than the
    /// cluster's running end plus the merge gap.
    Proximity {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
        /// Largest gap in milliseconds still bridged between two sessions
        #[arg(long, default_value_t = ProximityOptions::DEFAULT_MERGE_GAP_MS)]
        merge_gap_ms: i64,
    },
}

fn report(action: &str, summary: &ConsolidationSummary) -> anyhow::Result<Value> {
    let mut report = json!({ "action": action });
    if let (Value::Object(fields), Value::Object(counts)) =
        (&mut report, serde_json::to_value(summary)?)
    {
        fields.extend(counts);
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = Database::open(&cli.database)
        .await
        .with_context(|| format!("failed to open database at {}", cli.database))?;

    let output = match cli.command {
        Commands::Exact { dry_run } => {
            let summary = db
                .consolidate_exact_duplicates(dry_run)
                .await
                .context("exact consolidation failed")?;
            report("exact", &summary)?
        }
        Commands::Proximity {
            dry_run,
            merge_gap_ms,
        } => {
            let summary = db
                .consolidate_by_proximity(ProximityOptions {
                    dry_run,
                    merge_gap_ms,
                })
                .await
                .context("proximity consolidation failed")?;
            report("proximity", &summary)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
