use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use voter_linkage::{
    import_extract, last_report, list_batches, list_reviews, open_database, run_pipeline,
    PipelineConfig, SourceSystem, CONFIG_ENV_VAR,
};

#[derive(Parser)]
#[command(name = "voter-linkage", version, about = "Link voter-file and donation extracts to resolved individuals and addresses")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "VOTER_LINKAGE_DB", default_value = "linkage.db")]
    db: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(long, global = true, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,

    /// Store a raw extract (re-importing the same file is a no-op)
    Import {
        /// voter | donation
        source: String,
        path: PathBuf,
    },

    /// Run normalize → resolve → link → validate → commit over the latest batches
    Run {
        /// Date used for link validity intervals (YYYY-MM-DD), defaults to today
        #[arg(long)]
        as_of: Option<String>,
    },

    /// Show the validation report of the most recent run
    Report,

    /// List records queued for manual review
    Review,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    info!("voter-linkage v{}", voter_linkage::VERSION);

    match cli.command {
        Command::Init => {
            open_database(&cli.db)
                .with_context(|| format!("Failed to initialize {}", cli.db.display()))?;
            println!("✓ Database initialized with WAL mode: {}", cli.db.display());
        }
        Command::Import { source, path } => {
            let source = match SourceSystem::parse(&source) {
                Some(source) => source,
                None => bail!("Unknown source '{}': expected voter or donation", source),
            };
            let mut conn = open_database(&cli.db)?;
            let summary = import_extract(&mut conn, source, &path)
                .with_context(|| format!("Failed to import {}", path.display()))?;

            println!("📂 {} extract: {}", source.name(), path.display());
            println!("   Batch:    {}", summary.batch_id);
            println!("   Rows:     {}", summary.rows);
            if summary.inserted == 0 {
                println!("   ⏭️  Already imported, nothing stored");
            } else {
                println!("   Inserted: {}", summary.inserted);
            }
            if !summary.unknown_columns.is_empty() {
                println!("   ⚠️  Unrecognized columns (passed through): {}", summary.unknown_columns.join(", "));
            }
            if summary.ragged_rows > 0 {
                println!("   ⚠️  {} row(s) with a different cell count than the header", summary.ragged_rows);
            }
        }
        Command::Run { as_of } => {
            let as_of = match as_of {
                Some(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                    .with_context(|| format!("Invalid --as-of date '{}'", s))?,
                None => Utc::now().date_naive(),
            };
            let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
            let mut conn = open_database(&cli.db)?;
            let summary = run_pipeline(&mut conn, &config, as_of).context("Pipeline run failed")?;

            println!("🔁 Run {} ({})", summary.run_id, summary.status.as_str());
            println!("   Voters:    {}", summary.voters);
            println!("   Donations: {}", summary.donations);
            println!("   Skipped:   {} malformed row(s)", summary.malformed_rows);
            println!(
                "   Geocodes:  {} attached, {} retained, {} upgraded, {} rejected",
                summary.geocodes.attached,
                summary.geocodes.retained,
                summary.geocodes.upgraded,
                summary.geocodes.rejected
            );
            println!("✅ {}", summary.report.summary());
        }
        Command::Report => {
            let conn = open_database(&cli.db)?;
            match last_report(&conn)? {
                Some((run, report)) => {
                    println!("📊 Run {} ({}), as of {}", run.run_id, run.status.as_str(), run.as_of);
                    println!("   {}", report.summary());
                    println!("\n   Tier breakdown:");
                    for tier in &report.tiers {
                        println!(
                            "   {:<9} {:<26} {:>7} ({:.1}%)",
                            tier.source.code(),
                            tier.method.as_str(),
                            tier.count,
                            tier.rate * 100.0
                        );
                    }
                    println!("\n   Table deltas:");
                    for delta in &report.table_deltas {
                        println!(
                            "   {:<22} {:>8} → {:>8} ({:+})",
                            delta.table, delta.previous, delta.current, delta.delta
                        );
                    }
                    if !report.findings.is_empty() {
                        println!("\n   Findings:");
                        for finding in &report.findings {
                            println!("   [{:?}] {}: {}", finding.severity, finding.check, finding.message);
                        }
                    }
                }
                None => println!("No runs yet"),
            }
            println!("\n   Batches:");
            for batch in list_batches(&conn)? {
                println!(
                    "   {} {} {} ({} rows)",
                    batch.source.code(),
                    batch.imported_at.format("%Y-%m-%d %H:%M"),
                    batch.source_file,
                    batch.row_count
                );
            }
        }
        Command::Review => {
            let conn = open_database(&cli.db)?;
            let reviews = list_reviews(&conn)?;
            if reviews.is_empty() {
                println!("✓ Review queue is empty");
            }
            for item in reviews {
                println!(
                    "🔎 {} {}: {} [{}]",
                    item.source.code(),
                    item.record_key,
                    item.reason,
                    item.competing.join(", ")
                );
            }
        }
    }

    Ok(())
}
