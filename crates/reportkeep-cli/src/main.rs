//! reportkeep - inspect and maintain an on-disk report store.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use reportkeep_core::domain::format_size;
use reportkeep_core::{Depot, DepotBuilder, StoreConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reportkeep")]
#[command(author, version, about = "Local QA report store maintenance", long_about = None)]
struct Cli {
    /// Store directory (overrides REPORTKEEP_ROOT)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show blob usage against capacity, with a per-report breakdown
    Usage {
        /// Print the overview as JSON
        #[arg(long)]
        json: bool,
    },

    /// List submitted reports
    List,

    /// Print a submitted report as indented JSON
    Export {
        tester: String,
        pack: String,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Delete a submitted report, its images and its draft
    Delete { tester: String, pack: String },

    /// Delete images no report references
    Gc {
        /// Keep running on the configured period until interrupted
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if let Some(root) = cli.root {
        config = config.with_root(root);
    }
    if config.root.is_none() {
        bail!("no store directory: pass --root or set REPORTKEEP_ROOT");
    }

    let depot = DepotBuilder::new(config)
        .build()
        .await
        .context("opening store")?;

    match cli.command {
        Commands::Usage { json } => usage(&depot, json).await,
        Commands::List => list(&depot).await,
        Commands::Export {
            tester,
            pack,
            output,
        } => export(&depot, &tester, &pack, output).await,
        Commands::Delete { tester, pack } => {
            let blobs = depot.delete_report(&tester, &pack).await?;
            println!("deleted {tester}/{pack} ({blobs} images)");
            Ok(())
        }
        Commands::Gc { watch } => gc(&depot, watch).await,
    }
}

async fn usage(depot: &Depot, json: bool) -> Result<()> {
    let overview = depot.quota().overview(depot.documents()).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }
    let usage = overview.usage;
    println!(
        "images: {} of {} ({:.1}%)",
        format_size(usage.used),
        format_size(usage.total),
        usage.used_percent()
    );
    for report in &overview.reports {
        println!(
            "  {:<40} {:>12}  (json {}, images {})",
            report.key,
            format_size(report.total_bytes()),
            format_size(report.json_bytes),
            format_size(report.image_bytes)
        );
    }
    Ok(())
}

async fn list(depot: &Depot) -> Result<()> {
    for (_, report) in depot.documents().enumerate().await? {
        let images: usize = report.issues.iter().map(|i| i.image_ids.len()).sum();
        let submitted = report
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}\t{}\t{}\tissues={}\timages={}\t{}",
            report.tester_name,
            report.pack_name,
            report.report_id,
            report.issues.len(),
            images,
            submitted
        );
    }
    Ok(())
}

async fn export(depot: &Depot, tester: &str, pack: &str, output: Option<PathBuf>) -> Result<()> {
    let report = depot
        .documents()
        .get_for(tester, pack)
        .await
        .with_context(|| format!("no submitted report for {tester}/{pack}"))?;
    let json = report.to_pretty_json()?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}

async fn gc(depot: &Depot, watch: bool) -> Result<()> {
    if !watch {
        let report = depot.collector().collect_once().await?;
        println!(
            "scanned {}, orphaned {}, deleted {}, failed {}, swept {}",
            report.scanned, report.orphaned, report.deleted, report.failed, report.swept
        );
        return Ok(());
    }

    let gc = depot.spawn_gc();
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("stopping orphan collector");
    gc.shutdown_and_join().await;
    Ok(())
}
