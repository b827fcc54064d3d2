//! 🚀 ddbx-cli — the front door, the bouncer, the maitre d' of ddbx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that parses flags, loads config,
//! sets up logging, and then lets the library do the heavy lifting.
//! Like a manager. 🦆
//!
//! ```text
//! ddbx export -t orders -c 400 -p 8 -d s3://backups/orders/
//! ddbx import -t orders -c 400 -p 8 -s ./dump --write-mode single
//! ddbx --config ddbx.toml export
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use ddbx::app_config::{ConfigOverrides, TransferOverride, WriteMode};
use ddbx::{RetryExhausted, TransferReport};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// 🚚 Rate-limited bulk export/import between a DynamoDB table and JSON-lines files.
#[derive(Debug, Parser)]
#[command(name = "ddbx", version, about)]
struct Cli {
    /// 🔧 TOML config file; flags override it, it overrides DDBX_* env vars
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📤 Table → files
    Export(ExportArgs),
    /// 📥 Files → table
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// AWS region
    #[arg(short = 'r', long)]
    region: Option<String>,
    /// table name
    #[arg(short = 't', long)]
    table: Option<String>,
    /// number of workers (export: also the number of scan partitions)
    #[arg(short = 'p', long)]
    parallel: Option<u32>,
    /// capacity units per second, shared by all workers
    #[arg(short = 'c', long)]
    capacity: Option<u64>,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// records per output file
    #[arg(short = 's', long)]
    records_per_file: Option<usize>,
    /// local directory or s3://bucket/prefix
    #[arg(short = 'd', long)]
    destination: Option<String>,
    /// where files wait before upload to a bucket
    #[arg(long)]
    staging_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[command(flatten)]
    common: CommonArgs,
    /// local file, local directory, or s3://bucket/prefix
    #[arg(short = 's', long)]
    source: Option<String>,
    #[arg(long, value_enum)]
    write_mode: Option<WriteModeArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum WriteModeArg {
    Single,
    Batch,
}

impl From<WriteModeArg> for WriteMode {
    fn from(arg: WriteModeArg) -> Self {
        match arg {
            WriteModeArg::Single => WriteMode::Single,
            WriteModeArg::Batch => WriteMode::Batch,
        }
    }
}

impl Command {
    fn into_overrides(self) -> ConfigOverrides {
        let (common, transfer) = match self {
            Command::Export(args) => (
                args.common,
                TransferOverride::Export {
                    destination: args.destination,
                    records_per_file: args.records_per_file,
                    staging_dir: args.staging_dir,
                },
            ),
            Command::Import(args) => (
                args.common,
                TransferOverride::Import {
                    source: args.source,
                    write_mode: args.write_mode.map(WriteMode::from),
                },
            ),
        };
        ConfigOverrides {
            table_name: common.table,
            region: common.region,
            workers: common.parallel,
            capacity_units: common.capacity,
            transfer: Some(transfer),
        }
    }
}

/// 🚀 main() — where it all begins. The genesis. The big bang.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Print the receipt, or the error chain (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config_file = match &cli.config {
        Some(path) => {
            let exists = path.try_exists().with_context(|| {
                format!(
                    "💀 Couldn't check whether the configuration file exists. If it's a relative \
                     path, maybe pwd isn't what you think it is. Was checking here: '{}'",
                    path.display()
                )
            })?;
            if !exists {
                error!("💀 Configuration file '{}' does not exist", path.display());
                std::process::exit(1);
            }
            Some(path.as_path())
        }
        None => None,
    };

    let app_config = match ddbx::app_config::load_config(config_file, cli.command.into_overrides()) {
        Ok(app_config) => app_config,
        Err(err) => exit_with(&err),
    };

    match ddbx::run(app_config).await {
        Ok(report) => {
            println!("{}", summary_table(&report));
            info!("✅ All done");
            Ok(())
        }
        Err(err) => exit_with(&err),
    }
}

/// 💀 Peel the onion of sadness, one layer at a time, then leave with exit code 1.
fn exit_with(err: &anyhow::Error) -> ! {
    error!("💀 error: {}", err);
    for cause in err.chain().skip(1) {
        error!("⚠️  cause: {}", cause);
    }
    if let Some(exhausted) = err.downcast_ref::<RetryExhausted>() {
        error!(
            "🔧 hint: '{}' gave up after {} attempts. If the table is throttling, lower \
             --capacity or raise the table's provisioned throughput.",
            exhausted.operation, exhausted.attempts
        );
    }
    std::process::exit(1);
}

/// 🧾 One row per worker, one row of totals.
fn summary_table(report: &TransferReport) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "worker",
        "records",
        "requests",
        "capacity units",
        "retries",
        "files",
    ]);
    let right = |value: String| Cell::new(value).set_alignment(CellAlignment::Right);
    for worker in &report.workers {
        table.add_row(vec![
            right(worker.worker_id.to_string()),
            right(worker.records.to_string()),
            right(worker.requests.to_string()),
            right(worker.capacity_units.to_string()),
            right(worker.retries.to_string()),
            right(worker.files.len().to_string()),
        ]);
    }
    table.add_row(vec![
        Cell::new(format!("{} total", report.direction)),
        right(report.total_records().to_string()),
        right(report.total_requests().to_string()),
        right(report.total_capacity_units().to_string()),
        right(report.total_retries().to_string()),
        right(report.total_files().to_string()),
    ]);
    table.add_row(vec![
        Cell::new("elapsed"),
        right(format!("{:.1}s", report.elapsed.as_secs_f64())),
    ]);
    table
}
