//! 🔧 App Configuration — the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." — every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment. Three layers, lowest to highest:
//!   1. `DDBX_*` environment variables (`DDBX_RUNTIME__WORKERS=8` → `runtime.workers`)
//!   2. an optional TOML file
//!   3. command-line flags, passed in as [`ConfigOverrides`]
//!
//! ```toml
//! [table]
//! name = "orders"
//! region = "us-east-1"
//!
//! [runtime]
//! workers = 8
//! capacity_units = 400
//!
//! [transfer.Export]
//! destination = "s3://backups/orders/"
//! records_per_file = 10000
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::Location;
pub use crate::governor::RefillPolicy;
pub use crate::retry::{Backoff, RetryPolicy};

/// 📦 The AppConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub table: TableConfig,
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub transfer: TransferConfig,
}

/// 🗄️ Which table, and where it lives.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TableConfig {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// ⚙️ How hard to push. `capacity_units` has no default on purpose: nobody gets to
/// spend a table's throughput without saying how much.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default = "default_workers")]
    pub workers: u32,
    /// 💸 units per second, shared by every worker
    pub capacity_units: u64,
    #[serde(default)]
    pub refill_policy: RefillPolicy,
    /// ⏳ how often a gated worker re-checks an empty budget
    #[serde(default = "default_admission_poll_ms")]
    pub admission_poll_ms: u64,
    /// 📭 how long an import worker waits on an empty queue before calling it a day
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,
    #[serde(default = "default_progress")]
    pub progress: bool,
}

fn default_workers() -> u32 {
    4
}

fn default_admission_poll_ms() -> u64 {
    1000
}

fn default_dequeue_timeout_ms() -> u64 {
    2000
}

fn default_progress() -> bool {
    true
}

/// 🔄 One retry policy per class of remote call.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::reads")]
    pub reads: RetryPolicy,
    #[serde(default = "RetryPolicy::writes")]
    pub writes: RetryPolicy,
    #[serde(default = "RetryPolicy::uploads")]
    pub uploads: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            reads: RetryPolicy::reads(),
            writes: RetryPolicy::writes(),
            uploads: RetryPolicy::uploads(),
        }
    }
}

/// 🧭 Which way the data flows. Externally tagged: `[transfer.Export]` or `[transfer.Import]`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub enum TransferConfig {
    // -- env vars arrive lowercased, hence the aliases
    #[serde(alias = "export")]
    Export(ExportConfig),
    #[serde(alias = "import")]
    Import(ImportConfig),
}

/// 📤 Table → files.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ExportConfig {
    /// local directory or `s3://bucket/prefix`
    pub destination: String,
    #[serde(default = "default_records_per_file")]
    pub records_per_file: usize,
    /// 📁 where files wait before upload when the destination is a bucket
    #[serde(default = "std::env::temp_dir")]
    pub staging_dir: PathBuf,
}

fn default_records_per_file() -> usize {
    1024
}

/// 📥 Files → table.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// local file, local directory, or `s3://bucket/prefix`
    pub source: String,
    #[serde(default)]
    pub write_mode: WriteMode,
}

/// ✍️ One `PutItem` per record, or up to 25 records per `BatchWriteItem`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Single,
    #[default]
    Batch,
}

impl ExportConfig {
    pub(crate) fn destination(&self) -> anyhow::Result<Location> {
        Location::parse(&self.destination)
    }
}

impl ImportConfig {
    pub(crate) fn source(&self) -> anyhow::Result<Location> {
        Location::parse(&self.source)
    }
}

impl AppConfig {
    /// 🚦 Reject configurations that would either do nothing or never finish.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.table.name.trim().is_empty() {
            anyhow::bail!("💀 table.name is empty. Transferring to/from nowhere is very fast and very useless.");
        }
        if self.runtime.workers == 0 {
            anyhow::bail!("💀 runtime.workers = 0. Zero workers do zero work. Ask any manager.");
        }
        if self.runtime.capacity_units == 0 {
            anyhow::bail!(
                "💀 runtime.capacity_units = 0. With no budget every worker waits forever, \
                 politely, at the door."
            );
        }
        if !(1..=1000).contains(&self.runtime.admission_poll_ms) {
            anyhow::bail!(
                "💀 runtime.admission_poll_ms = {}. Gated workers re-check the budget at least \
                 once a second, so this must be between 1 and 1000. Zero is a busy loop \
                 wearing a config hat.",
                self.runtime.admission_poll_ms
            );
        }
        match &self.transfer {
            TransferConfig::Export(export) => {
                if export.records_per_file == 0 {
                    anyhow::bail!("💀 transfer.Export.records_per_file = 0. A file of nothing, forever.");
                }
                if export.destination.trim().is_empty() {
                    anyhow::bail!("💀 transfer.Export.destination is empty.");
                }
                export.destination()?;
            }
            TransferConfig::Import(import) => {
                if import.source.trim().is_empty() {
                    anyhow::bail!("💀 transfer.Import.source is empty.");
                }
                import.source()?;
            }
        }
        Ok(())
    }
}

/// 🎛️ Values from the command line. `None` means "leave the lower layers alone".
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub table_name: Option<String>,
    pub region: Option<String>,
    pub workers: Option<u32>,
    pub capacity_units: Option<u64>,
    pub transfer: Option<TransferOverride>,
}

/// 🧭 The subcommand picks the direction; its flags fill in that direction's section.
#[derive(Debug, Clone)]
pub enum TransferOverride {
    Export {
        destination: Option<String>,
        records_per_file: Option<usize>,
        staging_dir: Option<PathBuf>,
    },
    Import {
        source: Option<String>,
        write_mode: Option<WriteMode>,
    },
}

impl TransferOverride {
    fn tag(&self) -> &'static str {
        match self {
            TransferOverride::Export { .. } => "Export",
            TransferOverride::Import { .. } => "Import",
        }
    }
}

fn set<T: Serialize>(figment: Figment, key: &str, value: Option<T>) -> Figment {
    match value {
        Some(value) => figment.merge(Serialized::default(key, value)),
        None => figment,
    }
}

/// 🚀 Load the config — env vars, then the optional TOML file, then the overrides.
///
/// 💀 Errors if the result doesn't parse, or if the file asks for one direction and
/// the command line for the other.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("DDBX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    if let Some(transfer) = &overrides.transfer {
        let configured: Vec<String> = config
            .find_value("transfer")
            .ok()
            .and_then(|value| value.into_dict())
            .map(|dict| dict.into_keys().collect())
            .unwrap_or_default();
        if let Some(other) = configured
            .iter()
            .find(|key| !key.eq_ignore_ascii_case(transfer.tag()))
        {
            anyhow::bail!(
                "💀 The configuration says transfer.{other} but the command says {}. \
                 Pick a lane.",
                transfer.tag().to_lowercase()
            );
        }
    }

    let config = set(config, "table.name", overrides.table_name);
    let config = set(config, "table.region", overrides.region);
    let config = set(config, "runtime.workers", overrides.workers);
    let config = set(config, "runtime.capacity_units", overrides.capacity_units);
    let config = match overrides.transfer {
        Some(TransferOverride::Export {
            destination,
            records_per_file,
            staging_dir,
        }) => {
            let config = set(config, "transfer.Export.destination", destination);
            let config = set(config, "transfer.Export.records_per_file", records_per_file);
            set(config, "transfer.Export.staging_dir", staging_dir)
        }
        Some(TransferOverride::Import { source, write_mode }) => {
            let config = set(config, "transfer.Import.source", source);
            set(config, "transfer.Import.write_mode", write_mode)
        }
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}', environment variables (DDBX_*) \
             and command-line flags. The file exists in our hearts, but apparently not on disk.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (DDBX_*) and \
                 command-line flags. No file was provided — this one's all on you. Classic."
            .to_string(),
    };
    config.extract().context(context_msg)
}
