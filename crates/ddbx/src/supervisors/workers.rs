//! 🧵 Workers: the ones who actually move the records while the Supervisor takes all
//! the credit in the sprint retro.
//!
//! 📤 [`ExportWorker`] owns one partition of the table and scans it into files.
//! 📥 [`ImportWorker`] pulls from the shared queue and writes into the table.
//!
//! Both spend from the same [`RateGovernor`](crate::governor::RateGovernor) and wrap
//! every remote call in a [`RetryPolicy`](crate::retry::RetryPolicy). Neither knows
//! the other exists.
//!
//! ⚠️ "If you're reading this, the code review went poorly."

use anyhow::Result;
use serde::Serialize;
use tokio::task::JoinHandle;

mod export_worker;
mod import_worker;

pub(crate) use export_worker::ExportWorker;
pub(crate) use import_worker::{ImportWorker, RecordWriter};

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" — Seinfeld, on Rust
pub(crate) trait Worker {
    /// 🚀 Start the worker. The handle resolves to what it did, or why it stopped.
    fn start(self) -> JoinHandle<Result<WorkerReport>>;
}

/// 🧾 What one worker did before it went home.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker_id: u32,
    /// 📄 records read (export) or written (import)
    pub records: u64,
    /// 📡 billed operations that succeeded: scan pages, puts, batch puts
    pub requests: u64,
    /// 💸 units debited from the shared budget
    pub capacity_units: u64,
    /// 🔄 failed attempts that a later attempt made up for
    pub retries: u64,
    /// 📦 files this worker produced (export) or consumed (import)
    pub files: Vec<String>,
}

impl WorkerReport {
    pub(crate) fn new(worker_id: u32) -> Self {
        Self {
            worker_id,
            ..Self::default()
        }
    }
}
