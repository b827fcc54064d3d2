// ai
//! 📤 ExportWorker — one partition in, a handful of files out.
//!
//! 🎬 *[the worker is handed a slice number and a bucket of shared patience]*
//! *[it waits its turn, fetches a page, pays the bill, writes the rows]*
//! *[repeat until the table has nothing left to say]*
//!
//! Per page: `admit()` → `scan_partition` (retried) → `consume(billed units)` →
//! write every record through the rotator. The continuation token only moves forward
//! after a page has been fully written, so within a partition the file order is the
//! scan order.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{Worker, WorkerReport};
use crate::backends::{RecordStore, RecordStoreBackend};
use crate::common::{ContinuationToken, Partition};
use crate::governor::RateGovernor;
use crate::progress::TransferProgress;
use crate::retry::RetryPolicy;
use crate::rotator::OutputRotator;

#[derive(Debug)]
pub(crate) struct ExportWorker {
    partition: Partition,
    store: RecordStoreBackend,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    rotator: OutputRotator,
    progress: Arc<TransferProgress>,
}

impl ExportWorker {
    pub(crate) fn new(
        partition: Partition,
        store: RecordStoreBackend,
        governor: Arc<RateGovernor>,
        retry: RetryPolicy,
        rotator: OutputRotator,
        progress: Arc<TransferProgress>,
    ) -> Self {
        Self {
            partition,
            store,
            governor,
            retry,
            rotator,
            progress,
        }
    }

    async fn run(self) -> Result<WorkerReport> {
        let ExportWorker {
            partition,
            store,
            governor,
            retry,
            mut rotator,
            progress,
        } = self;
        let mut report = WorkerReport::new(partition.index);
        let mut token: Option<ContinuationToken> = None;
        info!(worker = partition.index, %partition, "📤 export worker starting");

        loop {
            governor.admit().await;
            let store = &store;
            let start = token.clone();
            let page = retry
                .run("scan", move || store.scan_partition(partition, start.clone()))
                .await
                .with_context(|| format!("💀 scanning partition {partition} failed"))?;

            report.requests += 1;
            report.retries += u64::from(page.attempts - 1);
            let page = page.value;
            let units = page.billed_units();
            governor.consume(units);
            report.capacity_units += units.max(0) as u64;

            for record in &page.records {
                rotator
                    .write(record)
                    .await
                    .with_context(|| format!("💀 writing partition {partition} failed"))?;
            }
            let fetched = page.records.len() as u64;
            report.records += fetched;
            progress.record(fetched, units.max(0) as u64);
            debug!(
                worker = partition.index,
                records = fetched,
                units,
                balance = governor.value(),
                "📃 page written"
            );

            token = page.next_token;
            if token.is_none() {
                break;
            }
        }

        let outputs = rotator
            .finish()
            .await
            .with_context(|| format!("💀 closing the last file of partition {partition} failed"))?;
        report.files = outputs.into_iter().map(|output| output.location).collect();
        info!(
            worker = partition.index,
            records = report.records,
            files = report.files.len(),
            "✅ partition exhausted"
        );
        Ok(report)
    }
}

impl Worker for ExportWorker {
    fn start(self) -> JoinHandle<Result<WorkerReport>> {
        tokio::spawn(self.run())
    }
}
