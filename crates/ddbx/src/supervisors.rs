//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where workers share one budget..."
//! 🎬 "One supervisor dared to keep them honest."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor module — part middle manager, part helicopter parent,
//! part that one accountant who reminds everyone the table is provisioned, not infinite.
//!
//! Order of operations, every run:
//! 1. validate the config
//! 2. preflight the table (ACTIVE, enough provisioned capacity)
//! 3. build the shared governor
//! 4. build the work (partitions for export, a filled queue for import)
//! 5. start the workers, then the refill ticker
//! 6. join everyone, stop the ticker, report
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB EVER
//! 🔒 Like Fight Club, but for async tasks. First rule: you don't pub the workers.

mod workers;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app_config::{AppConfig, ExportConfig, ImportConfig, TransferConfig};
use crate::backends::{ObjectStoreBackend, RecordStore, RecordStoreBackend};
use crate::common::{Location, TransferDirection, directory_prefix};
use crate::governor::{RateGovernor, spawn_refill_ticker};
use crate::progress::TransferProgress;
use crate::rotator::{OutputRotator, StagingTarget};
use crate::work_source::{build_work_queue, partitions};
use workers::{ExportWorker, ImportWorker, RecordWriter, Worker};
pub use workers::WorkerReport;

// -- ⏰ the budget is per second, so the bucket refills once a second
const REFILL_PERIOD: Duration = Duration::from_secs(1);

/// 🧾 Everything every worker did, plus how long it took.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub direction: TransferDirection,
    pub table: String,
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn total_records(&self) -> u64 {
        self.workers.iter().map(|worker| worker.records).sum()
    }

    pub fn total_requests(&self) -> u64 {
        self.workers.iter().map(|worker| worker.requests).sum()
    }

    pub fn total_capacity_units(&self) -> u64 {
        self.workers.iter().map(|worker| worker.capacity_units).sum()
    }

    pub fn total_retries(&self) -> u64 {
        self.workers.iter().map(|worker| worker.retries).sum()
    }

    pub fn total_files(&self) -> usize {
        self.workers.iter().map(|worker| worker.files.len()).sum()
    }
}

/// 📦 The Supervisor: because even async tasks need someone hovering over them
/// asking "is it done yet?" every second, on the second.
pub(crate) struct Supervisor {
    app_config: AppConfig,
    records: RecordStoreBackend,
    objects: ObjectStoreBackend,
}

type WorkerHandle = JoinHandle<Result<WorkerReport>>;

impl Supervisor {
    pub(crate) fn new(
        app_config: AppConfig,
        records: RecordStoreBackend,
        objects: ObjectStoreBackend,
    ) -> Self {
        Self {
            app_config,
            records,
            objects,
        }
    }

    /// 🚀 One full transfer. Errors if any precondition fails (nothing was started)
    /// or if any worker failed (every other worker was allowed to finish first).
    pub(crate) async fn run(&self) -> Result<TransferReport> {
        self.app_config.validate()?;
        let runtime = &self.app_config.runtime;
        let table = self.app_config.table.name.clone();
        let direction = match &self.app_config.transfer {
            TransferConfig::Export(_) => TransferDirection::Export,
            TransferConfig::Import(_) => TransferDirection::Import,
        };

        self.records
            .preflight(direction, runtime.capacity_units)
            .await
            .with_context(|| format!("💀 preflight for the {direction} of '{table}' failed"))?;

        let started = Instant::now();
        let governor = Arc::new(RateGovernor::new(
            runtime.capacity_units,
            runtime.refill_policy,
            Duration::from_millis(runtime.admission_poll_ms),
        ));
        let progress = Arc::new(TransferProgress::new(direction, &table, runtime.progress));

        let handles = match &self.app_config.transfer {
            TransferConfig::Export(export) => {
                self.start_export_workers(export, &governor, &progress).await?
            }
            TransferConfig::Import(import) => {
                self.start_import_workers(import, &governor, &progress).await?
            }
        };
        info!(
            %direction,
            table,
            workers = handles.len(),
            refill_rate = governor.refill_rate(),
            "🧵 workers started"
        );
        let ticker = spawn_refill_ticker(governor.clone(), REFILL_PERIOD);

        let joined = join_workers(handles).await;
        ticker.abort();
        progress.finish();
        let workers = joined?;

        let report = TransferReport {
            direction,
            table,
            workers,
            elapsed: started.elapsed(),
        };
        info!(
            records = report.total_records(),
            capacity_units = report.total_capacity_units(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "🏁 transfer complete"
        );
        Ok(report)
    }

    async fn start_export_workers(
        &self,
        export: &ExportConfig,
        governor: &Arc<RateGovernor>,
        progress: &Arc<TransferProgress>,
    ) -> Result<Vec<WorkerHandle>> {
        let (local_dir, staging) = match export.destination()? {
            Location::Local(dir) => (dir, None),
            Location::Remote { bucket, prefix } => (
                export.staging_dir.clone(),
                Some(StagingTarget {
                    store: self.objects.clone(),
                    bucket,
                    prefix: directory_prefix(prefix),
                    retry: self.app_config.retry.uploads,
                }),
            ),
        };
        ensure_dir(&local_dir).await?;

        let table = &self.app_config.table.name;
        let handles = partitions(self.app_config.runtime.workers)
            .into_iter()
            .map(|partition| {
                let rotator = OutputRotator::new(
                    table.clone(),
                    partition.index,
                    export.records_per_file,
                    local_dir.clone(),
                    staging.clone(),
                );
                ExportWorker::new(
                    partition,
                    self.records.clone(),
                    governor.clone(),
                    self.app_config.retry.reads,
                    rotator,
                    progress.clone(),
                )
                .start()
            })
            .collect();
        Ok(handles)
    }

    async fn start_import_workers(
        &self,
        import: &ImportConfig,
        governor: &Arc<RateGovernor>,
        progress: &Arc<TransferProgress>,
    ) -> Result<Vec<WorkerHandle>> {
        let source = import.source()?;
        let queue = build_work_queue(&source, &self.objects)
            .await
            .with_context(|| format!("💀 could not gather the import work from {source}"))?;
        info!(
            discipline = %queue.discipline,
            items = queue.total_items,
            %source,
            "📬 import queue ready"
        );

        let runtime = &self.app_config.runtime;
        let handles = (0..runtime.workers)
            .map(|worker_id| {
                let writer = RecordWriter::new(
                    self.records.clone(),
                    governor.clone(),
                    self.app_config.retry.writes,
                    import.write_mode,
                    progress.clone(),
                );
                ImportWorker::new(
                    worker_id,
                    queue.receiver.clone(),
                    Duration::from_millis(runtime.dequeue_timeout_ms),
                    self.objects.clone(),
                    self.app_config.retry.uploads,
                    writer,
                )
                .start()
            })
            .collect();
        Ok(handles)
    }
}

async fn ensure_dir(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await.with_context(|| {
        format!(
            "💀 Could not create '{}'. The directory said no and would not elaborate.",
            dir.display()
        )
    })
}

/// 🤝 Wait for every worker. One failure does not cut the others short.
///
/// On failure the first worker's error is returned (so its cause chain and type
/// survive), with every failure listed in the context.
async fn join_workers(handles: Vec<WorkerHandle>) -> Result<Vec<WorkerReport>> {
    let outcomes = futures::future::join_all(handles).await;
    let total = outcomes.len();
    let mut reports = Vec::with_capacity(total);
    let mut failures: Vec<(usize, anyhow::Error)> = Vec::new();
    for (worker_id, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(err)) => {
                error!(worker = worker_id, "💀 worker failed: {err:#}");
                failures.push((worker_id, err));
            }
            Err(join_error) => {
                error!(worker = worker_id, "💀 worker panicked: {join_error}");
                failures.push((worker_id, anyhow::Error::new(join_error)));
            }
        }
    }

    let failed = failures.len();
    let summary = failures
        .iter()
        .map(|(worker_id, err)| format!("  worker {worker_id}: {err:#}"))
        .collect::<Vec<_>>()
        .join("\n");
    match failures.into_iter().next() {
        None => Ok(reports),
        Some((_, first)) => Err(first.context(format!(
            "💀 {failed} of {total} workers failed:\n{summary}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{
        RetryConfig, RuntimeConfig, TableConfig, WriteMode,
    };
    use crate::backends::in_mem::{InMemoryObjectStore, InMemoryRecordStore};
    use crate::common::Record;
    use crate::governor::RefillPolicy;
    use crate::retry::{Backoff, RetryExhausted, RetryPolicy};
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn records(count: usize) -> Vec<Record> {
        (0..count)
            .map(|n| {
                let mut record = Record::new();
                record.insert("pk".into(), json!(format!("item-{n:03}")));
                record.insert("n".into(), json!(n));
                record
            })
            .collect()
    }

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Linear { step_ms: 1 },
        }
    }

    fn config(workers: u32, transfer: TransferConfig) -> AppConfig {
        AppConfig {
            table: TableConfig {
                name: "orders".into(),
                region: "us-east-1".into(),
            },
            runtime: RuntimeConfig {
                workers,
                capacity_units: 1000,
                refill_policy: RefillPolicy::Capped,
                admission_poll_ms: 5,
                dequeue_timeout_ms: 50,
                progress: false,
            },
            retry: RetryConfig {
                reads: quick_retry(3),
                writes: quick_retry(3),
                uploads: quick_retry(3),
            },
            transfer,
        }
    }

    fn export_to(destination: &str, records_per_file: usize, staging_dir: PathBuf) -> TransferConfig {
        TransferConfig::Export(ExportConfig {
            destination: destination.into(),
            records_per_file,
            staging_dir,
        })
    }

    fn import_from(source: &str) -> TransferConfig {
        TransferConfig::Import(ImportConfig {
            source: source.into(),
            write_mode: WriteMode::Batch,
        })
    }

    fn supervisor(
        app_config: AppConfig,
        store: &InMemoryRecordStore,
        objects: &InMemoryObjectStore,
    ) -> Supervisor {
        Supervisor::new(
            app_config,
            RecordStoreBackend::InMemory(store.clone()),
            ObjectStoreBackend::InMemory(objects.clone()),
        )
    }

    /// 📜 Every line of every `.json` file in `dir`, parsed.
    fn read_back(dir: &Path) -> Vec<Record> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .expect("💀 output dir vanished")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect();
        paths.sort();
        paths
            .iter()
            .flat_map(|path| {
                std::fs::read_to_string(path)
                    .expect("💀 output file vanished")
                    .lines()
                    .map(|line| serde_json::from_str(line).expect("💀 output line is not JSON"))
                    .collect::<Vec<Record>>()
            })
            .collect()
    }

    #[tokio::test]
    async fn the_one_where_ten_records_two_workers_and_a_threshold_of_four() -> Result<()> {
        let out = tempfile::tempdir()?;
        let store = InMemoryRecordStore::with_records(records(10), 3);
        let app_config = config(
            2,
            export_to(&out.path().display().to_string(), 4, std::env::temp_dir()),
        );

        let report = supervisor(app_config, &store, &InMemoryObjectStore::default())
            .run()
            .await?;

        assert_eq!(report.total_records(), 10);
        // -- 🍕 five records per partition → one file of four, one of one, per worker
        for worker in &report.workers {
            assert_eq!(worker.records, 5);
            assert_eq!(worker.files.len(), 2);
        }
        let exported = read_back(out.path());
        assert_eq!(exported.len(), 10);
        let keys: BTreeSet<String> = exported
            .iter()
            .filter_map(|record| record.get("pk").and_then(|pk| pk.as_str()).map(String::from))
            .collect();
        assert_eq!(keys.len(), 10);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_every_partition_count_sees_every_record_once() -> Result<()> {
        for workers in 1..=5 {
            let out = tempfile::tempdir()?;
            let store = InMemoryRecordStore::with_records(records(23), 4);
            let app_config = config(
                workers,
                export_to(&out.path().display().to_string(), 5, std::env::temp_dir()),
            );

            let report = supervisor(app_config, &store, &InMemoryObjectStore::default())
                .run()
                .await?;

            assert_eq!(report.workers.len(), workers as usize);
            let mut exported = read_back(out.path());
            exported.sort_by_key(|record| record.get("n").and_then(|n| n.as_u64()));
            assert_eq!(exported, records(23), "partition count {workers}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_export_lands_in_a_bucket_and_staging_is_swept() -> Result<()> {
        let staging = tempfile::tempdir()?;
        let store = InMemoryRecordStore::with_records(records(6), 10);
        let objects = InMemoryObjectStore::default();
        let app_config = config(
            2,
            export_to("s3://backups/orders", 2, staging.path().to_path_buf()),
        );

        let report = supervisor(app_config, &store, &objects).run().await?;

        assert_eq!(report.total_files(), 4);
        for worker in &report.workers {
            for file in &worker.files {
                assert!(file.starts_with("s3://backups/orders/orders-"), "{file}");
            }
        }
        assert!(
            objects
                .get("backups", "orders/orders-0001-00000.json")
                .await
                .is_some()
        );
        assert_eq!(std::fs::read_dir(staging.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_five_lines_three_workers_and_nobody_doubles_up() -> Result<()> {
        let input = tempfile::tempdir()?;
        let file = input.path().join("orders.json");
        let body: String = records(5)
            .iter()
            .map(|record| format!("{}\n", serde_json::Value::Object(record.clone())))
            .collect();
        tokio::fs::write(&file, body).await?;
        let store = InMemoryRecordStore::empty();

        let report = supervisor(
            config(3, import_from(&file.display().to_string())),
            &store,
            &InMemoryObjectStore::default(),
        )
        .run()
        .await?;

        assert_eq!(report.total_records(), 5);
        let mut written = store.written().await;
        written.sort_by_key(|record| record.get("n").and_then(|n| n.as_u64()));
        assert_eq!(written, records(5));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_directory_of_files_is_shared_out_by_file() -> Result<()> {
        let input = tempfile::tempdir()?;
        for (name, chunk) in ["a.json", "b.json", "c.json"].iter().zip(records(9).chunks(3)) {
            let body: String = chunk
                .iter()
                .map(|record| format!("{}\n", serde_json::Value::Object(record.clone())))
                .collect();
            tokio::fs::write(input.path().join(name), body).await?;
        }
        let store = InMemoryRecordStore::empty();

        let report = supervisor(
            config(2, import_from(&input.path().display().to_string())),
            &store,
            &InMemoryObjectStore::default(),
        )
        .run()
        .await?;

        assert_eq!(report.total_records(), 9);
        assert_eq!(report.total_files(), 3);
        assert_eq!(store.written().await.len(), 9);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_nothing_to_import_means_nothing_starts() -> Result<()> {
        let input = tempfile::tempdir()?;
        let store = InMemoryRecordStore::empty();

        let result = supervisor(
            config(2, import_from(&input.path().display().to_string())),
            &store,
            &InMemoryObjectStore::default(),
        )
        .run()
        .await;

        assert!(result.is_err());
        assert_eq!(store.calls().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_stubborn_table_fails_the_run_and_names_names() -> Result<()> {
        let out = tempfile::tempdir()?;
        let store = InMemoryRecordStore::with_records(records(4), 10);
        store.fail_next(1000).await;

        let err = supervisor(
            config(
                2,
                export_to(&out.path().display().to_string(), 4, std::env::temp_dir()),
            ),
            &store,
            &InMemoryObjectStore::default(),
        )
        .run()
        .await
        .expect_err("💀 a table that always throttles should fail the run");

        assert!(err.downcast_ref::<RetryExhausted>().is_some());
        let message = format!("{err:#}");
        assert!(message.contains("2 of 2 workers failed"), "{message}");
        assert!(message.contains("worker 0") && message.contains("worker 1"));
        assert_eq!(store.calls().await, 6);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_zero_worker_config_never_reaches_the_table() -> Result<()> {
        let out = tempfile::tempdir()?;
        let store = InMemoryRecordStore::with_records(records(4), 10);
        let result = supervisor(
            config(
                0,
                export_to(&out.path().display().to_string(), 4, std::env::temp_dir()),
            ),
            &store,
            &InMemoryObjectStore::default(),
        )
        .run()
        .await;

        assert!(result.is_err());
        assert_eq!(store.calls().await, 0);
        Ok(())
    }
}
