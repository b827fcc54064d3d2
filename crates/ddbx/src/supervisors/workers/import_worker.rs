//! 📥 ImportWorker — pull an item, turn its lines into records, push them into the table.
//!
//! The worker keeps dequeuing until the queue has been closed and drained, or until
//! nothing shows up for `dequeue_timeout`. Either way it flushes whatever its
//! [`RecordWriter`] is still holding and goes home.
//!
//! 🧠 Write cost is an estimate (`ceil(bytes / 1024)` per record), not something the
//! table reports back. A batch costs the sum of its records.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use super::{Worker, WorkerReport};
use crate::app_config::WriteMode;
use crate::backends::dynamodb::MAX_BATCH_WRITE_ITEMS;
use crate::backends::{ObjectStore, ObjectStoreBackend, RecordStore, RecordStoreBackend};
use crate::common::{Record, estimate_write_units};
use crate::governor::RateGovernor;
use crate::progress::TransferProgress;
use crate::retry::RetryPolicy;
use crate::work_source::WorkItem;

/// ✍️ Gated, retried writes into the table, one record at a time or 25 at a time.
#[derive(Debug)]
pub(crate) struct RecordWriter {
    store: RecordStoreBackend,
    governor: Arc<RateGovernor>,
    retry: RetryPolicy,
    mode: WriteMode,
    pending: Vec<Record>,
    pending_units: i64,
    progress: Arc<TransferProgress>,
}

impl RecordWriter {
    pub(crate) fn new(
        store: RecordStoreBackend,
        governor: Arc<RateGovernor>,
        retry: RetryPolicy,
        mode: WriteMode,
        progress: Arc<TransferProgress>,
    ) -> Self {
        Self {
            store,
            governor,
            retry,
            mode,
            pending: Vec::new(),
            pending_units: 0,
            progress,
        }
    }

    /// 📝 `payload_bytes` is the size of the line the record came from.
    pub(crate) async fn write(
        &mut self,
        record: Record,
        payload_bytes: usize,
        report: &mut WorkerReport,
    ) -> Result<()> {
        let units = estimate_write_units(payload_bytes);
        match self.mode {
            WriteMode::Single => {
                self.governor.admit().await;
                let store = &self.store;
                let record = &record;
                let written = self
                    .retry
                    .run("put_record", move || store.put_record(record))
                    .await?;
                self.settle(1, units, written.attempts, report);
            }
            WriteMode::Batch => {
                self.pending.push(record);
                self.pending_units += units;
                if self.pending.len() >= MAX_BATCH_WRITE_ITEMS {
                    self.flush(report).await?;
                }
            }
        }
        Ok(())
    }

    /// 🚽 Send whatever is buffered. No-op when nothing is.
    pub(crate) async fn flush(&mut self, report: &mut WorkerReport) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.governor.admit().await;
        let store = &self.store;
        let batch = self.pending.as_slice();
        let written = self
            .retry
            .run("batch_put_records", move || store.batch_put_records(batch))
            .await?;
        let records = self.pending.len() as u64;
        let units = std::mem::take(&mut self.pending_units);
        self.pending.clear();
        self.settle(records, units, written.attempts, report);
        Ok(())
    }

    fn settle(&self, records: u64, units: i64, attempts: u32, report: &mut WorkerReport) {
        self.governor.consume(units);
        report.records += records;
        report.requests += 1;
        report.capacity_units += units.max(0) as u64;
        report.retries += u64::from(attempts.saturating_sub(1));
        self.progress.record(records, units.max(0) as u64);
        trace!(
            worker = report.worker_id,
            records,
            units,
            balance = self.governor.value(),
            "✍️ write settled"
        );
    }
}

#[derive(Debug)]
pub(crate) struct ImportWorker {
    worker_id: u32,
    queue: async_channel::Receiver<WorkItem>,
    dequeue_timeout: Duration,
    objects: ObjectStoreBackend,
    object_retry: RetryPolicy,
    writer: RecordWriter,
}

impl ImportWorker {
    pub(crate) fn new(
        worker_id: u32,
        queue: async_channel::Receiver<WorkItem>,
        dequeue_timeout: Duration,
        objects: ObjectStoreBackend,
        object_retry: RetryPolicy,
        writer: RecordWriter,
    ) -> Self {
        Self {
            worker_id,
            queue,
            dequeue_timeout,
            objects,
            object_retry,
            writer,
        }
    }

    async fn run(mut self) -> Result<WorkerReport> {
        let mut report = WorkerReport::new(self.worker_id);
        info!(worker = self.worker_id, "📥 import worker starting");

        loop {
            let item = match tokio::time::timeout(self.dequeue_timeout, self.queue.recv()).await {
                Ok(Ok(item)) => item,
                Ok(Err(_closed)) => {
                    debug!(worker = self.worker_id, "📭 queue closed and drained");
                    break;
                }
                Err(_elapsed) => {
                    debug!(worker = self.worker_id, "📭 queue quiet for too long");
                    break;
                }
            };
            self.process(item, &mut report).await?;
        }

        self.writer
            .flush(&mut report)
            .await
            .with_context(|| format!("💀 worker {} failed its final flush", self.worker_id))?;
        info!(
            worker = self.worker_id,
            records = report.records,
            "✅ import worker done"
        );
        Ok(report)
    }

    async fn process(&mut self, item: WorkItem, report: &mut WorkerReport) -> Result<()> {
        match item {
            WorkItem::Line(line) => self.write_line(&line, "the input", report).await,
            WorkItem::File(path) => {
                self.import_file(&path, report).await?;
                report.files.push(path.display().to_string());
                Ok(())
            }
            WorkItem::Object { bucket, key } => {
                self.import_object(&bucket, &key, report).await?;
                report.files.push(format!("s3://{bucket}/{key}"));
                Ok(())
            }
        }
    }

    async fn import_file(&mut self, path: &Path, report: &mut WorkerReport) -> Result<()> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("💀 Could not open '{}'", path.display()))?;
        let mut lines = tokio::io::BufReader::new(file).lines();
        let origin = path.display().to_string();
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("💀 Reading '{origin}' broke mid-file"))?
        {
            self.write_line(&line, &origin, report).await?;
        }
        Ok(())
    }

    async fn import_object(&mut self, bucket: &str, key: &str, report: &mut WorkerReport) -> Result<()> {
        let objects = &self.objects;
        let mut lines = self
            .object_retry
            .run("get_object", move || objects.get_object_lines(bucket, key))
            .await
            .with_context(|| format!("💀 Could not open s3://{bucket}/{key}"))?
            .value;
        let origin = format!("s3://{bucket}/{key}");
        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("💀 Reading '{origin}' broke mid-stream"))?
        {
            self.write_line(&line, &origin, report).await?;
        }
        Ok(())
    }

    /// 🔍 Blank lines are skipped. Anything else must be a JSON object, or the run stops.
    async fn write_line(&mut self, line: &str, origin: &str, report: &mut WorkerReport) -> Result<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let record: Record = serde_json::from_str(trimmed).with_context(|| {
            format!(
                "💀 worker {} found a line in {origin} that is not a JSON object. \
                 We don't guess what it meant: {}",
                self.worker_id,
                preview(trimmed)
            )
        })?;
        self.writer
            .write(record, trimmed.len(), report)
            .await
            .with_context(|| format!("💀 worker {} could not write a record from {origin}", self.worker_id))
    }
}

// -- ✂️ long lines in error messages help nobody
fn preview(line: &str) -> String {
    match line.char_indices().nth(80) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line.to_string(),
    }
}

impl Worker for ImportWorker {
    fn start(self) -> JoinHandle<Result<WorkerReport>> {
        tokio::spawn(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::{InMemoryObjectStore, InMemoryRecordStore};
    use crate::common::TransferDirection;
    use crate::governor::RefillPolicy;
    use crate::retry::Backoff;
    use serde_json::json;

    fn quick_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Backoff::Linear { step_ms: 1 },
        }
    }

    fn writer(store: &InMemoryRecordStore, mode: WriteMode, governor: Arc<RateGovernor>) -> RecordWriter {
        RecordWriter::new(
            RecordStoreBackend::InMemory(store.clone()),
            governor,
            quick_retry(5),
            mode,
            Arc::new(TransferProgress::new(TransferDirection::Import, "orders", false)),
        )
    }

    fn governor(budget: u64) -> Arc<RateGovernor> {
        Arc::new(RateGovernor::new(budget, RefillPolicy::Capped, Duration::from_millis(5)))
    }

    fn line_queue(lines: &[&str]) -> async_channel::Receiver<WorkItem> {
        let (sender, receiver) = async_channel::unbounded();
        for line in lines {
            let _ = sender.try_send(WorkItem::Line(line.to_string()));
        }
        receiver
    }

    fn import_worker(
        queue: async_channel::Receiver<WorkItem>,
        objects: InMemoryObjectStore,
        writer: RecordWriter,
    ) -> ImportWorker {
        ImportWorker::new(
            0,
            queue,
            Duration::from_millis(50),
            ObjectStoreBackend::InMemory(objects),
            quick_retry(3),
            writer,
        )
    }

    #[tokio::test]
    async fn the_one_where_single_mode_pays_per_kibibyte_per_record() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let governor = governor(100);
        let mut writer = writer(&store, WriteMode::Single, governor.clone());
        let mut report = WorkerReport::new(0);

        let mut big = Record::new();
        big.insert("blob".into(), json!("x".repeat(1500)));
        writer.write(big, 1500, &mut report).await?;
        writer.write(Record::new(), 2, &mut report).await?;

        assert_eq!(store.written().await.len(), 2);
        assert_eq!(report.requests, 2);
        assert_eq!(report.capacity_units, 3);
        assert_eq!(governor.value(), 97);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_batch_mode_groups_by_twenty_five() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let mut writer = writer(&store, WriteMode::Batch, governor(1000));
        let mut report = WorkerReport::new(0);

        for n in 0..60 {
            let mut record = Record::new();
            record.insert("n".into(), json!(n));
            writer.write(record, 10, &mut report).await?;
        }
        assert_eq!(report.requests, 2);
        assert_eq!(store.written().await.len(), 50);

        writer.flush(&mut report).await?;
        assert_eq!(report.requests, 3);
        assert_eq!(report.records, 60);
        assert_eq!(report.capacity_units, 60);
        let order: Vec<i64> = store
            .written()
            .await
            .iter()
            .filter_map(|record| record.get("n").and_then(|n| n.as_i64()))
            .collect();
        assert_eq!(order, (0..60).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_closed_queue_ends_the_shift_early() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let queue = line_queue(&[r#"{"pk":"a"}"#, "", r#"{"pk":"b"}"#]);
        queue.close();
        let worker = import_worker(
            queue,
            InMemoryObjectStore::default(),
            writer(&store, WriteMode::Batch, governor(100)),
        );

        let report = worker.start().await??;
        assert_eq!(report.records, 2);
        assert_eq!(store.written().await.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_quiet_queue_times_out_with_the_sender_still_open() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let (sender, receiver) = async_channel::unbounded();
        let _ = sender.try_send(WorkItem::Line(r#"{"pk":"only"}"#.into()));
        let worker = import_worker(
            receiver,
            InMemoryObjectStore::default(),
            writer(&store, WriteMode::Single, governor(100)),
        );

        let report = tokio::time::timeout(Duration::from_secs(5), worker.start()).await???;
        assert_eq!(report.records, 1);
        drop(sender);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_bad_line_is_fatal_and_says_where() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let queue = line_queue(&[r#"{"pk":"a"}"#, "definitely not json"]);
        queue.close();
        let worker = import_worker(
            queue,
            InMemoryObjectStore::default(),
            writer(&store, WriteMode::Single, governor(100)),
        );

        let err = worker
            .start()
            .await?
            .expect_err("💀 a malformed line should stop the worker");
        assert!(format!("{err:#}").contains("definitely not json"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_whole_objects_are_streamed_line_by_line() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        let objects = InMemoryObjectStore::default();
        objects
            .insert("dump", "a.json", "{\"pk\":\"a1\"}\n{\"pk\":\"a2\"}\n")
            .await;
        objects.insert("dump", "b.json", "{\"pk\":\"b1\"}\n").await;
        let (sender, receiver) = async_channel::unbounded();
        for key in ["a.json", "b.json"] {
            let _ = sender.try_send(WorkItem::Object {
                bucket: "dump".into(),
                key: key.into(),
            });
        }
        drop(sender);
        let worker = import_worker(
            receiver,
            objects,
            writer(&store, WriteMode::Batch, governor(100)),
        );

        let report = worker.start().await??;
        assert_eq!(report.records, 3);
        assert_eq!(report.files, vec!["s3://dump/a.json", "s3://dump/b.json"]);
        assert_eq!(store.written().await.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_throttled_writes_are_retried_until_they_land() -> Result<()> {
        let store = InMemoryRecordStore::empty();
        store.fail_next(3).await;
        let mut writer = writer(&store, WriteMode::Single, governor(100));
        let mut report = WorkerReport::new(0);

        writer.write(Record::new(), 2, &mut report).await?;

        assert_eq!(report.retries, 3);
        assert_eq!(store.written().await.len(), 1);
        Ok(())
    }
}
