// ai
//! 🔁📂 OutputRotator — one worker's stream of records, chopped into files.
//!
//! 🎬 *[a partition pours out a million records]*
//! *[one file would be enormous. nobody wants one enormous file.]*
//! *[the rotator counts to the threshold, closes the file, and starts counting again]*
//!
//! State machine, per worker:
//!
//! ```text
//!   (no file) ──write──▶ OPEN(file, 1) ──write──▶ ... ──write──▶ OPEN(file, threshold)
//!       ▲                                                              │
//!       └──────────── CLOSED (flushed, staged if remote) ◀────────────┘
//! ```
//!
//! The next file opens on the next write, so a worker whose record count is an exact
//! multiple of the threshold does not leave an empty trailing file behind. `finish()`
//! closes whatever is still open, however few records it holds.
//!
//! Staging (remote destination only): the closed file is uploaded under
//! `{prefix}{name}` and then deleted locally. Slow uploads stay out of the scan loop's
//! pacing, and local disk holds at most one open file per worker.
//!
//! 🧠 Names are `{source}-{worker:04}-{sequence:05}.json`. The worker id is in every
//! name, so two workers can never write the same file or key.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::Record;
use crate::retry::RetryPolicy;

/// 🪣 Where closed files go when the destination is a bucket.
#[derive(Debug, Clone)]
pub(crate) struct StagingTarget {
    pub store: ObjectStoreBackend,
    pub bucket: String,
    pub prefix: Option<String>,
    pub retry: RetryPolicy,
}

/// 📄 A file that has been closed (and staged, when remote).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClosedOutput {
    /// local path or `s3://bucket/key`
    pub location: String,
    pub records: usize,
}

#[derive(Debug)]
struct OpenOutput {
    name: String,
    path: PathBuf,
    writer: BufWriter<File>,
    records: usize,
}

/// 🔁 Per-worker file rotation. Owned by exactly one worker, never shared.
#[derive(Debug)]
pub(crate) struct OutputRotator {
    source_name: String,
    worker_id: u32,
    records_per_file: usize,
    /// 📁 final directory when local, scratch directory when staging
    local_dir: PathBuf,
    staging: Option<StagingTarget>,
    next_sequence: u32,
    current: Option<OpenOutput>,
    closed: Vec<ClosedOutput>,
}

impl OutputRotator {
    pub(crate) fn new(
        source_name: impl Into<String>,
        worker_id: u32,
        records_per_file: usize,
        local_dir: impl Into<PathBuf>,
        staging: Option<StagingTarget>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            worker_id,
            records_per_file: records_per_file.max(1),
            local_dir: local_dir.into(),
            staging,
            next_sequence: 0,
            current: None,
            closed: Vec::new(),
        }
    }

    /// 🏷️ `{source}-{worker:04}-{sequence:05}.json`
    pub(crate) fn file_name(source_name: &str, worker_id: u32, sequence: u32) -> String {
        format!("{source_name}-{worker_id:04}-{sequence:05}.json")
    }

    /// ✍️ Append one record as one line. Rotates when the threshold is reached.
    pub(crate) async fn write(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record).context("💀 record refused to become JSON")?;
        line.push(b'\n');

        let mut output = match self.current.take() {
            Some(output) => output,
            None => self.open_next().await?,
        };
        output
            .writer
            .write_all(&line)
            .await
            .with_context(|| format!("💀 write to '{}' failed", output.path.display()))?;
        output.records += 1;

        if output.records >= self.records_per_file {
            self.close(output).await?;
        } else {
            self.current = Some(output);
        }
        Ok(())
    }

    /// 🏁 Close the last file, however small, and report everything this worker produced.
    pub(crate) async fn finish(mut self) -> Result<Vec<ClosedOutput>> {
        if let Some(output) = self.current.take() {
            self.close(output).await?;
        }
        Ok(self.closed)
    }

    async fn open_next(&mut self) -> Result<OpenOutput> {
        let name = Self::file_name(&self.source_name, self.worker_id, self.next_sequence);
        self.next_sequence += 1;
        let path = self.local_dir.join(&name);
        let file = File::create(&path).await.with_context(|| {
            format!(
                "💀 The output file '{}' could not be conjured into existence. \
                 We stared at the path. The path stared back.",
                path.display()
            )
        })?;
        debug!(worker = self.worker_id, file = %path.display(), "📂 opened output file");
        Ok(OpenOutput {
            name,
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    /// 🔒 Flush + close a file, stage it if remote.
    async fn close(&mut self, mut output: OpenOutput) -> Result<()> {
        output
            .writer
            .shutdown()
            .await
            .with_context(|| format!("💀 flushing '{}' failed", output.path.display()))?;
        drop(output.writer);

        let location = match &self.staging {
            None => output.path.display().to_string(),
            Some(target) => {
                let key = format!("{}{}", target.prefix.as_deref().unwrap_or(""), output.name);
                let (store, bucket, path) = (&target.store, target.bucket.as_str(), &output.path);
                let key_ref = key.as_str();
                target
                    .retry
                    .run("put_object", move || store.put_object(bucket, key_ref, path))
                    .await
                    .with_context(|| format!("💀 staging '{}' failed", path.display()))?;
                tokio::fs::remove_file(path).await.with_context(|| {
                    format!("💀 staged '{}' but could not delete it", path.display())
                })?;
                format!("s3://{}/{}", target.bucket, key)
            }
        };
        info!(
            worker = self.worker_id,
            records = output.records,
            %location,
            "📦 closed output file"
        );
        self.closed.push(ClosedOutput {
            location,
            records: output.records,
        });
        Ok(())
    }
}
