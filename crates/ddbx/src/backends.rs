//! 🔌 Backends — where the real I/O happens.
//!
//! 🗄️ The record store holds the table. 🪣 The object store holds the files.
//! Everything in between (governor, retries, rotation, queues) pretends not to know
//! which concrete thing is on the other end of these traits.
//!
//! 🎭 Same casting agency as always: trait → concrete impls → backend enum that
//! dispatches with a `match`. DynamoDB and S3 for real runs, in-memory for tests.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, BufReader, Lines};

use crate::common::{ContinuationToken, Partition, Record, ScanPage, TransferDirection};

pub(crate) mod dynamodb;
// -- 🧪 only the tests build in-memory backends
#[cfg_attr(not(test), allow(dead_code))]
pub(crate) mod in_mem;
pub(crate) mod s3;

// ===== Record store =====

/// 🗄️ A partitioned key-value table, as far as the pipeline cares.
///
/// # Contract 📜
/// - `scan_partition` returns one page of `partition`, starting after `token`.
///   A page without a `next_token` is the last page of that partition.
///   Scanning every index of `0..total` visits every record exactly once.
/// - `put_record` / `batch_put_records` are idempotent by key. Writing the same record
///   twice leaves one record. The batch variant resends anything the backend left
///   unprocessed before it returns `Ok`.
/// - `preflight` checks the table can take the run before any worker starts.
#[async_trait]
pub(crate) trait RecordStore: std::fmt::Debug + Send + Sync {
    async fn preflight(&self, direction: TransferDirection, budget: u64) -> Result<()>;

    async fn scan_partition(
        &self,
        partition: Partition,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage>;

    async fn put_record(&self, record: &Record) -> Result<()>;

    async fn batch_put_records(&self, records: &[Record]) -> Result<()>;
}

/// 🎭 The many faces of a table. Cloned into every worker; clones share one connection pool.
#[derive(Debug, Clone)]
pub(crate) enum RecordStoreBackend {
    #[cfg_attr(not(test), allow(dead_code))]
    InMemory(in_mem::InMemoryRecordStore),
    DynamoDb(dynamodb::DynamoDbRecordStore),
}

#[async_trait]
impl RecordStore for RecordStoreBackend {
    async fn preflight(&self, direction: TransferDirection, budget: u64) -> Result<()> {
        match self {
            RecordStoreBackend::InMemory(store) => store.preflight(direction, budget).await,
            RecordStoreBackend::DynamoDb(store) => store.preflight(direction, budget).await,
        }
    }

    async fn scan_partition(
        &self,
        partition: Partition,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage> {
        match self {
            RecordStoreBackend::InMemory(store) => store.scan_partition(partition, token).await,
            RecordStoreBackend::DynamoDb(store) => store.scan_partition(partition, token).await,
        }
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        match self {
            RecordStoreBackend::InMemory(store) => store.put_record(record).await,
            RecordStoreBackend::DynamoDb(store) => store.put_record(record).await,
        }
    }

    async fn batch_put_records(&self, records: &[Record]) -> Result<()> {
        match self {
            RecordStoreBackend::InMemory(store) => store.batch_put_records(records).await,
            RecordStoreBackend::DynamoDb(store) => store.batch_put_records(records).await,
        }
    }
}

// ===== Object store =====

/// 🧠 Boxed async reader: S3 byte streams and in-memory cursors look the same from here.
pub(crate) type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// 📜 A line-at-a-time view over one object.
pub(crate) type ObjectLines = Lines<BufReader<ObjectReader>>;

/// 🪣 Flat-file storage in the cloud: list, stream lines, upload.
#[async_trait]
pub(crate) trait ObjectStore: std::fmt::Debug + Send + Sync {
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>>;

    async fn get_object_lines(&self, bucket: &str, key: &str) -> Result<ObjectLines>;

    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()>;
}

/// 🎭 The many faces of a bucket.
#[derive(Debug, Clone)]
pub(crate) enum ObjectStoreBackend {
    #[cfg_attr(not(test), allow(dead_code))]
    InMemory(in_mem::InMemoryObjectStore),
    S3(s3::S3ObjectStore),
}

#[async_trait]
impl ObjectStore for ObjectStoreBackend {
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.list_objects(bucket, prefix).await,
            ObjectStoreBackend::S3(store) => store.list_objects(bucket, prefix).await,
        }
    }

    async fn get_object_lines(&self, bucket: &str, key: &str) -> Result<ObjectLines> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.get_object_lines(bucket, key).await,
            ObjectStoreBackend::S3(store) => store.get_object_lines(bucket, key).await,
        }
    }

    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        match self {
            ObjectStoreBackend::InMemory(store) => store.put_object(bucket, key, local_path).await,
            ObjectStoreBackend::S3(store) => store.put_object(bucket, key, local_path).await,
        }
    }
}

/// 📖 Wrap any reader as [`ObjectLines`].
pub(crate) fn lines_of(reader: ObjectReader) -> ObjectLines {
    use tokio::io::AsyncBufReadExt;
    BufReader::new(reader).lines()
}
