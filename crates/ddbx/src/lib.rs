//! 🚚 ddbx — move a whole table to flat files and back, without eating the table's
//! provisioned throughput alive.
//!
//! 📤 Export: N workers scan N partitions of the table, each into its own rotating
//! set of `.json` files (one record per line), locally or into a bucket.
//! 📥 Import: the files are discovered, queued, and written back by M workers.
//!
//! Either way every billed call goes through one shared leaky bucket, so the whole
//! run stays inside the `capacity_units` you configured. 🦆

pub mod app_config;
mod backends;
mod common;
mod governor;
mod progress;
mod retry;
mod rotator;
mod supervisors;
mod work_source;

use anyhow::Result;

use crate::app_config::AppConfig;
use crate::backends::dynamodb::DynamoDbRecordStore;
use crate::backends::s3::S3ObjectStore;
use crate::backends::{ObjectStoreBackend, RecordStoreBackend};
use crate::supervisors::Supervisor;

pub use crate::common::TransferDirection;
pub use crate::retry::RetryExhausted;
pub use crate::supervisors::{TransferReport, WorkerReport};

/// 🚀 Run one transfer against the real table and the real buckets.
///
/// Credentials come from the usual AWS chain; the region comes from `table.region`.
pub async fn run(app_config: AppConfig) -> Result<TransferReport> {
    app_config.validate()?;
    let records =
        RecordStoreBackend::DynamoDb(DynamoDbRecordStore::new(&app_config.table).await);
    let objects =
        ObjectStoreBackend::S3(S3ObjectStore::new(&app_config.table.region).await);
    Supervisor::new(app_config, records, objects).run().await
}
