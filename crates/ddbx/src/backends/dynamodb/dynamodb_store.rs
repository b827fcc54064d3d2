// ai
//! 🗄️📡 DynamoDB record store — parallel scans out, puts and batch puts in.
//!
//! INT. AWS CONSOLE — NIGHT. A table sits in ACTIVE state, provisioned for exactly
//! the number of read units someone argued about in a planning meeting. Sixteen
//! workers are about to scan it at once. Each one asks for its own `Segment` out of
//! `TotalSegments` and DynamoDB promises, on its honor, that no item shows up twice.
//!
//! 🧠 Knowledge graph:
//! - Transport: `aws-sdk-dynamodb` `Scan` / `PutItem` / `BatchWriteItem` / `DescribeTable`
//! - Scan asks for `ReturnConsumedCapacity::Total` so the governor can be billed honestly
//! - Batch writes go 25 at a time and resend `UnprocessedItems` until none are left
//! - Retries of whole operations happen one level up, in `RetryPolicy`

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::types::{
    BillingMode, PutRequest, ReturnConsumedCapacity, TableDescription, TableStatus, WriteRequest,
};
use tracing::{debug, info, warn};

use super::attribute_values::{item_to_record, record_to_item};
use crate::app_config::TableConfig;
use crate::backends::RecordStore;
use crate::common::{ContinuationToken, Partition, Record, ScanPage, TransferDirection};

/// 📦 DynamoDB's hard ceiling on items per `BatchWriteItem`.
pub(crate) const MAX_BATCH_WRITE_ITEMS: usize = 25;

// -- 🔁 unprocessed-item resend rounds before the batch is handed back as a failure
const MAX_UNPROCESSED_ROUNDS: u32 = 8;

/// 🗄️ A handle on one table. Clone freely; clones share the SDK's connection pool.
#[derive(Debug, Clone)]
pub(crate) struct DynamoDbRecordStore {
    client: aws_sdk_dynamodb::Client,
    table: String,
}

impl DynamoDbRecordStore {
    /// 🚀 Loads AWS config from the environment (env vars → ~/.aws → IAM role → hope)
    /// pinned to the configured region.
    pub(crate) async fn new(config: &TableConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_dynamodb::config::Region::new(config.region.clone()))
            .load()
            .await;
        Self {
            client: aws_sdk_dynamodb::Client::new(&aws_config),
            table: config.name.clone(),
        }
    }
}

#[async_trait]
impl RecordStore for DynamoDbRecordStore {
    /// 🩺 DescribeTable, then let [`check_table`] decide.
    async fn preflight(&self, direction: TransferDirection, budget: u64) -> Result<()> {
        let described = self
            .client
            .describe_table()
            .table_name(&self.table)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 DescribeTable failed for '{}'. Either the table does not exist, \
                     the region is wrong, or the credentials are someone else's.",
                    self.table
                )
            })?;
        let table = described
            .table()
            .with_context(|| format!("💀 DescribeTable for '{}' came back empty", self.table))?;
        check_table(&self.table, table, direction, budget)
    }

    async fn scan_partition(
        &self,
        partition: Partition,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage> {
        let start_key = match token {
            None => None,
            Some(ContinuationToken::LastEvaluatedKey(key)) => Some(key),
            Some(other) => anyhow::bail!("💀 {other:?} is not a DynamoDB continuation token"),
        };
        let output = self
            .client
            .scan()
            .table_name(&self.table)
            .segment(i32::try_from(partition.index)?)
            .total_segments(i32::try_from(partition.total)?)
            .return_consumed_capacity(ReturnConsumedCapacity::Total)
            .set_exclusive_start_key(start_key)
            .send()
            .await
            .with_context(|| format!("💀 Scan of '{}' partition {partition} failed", self.table))?;

        let consumed_capacity = output
            .consumed_capacity()
            .and_then(|consumed| consumed.capacity_units())
            .unwrap_or(0.0);
        let records = output
            .items
            .unwrap_or_default()
            .into_iter()
            .map(item_to_record)
            .collect::<Result<Vec<_>>>()?;
        let next_token = output
            .last_evaluated_key
            .filter(|key| !key.is_empty())
            .map(ContinuationToken::LastEvaluatedKey);
        debug!(
            %partition,
            records = records.len(),
            consumed_capacity,
            more = next_token.is_some(),
            "📃 scanned a page"
        );
        Ok(ScanPage {
            records,
            next_token,
            consumed_capacity,
        })
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(record_to_item(record)?))
            .send()
            .await
            .with_context(|| format!("💀 PutItem into '{}' failed", self.table))?;
        Ok(())
    }

    async fn batch_put_records(&self, records: &[Record]) -> Result<()> {
        for chunk in records.chunks(MAX_BATCH_WRITE_ITEMS) {
            let requests = chunk
                .iter()
                .map(|record| -> Result<WriteRequest> {
                    let put = PutRequest::builder()
                        .set_item(Some(record_to_item(record)?))
                        .build()?;
                    Ok(WriteRequest::builder().put_request(put).build())
                })
                .collect::<Result<Vec<_>>>()?;
            self.write_until_processed(requests).await?;
        }
        Ok(())
    }
}

impl DynamoDbRecordStore {
    async fn write_until_processed(&self, requests: Vec<WriteRequest>) -> Result<()> {
        resend_unprocessed(&self.table, requests, |pending| async move {
            let output = self
                .client
                .batch_write_item()
                .set_request_items(Some(pending))
                .send()
                .await
                .with_context(|| format!("💀 BatchWriteItem into '{}' failed", self.table))?;
            Ok::<_, anyhow::Error>(output.unprocessed_items.unwrap_or_default())
        })
        .await
    }
}

/// 🩺 The table must be ACTIVE, and a provisioned table must be provisioned for at
/// least the budget we are about to spend. On-demand tables get a pass and a log line.
fn check_table(
    name: &str,
    table: &TableDescription,
    direction: TransferDirection,
    budget: u64,
) -> Result<()> {
    let status = table.table_status();
    info!(table = %name, ?status, "🩺 table status");
    if status != Some(&TableStatus::Active) {
        anyhow::bail!(
            "💀 Table '{}' is {:?}. It must be ACTIVE before we {} anything.",
            name,
            status,
            direction
        );
    }

    let on_demand = table
        .billing_mode_summary()
        .and_then(|summary| summary.billing_mode())
        == Some(&BillingMode::PayPerRequest);
    if on_demand {
        info!(table = %name, "💳 table uses on-demand capacity");
        return Ok(());
    }

    let throughput = table.provisioned_throughput();
    let provisioned = match direction {
        TransferDirection::Export => throughput.and_then(|t| t.read_capacity_units()),
        TransferDirection::Import => throughput.and_then(|t| t.write_capacity_units()),
    }
    .unwrap_or(0);
    info!(table = %name, provisioned, budget, "📏 provisioned capacity");
    if provisioned < i64::try_from(budget).unwrap_or(i64::MAX) {
        anyhow::bail!(
            "💀 Table '{}' is provisioned for {} units but this {} wants {} per second. \
             Lower the budget or raise the provisioning.",
            name,
            provisioned,
            direction,
            budget
        );
    }
    Ok(())
}

/// 🔁 Send a batch, then keep resending whatever came back unprocessed, backing off
/// between rounds. `send` takes the pending requests and returns what is still pending.
async fn resend_unprocessed<F, Fut>(
    table: &str,
    requests: Vec<WriteRequest>,
    mut send: F,
) -> Result<()>
where
    F: FnMut(HashMap<String, Vec<WriteRequest>>) -> Fut,
    Fut: Future<Output = Result<HashMap<String, Vec<WriteRequest>>>>,
{
    let mut pending = HashMap::from([(table.to_string(), requests)]);
    for round in 0..=MAX_UNPROCESSED_ROUNDS {
        if round > 0 {
            // -- 😮‍💨 DynamoDB only leaves items unprocessed when it is throttling us
            tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(round.min(6)))).await;
        }
        pending = send(pending)
            .await?
            .into_iter()
            .filter(|(_, requests)| !requests.is_empty())
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let left: usize = pending.values().map(Vec::len).sum();
        warn!(table, round, left, "🔁 resending unprocessed items");
    }
    anyhow::bail!(
        "💀 BatchWriteItem into '{}' still had unprocessed items after {} resends",
        table,
        MAX_UNPROCESSED_ROUNDS
    )
}
