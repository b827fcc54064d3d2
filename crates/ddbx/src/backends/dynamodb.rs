// ai
//! 🗄️ DynamoDB backend — the table end of the pipe.
//!
//! 🧠 Knowledge graph:
//! - Same pattern as `s3/` and `in_mem/`: one concrete store, one trait impl
//! - `attribute_values`: JSON ⇄ `AttributeValue`, number disambiguation included
//! - `dynamodb_store`: `Scan` with segments, `PutItem`, `BatchWriteItem`, `DescribeTable`

mod attribute_values;
mod dynamodb_store;

pub(crate) use dynamodb_store::{DynamoDbRecordStore, MAX_BATCH_WRITE_ITEMS};
