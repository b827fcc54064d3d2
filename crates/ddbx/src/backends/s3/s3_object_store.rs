// ai
//! 🪣📡 S3 object store — list a prefix, stream an object line by line, upload a file.
//!
//! COLD OPEN — EXT. DATA CENTER — 3:47 AM
//!
//! "The export landed in the bucket," they said. "All four hundred files."
//! The import worker read the first one. Then the next. Then it realized the bucket
//! also had a README.txt in it, and quietly pretended not to see it.
//!
//! 🧠 Knowledge graph:
//! - Listing: `ListObjectsV2` with continuation tokens, until `IsTruncated` says stop
//! - Reading: `GetObject` → `ByteStream::into_async_read()` → `BufReader` → `lines()`
//! - Writing: `ByteStream::from_path()` → `PutObject`
//! - Same read pattern the file import uses, different origin story

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, trace};

use crate::backends::{ObjectLines, ObjectReader, ObjectStore, lines_of};

/// 🪣 A handle on S3 in one region. Clone freely.
#[derive(Debug, Clone)]
pub(crate) struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// 🚀 Same credential chain as the table client, same region.
    pub(crate) async fn new(region: &str) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_s3::Client::new(&aws_config),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .set_prefix(prefix.map(str::to_string))
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .with_context(|| {
                    format!(
                        "💀 ListObjectsV2 failed for s3://{bucket}/{}. \
                         Check: bucket name, region, and whether the IAM role can list.",
                        prefix.unwrap_or("")
                    )
                })?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
            continuation_token = page.next_continuation_token().map(str::to_string);
            if page.is_truncated() != Some(true) || continuation_token.is_none() {
                break;
            }
        }
        debug!(bucket, ?prefix, objects = keys.len(), "🪣 listed objects");
        Ok(keys)
    }

    async fn get_object_lines(&self, bucket: &str, key: &str) -> Result<ObjectLines> {
        let object = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| {
                format!(
                    "💀 GetObject failed for s3://{bucket}/{key}. \
                     Check: IAM permissions, bucket policy, KMS key access."
                )
            })?;
        let reader: ObjectReader = Box::new(object.body.into_async_read());
        Ok(lines_of(reader))
    }

    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let body = ByteStream::from_path(local_path).await.with_context(|| {
            format!("💀 Could not open '{}' for upload", local_path.display())
        })?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .with_context(|| format!("💀 PutObject to s3://{bucket}/{key} failed"))?;
        trace!(bucket, key, "🚀 staged {}", local_path.display());
        Ok(())
    }
}
