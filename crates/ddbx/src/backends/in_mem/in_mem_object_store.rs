use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::{ObjectLines, ObjectReader, ObjectStore, lines_of};

/// 🪣 A bucket made of RAM. Keys sort, bytes stay put, nothing is ever eventually consistent.
///
/// 💥 `fail_next_uploads(n)` makes the next `n` uploads fail, for testing staging retries.
#[derive(Debug, Clone, Default)]
pub(crate) struct InMemoryObjectStore {
    inner: Arc<Mutex<InMemoryBuckets>>,
}

#[derive(Debug, Default)]
struct InMemoryBuckets {
    objects: BTreeMap<(String, String), Vec<u8>>,
    failing_uploads: u32,
}

impl InMemoryObjectStore {
    pub(crate) async fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .await
            .objects
            .insert((bucket.to_string(), key.to_string()), body.into());
    }

    pub(crate) async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .await
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub(crate) async fn fail_next_uploads(&self, uploads: u32) {
        self.inner.lock().await.failing_uploads = uploads;
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.unwrap_or("");
        Ok(self
            .inner
            .lock()
            .await
            .objects
            .keys()
            .filter(|(b, key)| b == bucket && key.starts_with(prefix))
            .map(|(_, key)| key.clone())
            .collect())
    }

    async fn get_object_lines(&self, bucket: &str, key: &str) -> Result<ObjectLines> {
        let body = self
            .get(bucket, key)
            .await
            .with_context(|| format!("💀 NoSuchKey: s3://{bucket}/{key}"))?;
        let reader: ObjectReader = Box::new(Cursor::new(body));
        Ok(lines_of(reader))
    }

    async fn put_object(&self, bucket: &str, key: &str, local_path: &Path) -> Result<()> {
        let body = tokio::fs::read(local_path)
            .await
            .with_context(|| format!("💀 Could not read '{}' for upload", local_path.display()))?;
        let mut inner = self.inner.lock().await;
        if inner.failing_uploads > 0 {
            inner.failing_uploads -= 1;
            anyhow::bail!("💥 SlowDown (injected)");
        }
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }
}
