//! 🗺️ WorkSource — who does what.
//!
//! Export side: the table is cut into `N` partitions, one per worker, decided up front.
//! Import side: inputs are discovered, turned into [`WorkItem`]s, and poured into one
//! multi-consumer queue that every import worker pulls from.
//!
//! 🧠 The import queue is filled completely and its sender dropped BEFORE any worker
//! starts. "Closed and empty" therefore means "done" and nobody has to guess.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::backends::{ObjectStore, ObjectStoreBackend};
use crate::common::{Location, Partition};

/// 📦 One unit of import work. Exactly one variant is used for a given run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WorkItem {
    /// one raw record, already split out of the single input
    Line(String),
    /// a whole local file of records
    File(PathBuf),
    /// a whole remote object of records
    Object { bucket: String, key: String },
}

/// 🎛️ How the queue was filled, decided once from the number of inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueDiscipline {
    Line,
    File,
    Object,
}

impl std::fmt::Display for QueueDiscipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            QueueDiscipline::Line => "line",
            QueueDiscipline::File => "file",
            QueueDiscipline::Object => "object",
        };
        f.write_str(name)
    }
}

/// 📬 The filled, closed queue.
#[derive(Debug)]
pub(crate) struct WorkQueue {
    pub discipline: QueueDiscipline,
    pub receiver: async_channel::Receiver<WorkItem>,
    pub total_items: usize,
}

/// 🍰 `0/N .. N-1/N`. Pairwise disjoint, union is the whole table.
pub(crate) fn partitions(total: u32) -> Vec<Partition> {
    (0..total).map(|index| Partition { index, total }).collect()
}

/// 🔭 Find the inputs, choose the discipline, fill the queue.
///
/// Zero inputs is fatal: there is nothing to import and no worker should start.
pub(crate) async fn build_work_queue(
    source: &Location,
    objects: &ObjectStoreBackend,
) -> Result<WorkQueue> {
    let items = match source {
        Location::Local(path) => {
            let files = discover_local(path).await?;
            match files.len() {
                0 => anyhow::bail!(
                    "💀 No .json inputs under '{}'. We looked everywhere. Under the couch. \
                     Behind the fridge. Nothing.",
                    path.display()
                ),
                1 => (QueueDiscipline::Line, local_lines(&files[0]).await?),
                _ => (
                    QueueDiscipline::File,
                    files.into_iter().map(WorkItem::File).collect(),
                ),
            }
        }
        Location::Remote { bucket, prefix } => {
            let keys = discover_remote(objects, bucket, prefix.as_deref()).await?;
            match keys.len() {
                0 => anyhow::bail!(
                    "💀 No objects ending in 'json' under {source}. The bucket echoes politely."
                ),
                1 => (
                    QueueDiscipline::Line,
                    remote_lines(objects, bucket, &keys[0]).await?,
                ),
                _ => (
                    QueueDiscipline::Object,
                    keys.into_iter()
                        .map(|key| WorkItem::Object {
                            bucket: bucket.clone(),
                            key,
                        })
                        .collect(),
                ),
            }
        }
    };
    let (discipline, mut items) = items;
    if discipline != QueueDiscipline::Line {
        items.shuffle(&mut rand::thread_rng());
    }
    Ok(fill_queue(discipline, items))
}

fn fill_queue(discipline: QueueDiscipline, items: Vec<WorkItem>) -> WorkQueue {
    let (sender, receiver) = async_channel::unbounded();
    let total_items = items.len();
    for item in items {
        // -- 📭 unbounded and we hold the receiver, so this cannot fail
        let _ = sender.try_send(item);
    }
    drop(sender);
    info!(%discipline, items = total_items, "📬 work queue filled");
    WorkQueue {
        discipline,
        receiver,
        total_items,
    }
}

fn is_json_input(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// 📁 A single `.json` file counts as one input, any other file as none. A directory is
/// walked recursively for `*.json`.
async fn discover_local(path: &Path) -> Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("💀 Import source '{}' does not exist", path.display()))?;
    if metadata.is_file() {
        return Ok(match is_json_input(path) {
            true => vec![path.to_path_buf()],
            false => Vec::new(),
        });
    }

    let mut found = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .with_context(|| format!("💀 Could not list '{}'", dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry.file_type().await?.is_dir() {
                pending.push(entry_path);
            } else if is_json_input(&entry_path) {
                found.push(entry_path);
            }
        }
    }
    found.sort();
    debug!(inputs = found.len(), root = %path.display(), "🔭 local inputs discovered");
    Ok(found)
}

async fn discover_remote(
    objects: &ObjectStoreBackend,
    bucket: &str,
    prefix: Option<&str>,
) -> Result<Vec<String>> {
    let keys: Vec<String> = objects
        .list_objects(bucket, prefix)
        .await
        .with_context(|| format!("💀 Could not list s3://{bucket}/{}", prefix.unwrap_or("")))?
        .into_iter()
        .filter(|key| key.ends_with("json"))
        .collect();
    debug!(inputs = keys.len(), bucket, "🔭 remote inputs discovered");
    Ok(keys)
}

async fn local_lines(path: &Path) -> Result<Vec<WorkItem>> {
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("💀 Could not read '{}'", path.display()))?;
    Ok(body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| WorkItem::Line(line.to_string()))
        .collect())
}

async fn remote_lines(
    objects: &ObjectStoreBackend,
    bucket: &str,
    key: &str,
) -> Result<Vec<WorkItem>> {
    let mut lines = objects.get_object_lines(bucket, key).await?;
    let mut items = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("💀 Reading s3://{bucket}/{key} broke mid-stream"))?
    {
        if !line.trim().is_empty() {
            items.push(WorkItem::Line(line));
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::in_mem::InMemoryObjectStore;

    fn no_bucket() -> ObjectStoreBackend {
        ObjectStoreBackend::InMemory(InMemoryObjectStore::default())
    }

    fn drain(queue: &WorkQueue) -> Vec<WorkItem> {
        let mut items = Vec::new();
        while let Ok(item) = queue.receiver.try_recv() {
            items.push(item);
        }
        items
    }

    #[test]
    fn the_one_where_partitions_cover_the_table_exactly_once() {
        for total in 1..=5 {
            let parts = partitions(total);
            assert_eq!(parts.len(), total as usize);
            let indexes: Vec<u32> = parts.iter().map(|p| p.index).collect();
            assert_eq!(indexes, (0..total).collect::<Vec<_>>());
            assert!(parts.iter().all(|p| p.total == total));
        }
    }

    #[tokio::test]
    async fn the_one_where_a_single_file_is_split_into_lines() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("only.json");
        tokio::fs::write(&file, "{\"a\":1}\n\n{\"a\":2}\n   \n{\"a\":3}\n").await?;

        let queue = build_work_queue(&Location::Local(file), &no_bucket()).await?;
        assert_eq!(queue.discipline, QueueDiscipline::Line);
        assert_eq!(queue.total_items, 3);
        assert_eq!(
            drain(&queue),
            vec![
                WorkItem::Line("{\"a\":1}".into()),
                WorkItem::Line("{\"a\":2}".into()),
                WorkItem::Line("{\"a\":3}".into()),
            ]
        );
        assert!(queue.receiver.is_closed());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_directory_walk_finds_every_json_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        tokio::fs::create_dir_all(dir.path().join("nested/deeper")).await?;
        for name in ["a.json", "nested/b.json", "nested/deeper/c.json", "notes.txt"] {
            tokio::fs::write(dir.path().join(name), "{}\n").await?;
        }

        let queue = build_work_queue(
            &Location::Local(dir.path().to_path_buf()),
            &no_bucket(),
        )
        .await?;
        assert_eq!(queue.discipline, QueueDiscipline::File);
        let mut files: Vec<PathBuf> = drain(&queue)
            .into_iter()
            .filter_map(|item| match item {
                WorkItem::File(path) => Some(path),
                _ => None,
            })
            .collect();
        files.sort();
        assert_eq!(
            files,
            vec![
                dir.path().join("a.json"),
                dir.path().join("nested/b.json"),
                dir.path().join("nested/deeper/c.json"),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_directory_is_fatal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = build_work_queue(
            &Location::Local(dir.path().to_path_buf()),
            &no_bucket(),
        )
        .await;
        assert!(result.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bucket_keys_not_ending_in_json_are_ignored() -> Result<()> {
        let store = InMemoryObjectStore::default();
        store.insert("dump", "daily/a.json", "{}\n").await;
        store.insert("dump", "daily/b.json", "{}\n").await;
        store.insert("dump", "daily/_SUCCESS", "").await;
        store.insert("dump", "weekly/c.json", "{}\n").await;
        let source = Location::parse("s3://dump/daily")?;

        let queue = build_work_queue(&source, &ObjectStoreBackend::InMemory(store)).await?;
        assert_eq!(queue.discipline, QueueDiscipline::Object);
        let mut keys: Vec<String> = drain(&queue)
            .into_iter()
            .filter_map(|item| match item {
                WorkItem::Object { key, .. } => Some(key),
                _ => None,
            })
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["daily/a.json", "daily/b.json"]);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_lone_text_file_is_not_an_import() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("notes.txt");
        tokio::fs::write(&file, "{\"a\":1}\n").await?;

        let err = build_work_queue(&Location::Local(file), &no_bucket())
            .await
            .err()
            .map(|e| format!("{e:#}"));
        assert!(err.is_some_and(|e| e.contains("No .json inputs")));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_object_named_by_its_full_key_is_found() -> Result<()> {
        let store = InMemoryObjectStore::default();
        store
            .insert("dump", "exports/orders.json", "{\"x\":1}\n{\"x\":2}\n{\"x\":3}\n")
            .await;
        store.insert("dump", "exports/other.json", "{\"x\":9}\n").await;
        let source = Location::parse("s3://dump/exports/orders.json")?;

        let queue = build_work_queue(&source, &ObjectStoreBackend::InMemory(store)).await?;
        assert_eq!(queue.discipline, QueueDiscipline::Line);
        assert_eq!(queue.total_items, 3);
        assert_eq!(drain(&queue)[0], WorkItem::Line("{\"x\":1}".into()));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_lonely_object_is_read_line_by_line() -> Result<()> {
        let store = InMemoryObjectStore::default();
        store.insert("dump", "only.json", "{\"x\":1}\n{\"x\":2}\n").await;
        let source = Location::parse("s3://dump")?;

        let queue = build_work_queue(&source, &ObjectStoreBackend::InMemory(store)).await?;
        assert_eq!(queue.discipline, QueueDiscipline::Line);
        assert_eq!(queue.total_items, 2);
        Ok(())
    }
}
