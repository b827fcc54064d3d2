use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backends::RecordStore;
use crate::common::{ContinuationToken, Partition, Record, ScanPage, TransferDirection};

// -- 💸 an eventually consistent read of a small item: half a unit, like the real thing
const UNITS_PER_RECORD: f64 = 0.5;

/// 🗄️ A table that lives in a `Vec` and forgets everything on drop.
///
/// Record `i` belongs to partition `i % total`, so every partition count slices the
/// table into disjoint pieces that add back up to the whole thing. Pages are
/// `page_size` records long and the continuation token is an offset into the slice.
///
/// Clone-able because tests need to peek inside after handing a copy to the
/// pipeline. Every clone shares the same `Arc<Mutex<...>>`.
///
/// 💥 `fail_next(n)` makes the next `n` calls (any kind) fail like a throttled table.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryRecordStore {
    table: Arc<Mutex<InMemoryTable>>,
}

#[derive(Debug)]
struct InMemoryTable {
    records: Vec<Record>,
    written: Vec<Record>,
    page_size: usize,
    injected_failures: u32,
    calls: u32,
}

impl InMemoryRecordStore {
    /// 🚀 A table pre-loaded with `records`, scanned `page_size` at a time.
    pub(crate) fn with_records(records: Vec<Record>, page_size: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(InMemoryTable {
                records,
                written: Vec::new(),
                page_size: page_size.max(1),
                injected_failures: 0,
                calls: 0,
            })),
        }
    }

    /// 🕳️ An empty table, ready to be imported into.
    pub(crate) fn empty() -> Self {
        Self::with_records(Vec::new(), 100)
    }

    pub(crate) async fn fail_next(&self, calls: u32) {
        self.table.lock().await.injected_failures = calls;
    }

    /// 📜 Every record written so far, in arrival order.
    pub(crate) async fn written(&self) -> Vec<Record> {
        self.table.lock().await.written.clone()
    }

    /// 🔢 Calls seen, failed ones included.
    pub(crate) async fn calls(&self) -> u32 {
        self.table.lock().await.calls
    }
}

impl InMemoryTable {
    fn check_in(&mut self) -> Result<()> {
        self.calls += 1;
        if self.injected_failures > 0 {
            self.injected_failures -= 1;
            anyhow::bail!("💥 ProvisionedThroughputExceededException (injected)");
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn preflight(&self, _direction: TransferDirection, _budget: u64) -> Result<()> {
        Ok(())
    }

    async fn scan_partition(
        &self,
        partition: Partition,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage> {
        let mut table = self.table.lock().await;
        table.check_in()?;
        let offset = match token {
            None => 0,
            Some(ContinuationToken::Offset(offset)) => offset,
            Some(other) => anyhow::bail!("💀 {other:?} is not an in-memory token"),
        };
        let total = partition.total.max(1) as usize;
        let slice: Vec<&Record> = table
            .records
            .iter()
            .enumerate()
            .filter(|(position, _)| position % total == partition.index as usize)
            .map(|(_, record)| record)
            .collect();
        let records: Vec<Record> = slice
            .iter()
            .skip(offset)
            .take(table.page_size)
            .map(|record| (*record).clone())
            .collect();
        let next_offset = offset + records.len();
        let next_token = (next_offset < slice.len()).then_some(ContinuationToken::Offset(next_offset));
        Ok(ScanPage {
            consumed_capacity: records.len() as f64 * UNITS_PER_RECORD,
            records,
            next_token,
        })
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        let mut table = self.table.lock().await;
        table.check_in()?;
        table.written.push(record.clone());
        Ok(())
    }

    async fn batch_put_records(&self, records: &[Record]) -> Result<()> {
        let mut table = self.table.lock().await;
        table.check_in()?;
        table.written.extend_from_slice(records);
        Ok(())
    }
}
