//! # Previously, on ddbx...
//!
//! 🎬 The table was in another region. The bucket was behind an IAM policy nobody
//! could read. The tests needed to run on a laptop on a plane. Someone had to write
//! a backend so simple it lives entirely in RAM, gone the moment you blink.
//!
//! That someone was this module.
//!
//! `in_mem` provides an in-memory [`RecordStore`](super::RecordStore) and
//! [`ObjectStore`](super::ObjectStore) for tests. Both keep their state behind an
//! `Arc<Mutex<...>>` so a test can hand one clone to the pipeline and keep another
//! to look at what arrived. Both can be told to fail on purpose.
//!
//! 🦆
//!
//! ⚠️ This is NOT for production. If you're deploying this to prod, please also
//! deploy a therapist.

mod in_mem_object_store;
mod in_mem_record_store;

pub(crate) use in_mem_object_store::InMemoryObjectStore;
pub(crate) use in_mem_record_store::InMemoryRecordStore;
