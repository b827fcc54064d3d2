// ai
//! 🪣 S3 backend — the object-store end of the pipe.
//!
//! 🧠 Knowledge graph:
//! - Same pattern as `dynamodb/` and `in_mem/`
//! - Trait impl: `impl ObjectStore for S3ObjectStore`
//! - Enum variant: `ObjectStoreBackend::S3(S3ObjectStore)`
//!
//! 🦆 The duck has no clearance for AWS. It watches from the edge of the VPC.

mod s3_object_store;

pub(crate) use s3_object_store::S3ObjectStore;
