//! Blob store abstraction.
//!
//! The pipeline stores exactly two kinds of objects: cross-file
//! deduplicated blobs under `common/` and per-file blobs under
//! `files/<uuid>/`. The `ObjectStore` trait keeps the seam pluggable;
//! production runs on S3.

mod backend;
mod s3;

pub use backend::{common_key, file_key, ObjectStore};
pub use s3::S3Store;
