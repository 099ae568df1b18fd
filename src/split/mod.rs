//! Feature extraction and feature-keyed partitioning.
//!
//! `fg` derives a 32-byte content descriptor from file bytes; `pg` uses
//! that descriptor to split byte strings into two packages and to merge
//! them back. Both are pure and deterministic, which is what lets the
//! download path reproduce the exact bit selections of the upload path.

pub mod fg;
pub mod pg;
pub mod rabin;
