//! Blob store trait and object key naming.

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::Result;

/// Key for a cross-file deduplicated blob.
pub fn common_key(hex_hash: &str) -> String {
    format!("common/{}", hex_hash)
}

/// Key for a per-file blob. The file id keeps these keys collision-free
/// even across identical blob hashes.
pub fn file_key(file_id: &Uuid, hex_hash: &str) -> String {
    format!("files/{}/s-{}", file_id, hex_hash)
}

/// Object store operations required by the pipeline. `put` may overwrite;
/// common blobs are content-addressed so a repeated put writes the same
/// bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Bytes>;

    /// All keys in the bucket, for the admin inspection endpoint.
    async fn list(&self) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let id = Uuid::nil();
        assert_eq!(common_key("abcd"), "common/abcd");
        assert_eq!(
            file_key(&id, "abcd"),
            "files/00000000-0000-0000-0000-000000000000/s-abcd"
        );
    }
}
