//! The double-layer dedup pipeline.
//!
//! Upload runs two feature-keyed splits around a deterministic encryption
//! layer so that the `d` blob comes out byte-identical for every uploader
//! of the same file and can be stored once, while the `s` blob is encrypted
//! under a per-upload key and stays unique. Download is the strict inverse,
//! driven entirely by persisted metadata.
//!
//! Every step talks to collaborators through injected handles; the service
//! holds no mutable state of its own and is safe to share across request
//! tasks.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::Cipher;
use crate::db::{MetadataStore, NewFile};
use crate::error::{Result, ServiceError};
use crate::kms::KeyManager;
use crate::split::fg::{Feature, FeatureGen};
use crate::split::pg;
use crate::storage::{common_key, file_key, ObjectStore};

/// What an upload hands back to the HTTP layer.
pub struct UploadReceipt {
    pub file_id: Uuid,
    pub feature: Feature,
    pub dek_shared: Vec<u8>,
    pub dek_user: Vec<u8>,
}

/// The upload/download orchestrator.
pub struct Service {
    fg: FeatureGen,
    pg_b: usize,
    kms: Arc<dyn KeyManager>,
    db: Arc<dyn MetadataStore>,
    store: Arc<dyn ObjectStore>,
}

fn hex_sha256(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

impl Service {
    pub fn new(
        fg: FeatureGen,
        pg_b: usize,
        kms: Arc<dyn KeyManager>,
        db: Arc<dyn MetadataStore>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            fg,
            pg_b,
            kms,
            db,
            store,
        }
    }

    /// Run the upload pipeline over a fully buffered body. Steps are
    /// strictly sequential and fail fast; writes already committed are not
    /// rolled back (an upload cut short before the file row is invisible,
    /// one cut short after it is rejected by the download-side chunk-count
    /// check).
    pub async fn upload(&self, owner_id: &str, filename: &str, body: Bytes) -> Result<UploadReceipt> {
        // Feature and first split.
        let fea = self.fg.feature(&body);
        let (pkg1, pkg2) = pg::partition(&fea, &body, self.pg_b);
        let pkg2_len = pkg2.len();

        // Shared DEK: the first uploader of a feature fixes the key every
        // later uploader must reuse.
        let dek_shared = match self.db.get_feature(fea.as_bytes()).await? {
            Some(cipher) => cipher,
            None => {
                let fresh = self.kms.generate_data_key().await?;
                if self.db.create_feature(fea.as_bytes(), &fresh.ciphertext).await? {
                    fresh.ciphertext
                } else {
                    // Lost the insert race; discard our key and adopt the
                    // winner's so dedup keeps working.
                    self.db.get_feature(fea.as_bytes()).await?.ok_or_else(|| {
                        ServiceError::Storage(
                            "feature row vanished after conflicting insert".into(),
                        )
                    })?
                }
            }
        };

        let shared_plain = self.kms.decrypt_data_key(&dek_shared).await?;
        let enc_shared = Cipher::new(&shared_plain)?;
        let pkg3c = enc_shared.encrypt(&pkg1, true)?;

        // Second split, over the deterministic ciphertext.
        let (d, pkg4) = pg::partition(&fea, &pkg3c, self.pg_b);

        let user_key = self.kms.generate_data_key().await?;
        let enc_user = Cipher::new(&user_key.plaintext)?;
        let mut combined = pkg2;
        combined.extend_from_slice(&pkg4);
        let s_blob = enc_user.encrypt(&combined, false)?;

        // Commit point: from here the upload is visible.
        let file_id = self
            .db
            .create_file(NewFile {
                owner_id,
                filename,
                fea_hash: fea.as_bytes(),
                dek_shared: &dek_shared,
                dek_user: &user_key.ciphertext,
                pkg2_len: pkg2_len as i64,
            })
            .await?;

        // `d` dedupes across files; only its first sighting hits the store.
        let hex_d = hex_sha256(&d);
        let key_d = common_key(&hex_d);
        if !self.db.exists_chunk(&hex_d).await? {
            self.store.put(&key_d, Bytes::from(d)).await?;
            self.db.insert_chunk(&hex_d, &key_d, true).await?;
        }
        self.db.add_file_chunk(file_id, &hex_d, 0).await?;

        // The s-blob is always fresh: user DEK plus random nonce.
        let hex_s = hex_sha256(&s_blob);
        let key_s = file_key(&file_id, &hex_s);
        self.store.put(&key_s, Bytes::from(s_blob)).await?;
        self.db.insert_chunk(&hex_s, &key_s, false).await?;
        self.db.add_file_chunk(file_id, &hex_s, 1).await?;

        Ok(UploadReceipt {
            file_id,
            feature: fea,
            dek_shared,
            dek_user: user_key.ciphertext,
        })
    }

    /// Reconstruct the original bytes of a stored file. Structural
    /// violations surface as integrity errors rather than best-effort
    /// output.
    pub async fn download(&self, owner_id: &str, file_id: Uuid) -> Result<Vec<u8>> {
        let (meta, chunks) = self
            .db
            .get_file_meta(owner_id, file_id)
            .await?
            .ok_or(ServiceError::NotFound)?;
        if chunks.len() != 2 {
            return Err(ServiceError::Integrity(format!(
                "expected 2 blobs, got {}",
                chunks.len()
            )));
        }
        let fea = Feature::from_slice(&meta.fea_hash).ok_or_else(|| {
            ServiceError::Integrity("stored feature is not 32 bytes".into())
        })?;

        let shared_plain = self.kms.decrypt_data_key(&meta.dek_shared).await?;
        let enc_shared = Cipher::new(&shared_plain)?;
        let d_data = self.store.get(&chunks[0].s3_key).await?;

        let user_plain = self.kms.decrypt_data_key(&meta.dek_user).await?;
        let enc_user = Cipher::new(&user_plain)?;
        let s_blob = self.store.get(&chunks[1].s3_key).await?;
        let combined = enc_user.decrypt(&s_blob)?;

        // Split the combined blob exactly where the upload recorded.
        let pkg2_len = usize::try_from(meta.pkg2_len)
            .map_err(|_| ServiceError::Integrity("negative pkg2_len".into()))?;
        if pkg2_len > combined.len() {
            return Err(ServiceError::Integrity(format!(
                "pkg2_len {} exceeds combined blob of {} bytes",
                pkg2_len,
                combined.len()
            )));
        }
        let (pkg2, pkg4) = combined.split_at(pkg2_len);

        // Undo the second split, decrypt, undo the first split.
        let pkg3c = pg::merge(&fea, &d_data, pkg4, self.pg_b)?;
        let pkg1 = enc_shared.decrypt(&pkg3c)?;
        pg::merge(&fea, &pkg1, pkg2, self.pg_b)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use dashmap::DashMap;
    use rand::RngCore;

    use super::*;
    use crate::db::entities::{chunk, file, file_chunk};

    // In-memory stand-ins for Postgres, S3 and KMS. They implement the same
    // contracts the production clients do, which is all the pipeline sees.

    #[derive(Default)]
    struct MemoryMetaInner {
        features: HashMap<Vec<u8>, Vec<u8>>,
        files: HashMap<Uuid, file::Model>,
        chunks: HashMap<String, chunk::Model>,
        links: Vec<file_chunk::Model>,
    }

    #[derive(Default)]
    struct MemoryMeta {
        inner: Mutex<MemoryMetaInner>,
    }

    #[async_trait::async_trait]
    impl MetadataStore for MemoryMeta {
        async fn get_feature(&self, fea_hash: &[u8]) -> Result<Option<Vec<u8>>> {
            Ok(self.inner.lock().unwrap().features.get(fea_hash).cloned())
        }

        async fn create_feature(&self, fea_hash: &[u8], dek_shared: &[u8]) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            if inner.features.contains_key(fea_hash) {
                return Ok(false);
            }
            inner
                .features
                .insert(fea_hash.to_vec(), dek_shared.to_vec());
            Ok(true)
        }

        async fn create_file(&self, rec: NewFile<'_>) -> Result<Uuid> {
            let file_id = Uuid::new_v4();
            self.inner.lock().unwrap().files.insert(
                file_id,
                file::Model {
                    file_id,
                    owner_id: rec.owner_id.to_string(),
                    filename: rec.filename.to_string(),
                    fea_hash: rec.fea_hash.to_vec(),
                    dek_shared: rec.dek_shared.to_vec(),
                    dek_user: rec.dek_user.to_vec(),
                    pkg2_len: rec.pkg2_len,
                },
            );
            Ok(file_id)
        }

        async fn exists_chunk(&self, chunk_hash: &str) -> Result<bool> {
            Ok(self.inner.lock().unwrap().chunks.contains_key(chunk_hash))
        }

        async fn insert_chunk(&self, chunk_hash: &str, s3_key: &str, is_common: bool) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if inner.chunks.contains_key(chunk_hash) {
                if is_common {
                    return Ok(());
                }
                return Err(ServiceError::Storage("duplicate chunk hash".into()));
            }
            inner.chunks.insert(
                chunk_hash.to_string(),
                chunk::Model {
                    chunk_hash: chunk_hash.to_string(),
                    s3_key: s3_key.to_string(),
                    is_common,
                },
            );
            Ok(())
        }

        async fn add_file_chunk(&self, file_id: Uuid, chunk_hash: &str, seq: i32) -> Result<()> {
            self.inner.lock().unwrap().links.push(file_chunk::Model {
                file_id,
                seq,
                chunk_hash: chunk_hash.to_string(),
            });
            Ok(())
        }

        async fn get_file_meta(
            &self,
            owner_id: &str,
            file_id: Uuid,
        ) -> Result<Option<(file::Model, Vec<chunk::Model>)>> {
            let inner = self.inner.lock().unwrap();
            let Some(file_row) = inner
                .files
                .get(&file_id)
                .filter(|f| f.owner_id == owner_id)
                .cloned()
            else {
                return Ok(None);
            };

            let mut links: Vec<_> = inner
                .links
                .iter()
                .filter(|l| l.file_id == file_id)
                .cloned()
                .collect();
            links.sort_by_key(|l| l.seq);

            let mut chunks = Vec::with_capacity(links.len());
            for link in links {
                let chunk_row = inner.chunks.get(&link.chunk_hash).cloned().ok_or_else(|| {
                    ServiceError::Integrity(format!("chunk {} missing", link.chunk_hash))
                })?;
                chunks.push(chunk_row);
            }
            Ok(Some((file_row, chunks)))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        objects: DashMap<String, Bytes>,
    }

    #[async_trait::async_trait]
    impl ObjectStore for MemoryStore {
        async fn put(&self, key: &str, data: Bytes) -> Result<()> {
            self.objects.insert(key.to_string(), data);
            Ok(())
        }

        async fn get(&self, key: &str) -> Result<Bytes> {
            self.objects
                .get(key)
                .map(|v| v.value().clone())
                .ok_or_else(|| ServiceError::Storage(format!("object missing: {}", key)))
        }

        async fn list(&self) -> Result<Vec<String>> {
            Ok(self.objects.iter().map(|e| e.key().clone()).collect())
        }
    }

    impl MemoryStore {
        fn common_object_count(&self) -> usize {
            self.objects
                .iter()
                .filter(|e| e.key().starts_with("common/"))
                .count()
        }

        fn corrupt(&self, key: &str) {
            let mut blob = self.objects.get(key).unwrap().to_vec();
            let last = blob.len() - 1;
            blob[last] ^= 0xff;
            self.objects.insert(key.to_string(), Bytes::from(blob));
        }
    }

    #[derive(Default)]
    struct MemoryKms {
        keys: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl KeyManager for MemoryKms {
        async fn generate_data_key(&self) -> Result<crate::kms::DataKey> {
            let mut plaintext = vec![0u8; 32];
            let mut ciphertext = vec![0u8; 32];
            rand::thread_rng().fill_bytes(&mut plaintext);
            rand::thread_rng().fill_bytes(&mut ciphertext);
            self.keys
                .lock()
                .unwrap()
                .insert(ciphertext.clone(), plaintext.clone());
            Ok(crate::kms::DataKey {
                plaintext,
                ciphertext,
            })
        }

        async fn decrypt_data_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
            self.keys
                .lock()
                .unwrap()
                .get(ciphertext)
                .cloned()
                .ok_or_else(|| ServiceError::Crypto("unknown wrapped key".into()))
        }
    }

    struct Harness {
        service: Service,
        meta: Arc<MemoryMeta>,
        store: Arc<MemoryStore>,
        kms: Arc<MemoryKms>,
    }

    fn harness() -> Harness {
        let meta = Arc::new(MemoryMeta::default());
        let store = Arc::new(MemoryStore::default());
        let kms = Arc::new(MemoryKms::default());
        let service = Service::new(
            FeatureGen::new(vec![1, 3, 5], vec![0, 0, 0]),
            3,
            kms.clone(),
            meta.clone(),
            store.clone(),
        );
        Harness {
            service,
            meta,
            store,
            kms,
        }
    }

    #[tokio::test]
    async fn upload_then_download_round_trips() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "a.txt", Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        assert_eq!(receipt.feature.to_hex().len(), 64);
        assert!(!receipt.dek_shared.is_empty());
        assert!(!receipt.dek_user.is_empty());

        {
            let inner = h.meta.inner.lock().unwrap();
            assert_eq!(inner.files.len(), 1);
            assert_eq!(inner.chunks.len(), 2);
            assert_eq!(inner.links.len(), 2);
        }
        assert_eq!(h.store.objects.len(), 2);

        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn empty_file_round_trips() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "empty.bin", Bytes::new())
            .await
            .unwrap();

        {
            let inner = h.meta.inner.lock().unwrap();
            let file = inner.files.values().next().unwrap();
            assert_eq!(file.pkg2_len, 0);
            assert_eq!(inner.links.len(), 2);
        }

        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn single_byte_file_round_trips() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "one.bin", Bytes::from_static(b"A"))
            .await
            .unwrap();

        {
            let inner = h.meta.inner.lock().unwrap();
            let file = inner.files.values().next().unwrap();
            assert!((0..=1).contains(&file.pkg2_len));
        }

        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert_eq!(data, b"A");
    }

    #[tokio::test]
    async fn sub_window_file_round_trips() {
        // Shorter than the Rabin window: the feature degenerates to the
        // empty-stream digest but the protocol still has to reconstruct.
        let h = harness();
        let body: Vec<u8> = (0..40u8).collect();
        let receipt = h
            .service
            .upload("u1", "small.bin", Bytes::from(body.clone()))
            .await
            .unwrap();

        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert_eq!(data, body);
    }

    #[tokio::test]
    async fn window_sized_file_round_trips() {
        let h = harness();
        let body = vec![0xA5u8; 64];
        let receipt = h
            .service
            .upload("u1", "win.bin", Bytes::from(body.clone()))
            .await
            .unwrap();

        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert_eq!(data, body);
    }

    #[tokio::test]
    async fn large_random_file_round_trips() {
        let h = harness();
        let mut body = vec![0u8; 1 << 20];
        rand::thread_rng().fill_bytes(&mut body);

        let receipt = h
            .service
            .upload("u1", "big.bin", Bytes::from(body.clone()))
            .await
            .unwrap();
        let data = h.service.download("u1", receipt.file_id).await.unwrap();
        assert_eq!(data, body);
    }

    #[tokio::test]
    async fn identical_files_share_the_common_blob() {
        let h = harness();
        let body = Bytes::from_static(b"shared content between two owners, long enough to split well");

        let first = h.service.upload("u1", "a.txt", body.clone()).await.unwrap();
        let commons_after_first = h.store.common_object_count();

        let second = h.service.upload("u2", "b.txt", body.clone()).await.unwrap();

        // One feature row, one common object, same wrapped shared DEK.
        assert_eq!(h.meta.inner.lock().unwrap().features.len(), 1);
        assert_eq!(h.store.common_object_count(), commons_after_first);
        assert_eq!(first.dek_shared, second.dek_shared);

        // Everything per-file stays distinct.
        assert_ne!(first.file_id, second.file_id);
        assert_ne!(first.dek_user, second.dek_user);
        let s_keys: Vec<String> = h
            .store
            .objects
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with("files/"))
            .collect();
        assert_eq!(s_keys.len(), 2);

        // Both owners get their bytes back.
        assert_eq!(
            h.service.download("u1", first.file_id).await.unwrap(),
            body.as_ref()
        );
        assert_eq!(
            h.service.download("u2", second.file_id).await.unwrap(),
            body.as_ref()
        );
    }

    #[tokio::test]
    async fn download_with_wrong_owner_is_not_found() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "a.txt", Bytes::from_static(b"hello world"))
            .await
            .unwrap();

        let err = h.service.download("u2", receipt.file_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn download_of_unknown_file_is_not_found() {
        let h = harness();
        let err = h.service.download("u1", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound));
    }

    #[tokio::test]
    async fn corrupted_unique_blob_fails_authentication() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "a.txt", Bytes::from_static(b"some bytes worth protecting"))
            .await
            .unwrap();

        let s_key = {
            let inner = h.meta.inner.lock().unwrap();
            let link = inner
                .links
                .iter()
                .find(|l| l.file_id == receipt.file_id && l.seq == 1)
                .unwrap()
                .clone();
            inner.chunks[&link.chunk_hash].s3_key.clone()
        };
        h.store.corrupt(&s_key);

        let err = h.service.download("u1", receipt.file_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Crypto(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn incomplete_file_is_rejected() {
        let h = harness();
        let receipt = h
            .service
            .upload("u1", "a.txt", Bytes::from_static(b"soon to be truncated"))
            .await
            .unwrap();

        h.meta
            .inner
            .lock()
            .unwrap()
            .links
            .retain(|l| !(l.file_id == receipt.file_id && l.seq == 1));

        let err = h.service.download("u1", receipt.file_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Integrity(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn preseeded_feature_key_is_reused() {
        let h = harness();
        let body = b"content whose shared key was minted by an earlier uploader....";

        let fea = FeatureGen::new(vec![1, 3, 5], vec![0, 0, 0]).feature(body);
        let seeded = h.kms.generate_data_key().await.unwrap();
        assert!(h
            .meta
            .create_feature(fea.as_bytes(), &seeded.ciphertext)
            .await
            .unwrap());

        let receipt = h
            .service
            .upload("u1", "a.txt", Bytes::from_static(body))
            .await
            .unwrap();
        assert_eq!(receipt.dek_shared, seeded.ciphertext);
    }

    #[tokio::test]
    async fn concurrent_uploads_agree_on_shared_dek() {
        let h = harness();
        let body = Bytes::from_static(b"raced content uploaded twice at once, same bytes each time");

        let (a, b) = tokio::join!(
            h.service.upload("u1", "a.txt", body.clone()),
            h.service.upload("u2", "b.txt", body.clone()),
        );
        let a = a.unwrap();
        let b = b.unwrap();

        assert_eq!(a.dek_shared, b.dek_shared);
        assert_eq!(h.meta.inner.lock().unwrap().features.len(), 1);
        assert_eq!(h.store.common_object_count(), 1);
    }
}
