//! Data-key management backed by AWS KMS.
//!
//! The orchestrator only ever needs two operations: mint a fresh AES-256
//! data key (plaintext plus the wrapped blob that goes into metadata) and
//! unwrap a stored blob. Both sit behind `KeyManager` so tests can swap in
//! an in-memory implementation.

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::DataKeySpec;
use aws_sdk_kms::Client;

use crate::config::Config;
use crate::error::{Result, ServiceError};

/// A freshly generated data key.
pub struct DataKey {
    /// Raw 32-byte key, used immediately and dropped.
    pub plaintext: Vec<u8>,
    /// KMS-wrapped blob, the only form that is ever persisted.
    pub ciphertext: Vec<u8>,
}

#[async_trait]
pub trait KeyManager: Send + Sync {
    async fn generate_data_key(&self) -> Result<DataKey>;

    async fn decrypt_data_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>>;
}

/// `KeyManager` implementation over the AWS KMS client.
pub struct KmsKeyManager {
    client: Client,
    key_id: String,
}

impl KmsKeyManager {
    pub fn new(client: Client, cfg: &Config) -> Result<Self> {
        if cfg.aws_region.is_empty() || cfg.kms_key_id.is_empty() {
            return Err(ServiceError::Input(
                "DSDE_AWS_REGION and DSDE_KMS_KEY_ID must be set".into(),
            ));
        }
        Ok(Self {
            client,
            key_id: cfg.kms_key_id.clone(),
        })
    }
}

#[async_trait]
impl KeyManager for KmsKeyManager {
    async fn generate_data_key(&self) -> Result<DataKey> {
        let out = self
            .client
            .generate_data_key()
            .key_id(&self.key_id)
            .key_spec(DataKeySpec::Aes256)
            .send()
            .await
            .map_err(|e| ServiceError::Crypto(format!("KMS GenerateDataKey: {}", e)))?;

        let plaintext = out
            .plaintext
            .ok_or_else(|| ServiceError::Crypto("KMS returned no plaintext key".into()))?
            .into_inner();
        let ciphertext = out
            .ciphertext_blob
            .ok_or_else(|| ServiceError::Crypto("KMS returned no ciphertext blob".into()))?
            .into_inner();

        Ok(DataKey {
            plaintext,
            ciphertext,
        })
    }

    async fn decrypt_data_key(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let out = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| ServiceError::Crypto(format!("KMS Decrypt: {}", e)))?;

        let plaintext = out
            .plaintext
            .ok_or_else(|| ServiceError::Crypto("KMS returned no plaintext".into()))?;

        Ok(plaintext.into_inner())
    }
}
