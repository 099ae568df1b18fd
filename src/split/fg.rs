//! Feature generation: sliding Rabin fingerprints mixed through per-sample
//! linear functions and folded into SHA-256.
//!
//! The sampling schedule is load-bearing. The fingerprint is sampled after
//! every byte once the total number of bytes fed has reached the window
//! size, so the byte that fills the window produces the first sample and an
//! input of length `n >= 64` produces `n - 63` samples. Downloads rebuild
//! partition masks from the stored feature, so any drift here corrupts
//! reconstruction.

use sha2::{Digest, Sha256};

use super::rabin::{Rabin, WINDOW_SIZE};

/// Length of a feature digest in bytes.
pub const FEATURE_SIZE: usize = 32;

/// 32-byte content descriptor of a file. Deterministic in the file bytes
/// alone; near-identical files do not share features.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Feature([u8; FEATURE_SIZE]);

impl Feature {
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; FEATURE_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; FEATURE_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Debug for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Feature({})", &self.to_hex()[..16])
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Feature generator with coefficient vectors for the linear mix. The
/// coefficients are public parameters, not secrets.
pub struct FeatureGen {
    a: Vec<u64>,
    m: Vec<u64>,
}

impl FeatureGen {
    /// Panics if either coefficient vector is empty.
    pub fn new(a: Vec<u64>, m: Vec<u64>) -> Self {
        assert!(
            !a.is_empty() && !m.is_empty(),
            "coefficient vectors must be non-empty"
        );
        Self { a, m }
    }

    /// Compute the feature of `data`. Inputs shorter than the Rabin window
    /// produce no samples and hash to SHA-256 of the empty stream.
    pub fn feature(&self, data: &[u8]) -> Feature {
        let mut rabin = Rabin::new();
        let mut sum = Sha256::new();
        let mut idx: usize = 0;

        for (fed, &b) in data.iter().enumerate() {
            rabin.write_byte(b);
            if fed + 1 >= WINDOW_SIZE {
                let p = rabin.sum64();
                let a = self.a[idx % self.a.len()];
                let m = self.m[idx % self.m.len()];
                let s = a.wrapping_mul(p).wrapping_add(m);
                sum.update(s.to_be_bytes());
                idx += 1;
            }
        }

        let digest = sum.finalize();
        let mut out = [0u8; FEATURE_SIZE];
        out.copy_from_slice(&digest);
        Feature(out)
    }
}
