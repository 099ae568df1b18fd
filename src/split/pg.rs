//! Partition generation: a feature-keyed bit-mask deterministically splits
//! a byte string into two order-preserving packages, and the inverse merge
//! reassembles them. The mask depends only on the feature, the buffer
//! length and the draw count, so both sides of the protocol can rebuild it.

use sha2::{Digest, Sha256};

use crate::error::{Result, ServiceError};

use super::fg::Feature;

// Mark up to `b` positions via H_i(fea) mod len. Distinct draws may land on
// the same position, so the popcount can fall short of `b`.
fn mask(fea: &Feature, len: usize, b: usize) -> Vec<bool> {
    let mut d = vec![false; len];
    if len == 0 {
        return d;
    }
    for i in 1..=b as u64 {
        let mut h = Sha256::new();
        h.update(fea.as_bytes());
        h.update(i.to_be_bytes());
        let sum = h.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&sum[..8]);
        let pos = u64::from_be_bytes(prefix) % len as u64;
        d[pos as usize] = true;
    }
    d
}

/// Split `data` into `(pkg1, pkg2)`: marked positions go to `pkg2`, the
/// rest to `pkg1`, order preserved within each package.
pub fn partition(fea: &Feature, data: &[u8], b: usize) -> (Vec<u8>, Vec<u8>) {
    let d = mask(fea, data.len(), b);
    let mut pkg1 = Vec::with_capacity(data.len());
    let mut pkg2 = Vec::with_capacity(b.min(data.len()));
    for (j, &byte) in data.iter().enumerate() {
        if d[j] {
            pkg2.push(byte);
        } else {
            pkg1.push(byte);
        }
    }
    (pkg1, pkg2)
}

/// Inverse of [`partition`]: rebuild the mask over the combined length and
/// interleave, drawing marked positions from `pkg2`. Both packages must be
/// consumed exactly; a shortfall or residual means the inputs do not belong
/// to this `(fea, b)` mask.
pub fn merge(fea: &Feature, pkg1: &[u8], pkg2: &[u8], b: usize) -> Result<Vec<u8>> {
    let total = pkg1.len() + pkg2.len();
    let d = mask(fea, total, b);

    let mut out = Vec::with_capacity(total);
    let mut i1 = 0;
    let mut i2 = 0;
    for j in 0..total {
        let byte = if d[j] {
            let byte = pkg2.get(i2).copied().ok_or_else(|| {
                ServiceError::Integrity("second package exhausted during merge".into())
            })?;
            i2 += 1;
            byte
        } else {
            let byte = pkg1.get(i1).copied().ok_or_else(|| {
                ServiceError::Integrity("first package exhausted during merge".into())
            })?;
            i1 += 1;
            byte
        };
        out.push(byte);
    }

    if i1 != pkg1.len() || i2 != pkg2.len() {
        return Err(ServiceError::Integrity(
            "merge left residual bytes".into(),
        ));
    }
    Ok(out)
}
