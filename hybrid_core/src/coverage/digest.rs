use crate::branch::StorageDigest;
use ethnum::U256;
use sha1::{Digest, Sha1};

/// Digest of the storage slots observed at a branch, must give equal digests
/// for equal observable storage.
pub trait StorageDigester: Send + Sync {
    fn digest(&self, slots: &[(U256, U256)]) -> StorageDigest;
}

/// Sha1 over the (slot, value) pairs sorted by slot, last write of a slot wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha1Digester;

impl StorageDigester for Sha1Digester {
    fn digest(&self, slots: &[(U256, U256)]) -> StorageDigest {
        let mut sorted = slots.iter().enumerate().collect::<Vec<_>>();
        sorted.sort_by(|(i, (a, _)), (j, (b, _))| a.cmp(b).then(j.cmp(i)));
        sorted.dedup_by(|(_, (a, _)), (_, (b, _))| a == b);

        let mut hasher = Sha1::new();
        for (_, (slot, value)) in sorted {
            hasher.update(&slot.to_be_bytes());
            hasher.update(&value.to_be_bytes());
        }
        let mut d = [0; 20];
        d.copy_from_slice(&hasher.finalize());
        d
    }
}
