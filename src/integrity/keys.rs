use std::fmt::{Debug, Formatter};

use hmac::{Hmac, Mac};
use sha2::Sha256;

pub type HmacSha256 = Hmac<Sha256>;

const KEY_LEN: usize = 32;

/// Independent keys for each integrity purpose, all derived from the single
/// configured `hmac_secret`. Compromise of one derived key reveals nothing
/// about the others.
#[derive(Clone)]
pub struct IntegrityKeys {
    commitment: [u8; KEY_LEN],
    linkage: [u8; KEY_LEN],
    receipt: [u8; KEY_LEN],
}

impl IntegrityKeys {
    pub fn derive(root_secret: &[u8]) -> Self {
        Self {
            commitment: derive_key(root_secret, b"evote/ballot-commitment/v1"),
            linkage: derive_key(root_secret, b"evote/voter-linkage/v1"),
            receipt: derive_key(root_secret, b"evote/receipt/v1"),
        }
    }

    /// MAC keyed for ballot commitments.
    pub(crate) fn commitment_mac(&self) -> HmacSha256 {
        keyed(&self.commitment)
    }

    /// MAC keyed for the voter tag stored on ballots.
    pub(crate) fn linkage_mac(&self) -> HmacSha256 {
        keyed(&self.linkage)
    }

    /// MAC keyed for receipts.
    pub(crate) fn receipt_mac(&self) -> HmacSha256 {
        keyed(&self.receipt)
    }
}

impl Debug for IntegrityKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("IntegrityKeys { .. }")
    }
}

fn keyed(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC can take key of any size")
}

fn derive_key(root_secret: &[u8], label: &[u8]) -> [u8; KEY_LEN] {
    let mut mac = keyed(root_secret);
    mac.update(label);
    let mut key = [0; KEY_LEN];
    key.copy_from_slice(&mac.finalize().into_bytes());
    key
}
