use data_encoding::HEXLOWER;
use hmac::Mac;

use crate::model::{common::Receipt, db::Ballot};

use super::keys::IntegrityKeys;

/// Derives receipts from a ballot's immutable metadata.
///
/// The receipt covers the ballot ID, commitment, election ID and cast time.
/// The candidate only enters through the nonce-blinded commitment, so a
/// receipt cannot be used to show anyone how its holder voted.
#[derive(Debug, Clone)]
pub struct ReceiptGenerator {
    keys: IntegrityKeys,
}

impl ReceiptGenerator {
    pub fn new(keys: IntegrityKeys) -> Self {
        Self { keys }
    }

    /// Deterministic: the same ballot always yields the same receipt.
    pub fn issue_receipt(&self, ballot: &Ballot) -> Receipt {
        let mut mac = self.keys.receipt_mac();
        mac.update(&ballot.id.to_bytes());
        mac.update(ballot.commitment.as_bytes());
        mac.update(&ballot.election_id.to_bytes());
        mac.update(&ballot.cast_at.timestamp_millis().to_be_bytes());
        Receipt::from_digest_hex(HEXLOWER.encode(&mac.finalize().into_bytes()))
    }
}
