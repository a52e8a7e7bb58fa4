//! Cryptographic and rule-based building blocks of the vote path: key
//! derivation, ballot commitments, receipts, and the eligibility rules.

mod eligibility;
mod encoder;
mod keys;
mod receipt;

pub use eligibility::{evaluate, Eligibility, EligibilityGate, Ineligible};
pub use encoder::{BallotEncoder, BallotPayload, DIGEST_LEN, NONCE_LEN};
pub use keys::{HmacSha256, IntegrityKeys};
pub use receipt::ReceiptGenerator;
