//! API-compatible types.
//!
//! The types in this module are serialised in an API-friendly way, e.g.:
//!
//! - IDs are serialised as hex strings.
//! - Datetimes are serialised as millisecond timestamps.
//! - Field names are camelCase.

mod admin;
pub mod auth;
mod tally;
mod vote;

pub use admin::{GrantRequest, VotingRightDesc};
pub use tally::{
    CandidateResult, DumpError, ElectionSummary, GroupParticipation, Participation, ResultsDump,
    TallySnapshot, TimelinePoint,
};
pub use vote::{CastVoteRequest, EligibilityResponse, ReceiptCheck, ReceiptResponse};
