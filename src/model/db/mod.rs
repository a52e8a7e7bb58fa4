//! DB-compatible (e.g. de/serialisable) types.
//!
//! The types in this module are serialised in an DB-friendly way, e.g.:
//!
//! - IDs and datetimes are serialised in MongoDB's own format.

mod ballot;
pub use ballot::Ballot;

mod candidate;
pub use candidate::Candidate;

mod election;
pub use election::Election;

mod voter;
pub use voter::{Voter, VoterStatus};

mod voting_right;
pub use voting_right::VotingRight;
