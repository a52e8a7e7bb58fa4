use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::{Demographics, Receipt},
    mongodb::Id,
};

/// The only record that can authorise a vote: one per (voter, election).
///
/// `has_voted` only ever goes from false to true, in the same transaction
/// that appends the voter's ballot. No vote time is kept here, so the right
/// cannot be matched to its ballot by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotingRight {
    #[serde(rename = "_id")]
    pub id: Id,
    pub voter_id: Id,
    pub election_id: Id,
    pub is_eligible: bool,
    pub has_voted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_hash: Option<Receipt>,
    /// The voter's demographics when the right was granted. Results are broken
    /// down by this copy, so later profile edits cannot move a cast vote.
    pub demographics: Demographics,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub granted_at: DateTime<Utc>,
}

impl VotingRight {
    /// A fresh right for the given voter.
    pub fn grant(
        voter_id: Id,
        election_id: Id,
        demographics: Demographics,
        is_eligible: bool,
        granted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Id::new(),
            voter_id,
            election_id,
            is_eligible,
            has_voted: false,
            vote_hash: None,
            demographics,
            granted_at,
        }
    }
}
