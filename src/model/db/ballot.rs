use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A cast vote. Written exactly once and never updated or deleted.
///
/// The ballot never names its voter: `voter_tag` is a keyed hash of the
/// (voter, election) pair that only the server's linkage key can reproduce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub candidate_id: Id,
    /// Hex HMAC binding election, candidate and nonce.
    pub commitment: String,
    /// Hex opening nonce for `commitment`.
    pub nonce: String,
    /// Hex keyed hash of (voter, election); unique per election.
    pub voter_tag: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
}
