use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    common::Demographics,
    db::VotingRight,
    mongodb::{id_as_hex, Id},
};

/// Body of a grant request from the admin layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantRequest {
    #[serde(with = "id_as_hex")]
    pub voter_id: Id,
    #[serde(default = "eligible_by_default")]
    pub is_eligible: bool,
}

fn eligible_by_default() -> bool {
    true
}

/// A voting right as the admin layer sees it. The vote hash is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingRightDesc {
    #[serde(with = "id_as_hex")]
    pub id: Id,
    #[serde(with = "id_as_hex")]
    pub voter_id: Id,
    #[serde(with = "id_as_hex")]
    pub election_id: Id,
    pub is_eligible: bool,
    pub has_voted: bool,
    pub demographics: Demographics,
    #[serde(with = "ts_milliseconds")]
    pub granted_at: DateTime<Utc>,
}

impl From<VotingRight> for VotingRightDesc {
    fn from(right: VotingRight) -> Self {
        Self {
            id: right.id,
            voter_id: right.voter_id,
            election_id: right.election_id,
            is_eligible: right.is_eligible,
            has_voted: right.has_voted,
            demographics: right.demographics,
            granted_at: right.granted_at,
        }
    }
}
