use serde::{Deserialize, Serialize};

use crate::error::VoteError;
use crate::integrity::Eligibility;
use crate::model::{
    common::Receipt,
    mongodb::{id_as_hex, Id},
};

/// The voter's selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    #[serde(with = "id_as_hex")]
    pub candidate_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub receipt: Receipt,
}

/// Answer to "can I vote here?". A rejection carries the same code and
/// message a vote attempt would fail with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResponse {
    pub eligible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<VoteError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<Eligibility> for EligibilityResponse {
    fn from(eligibility: Eligibility) -> Self {
        match eligibility {
            Eligibility::Eligible => Self {
                eligible: true,
                reason: None,
                message: None,
            },
            Eligibility::Ineligible(reason) => {
                let reason = VoteError::from(reason);
                Self {
                    eligible: false,
                    message: Some(reason.to_string()),
                    reason: Some(reason),
                }
            }
        }
    }
}

/// Result of looking up a receipt on the public verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptCheck {
    pub receipt: Receipt,
    pub recorded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::Ineligible;

    #[test]
    fn rejection_carries_code_and_message() {
        let response = EligibilityResponse::from(Eligibility::Ineligible(Ineligible::ElectionEnded));
        let json = rocket::serde::json::serde_json::to_value(&response).unwrap();
        assert_eq!(json["eligible"], false);
        assert_eq!(json["reason"], "ELECTION_ENDED");
        assert_eq!(json["message"], VoteError::ElectionEnded.to_string());

        let json = rocket::serde::json::serde_json::to_value(EligibilityResponse::from(
            Eligibility::Eligible,
        ))
        .unwrap();
        assert_eq!(json, rocket::serde::json::json!({ "eligible": true }));
    }
}
