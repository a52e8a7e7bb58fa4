use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::Demographics, mongodb::Id};

/// Whether a voter's account is usable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoterStatus {
    Active,
    Inactive,
}

/// A registered voter. Managed by the external admin layer; read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    pub demographics: Demographics,
    pub status: VoterStatus,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registered_at: DateTime<Utc>,
}

impl Voter {
    pub fn is_active(&self) -> bool {
        self.status == VoterStatus::Active
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;
    use crate::model::common::truncate_to_millis;

    impl Voter {
        pub fn example(demographics: Demographics) -> Self {
            Self {
                id: Id::new(),
                demographics,
                status: VoterStatus::Active,
                registered_at: truncate_to_millis(Utc::now()),
            }
        }

        pub fn inactive_example() -> Self {
            Self {
                status: VoterStatus::Inactive,
                ..Self::example(Demographics::engineering())
            }
        }
    }
}
