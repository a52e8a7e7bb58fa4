use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A candidate standing in exactly one election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    pub election_id: Id,
    pub name: String,
    /// Profile text for the UI; plays no part in counting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// Registration time; earlier registration wins a tied count.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub registered_at: DateTime<Utc>,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;
    use crate::model::common::truncate_to_millis;

    impl Candidate {
        pub fn example(election_id: Id, name: &str) -> Self {
            Self {
                id: Id::new(),
                election_id,
                name: name.to_string(),
                bio: None,
                registered_at: truncate_to_millis(Utc::now()),
            }
        }
    }
}
