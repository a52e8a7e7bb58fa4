use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::ElectionStatus, mongodb::Id};

/// A voting event. Votes are accepted during `[start_time, end_time)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    pub title: String,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
}

impl Election {
    pub fn status_at(&self, now: DateTime<Utc>) -> ElectionStatus {
        ElectionStatus::at(self.start_time, self.end_time, now)
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::Duration;

    use super::*;
    use crate::model::common::truncate_to_millis;

    impl Election {
        /// Opened an hour ago, closes in a day.
        pub fn ongoing_example() -> Self {
            let now = truncate_to_millis(Utc::now());
            Self {
                id: Id::new(),
                title: "Student Union President".to_string(),
                start_time: now - Duration::hours(1),
                end_time: now + Duration::days(1),
            }
        }

        /// Opens tomorrow.
        pub fn upcoming_example() -> Self {
            let now = truncate_to_millis(Utc::now());
            Self {
                id: Id::new(),
                title: "Faculty Representative".to_string(),
                start_time: now + Duration::days(1),
                end_time: now + Duration::days(2),
            }
        }

        /// Closed an hour ago.
        pub fn completed_example() -> Self {
            let now = truncate_to_millis(Utc::now());
            Self {
                id: Id::new(),
                title: "Sports Captain".to_string(),
                start_time: now - Duration::days(2),
                end_time: now - Duration::hours(1),
            }
        }
    }
}
