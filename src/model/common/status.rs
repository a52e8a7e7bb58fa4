use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an election stands relative to its voting window.
/// Always derived from the current time, never stored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    Upcoming,
    Ongoing,
    Completed,
}

impl ElectionStatus {
    /// Classify `now` against the half-open window `[start, end)`.
    pub fn at(start: DateTime<Utc>, end: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now < start {
            Self::Upcoming
        } else if now < end {
            Self::Ongoing
        } else {
            Self::Completed
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn window_is_half_open() {
        let start = Utc::now();
        let end = start + Duration::hours(1);

        assert_eq!(
            ElectionStatus::at(start, end, start - Duration::milliseconds(1)),
            ElectionStatus::Upcoming
        );
        assert_eq!(ElectionStatus::at(start, end, start), ElectionStatus::Ongoing);
        assert_eq!(
            ElectionStatus::at(start, end, end - Duration::milliseconds(1)),
            ElectionStatus::Ongoing
        );
        assert_eq!(ElectionStatus::at(start, end, end), ElectionStatus::Completed);
    }
}
