use serde::{Deserialize, Serialize};

/// The voter attributes that results are broken down by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Demographics {
    pub faculty: String,
    pub major: String,
    /// Year the voter's cohort enrolled.
    pub cohort: u16,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl Demographics {
        pub fn example(faculty: &str, major: &str, cohort: u16) -> Self {
            Self {
                faculty: faculty.to_string(),
                major: major.to_string(),
                cohort,
            }
        }

        pub fn engineering() -> Self {
            Self::example("Engineering", "Computer Science", 2022)
        }

        pub fn science() -> Self {
            Self::example("Science", "Physics", 2023)
        }
    }
}
