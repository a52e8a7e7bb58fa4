//! Types shared between the database and API representations.

mod demographics;
mod receipt;
mod status;

pub use demographics::Demographics;
pub use receipt::{Receipt, ReceiptFormatError};
pub use status::ElectionStatus;

use chrono::{DateTime, Utc};

/// Drop sub-millisecond precision, matching what the database stores.
pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(time.timestamp_millis()).unwrap_or(time)
}
