use std::fmt::{Display, Formatter};
use std::str::FromStr;

use mongodb::bson::Bson;
use rocket::request::FromParam;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A vote receipt: proof that a ballot was recorded, revealing nothing about
/// its content. Always [`Receipt::LEN`] lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Receipt(String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Receipts are {} lowercase hex characters, got {0:?}", Receipt::LEN)]
pub struct ReceiptFormatError(String);

impl Receipt {
    pub const LEN: usize = 64;

    /// Wrap a digest that is already hex-encoded by the caller.
    pub(crate) fn from_digest_hex(hex: String) -> Self {
        debug_assert_eq!(hex.len(), Self::LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Receipt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Receipt {
    type Err = ReceiptFormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let well_formed = s.len() == Self::LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(ReceiptFormatError(s.to_string()))
        }
    }
}

impl TryFrom<String> for Receipt {
    type Error = ReceiptFormatError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Receipt> for String {
    fn from(receipt: Receipt) -> Self {
        receipt.0
    }
}

impl From<Receipt> for Bson {
    fn from(receipt: Receipt) -> Self {
        Bson::String(receipt.0)
    }
}

impl<'a> FromParam<'a> for Receipt {
    type Error = ReceiptFormatError;

    fn from_param(param: &'a str) -> Result<Self, Self::Error> {
        param.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lowercase_hex_of_the_right_length_parses() {
        let good = "a".repeat(Receipt::LEN);
        assert!(good.parse::<Receipt>().is_ok());
        assert!("A".repeat(Receipt::LEN).parse::<Receipt>().is_err());
        assert!("a".repeat(Receipt::LEN - 1).parse::<Receipt>().is_err());
        assert!("g".repeat(Receipt::LEN).parse::<Receipt>().is_err());
    }
}
