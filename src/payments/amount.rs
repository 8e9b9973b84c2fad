//! Money conversion helpers
//!
//! Gateways such as PayU exchange amounts as integers in the currency's minor
//! unit (grosze, cents). The application works with `Decimal` amounts.
//! `centify` and `normalize` convert between the two, and the serde adapters
//! below are attached to every amount-bearing wire field.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::payments::error::PaymentError;

/// Minor units per major unit for the currencies we talk to gateways in
pub const MINOR_UNITS: i64 = 100;
const MINOR_UNIT_SCALE: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount {amount} has more precision than the currency minor unit")]
    SubMinorPrecision { amount: Decimal },

    #[error("Amount {amount} does not fit into minor units")]
    Overflow { amount: Decimal },

    #[error("Invalid minor unit amount: {value}")]
    Unparsable { value: String },
}

impl From<AmountError> for PaymentError {
    fn from(err: AmountError) -> Self {
        PaymentError::invalid_request(err.to_string())
    }
}

/// Convert a decimal amount into integer minor units (`100.00` → `10000`).
///
/// Amounts finer than the minor unit are rejected instead of truncated.
pub fn centify(amount: Decimal) -> Result<i64, AmountError> {
    let scaled = amount * Decimal::from(MINOR_UNITS);
    if !scaled.fract().is_zero() {
        return Err(AmountError::SubMinorPrecision { amount });
    }
    scaled.to_i64().ok_or(AmountError::Overflow { amount })
}

/// Convert integer minor units back into a decimal amount (`10000` → `100.00`)
pub fn normalize(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

fn parse_minor(value: &str) -> Result<i64, AmountError> {
    value.trim().parse::<i64>().map_err(|_| AmountError::Unparsable {
        value: value.to_string(),
    })
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum WireMinor {
    Int(i64),
    Str(String),
}

impl WireMinor {
    fn into_decimal(self) -> Result<Decimal, AmountError> {
        match self {
            WireMinor::Int(v) => Ok(normalize(v)),
            WireMinor::Str(s) => parse_minor(&s).map(normalize),
        }
    }
}

/// Serde adapter: `Decimal` in Rust, integer minor units on the wire.
///
/// Deserialization accepts both JSON numbers and numeric strings, since PayU
/// answers with strings (`"totalAmount": "10000"`).
pub mod minor_units {
    use super::{centify, WireMinor};
    use rust_decimal::Decimal;
    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        let minor = centify(*amount).map_err(S::Error::custom)?;
        serializer.serialize_i64(minor)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        WireMinor::deserialize(deserializer)?
            .into_decimal()
            .map_err(D::Error::custom)
    }

    pub mod option {
        use super::super::{centify, WireMinor};
        use rust_decimal::Decimal;
        use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            amount: &Option<Decimal>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match amount {
                Some(amount) => {
                    let minor = centify(*amount).map_err(S::Error::custom)?;
                    serializer.serialize_some(&minor)
                }
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Decimal>, D::Error> {
            Option::<WireMinor>::deserialize(deserializer)?
                .map(WireMinor::into_decimal)
                .transpose()
                .map_err(D::Error::custom)
        }
    }
}
