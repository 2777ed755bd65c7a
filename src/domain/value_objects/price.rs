use crate::domain::errors::ValidationError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Strictly positive price
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    /// `field` names the offending input in the error
    pub fn new(field: &str, value: Decimal) -> Result<Self, ValidationError> {
        if value > Decimal::ZERO {
            Ok(Price(value))
        } else {
            Err(ValidationError::NonPositiveNumber {
                field: field.to_string(),
                value,
            })
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Absolute distance to `other`, as a percentage of `self`
    pub fn percent_diff(&self, other: Decimal) -> Decimal {
        (other - self.0).abs() / self.0 * Decimal::ONE_HUNDRED
    }
}

impl From<Price> for Decimal {
    fn from(price: Price) -> Self {
        price.0
    }
}
