//! Shipping rate types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ratna_core::{Price, ShippingRateId};

/// A named delivery method with its cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShippingRate {
    pub id: ShippingRateId,
    pub name: String,
    pub cost: Price,
    pub is_active: bool,
    /// Free-form text such as "3-5 business days".
    pub estimated_delivery: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields for creating or replacing a shipping rate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewShippingRate {
    pub name: String,
    pub cost: Price,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub estimated_delivery: Option<String>,
}

const fn default_active() -> bool {
    true
}

impl NewShippingRate {
    /// Name with surrounding whitespace removed, or `None` if blank.
    #[must_use]
    pub fn trimmed_name(&self) -> Option<&str> {
        let name = self.name.trim();
        (!name.is_empty()).then_some(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rate_defaults_to_active() {
        let rate: NewShippingRate =
            serde_json::from_str(r#"{"name":"Standard","cost":"100"}"#).unwrap();
        assert!(rate.is_active);
        assert_eq!(rate.estimated_delivery, None);
        assert_eq!(rate.trimmed_name(), Some("Standard"));
    }

    #[test]
    fn test_negative_cost_rejected() {
        let result = serde_json::from_str::<NewShippingRate>(r#"{"name":"x","cost":"-1"}"#);
        assert!(result.is_err());
    }
}
