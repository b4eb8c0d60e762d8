//! Seed the default shipping rates.
//!
//! Rates that already exist (by name) are left alone, so the command can be
//! run on every deploy.

use ratna_api::db::{PgStore, RepositoryError, ShippingRateStore};
use ratna_api::models::NewShippingRate;
use ratna_core::{Clock, Price, SystemClock};
use thiserror::Error;

use super::{CommandError, connect};

/// Errors that can occur while seeding.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Database error: {0}")]
    Repository(#[from] RepositoryError),
}

/// The rates a fresh store starts with.
#[must_use]
pub fn default_rates() -> Vec<NewShippingRate> {
    vec![
        NewShippingRate {
            name: "Inside Kathmandu Valley".to_owned(),
            cost: Price::from_rupees(100),
            is_active: true,
            estimated_delivery: Some("1-2 business days".to_owned()),
        },
        NewShippingRate {
            name: "Outside Kathmandu Valley".to_owned(),
            cost: Price::from_rupees(250),
            is_active: true,
            estimated_delivery: Some("3-5 business days".to_owned()),
        },
        NewShippingRate {
            name: "Store Pickup".to_owned(),
            cost: Price::ZERO,
            is_active: true,
            estimated_delivery: Some("Ready the same day".to_owned()),
        },
    ]
}

/// Insert the default rates that are not present yet.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn seed() -> Result<(), SeedError> {
    let store = PgStore::new(connect().await?);
    let now = SystemClock.now();

    let (mut inserted, mut skipped) = (0, 0);
    for rate in default_rates() {
        match store.create_shipping_rate(&rate, now).await {
            Ok(created) => {
                tracing::info!(id = %created.id, name = %created.name, "Shipping rate created");
                inserted += 1;
            }
            Err(RepositoryError::Conflict(_)) => skipped += 1,
            Err(e) => return Err(e.into()),
        }
    }

    tracing::info!("Seeding complete!");
    tracing::info!("  Rates inserted: {inserted}");
    tracing::info!("  Rates skipped (already exist): {skipped}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates_have_unique_names() {
        let rates = default_rates();
        let mut names: Vec<_> = rates.iter().map(|r| r.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), rates.len());
        assert!(rates.iter().all(|r| r.trimmed_name().is_some()));
    }
}
