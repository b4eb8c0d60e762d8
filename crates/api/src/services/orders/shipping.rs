//! Shipping rate administration.

use tracing::instrument;

use ratna_core::{Clock, ShippingRateId};

use super::OrderError;
use crate::db::{RepositoryError, ShippingRateStore};
use crate::models::{NewShippingRate, ShippingRate};

pub struct ShippingRates<'a, S: ?Sized> {
    store: &'a S,
    clock: &'a dyn Clock,
}

impl<'a, S> ShippingRates<'a, S>
where
    S: ShippingRateStore + ?Sized,
{
    #[must_use]
    pub const fn new(store: &'a S, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Rates customers can choose at checkout, cheapest first.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Repository` on storage failure.
    pub async fn active(&self) -> Result<Vec<ShippingRate>, OrderError> {
        Ok(self.store.active_shipping_rates().await?)
    }

    /// # Errors
    ///
    /// Returns `OrderError::Validation` for a blank name and
    /// `OrderError::Conflict` for a duplicate one.
    #[instrument(skip(self, rate), fields(name = %rate.name))]
    pub async fn create(&self, rate: &NewShippingRate) -> Result<ShippingRate, OrderError> {
        let rate = normalize(rate)?;
        let created = self
            .store
            .create_shipping_rate(&rate, self.clock.now())
            .await
            .map_err(conflict)?;
        tracing::info!(rate_id = %created.id, "Shipping rate created");
        Ok(created)
    }

    /// # Errors
    ///
    /// Returns `OrderError::NotFound` for an unknown id, plus the errors of
    /// [`Self::create`].
    #[instrument(skip(self, rate), fields(rate_id = %id))]
    pub async fn update(
        &self,
        id: ShippingRateId,
        rate: &NewShippingRate,
    ) -> Result<ShippingRate, OrderError> {
        let rate = normalize(rate)?;
        self.store
            .update_shipping_rate(id, &rate, self.clock.now())
            .await
            .map_err(conflict)
    }
}

fn normalize(rate: &NewShippingRate) -> Result<NewShippingRate, OrderError> {
    let name = rate
        .trimmed_name()
        .ok_or_else(|| OrderError::Validation("shipping rate name is required".to_owned()))?;
    Ok(NewShippingRate {
        name: name.to_owned(),
        cost: rate.cost,
        is_active: rate.is_active,
        estimated_delivery: rate
            .estimated_delivery
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_owned),
    })
}

fn conflict(err: RepositoryError) -> OrderError {
    match err {
        RepositoryError::Conflict(message) => OrderError::Conflict(message),
        RepositoryError::NotFound => OrderError::NotFound,
        other => OrderError::Repository(other),
    }
}
