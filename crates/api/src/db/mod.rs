//! Storage ports and their adapters.
//!
//! Services talk to storage through the traits in this module, never to a
//! concrete database. Two adapters implement every trait:
//!
//! - [`PgStore`] - `PostgreSQL` via sqlx, used in production
//! - [`MemoryStore`] - a single-lock in-memory store, used by tests and
//!   local demos
//!
//! # Tables
//!
//! - `account` - identities, credential state, one-time codes
//! - `product` - catalog lookup (prices, availability)
//! - `cart_item` - per-account cart lines
//! - `shipping_rate` - delivery methods and costs
//! - `orders` / `order_item` - placed orders and their line snapshots
//! - `notification` - per-account messages
//! - `activity_log` - security audit trail
//!
//! # Migrations
//!
//! Migrations are stored in `crates/api/migrations/` and run via:
//! ```bash
//! cargo run -p ratna-cli -- migrate
//! ```
//!
//! # Atomicity
//!
//! Every read-modify-write on an account or an order is a single conditional
//! statement (or one transaction for order creation), so two concurrent
//! requests cannot silently overwrite each other.

pub mod accounts;
pub mod activity;
pub mod carts;
pub mod catalog;
pub mod memory;
pub mod notifications;
pub mod orders;
pub mod shipping_rates;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use ratna_core::{
    AccountId, Email, OrderId, OrderNumber, OrderStatus, ProductId, Role, ShippingRateId,
};

use crate::models::{
    Account, ActivityEntry, CartLine, CatalogProduct, CredentialUpdate, FailedLogin, IssuedCode,
    NewAccount, NewActivity, NewOrder, NewShippingRate, Notification, Order, PaymentUpdate,
    ShippingRate,
};

pub use memory::MemoryStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., unique email).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

impl RepositoryError {
    /// Map a unique violation to [`RepositoryError::Conflict`], anything else
    /// to [`RepositoryError::Database`].
    pub(crate) fn from_unique(err: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(err)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

// =============================================================================
// Ports
// =============================================================================

/// Account persistence with atomic security-state updates.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new, unverified account.
    ///
    /// The credential history is seeded with the initial hash.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the email is already registered.
    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError>;

    /// Look up an account by normalized email.
    async fn account_by_email(&self, email: &Email) -> Result<Option<Account>, RepositoryError>;

    /// Look up an account by id.
    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError>;

    /// Mark the account verified and clear its OTP, but only if `code` is
    /// the pending OTP and has not expired at `now`.
    ///
    /// Returns `false` when nothing was consumed.
    async fn consume_verification_code(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Replace any pending OTP with `code`.
    async fn replace_verification_code(
        &self,
        id: AccountId,
        code: IssuedCode,
    ) -> Result<(), RepositoryError>;

    /// Replace any pending reset code with `code` and zero its miss count.
    async fn replace_reset_code(&self, id: AccountId, code: IssuedCode)
    -> Result<(), RepositoryError>;

    /// Count a wrong guess against the pending reset code, discarding the
    /// code once `max_misses` wrong guesses have been made.
    ///
    /// Returns `true` if this miss discarded the code. Does nothing when no
    /// code is pending.
    async fn record_reset_miss(&self, id: AccountId, max_misses: i32)
    -> Result<bool, RepositoryError>;

    /// Increment the failed-attempt counter in one write.
    ///
    /// A lock whose deadline is at or before `now` is treated as expired and
    /// the counter restarts from zero. When the new count reaches
    /// `threshold`, the lock deadline is set to `lock_until`.
    async fn record_failed_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<FailedLogin, RepositoryError>;

    /// Reset the counter and lock and stamp the login time.
    async fn record_successful_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Store a new credential if the current hash is still `expected_hash`.
    ///
    /// Also clears any reset code and its miss count, the failed-attempt
    /// counter and the lock.
    /// When `reset_code` is given, the write additionally requires that code
    /// to be pending and unexpired at `update.changed_at`.
    ///
    /// Returns `false` when the condition did not hold.
    async fn replace_credential(
        &self,
        id: AccountId,
        expected_hash: &str,
        reset_code: Option<&str>,
        update: CredentialUpdate,
    ) -> Result<bool, RepositoryError>;

    /// Set the role of the account with `email`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if no such account exists.
    async fn set_role(&self, email: &Email, role: Role) -> Result<Account, RepositoryError>;
}

/// Order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Store `order` with `PENDING` status and payment, then remove the
    /// ordered lines from the owner's cart, as one atomic unit.
    ///
    /// A cart line is removed only if its quantity still equals the ordered
    /// quantity. Lines added or changed after the cart was read are kept.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the order number is taken; the
    /// cart is left untouched in that case.
    async fn create_order_from_cart(&self, order: NewOrder) -> Result<Order, RepositoryError>;

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError>;

    async fn order_by_number(&self, number: &OrderNumber)
    -> Result<Option<Order>, RepositoryError>;

    /// Orders placed by `account`, newest first.
    async fn orders_for_account(&self, account: AccountId) -> Result<Vec<Order>, RepositoryError>;

    /// Most recent orders, optionally filtered by status.
    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// Compare-and-set on the order status.
    ///
    /// Returns `false` if the order no longer has status `from`.
    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Apply a payment update, and the optional auto-confirm, in one write.
    ///
    /// Returns the updated order, or `None` if it does not exist.
    async fn apply_payment(
        &self,
        id: OrderId,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, RepositoryError>;
}

/// Per-account cart lines.
#[async_trait]
pub trait CartStore: Send + Sync {
    async fn cart_lines(&self, account: AccountId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Insert or overwrite the line for `line.product_id`.
    async fn upsert_cart_line(
        &self,
        account: AccountId,
        line: CartLine,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Returns `false` if the product was not in the cart.
    async fn remove_cart_line(
        &self,
        account: AccountId,
        product: ProductId,
    ) -> Result<bool, RepositoryError>;
}

/// Read-only product lookup.
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn product(&self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError>;
}

/// Shipping rate catalog.
#[async_trait]
pub trait ShippingRateStore: Send + Sync {
    async fn shipping_rate(
        &self,
        id: ShippingRateId,
    ) -> Result<Option<ShippingRate>, RepositoryError>;

    /// Active rates, cheapest first.
    async fn active_shipping_rates(&self) -> Result<Vec<ShippingRate>, RepositoryError>;

    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the name is taken.
    async fn create_shipping_rate(
        &self,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError>;

    /// Replace every field of an existing rate.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` for an unknown id and
    /// `RepositoryError::Conflict` if the new name is taken.
    async fn update_shipping_rate(
        &self,
        id: ShippingRateId,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError>;
}

/// Per-account message log.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn append_notification(
        &self,
        account: AccountId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn notifications_for(
        &self,
        account: AccountId,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError>;
}

/// Append-only security audit trail.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn append_activity(&self, entry: NewActivity) -> Result<(), RepositoryError>;

    /// Newest first.
    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, RepositoryError>;
}

/// Everything the application needs from storage.
#[async_trait]
pub trait Store:
    AccountStore
    + OrderStore
    + CartStore
    + CatalogLookup
    + ShippingRateStore
    + NotificationSink
    + ActivityLog
{
    /// Cheap round-trip used by the readiness probe.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

// =============================================================================
// PostgreSQL adapter
// =============================================================================

/// `PostgreSQL` implementation of every storage port.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for migrations.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Convert a stored `INTEGER` quantity back to `u32`.
pub(crate) fn quantity_from_db(value: i32) -> Result<u32, RepositoryError> {
    u32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("negative quantity: {value}")))
}

/// Convert a `u32` quantity for storage.
pub(crate) fn quantity_to_db(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::DataCorruption(format!("quantity out of range: {value}")))
}
