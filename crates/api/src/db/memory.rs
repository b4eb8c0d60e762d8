//! In-memory implementation of every storage port.
//!
//! All state sits behind one `RwLock`, so each trait method is atomic with
//! respect to every other, including order creation which touches both the
//! order table and the cart.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use ratna_core::{
    AccountId, ActivityId, Email, NotificationId, OrderId, OrderNumber, OrderStatus,
    PaymentStatus, Price, ProductId, Role, ShippingRateId,
};

use super::{
    AccountStore, ActivityLog, CartStore, CatalogLookup, NotificationSink, OrderStore,
    RepositoryError, ShippingRateStore, Store,
};
use crate::models::{
    Account, ActivityEntry, CartLine, CatalogProduct, CredentialUpdate, FailedLogin, IssuedCode,
    NewAccount, NewActivity, NewOrder, NewShippingRate, Notification, Order, PaymentRecord,
    PaymentUpdate, ShippingRate,
};

#[derive(Default)]
struct MemoryData {
    next_id: i64,
    accounts: BTreeMap<AccountId, Account>,
    products: BTreeMap<ProductId, CatalogProduct>,
    carts: HashMap<AccountId, BTreeMap<ProductId, u32>>,
    reset_misses: HashMap<AccountId, i32>,
    shipping_rates: BTreeMap<ShippingRateId, ShippingRate>,
    orders: BTreeMap<OrderId, Order>,
    notifications: Vec<Notification>,
    activity: Vec<ActivityEntry>,
}

impl MemoryData {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn account_mut(&mut self, id: AccountId) -> Result<&mut Account, RepositoryError> {
        self.accounts.get_mut(&id).ok_or(RepositoryError::NotFound)
    }
}

/// Single-lock in-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<MemoryData>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product to the catalog lookup.
    pub async fn insert_product(&self, name: &str, price: Price, is_available: bool) -> ProductId {
        let mut data = self.data.write().await;
        let id = ProductId::new(data.next_id());
        data.products.insert(
            id,
            CatalogProduct {
                id,
                name: name.to_owned(),
                price,
                is_available,
            },
        );
        id
    }

    /// Change a product's price or availability.
    pub async fn update_product(&self, id: ProductId, price: Price, is_available: bool) {
        let mut data = self.data.write().await;
        if let Some(product) = data.products.get_mut(&id) {
            product.price = price;
            product.is_available = is_available;
        }
    }
}

fn take_code(slot: &mut Option<IssuedCode>, code: &str, now: DateTime<Utc>) -> bool {
    if slot.as_ref().is_some_and(|issued| issued.accepts(code, now)) {
        *slot = None;
        true
    } else {
        false
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn create_account(&self, account: NewAccount) -> Result<Account, RepositoryError> {
        let mut data = self.data.write().await;
        if data.accounts.values().any(|a| a.email == account.email) {
            return Err(RepositoryError::Conflict("email already exists".to_owned()));
        }

        let id = AccountId::new(data.next_id());
        let stored = Account {
            id,
            email: account.email,
            name: account.name,
            phone: account.phone,
            role: Role::User,
            email_verified: false,
            password_history: vec![account.password_hash.clone()],
            password_hash: account.password_hash,
            password_changed_at: account.created_at,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            verification_code: Some(account.verification_code),
            reset_code: None,
            created_at: account.created_at,
            updated_at: account.created_at,
        };
        data.accounts.insert(id, stored.clone());
        Ok(stored)
    }

    async fn account_by_email(&self, email: &Email) -> Result<Option<Account>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data.accounts.values().find(|a| &a.email == email).cloned())
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<Account>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data.accounts.get(&id).cloned())
    }

    async fn consume_verification_code(
        &self,
        id: AccountId,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.data.write().await;
        let Some(account) = data.accounts.get_mut(&id) else {
            return Ok(false);
        };
        if !take_code(&mut account.verification_code, code, now) {
            return Ok(false);
        }
        account.email_verified = true;
        account.updated_at = now;
        Ok(true)
    }

    async fn replace_verification_code(
        &self,
        id: AccountId,
        code: IssuedCode,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        data.account_mut(id)?.verification_code = Some(code);
        Ok(())
    }

    async fn replace_reset_code(
        &self,
        id: AccountId,
        code: IssuedCode,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        data.account_mut(id)?.reset_code = Some(code);
        data.reset_misses.remove(&id);
        Ok(())
    }

    async fn record_reset_miss(
        &self,
        id: AccountId,
        max_misses: i32,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.data.write().await;
        if data.account_mut(id)?.reset_code.is_none() {
            return Ok(false);
        }
        let misses = data.reset_misses.entry(id).or_default();
        *misses += 1;
        if *misses < max_misses {
            return Ok(false);
        }
        data.account_mut(id)?.reset_code = None;
        Ok(true)
    }

    async fn record_failed_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
        threshold: i32,
        lock_until: DateTime<Utc>,
    ) -> Result<FailedLogin, RepositoryError> {
        let mut data = self.data.write().await;
        let account = data.account_mut(id)?;

        let lock_expired = account.locked_until.is_some_and(|until| until <= now);
        if lock_expired {
            account.failed_login_attempts = 0;
            account.locked_until = None;
        }
        account.failed_login_attempts += 1;
        if account.failed_login_attempts >= threshold {
            account.locked_until = Some(lock_until);
        }
        account.updated_at = now;

        Ok(FailedLogin {
            attempts: account.failed_login_attempts,
            locked_until: account.locked_until,
        })
    }

    async fn record_successful_login(
        &self,
        id: AccountId,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        let account = data.account_mut(id)?;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);
        account.updated_at = now;
        Ok(())
    }

    async fn replace_credential(
        &self,
        id: AccountId,
        expected_hash: &str,
        reset_code: Option<&str>,
        update: CredentialUpdate,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.data.write().await;
        let Some(account) = data.accounts.get_mut(&id) else {
            return Ok(false);
        };
        if account.password_hash != expected_hash {
            return Ok(false);
        }
        if let Some(code) = reset_code
            && !account
                .reset_code
                .as_ref()
                .is_some_and(|issued| issued.accepts(code, update.changed_at))
        {
            return Ok(false);
        }

        account.password_hash = update.password_hash;
        account.password_history = update.password_history;
        account.password_changed_at = update.changed_at;
        account.reset_code = None;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.updated_at = update.changed_at;
        data.reset_misses.remove(&id);
        Ok(true)
    }

    async fn set_role(&self, email: &Email, role: Role) -> Result<Account, RepositoryError> {
        let mut data = self.data.write().await;
        let account = data
            .accounts
            .values_mut()
            .find(|a| &a.email == email)
            .ok_or(RepositoryError::NotFound)?;
        account.role = role;
        Ok(account.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order_from_cart(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut data = self.data.write().await;
        if data
            .orders
            .values()
            .any(|o| o.order_number == order.order_number)
        {
            return Err(RepositoryError::Conflict(
                "order number already exists".to_owned(),
            ));
        }

        let id = OrderId::new(data.next_id());
        let stored = Order {
            id,
            order_number: order.order_number,
            account_id: order.account_id,
            items: order.items,
            shipping_rate_id: order.shipping_rate_id,
            shipping_method: order.shipping_method,
            shipping_address: order.shipping_address,
            payment: PaymentRecord {
                method: order.payment_method,
                status: PaymentStatus::Pending,
                transaction_id: None,
            },
            subtotal: order.subtotal,
            shipping_cost: order.shipping_cost,
            status: OrderStatus::Pending,
            created_at: order.created_at,
            updated_at: order.created_at,
        };
        if let Some(cart) = data.carts.get_mut(&stored.account_id) {
            for item in &stored.items {
                if cart.get(&item.product_id) == Some(&item.quantity) {
                    cart.remove(&item.product_id);
                }
            }
            if cart.is_empty() {
                data.carts.remove(&stored.account_id);
            }
        }
        data.orders.insert(id, stored.clone());
        Ok(stored)
    }

    async fn order_by_id(&self, id: OrderId) -> Result<Option<Order>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data.orders.get(&id).cloned())
    }

    async fn order_by_number(
        &self,
        number: &OrderNumber,
    ) -> Result<Option<Order>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .orders
            .values()
            .find(|o| &o.order_number == number)
            .cloned())
    }

    async fn orders_for_account(&self, account: AccountId) -> Result<Vec<Order>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .orders
            .values()
            .rev()
            .filter(|o| o.account_id == account)
            .cloned()
            .collect())
    }

    async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .orders
            .values()
            .rev()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .take(usize::try_from(limit).unwrap_or_default())
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.data.write().await;
        match data.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                order.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn apply_payment(
        &self,
        id: OrderId,
        update: PaymentUpdate,
    ) -> Result<Option<Order>, RepositoryError> {
        let mut data = self.data.write().await;
        let Some(order) = data.orders.get_mut(&id) else {
            return Ok(None);
        };
        order.payment.status = update.status;
        if let Some(transaction_id) = update.transaction_id {
            order.payment.transaction_id = Some(transaction_id);
        }
        if update.confirm_if_pending && order.status == OrderStatus::Pending {
            order.status = OrderStatus::Confirmed;
        }
        order.updated_at = update.at;
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl CartStore for MemoryStore {
    async fn cart_lines(&self, account: AccountId) -> Result<Vec<CartLine>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .carts
            .get(&account)
            .map(|lines| {
                lines
                    .iter()
                    .map(|(product_id, quantity)| CartLine {
                        product_id: *product_id,
                        quantity: *quantity,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn upsert_cart_line(
        &self,
        account: AccountId,
        line: CartLine,
        _at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        data.carts
            .entry(account)
            .or_default()
            .insert(line.product_id, line.quantity);
        Ok(())
    }

    async fn remove_cart_line(
        &self,
        account: AccountId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        let mut data = self.data.write().await;
        Ok(data
            .carts
            .get_mut(&account)
            .and_then(|lines| lines.remove(&product))
            .is_some())
    }
}

#[async_trait]
impl CatalogLookup for MemoryStore {
    async fn product(&self, id: ProductId) -> Result<Option<CatalogProduct>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data.products.get(&id).cloned())
    }
}

#[async_trait]
impl ShippingRateStore for MemoryStore {
    async fn shipping_rate(
        &self,
        id: ShippingRateId,
    ) -> Result<Option<ShippingRate>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data.shipping_rates.get(&id).cloned())
    }

    async fn active_shipping_rates(&self) -> Result<Vec<ShippingRate>, RepositoryError> {
        let data = self.data.read().await;
        let mut rates: Vec<ShippingRate> = data
            .shipping_rates
            .values()
            .filter(|r| r.is_active)
            .cloned()
            .collect();
        rates.sort_by(|a, b| a.cost.cmp(&b.cost).then(a.id.cmp(&b.id)));
        Ok(rates)
    }

    async fn create_shipping_rate(
        &self,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError> {
        let mut data = self.data.write().await;
        let name = rate.name.trim();
        if data.shipping_rates.values().any(|r| r.name == name) {
            return Err(RepositoryError::Conflict(
                "shipping rate name already exists".to_owned(),
            ));
        }

        let id = ShippingRateId::new(data.next_id());
        let stored = ShippingRate {
            id,
            name: name.to_owned(),
            cost: rate.cost,
            is_active: rate.is_active,
            estimated_delivery: rate.estimated_delivery.clone(),
            created_at: at,
            updated_at: at,
        };
        data.shipping_rates.insert(id, stored.clone());
        Ok(stored)
    }

    async fn update_shipping_rate(
        &self,
        id: ShippingRateId,
        rate: &NewShippingRate,
        at: DateTime<Utc>,
    ) -> Result<ShippingRate, RepositoryError> {
        let mut data = self.data.write().await;
        let name = rate.name.trim();
        if data
            .shipping_rates
            .values()
            .any(|r| r.name == name && r.id != id)
        {
            return Err(RepositoryError::Conflict(
                "shipping rate name already exists".to_owned(),
            ));
        }

        let stored = data
            .shipping_rates
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        stored.name = name.to_owned();
        stored.cost = rate.cost;
        stored.is_active = rate.is_active;
        stored.estimated_delivery.clone_from(&rate.estimated_delivery);
        stored.updated_at = at;
        Ok(stored.clone())
    }
}

#[async_trait]
impl NotificationSink for MemoryStore {
    async fn append_notification(
        &self,
        account: AccountId,
        message: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        let id = NotificationId::new(data.next_id());
        data.notifications.push(Notification {
            id,
            account_id: account,
            message: message.to_owned(),
            created_at: at,
        });
        Ok(())
    }

    async fn notifications_for(
        &self,
        account: AccountId,
        limit: i64,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .notifications
            .iter()
            .rev()
            .filter(|n| n.account_id == account)
            .take(usize::try_from(limit).unwrap_or_default())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn append_activity(&self, entry: NewActivity) -> Result<(), RepositoryError> {
        let mut data = self.data.write().await;
        let id = ActivityId::new(data.next_id());
        data.activity.push(ActivityEntry {
            id,
            account_id: entry.account_id,
            action: entry.action,
            detail: entry.detail,
            origin: entry.origin,
            user_agent: entry.user_agent,
            created_at: entry.created_at,
        });
        Ok(())
    }

    async fn recent_activity(&self, limit: i64) -> Result<Vec<ActivityEntry>, RepositoryError> {
        let data = self.data.read().await;
        Ok(data
            .activity
            .iter()
            .rev()
            .take(usize::try_from(limit).unwrap_or_default())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn new_account(email: &str, now: DateTime<Utc>) -> NewAccount {
        NewAccount {
            email: Email::parse(email).unwrap(),
            name: "Test".to_owned(),
            phone: None,
            password_hash: "hash-1".to_owned(),
            verification_code: IssuedCode {
                code: "123456".to_owned(),
                expires_at: now + Duration::minutes(5),
            },
            created_at: now,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.create_account(new_account("a@b.com", now)).await.unwrap();
        let err = store
            .create_account(new_account("a@b.com", now))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_verification_code_consumed_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.create_account(new_account("a@b.com", now)).await.unwrap();

        assert!(!store
            .consume_verification_code(account.id, "000000", now)
            .await
            .unwrap());
        assert!(store
            .consume_verification_code(account.id, "123456", now)
            .await
            .unwrap());
        assert!(!store
            .consume_verification_code(account.id, "123456", now)
            .await
            .unwrap());

        let stored = store.account_by_id(account.id).await.unwrap().unwrap();
        assert!(stored.email_verified);
        assert!(stored.verification_code.is_none());
    }

    #[tokio::test]
    async fn test_failed_logins_lock_at_threshold_and_restart_after_expiry() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.create_account(new_account("a@b.com", now)).await.unwrap();
        let until = now + Duration::minutes(15);

        for expected in 1..=4 {
            let state = store
                .record_failed_login(account.id, now, 5, until)
                .await
                .unwrap();
            assert_eq!(state.attempts, expected);
            assert_eq!(state.locked_until, None);
        }
        let state = store
            .record_failed_login(account.id, now, 5, until)
            .await
            .unwrap();
        assert_eq!(state.attempts, 5);
        assert_eq!(state.locked_until, Some(until));

        let later = until + Duration::seconds(1);
        let state = store
            .record_failed_login(account.id, later, 5, later + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(state.attempts, 1);
        assert_eq!(state.locked_until, None);
    }

    #[tokio::test]
    async fn test_reset_code_discarded_after_max_misses() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.create_account(new_account("a@b.com", now)).await.unwrap();

        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());

        let code = IssuedCode {
            code: "4321".to_owned(),
            expires_at: now + Duration::minutes(15),
        };
        store.replace_reset_code(account.id, code.clone()).await.unwrap();
        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());
        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());

        // A fresh code starts a fresh count.
        store.replace_reset_code(account.id, code).await.unwrap();
        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());
        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());
        assert!(store.record_reset_miss(account.id, 3).await.unwrap());

        let stored = store.account_by_id(account.id).await.unwrap().unwrap();
        assert!(stored.reset_code.is_none());
        assert!(!store.record_reset_miss(account.id, 3).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_credential_is_compare_and_set() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let account = store.create_account(new_account("a@b.com", now)).await.unwrap();
        let update = CredentialUpdate {
            password_hash: "hash-2".to_owned(),
            password_history: vec!["hash-2".to_owned(), "hash-1".to_owned()],
            changed_at: now,
        };

        assert!(!store
            .replace_credential(account.id, "stale", None, update.clone())
            .await
            .unwrap());
        assert!(store
            .replace_credential(account.id, "hash-1", None, update)
            .await
            .unwrap());
        let stored = store.account_by_id(account.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "hash-2");
    }

    #[tokio::test]
    async fn test_apply_payment_unknown_order_is_none() {
        let store = MemoryStore::new();
        let update = PaymentUpdate {
            status: PaymentStatus::Paid,
            transaction_id: None,
            confirm_if_pending: true,
            at: Utc::now(),
        };
        assert!(store
            .apply_payment(OrderId::new(999), update)
            .await
            .unwrap()
            .is_none());
    }
}
