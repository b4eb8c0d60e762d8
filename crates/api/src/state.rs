//! Application state shared across handlers.

use std::sync::Arc;

use url::Url;

use ratna_core::{Clock, SystemClock};

use crate::config::{ApiConfig, SecurityPolicy};
use crate::db::{PgStore, Store};
use crate::services::auth::{AccountSecurity, CredentialHasher, TokenSigner};
use crate::services::email::{LogMailer, Mailer, SmtpMailer};
use crate::services::orders::{CartService, OrderLifecycle, OrderNumbers, ShippingRates};
use crate::services::payments::{
    PaymentGateway, PaymentReconciliation, SignatureVerifier, StripeGateway,
    StripeSignatureVerifier,
};

/// Errors building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid base_url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("invalid session secret: {0}")]
    SessionKey(#[from] hmac::digest::InvalidLength),
    #[error("smtp setup failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Every collaborator the services need is
/// injected here, so tests can swap the store, clock, mailer and payment
/// provider.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    hasher: CredentialHasher,
    tokens: TokenSigner,
    policy: SecurityPolicy,
    order_numbers: OrderNumbers,
    base_url: Url,
    gateway: Option<Arc<dyn PaymentGateway>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

/// Builder for [`AppState`] with injectable collaborators.
pub struct AppStateBuilder {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn Mailer>,
    hasher: CredentialHasher,
    tokens: TokenSigner,
    policy: SecurityPolicy,
    order_prefix: String,
    base_url: Url,
    gateway: Option<Arc<dyn PaymentGateway>>,
    verifier: Option<Arc<dyn SignatureVerifier>>,
}

impl AppStateBuilder {
    /// Start from a store, a token signer and the public base URL. Other
    /// collaborators default to the system clock, a logging mailer, default
    /// hashing cost and no payment provider.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, tokens: TokenSigner, base_url: Url) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            mailer: Arc::new(LogMailer),
            hasher: CredentialHasher::default(),
            tokens,
            policy: SecurityPolicy::default(),
            order_prefix: "RTN".to_owned(),
            base_url,
            gateway: None,
            verifier: None,
        }
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    #[must_use]
    pub fn hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub const fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn order_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.order_prefix = prefix.into();
        self
    }

    #[must_use]
    pub fn gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    #[must_use]
    pub fn verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    #[must_use]
    pub fn build(self) -> AppState {
        AppState {
            inner: Arc::new(AppStateInner {
                store: self.store,
                clock: self.clock,
                mailer: self.mailer,
                hasher: self.hasher,
                tokens: self.tokens,
                policy: self.policy,
                order_numbers: OrderNumbers::new(self.order_prefix),
                base_url: self.base_url,
                gateway: self.gateway,
                verifier: self.verifier,
            }),
        }
    }
}

impl AppState {
    /// Production state: `PostgreSQL`, SMTP when configured, Stripe when
    /// configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL, session secret or SMTP relay is
    /// invalid.
    pub fn from_config(config: &ApiConfig, store: PgStore) -> Result<Self, StateError> {
        let base_url = Url::parse(&config.base_url)?;
        let tokens = TokenSigner::new(&config.session_secret)?;

        let mailer: Arc<dyn Mailer> = match &config.email {
            Some(email) => Arc::new(SmtpMailer::new(email)?),
            None => {
                tracing::warn!("SMTP not configured, one-time codes will be logged");
                Arc::new(LogMailer)
            }
        };

        let mut builder = AppStateBuilder::new(Arc::new(store), tokens, base_url)
            .mailer(mailer)
            .policy(config.security)
            .order_prefix(config.order_prefix.clone());

        if let Some(key) = &config.payments.secret_key {
            builder = builder.gateway(Arc::new(StripeGateway::new(
                config.payments.api_base.clone(),
                key.clone(),
            )));
        } else {
            tracing::warn!("STRIPE_SECRET_KEY not set, card checkout disabled");
        }
        if let Some(secret) = &config.payments.webhook_secret {
            builder = builder.verifier(Arc::new(StripeSignatureVerifier::new(secret.clone())));
        } else {
            tracing::warn!("STRIPE_WEBHOOK_SECRET not set, payment webhooks will be rejected");
        }

        Ok(builder.build())
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.inner.clock.as_ref()
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenSigner {
        &self.inner.tokens
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    #[must_use]
    pub fn gateway(&self) -> Option<&dyn PaymentGateway> {
        self.inner.gateway.as_deref()
    }

    #[must_use]
    pub fn verifier(&self) -> Option<&dyn SignatureVerifier> {
        self.inner.verifier.as_deref()
    }

    // Services borrow from the state for the duration of a request. The
    // store is passed as `dyn Store + 'static`, the type the services name.

    #[must_use]
    pub fn account_security(&self) -> AccountSecurity<'_, dyn Store> {
        AccountSecurity::new(
            self.inner.store.as_ref(),
            self.clock(),
            self.inner.mailer.as_ref(),
            &self.inner.hasher,
            &self.inner.tokens,
            self.inner.policy,
        )
    }

    #[must_use]
    pub fn orders(&self) -> OrderLifecycle<'_, dyn Store> {
        OrderLifecycle::new(self.inner.store.as_ref(), self.clock(), &self.inner.order_numbers)
    }

    #[must_use]
    pub fn cart(&self) -> CartService<'_, dyn Store> {
        CartService::new(self.inner.store.as_ref(), self.clock())
    }

    #[must_use]
    pub fn shipping_rates(&self) -> ShippingRates<'_, dyn Store> {
        ShippingRates::new(self.inner.store.as_ref(), self.clock())
    }

    #[must_use]
    pub fn payments(&self) -> PaymentReconciliation<'_, dyn Store> {
        PaymentReconciliation::new(self.inner.store.as_ref(), self.clock())
    }
}
