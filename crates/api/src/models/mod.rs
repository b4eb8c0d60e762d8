//! Domain models for the API.
//!
//! These types represent validated domain objects, separate from database
//! row types and from request/response bodies.

pub mod account;
pub mod activity;
pub mod cart;
pub mod notification;
pub mod order;
pub mod shipping;

pub use account::{Account, AccountView, CredentialUpdate, FailedLogin, IssuedCode, NewAccount};
pub use activity::{ActivityAction, ActivityEntry, ClientInfo, NewActivity};
pub use cart::{CartLine, CatalogProduct};
pub use notification::Notification;
pub use order::{
    NewOrder, Order, OrderItem, OrderView, PaymentRecord, PaymentUpdate, ShippingAddress,
};
pub use shipping::{NewShippingRate, ShippingRate};
