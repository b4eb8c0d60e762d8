//! Core types for Ratna.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod credential;
pub mod email;
pub mod id;
pub mod order_number;
pub mod price;
pub mod status;

pub use credential::{CredentialPolicy, PolicyViolation};
pub use email::{Email, EmailError};
pub use id::*;
pub use order_number::{OrderNumber, OrderNumberError};
pub use price::{Price, PriceError};
pub use status::*;
