//! Ratna Core - Shared domain types and rules.
//!
//! This crate provides the types used across all Ratna components:
//! - `api` - REST backend for the storefront and the admin console
//! - `cli` - Command-line tools for migrations and management
//!
//! # Architecture
//!
//! The core crate contains only types, pure rules and traits - no I/O, no
//! database access, no HTTP clients. Time is read through the [`Clock`]
//! trait so every time-based rule can be driven deterministically in tests.
//!
//! # Modules
//!
//! - [`types`] - Type-safe IDs, prices, emails, order numbers, statuses and
//!   the credential strength policy
//! - [`clock`] - Wall-clock abstraction

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::*;
