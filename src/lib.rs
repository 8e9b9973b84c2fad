//! Pluggable payment processing
//!
//! Payments and payouts move through a fixed lifecycle while gateway
//! specifics live behind the [`payments::PaymentBackend`] trait. PayU and a
//! dummy gateway for local testing ship with the crate.

pub mod api;
pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod payments;
