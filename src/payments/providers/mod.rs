//! Payment backend implementations
//!
//! Concrete implementations of the `PaymentBackend` trait.

pub mod dummy;
pub mod payu;

pub use dummy::{DummyBackend, DummyConfig};
pub use payu::{PayuBackend, PayuConfig};
