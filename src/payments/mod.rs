//! Payment integration module
//!
//! A gateway-agnostic payment lifecycle with pluggable backends (PayU and a
//! dummy gateway for development), plus the processor that drives records
//! through it.

pub mod amount;
pub mod error;
pub mod lifecycle;
pub mod processor;
pub mod providers;
pub mod registry;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{PaymentError, PaymentResult};
pub use lifecycle::{LifecyclePolicy, PaymentEvent, PayoutEvent, Transition};
pub use processor::{CallbackReport, Disposition, PaymentProcessor};
pub use registry::BackendRegistry;
pub use store::{InMemoryStore, PaymentStore};
pub use traits::PaymentBackend;
