//! Backend registry
//!
//! Maps backend slugs to their implementation, resolved once at startup.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::lifecycle::LifecyclePolicy;
use crate::payments::traits::PaymentBackend;

struct RegisteredBackend {
    backend: Arc<dyn PaymentBackend>,
    policy: LifecyclePolicy,
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<&'static str, RegisteredBackend>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its slug, replacing any previous registration
    pub fn register(&mut self, backend: Arc<dyn PaymentBackend>, policy: LifecyclePolicy) {
        let slug = backend.slug();
        info!(
            "Registering payment backend: slug={}, name={}, paid_tolerance={}",
            slug,
            backend.display_name(),
            policy.paid_tolerance
        );
        self.backends
            .insert(slug, RegisteredBackend { backend, policy });
    }

    pub fn with(mut self, backend: Arc<dyn PaymentBackend>, policy: LifecyclePolicy) -> Self {
        self.register(backend, policy);
        self
    }

    pub fn get(&self, slug: &str) -> PaymentResult<Arc<dyn PaymentBackend>> {
        self.backends
            .get(slug)
            .map(|entry| entry.backend.clone())
            .ok_or_else(|| PaymentError::unknown_backend(slug))
    }

    pub fn policy(&self, slug: &str) -> PaymentResult<LifecyclePolicy> {
        self.backends
            .get(slug)
            .map(|entry| entry.policy)
            .ok_or_else(|| PaymentError::unknown_backend(slug))
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.backends.contains_key(slug)
    }

    /// Registered slugs, sorted
    pub fn slugs(&self) -> Vec<&'static str> {
        let mut slugs: Vec<_> = self.backends.keys().copied().collect();
        slugs.sort_unstable();
        slugs
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
