//! PayU payment backend
//!
//! REST client, wire types, notification signature checks and the
//! [`PayuBackend`] adapter plugging them into the processor.

pub mod backend;
pub mod client;
pub mod signature;
pub mod types;

pub use backend::PayuBackend;
pub use client::PayuClient;

use rust_decimal::Decimal;

use crate::payments::error::{PaymentError, PaymentResult};

/// PayU configuration
#[derive(Debug, Clone)]
pub struct PayuConfig {
    /// API base URL (defaults to the sandbox)
    pub api_url: String,
    pub pos_id: String,
    /// Key used to sign notifications
    pub second_key: String,
    pub oauth_id: String,
    pub oauth_secret: String,
    pub is_marketplace: bool,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for failed requests
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff
    pub retry_backoff_ms: u64,
    /// Re-authenticate this many seconds before the token expires
    pub token_skew_secs: i64,
    pub paid_tolerance: Decimal,
}

impl Default for PayuConfig {
    fn default() -> Self {
        Self {
            api_url: "https://secure.snd.payu.com".to_string(),
            pos_id: String::new(),
            second_key: String::new(),
            oauth_id: String::new(),
            oauth_secret: String::new(),
            is_marketplace: false,
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            token_skew_secs: 5,
            paid_tolerance: Decimal::ZERO,
        }
    }
}

fn required(name: &str) -> PaymentResult<String> {
    std::env::var(name).map_err(|_| {
        PaymentError::configuration(format!("{} environment variable is required", name))
    })
}

fn optional<T: std::str::FromStr>(name: &str, default: T) -> PaymentResult<T> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| PaymentError::configuration(format!("{} has an invalid value: {}", name, value))),
        Err(_) => Ok(default),
    }
}

impl PayuConfig {
    /// Create config from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        let defaults = Self::default();

        Ok(Self {
            api_url: std::env::var("PAYU_API_URL").unwrap_or(defaults.api_url),
            pos_id: required("PAYU_POS_ID")?,
            second_key: required("PAYU_SECOND_KEY")?,
            oauth_id: required("PAYU_OAUTH_ID")?,
            oauth_secret: required("PAYU_OAUTH_SECRET")?,
            is_marketplace: optional("PAYU_IS_MARKETPLACE", defaults.is_marketplace)?,
            timeout_secs: optional("PAYU_TIMEOUT_SECS", defaults.timeout_secs)?,
            max_retries: optional("PAYU_MAX_RETRIES", defaults.max_retries)?,
            retry_backoff_ms: optional("PAYU_RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,
            token_skew_secs: optional("PAYU_TOKEN_SKEW_SECS", defaults.token_skew_secs)?,
            paid_tolerance: optional("PAYU_PAID_TOLERANCE", defaults.paid_tolerance)?,
        })
    }
}
