use std::fmt;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Raw gateway response kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

impl fmt::Display for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Gateways sometimes answer with whole HTML pages
        let body: String = self.body.chars().take(200).collect();
        write!(f, "HTTP {}: {}", self.status, body)
    }
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Credentials error: {message}")]
    Credentials {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Communication error: {message}")]
    Communication {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Lock failure: {message}")]
    LockFailure {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Refund failure: {message}")]
    RefundFailure {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Payout failure: {message}")]
    PayoutFailure {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Charge failure: {message}")]
    ChargeFailure {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Payment error: {message}")]
    GetPaid {
        message: String,
        raw: Option<RawResponse>,
    },

    #[error("Cannot apply {event} to a record in status '{status}'")]
    TransitionRejected { status: String, event: String },

    #[error("{entity} with ID '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("Unknown payment backend: {slug}")]
    UnknownBackend { slug: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String, is_retryable: bool },
}

impl PaymentError {
    pub fn credentials(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::Credentials {
            message: message.into(),
            raw,
        }
    }

    pub fn communication(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::Communication {
            message: message.into(),
            raw,
        }
    }

    pub fn lock_failure(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::LockFailure {
            message: message.into(),
            raw,
        }
    }

    pub fn refund_failure(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::RefundFailure {
            message: message.into(),
            raw,
        }
    }

    pub fn payout_failure(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::PayoutFailure {
            message: message.into(),
            raw,
        }
    }

    pub fn charge_failure(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::ChargeFailure {
            message: message.into(),
            raw,
        }
    }

    pub fn get_paid(message: impl Into<String>, raw: Option<RawResponse>) -> Self {
        Self::GetPaid {
            message: message.into(),
            raw,
        }
    }

    pub fn unsupported(backend: &str, operation: &str) -> Self {
        Self::get_paid(
            format!("Backend '{}' does not support {}", backend, operation),
            None,
        )
    }

    pub fn transition_rejected(status: impl fmt::Display, event: impl fmt::Display) -> Self {
        Self::TransitionRejected {
            status: status.to_string(),
            event: event.to_string(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn unknown_backend(slug: impl Into<String>) -> Self {
        Self::UnknownBackend { slug: slug.into() }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>, is_retryable: bool) -> Self {
        Self::Storage {
            message: message.into(),
            is_retryable,
        }
    }

    /// Raw gateway response attached to the error, if any
    pub fn raw_response(&self) -> Option<&RawResponse> {
        match self {
            Self::Credentials { raw, .. }
            | Self::Communication { raw, .. }
            | Self::LockFailure { raw, .. }
            | Self::RefundFailure { raw, .. }
            | Self::PayoutFailure { raw, .. }
            | Self::ChargeFailure { raw, .. }
            | Self::GetPaid { raw, .. } => raw.as_ref(),
            _ => None,
        }
    }

    /// Whether repeating the same call later may succeed.
    ///
    /// Network trouble and 5xx/429 answers are transient; everything the
    /// gateway rejected on business grounds is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Communication { raw, .. } => match raw {
                Some(raw) => raw.status == 429 || raw.status >= 500,
                None => true,
            },
            Self::Storage { is_retryable, .. } => *is_retryable,
            _ => false,
        }
    }

    /// Short machine-readable name used in API error envelopes
    pub fn code(&self) -> &'static str {
        match self {
            Self::Credentials { .. } => "CREDENTIALS_ERROR",
            Self::Communication { .. } => "COMMUNICATION_ERROR",
            Self::LockFailure { .. } => "LOCK_FAILURE",
            Self::RefundFailure { .. } => "REFUND_FAILURE",
            Self::PayoutFailure { .. } => "PAYOUT_FAILURE",
            Self::ChargeFailure { .. } => "CHARGE_FAILURE",
            Self::GetPaid { .. } => "PAYMENT_ERROR",
            Self::TransitionRejected { .. } => "TRANSITION_REJECTED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::UnknownBackend { .. } => "UNKNOWN_BACKEND",
            Self::InvalidRequest { .. } => "INVALID_REQUEST",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Storage { .. } => "STORAGE_ERROR",
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::communication(format!("Request timed out: {}", err), None)
        } else {
            PaymentError::communication(format!("Request error: {}", err), None)
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::communication(format!("JSON error: {}", err), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_response_is_exposed() {
        let err = PaymentError::lock_failure(
            "Error creating order",
            Some(RawResponse::new(400, "{\"status\":\"ERROR\"}")),
        );
        assert_eq!(err.raw_response().map(|r| r.status), Some(400));
        assert_eq!(err.code(), "LOCK_FAILURE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(PaymentError::communication("boom", None).is_retryable());
        assert!(
            PaymentError::communication("busy", Some(RawResponse::new(503, ""))).is_retryable()
        );
        assert!(
            !PaymentError::communication("bad", Some(RawResponse::new(404, ""))).is_retryable()
        );
        assert!(!PaymentError::transition_rejected("refunded", "RefundStarted").is_retryable());
    }

    #[test]
    fn test_raw_response_display_is_truncated() {
        let raw = RawResponse::new(500, "x".repeat(1000));
        assert!(raw.to_string().len() < 220);
    }
}
