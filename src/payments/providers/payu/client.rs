//! PayU REST API client
//!
//! Thin typed wrapper over the PayU v2.1 REST API. Every public method starts
//! with [`PayuClient::ensure_auth`], which reuses the cached OAuth token or
//! fetches a new one. Non-success answers are turned into the typed error of
//! the operation with the raw response attached.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Request, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::PayuConfig;
use super::types::{
    CancellationResponse, CaptureRequest, ChargeResponse, OperationsQuery, OrderInfoResponse,
    OrderRequest, OrderResponse, OrderStatus, PayoutRequest, PayoutResponse, RefundData,
    RefundRequest, RefundResponse, ShopInfoResponse, SubmerchantBalanceResponse,
    SubmerchantOperationsResponse, SubmerchantStatusResponse, TokenResponse,
};
use crate::payments::error::{PaymentError, PaymentResult, RawResponse};

const AUTHORIZE_PATH: &str = "/pl/standard/user/oauth/authorize";

#[derive(Debug, Clone)]
struct CachedToken {
    /// Ready-to-use `Authorization` header value
    authorization: String,
    expires_at: DateTime<Utc>,
}

/// PayU API client
pub struct PayuClient {
    config: PayuConfig,
    http: Client,
    token: RwLock<Option<CachedToken>>,
}

impl PayuClient {
    /// Create a new client. No request is made until the first call.
    pub fn new(config: PayuConfig) -> PaymentResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                PaymentError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            http,
            token: RwLock::new(None),
        })
    }

    pub fn config(&self) -> &PayuConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }

    /// Return a valid `Authorization` value, authenticating when the cached
    /// token is missing or about to expire
    pub async fn ensure_auth(&self) -> PaymentResult<String> {
        {
            let token = self.token.read().await;
            if let Some(token) = token.as_ref() {
                let skew = ChronoDuration::try_seconds(self.config.token_skew_secs)
                    .unwrap_or_else(ChronoDuration::zero);
                let fresh_until = token.expires_at.checked_sub_signed(skew);
                if fresh_until.is_some_and(|until| until > Utc::now()) {
                    return Ok(token.authorization.clone());
                }
            }
        }
        self.authorize().await
    }

    /// Fetch a fresh OAuth token and cache it
    pub async fn authorize(&self) -> PaymentResult<String> {
        debug!("Authenticating with PayU: client_id={}", self.config.oauth_id);

        let response = self
            .http
            .post(self.url(AUTHORIZE_PATH))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.oauth_id.as_str()),
                ("client_secret", self.config.oauth_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| PaymentError::credentials(format!("Cannot authenticate: {}", e), None))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let raw = RawResponse::new(status.as_u16(), body);

        if status != StatusCode::OK {
            error!("PayU authentication failed: {}", raw);
            return Err(PaymentError::credentials("Cannot authenticate.", Some(raw)));
        }

        let token: TokenResponse = serde_json::from_str(&raw.body).map_err(|e| {
            PaymentError::credentials(format!("Malformed token response: {}", e), Some(raw.clone()))
        })?;

        let authorization = format!("{} {}", capitalize(&token.token_type), token.access_token);
        let expires_at = ChronoDuration::try_seconds(token.expires_in)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                PaymentError::credentials(
                    format!("Token lifetime out of range: {}", token.expires_in),
                    Some(raw.clone()),
                )
            })?;

        *self.token.write().await = Some(CachedToken {
            authorization: authorization.clone(),
            expires_at,
        });

        info!("PayU token acquired, valid until {}", expires_at);
        Ok(authorization)
    }

    async fn clear_token(&self) {
        *self.token.write().await = None;
    }

    /// Send an authenticated request and return the raw answer.
    ///
    /// A 401 means PayU no longer accepts the cached token: it is dropped and
    /// the request is sent once more with a fresh one. A second 401 is a
    /// credentials error.
    async fn send(&self, request: RequestBuilder) -> PaymentResult<RawResponse> {
        let request = request.build().map_err(|e| {
            PaymentError::communication(format!("Failed to build request: {}", e), None)
        })?;

        let raw = self.send_authorized(&request).await?;
        if raw.status != StatusCode::UNAUTHORIZED.as_u16() {
            return Ok(raw);
        }

        warn!("PayU rejected the token, authenticating again");
        self.clear_token().await;
        let raw = self.send_authorized(&request).await?;
        if raw.status == StatusCode::UNAUTHORIZED.as_u16() {
            error!("PayU rejected a fresh token: {}", raw);
            self.clear_token().await;
            return Err(PaymentError::credentials("Access token rejected", Some(raw)));
        }
        Ok(raw)
    }

    /// Send `request` with the current token, retrying with exponential
    /// backoff.
    ///
    /// 429 and connection failures are always retried. 5xx and other network
    /// errors are retried only for methods other than POST, because a POST
    /// that reached PayU has already created an order, refund or payout.
    async fn send_authorized(&self, request: &Request) -> PaymentResult<RawResponse> {
        let authorization = self.ensure_auth().await?;
        let authorization = HeaderValue::from_str(&authorization).map_err(|e| {
            PaymentError::credentials(format!("Unusable access token: {}", e), None)
        })?;
        let idempotent = request.method() != Method::POST;

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let mut req = request
                .try_clone()
                .ok_or_else(|| PaymentError::communication("Failed to clone request", None))?;
            req.headers_mut().insert(AUTHORIZATION, authorization.clone());

            match self.http.execute(req).await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    let raw = RawResponse::new(status.as_u16(), body);

                    let transient = status == StatusCode::TOO_MANY_REQUESTS
                        || (idempotent && status.is_server_error());
                    if transient && attempt < self.config.max_retries {
                        let backoff = self.backoff(attempt);
                        warn!(
                            "PayU answered {}, retrying after {:?} (attempt {})",
                            status,
                            backoff,
                            attempt + 1
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    return Ok(raw);
                }
                Err(e) => {
                    let retry = idempotent || e.is_connect();
                    if retry && attempt < self.config.max_retries {
                        let backoff = self.backoff(attempt);
                        warn!(
                            "Request error, retrying after {:?} (attempt {}): {}",
                            backoff,
                            attempt + 1,
                            e
                        );
                        last_error = Some(e);
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    last_error = Some(e);
                    break;
                }
            }
        }

        Err(PaymentError::communication(
            format!(
                "Request to {} failed: {}",
                request.url().path(),
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string())
            ),
            None,
        ))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        Duration::from_millis(self.config.retry_backoff_ms.saturating_mul(factor))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    /// Register a new order. Success codes are 200, 201 and 302.
    pub async fn new_order(&self, mut order: OrderRequest) -> PaymentResult<OrderResponse> {
        if self.config.is_marketplace && order.shopping_carts.is_empty() {
            return Err(PaymentError::invalid_request(
                "Shopping carts are required in marketplace mode",
            ));
        }
        order.merchant_pos_id = self.config.pos_id.clone();

        info!(
            "Creating PayU order: ext_order_id={}, amount={} {}",
            order.ext_order_id, order.total_amount, order.currency_code
        );

        let raw = self
            .send(self.request(Method::POST, "/api/v2_1/orders").json(&order))
            .await?;

        match raw.status {
            200 | 201 | 302 => {
                let response: OrderResponse = parse(&raw)?;
                info!("PayU order created: order_id={}", response.order_id);
                Ok(response)
            }
            _ => {
                error!("PayU order creation failed: {}", raw);
                Err(PaymentError::lock_failure("Error creating order", Some(raw)))
            }
        }
    }

    /// Request a refund; `amount: None` refunds the whole order
    pub async fn refund(&self, order_id: &str, refund: RefundData) -> PaymentResult<RefundResponse> {
        info!(
            "Requesting PayU refund: order_id={}, ext_refund_id={}, amount={:?}",
            order_id, refund.ext_refund_id, refund.amount
        );

        let path = format!("/api/v2_1/orders/{}/refunds", order_id);
        let raw = self
            .send(
                self.request(Method::POST, &path)
                    .json(&RefundRequest { refund }),
            )
            .await?;

        if raw.status == 200 {
            return parse(&raw);
        }
        error!("PayU refund failed: {}", raw);
        Err(PaymentError::refund_failure("Error creating refund", Some(raw)))
    }

    pub async fn cancel_order(&self, order_id: &str) -> PaymentResult<CancellationResponse> {
        info!("Cancelling PayU order: order_id={}", order_id);

        let path = format!("/api/v2_1/orders/{}", order_id);
        let raw = self.send(self.request(Method::DELETE, &path)).await?;

        if raw.status == 200 {
            return parse(&raw);
        }
        Err(PaymentError::get_paid("Error cancelling order", Some(raw)))
    }

    /// Capture a locked (`WAITING_FOR_CONFIRMATION`) order
    pub async fn capture(&self, order_id: &str) -> PaymentResult<ChargeResponse> {
        info!("Capturing PayU order: order_id={}", order_id);

        let path = format!("/api/v2_1/orders/{}/status", order_id);
        let body = CaptureRequest {
            order_id: order_id.to_string(),
            order_status: OrderStatus::Completed,
        };
        let raw = self
            .send(self.request(Method::PUT, &path).json(&body))
            .await?;

        if raw.status == 200 {
            return parse(&raw);
        }
        Err(PaymentError::charge_failure(
            "Error charging locked payment",
            Some(raw),
        ))
    }

    pub async fn get_order_info(&self, order_id: &str) -> PaymentResult<OrderInfoResponse> {
        let path = format!("/api/v2_1/orders/{}", order_id);
        let raw = self.send(self.request(Method::GET, &path)).await?;

        if raw.status == 200 {
            return parse(&raw);
        }
        Err(PaymentError::communication("Error getting order info", Some(raw)))
    }

    pub async fn get_shop_info(&self, shop_id: &str) -> PaymentResult<ShopInfoResponse> {
        let path = format!("/api/v2_1/shops/{}", shop_id);
        let raw = self.send(self.request(Method::GET, &path)).await?;

        if raw.status == 200 {
            return parse(&raw);
        }
        Err(PaymentError::communication("Error getting shop info", Some(raw)))
    }

    /// Order a payout from the shop balance. Success code is 201.
    pub async fn payout(&self, payout: PayoutRequest) -> PaymentResult<PayoutResponse> {
        if self.config.is_marketplace {
            let complete = payout.account.is_some()
                && payout.payout.ext_payout_id.is_some()
                && payout.customer_address.is_some();
            if !complete {
                return Err(PaymentError::invalid_request(
                    "Marketplace payouts need ext_customer_id, ext_payout_id and customer_name",
                ));
            }
        }

        info!(
            "Requesting PayU payout: shop_id={}, amount={:?} {}",
            payout.shop_id, payout.payout.amount, payout.payout.currency_code
        );

        let raw = self
            .send(self.request(Method::POST, "/api/v2_1/payouts").json(&payout))
            .await?;

        if raw.status == 201 {
            return parse(&raw);
        }
        error!("PayU payout failed: {}", raw);
        Err(PaymentError::payout_failure("Payout not available", Some(raw)))
    }

    pub async fn submerchant_status(
        &self,
        ext_customer_id: &str,
        currency_code: &str,
    ) -> PaymentResult<SubmerchantStatusResponse> {
        let path = format!("/api/v2_1/customers/ext/{}/status", ext_customer_id);
        let raw = self
            .send(
                self.request(Method::GET, &path)
                    .query(&[("currencyCode", currency_code)]),
            )
            .await?;
        parse_success(&raw, "Error getting sub-merchant status")
    }

    pub async fn submerchant_balance(
        &self,
        ext_customer_id: &str,
        currency_code: &str,
    ) -> PaymentResult<SubmerchantBalanceResponse> {
        let path = format!("/api/v2_1/customers/ext/{}/balances", ext_customer_id);
        let raw = self
            .send(
                self.request(Method::GET, &path)
                    .query(&[("currencyCode", currency_code)]),
            )
            .await?;
        parse_success(&raw, "Error getting sub-merchant balance")
    }

    pub async fn submerchant_operations(
        &self,
        ext_customer_id: &str,
        query: &OperationsQuery,
    ) -> PaymentResult<SubmerchantOperationsResponse> {
        let path = format!("/api/v2_1/customers/ext/{}/operations", ext_customer_id);
        let raw = self
            .send(self.request(Method::GET, &path).query(&query.to_params()))
            .await?;
        parse_success(&raw, "Error getting sub-merchant operations")
    }
}

fn parse<T: DeserializeOwned>(raw: &RawResponse) -> PaymentResult<T> {
    serde_json::from_str(&raw.body).map_err(|e| {
        PaymentError::communication(
            format!("Invalid response format: {}", e),
            Some(raw.clone()),
        )
    })
}

fn parse_success<T: DeserializeOwned>(raw: &RawResponse, message: &str) -> PaymentResult<T> {
    if (200..300).contains(&raw.status) {
        parse(raw)
    } else {
        Err(PaymentError::communication(message, Some(raw.clone())))
    }
}

/// `bearer` → `Bearer`
fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
