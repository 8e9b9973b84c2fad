use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::client::PayuClient;
use super::signature::{self, SIGNATURE_HEADER};
use super::types::{
    Buyer, CustomerAddress, Notification, Order, OrderRequest, OrderStatus, PayoutAccount,
    PayoutData, PayoutNotification, PayoutRequest, PayoutStatus, Product, RefundData,
    RefundStatus, ShoppingCart, DEFAULT_REFUND_DESCRIPTION,
};
use super::PayuConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::lifecycle::{PaymentEvent, PayoutEvent};
use crate::payments::traits::PaymentBackend;
use crate::payments::types::{
    self as domain, CallbackAck, CallbackOutcome, CallbackRequest, ChargeResult,
    CheckoutContext, CheckoutResult, CheckoutTarget, Payment, Payout, PayoutCallbackOutcome,
    PayoutResult, RefundResult,
};

const DEFAULT_CUSTOMER_IP: &str = "127.0.0.1";

/// Currencies PayU settles
const CURRENCIES: &[&str] = &[
    "BGN", "CHF", "CZK", "DKK", "EUR", "GBP", "HRK", "HUF", "NOK", "PLN", "RON", "RUB", "SEK",
    "UAH", "USD",
];

/// Map an order status to the lifecycle event it stands for
pub fn order_event(order: &Order) -> Option<PaymentEvent> {
    match order.status {
        OrderStatus::New => Some(PaymentEvent::Prepared),
        OrderStatus::Pending => Some(PaymentEvent::ChargeStarted),
        OrderStatus::WaitingForConfirmation => Some(PaymentEvent::Locked {
            amount: order.total_amount,
        }),
        OrderStatus::Completed => Some(PaymentEvent::Paid {
            amount: order.total_amount,
        }),
        OrderStatus::Canceled => Some(PaymentEvent::Failed),
        OrderStatus::Unknown => None,
    }
}

fn payout_event(status: PayoutStatus, external_id: &str) -> PayoutEvent {
    match status {
        PayoutStatus::Realized => PayoutEvent::Succeeded,
        PayoutStatus::Canceled => PayoutEvent::Failed {
            reason: Some("CANCELED".to_string()),
        },
        _ => PayoutEvent::Submitted {
            external_id: external_id.to_string(),
        },
    }
}

fn product(item: &domain::ItemInfo) -> Product {
    Product {
        name: item.name.clone(),
        unit_price: item.unit_price,
        quantity: item.quantity,
    }
}

fn buyer(buyer: &domain::Buyer) -> Buyer {
    Buyer {
        email: buyer.email.clone(),
        phone: buyer.phone.clone(),
        first_name: buyer.first_name.clone(),
        last_name: buyer.last_name.clone(),
        language: buyer.language.clone(),
    }
}

fn shopping_cart(cart: &domain::ShoppingCart) -> ShoppingCart {
    ShoppingCart {
        ext_customer_id: cart.ext_customer_id.clone(),
        amount: cart.amount,
        fee: cart.fee,
        products: cart.products.iter().map(product).collect(),
    }
}

/// PayU backend
pub struct PayuBackend {
    client: PayuClient,
}

impl PayuBackend {
    pub fn new(config: PayuConfig) -> PaymentResult<Self> {
        Ok(Self {
            client: PayuClient::new(config)?,
        })
    }

    /// Create backend from environment variables
    pub fn from_env() -> PaymentResult<Self> {
        Self::new(PayuConfig::from_env()?)
    }

    pub fn client(&self) -> &PayuClient {
        &self.client
    }

    fn order_request(&self, payment: &Payment, context: &CheckoutContext) -> OrderRequest {
        let products = if context.products.is_empty() {
            vec![Product {
                name: payment.description.clone(),
                unit_price: payment.amount_required,
                quantity: 1,
            }]
        } else {
            context.products.iter().map(product).collect()
        };
        let shopping_carts: Vec<ShoppingCart> =
            context.shopping_carts.iter().map(shopping_cart).collect();

        OrderRequest {
            ext_order_id: payment.id.to_string(),
            customer_ip: context
                .customer_ip
                .clone()
                .unwrap_or_else(|| DEFAULT_CUSTOMER_IP.to_string()),
            merchant_pos_id: self.client.config().pos_id.clone(),
            description: payment.description.clone(),
            currency_code: payment.currency.clone(),
            total_amount: payment.amount_required,
            notify_url: context.notify_url.clone(),
            continue_url: context.continue_url.clone(),
            buyer: context.buyer.as_ref().map(buyer),
            // PayU takes either products or marketplace carts
            products: if shopping_carts.is_empty() {
                products
            } else {
                Vec::new()
            },
            shopping_carts,
        }
    }

    fn verify(&self, request: &CallbackRequest) -> PaymentResult<()> {
        signature::verify(
            &request.body,
            request.header(SIGNATURE_HEADER),
            &self.client.config().second_key,
        )
    }

    fn external_id<'a>(&self, payment: &'a Payment) -> PaymentResult<&'a str> {
        payment.external_id.as_deref().ok_or_else(|| {
            PaymentError::invalid_request(format!(
                "Payment {} has not been registered with PayU",
                payment.id
            ))
        })
    }
}

#[async_trait]
impl PaymentBackend for PayuBackend {
    fn slug(&self) -> &'static str {
        "payu"
    }

    fn display_name(&self) -> &'static str {
        "PayU"
    }

    fn accepted_currencies(&self) -> &[&'static str] {
        CURRENCIES
    }

    async fn build_checkout_request(
        &self,
        payment: &Payment,
        context: &CheckoutContext,
    ) -> PaymentResult<CheckoutResult> {
        let response = self
            .client
            .new_order(self.order_request(payment, context))
            .await?;

        let url = response.redirect_uri.ok_or_else(|| {
            PaymentError::lock_failure("PayU returned no redirect URI", None)
        })?;

        Ok(CheckoutResult {
            target: CheckoutTarget::Redirect { url },
            external_id: Some(response.order_id),
        })
    }

    async fn handle_callback(
        &self,
        request: &CallbackRequest,
        payment: &Payment,
    ) -> PaymentResult<CallbackOutcome> {
        self.verify(request)?;

        let notification: Notification = serde_json::from_slice(&request.body).map_err(|e| {
            PaymentError::invalid_request(format!("Malformed PayU notification: {}", e))
        })?;

        let event = match notification {
            Notification::Order(n) => {
                let expected = payment.id.to_string();
                if n.order.ext_order_id.as_deref().is_some_and(|ext| ext != expected) {
                    return Err(PaymentError::invalid_request(format!(
                        "Notification for order {:?} delivered to payment {}",
                        n.order.ext_order_id, payment.id
                    )));
                }
                info!(
                    "PayU order notification: payment={}, order_id={}, status={:?}",
                    payment.id, n.order.order_id, n.order.status
                );
                order_event(&n.order)
            }
            Notification::Refund(n) => {
                info!(
                    "PayU refund notification: payment={}, refund_id={}, status={:?}",
                    payment.id, n.refund.refund_id, n.refund.status
                );
                match n.refund.status {
                    RefundStatus::Finalized => Some(PaymentEvent::Refunded {
                        amount: n
                            .refund
                            .amount
                            .or(payment.pending_refund)
                            .unwrap_or_else(|| payment.refundable_amount()),
                    }),
                    RefundStatus::Canceled => Some(PaymentEvent::RefundCancelled),
                    _ => None,
                }
            }
        };

        Ok(CallbackOutcome {
            event,
            ack: CallbackAck::ok(),
        })
    }

    async fn fetch_status(&self, payment: &Payment) -> PaymentResult<Option<PaymentEvent>> {
        let order_id = match payment.external_id.as_deref() {
            Some(order_id) => order_id,
            None => return Ok(None),
        };

        let info = self.client.get_order_info(order_id).await?;
        match info.orders.first() {
            Some(order) => Ok(order_event(order)),
            None => {
                warn!("PayU knows no order {} for payment {}", order_id, payment.id);
                Ok(None)
            }
        }
    }

    async fn refund(&self, payment: &Payment, amount: Decimal) -> PaymentResult<RefundResult> {
        let order_id = self.external_id(payment)?;

        let response = self
            .client
            .refund(
                order_id,
                RefundData {
                    description: DEFAULT_REFUND_DESCRIPTION.to_string(),
                    ext_refund_id: format!("{}-{}", payment.id, Uuid::new_v4().simple()),
                    ext_customer_id: None,
                    amount: Some(amount),
                },
            )
            .await?;

        Ok(RefundResult {
            refund_id: response.refund.refund_id,
            completed: response.refund.status == RefundStatus::Finalized,
        })
    }

    async fn charge(&self, payment: &Payment, amount: Decimal) -> PaymentResult<ChargeResult> {
        let order_id = self.external_id(payment)?;
        if amount != payment.amount_locked {
            return Err(PaymentError::charge_failure(
                "PayU captures only the whole locked amount",
                None,
            ));
        }

        self.client.capture(order_id).await?;
        // COMPLETED arrives with the next notification
        Ok(ChargeResult {
            amount,
            completed: false,
        })
    }

    async fn release_lock(&self, payment: &Payment) -> PaymentResult<()> {
        let order_id = self.external_id(payment)?;
        self.client.cancel_order(order_id).await?;
        Ok(())
    }

    async fn payout(&self, payout: &Payout) -> PaymentResult<PayoutResult> {
        let request = PayoutRequest {
            shop_id: payout.shop_id.clone(),
            payout: PayoutData {
                currency_code: payout.currency_code.clone(),
                description: payout.description.clone(),
                ext_payout_id: Some(payout.id.to_string()),
                amount: payout.amount,
            },
            account: payout
                .ext_customer_id
                .clone()
                .map(|ext_customer_id| PayoutAccount { ext_customer_id }),
            customer_address: if payout.customer_name.is_empty() {
                None
            } else {
                Some(CustomerAddress {
                    name: payout.customer_name.clone(),
                })
            },
        };

        let response = self.client.payout(request).await?;
        let external_id = response.payout.payout_id;
        Ok(PayoutResult {
            event: payout_event(response.payout.status, &external_id),
            external_id,
        })
    }

    async fn handle_payout_callback(
        &self,
        request: &CallbackRequest,
        payout: &Payout,
    ) -> PaymentResult<PayoutCallbackOutcome> {
        self.verify(request)?;

        let notification: PayoutNotification =
            serde_json::from_slice(&request.body).map_err(|e| {
                PaymentError::invalid_request(format!("Malformed PayU payout notification: {}", e))
            })?;

        info!(
            "PayU payout notification: payout={}, payout_id={}, status={:?}",
            payout.id, notification.payout.payout_id, notification.payout.status
        );

        Ok(PayoutCallbackOutcome {
            event: Some(payout_event(
                notification.payout.status,
                &notification.payout.payout_id,
            )),
            ack: CallbackAck::ok(),
        })
    }
}
