//! Payment and payout lifecycle
//!
//! Every status change of a record goes through [`apply_event`] or
//! [`apply_payout_event`]. Events describe what the gateway reported, with
//! cumulative amounts, so the same notification delivered twice resolves to
//! [`Transition::Duplicate`] instead of being applied twice. A rejected event
//! leaves the record untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::types::{Payment, PaymentStatus, Payout, PayoutStatus};

/// Something that happened to a payment on the gateway side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Order registered with the gateway
    Prepared,
    /// Gateway reserved `amount`
    Locked { amount: Decimal },
    /// Gateway started processing or capturing the money
    ChargeStarted,
    /// Gateway reports `amount` paid in total so far
    Paid { amount: Decimal },
    Failed,
    Cancelled,
    RefundStarted { amount: Decimal },
    RefundCancelled,
    /// Gateway confirmed a refund of `amount`
    Refunded { amount: Decimal },
}

impl fmt::Display for PaymentEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentEvent::Prepared => write!(f, "prepared"),
            PaymentEvent::Locked { amount } => write!(f, "locked({})", amount),
            PaymentEvent::ChargeStarted => write!(f, "charge_started"),
            PaymentEvent::Paid { amount } => write!(f, "paid({})", amount),
            PaymentEvent::Failed => write!(f, "failed"),
            PaymentEvent::Cancelled => write!(f, "cancelled"),
            PaymentEvent::RefundStarted { amount } => write!(f, "refund_started({})", amount),
            PaymentEvent::RefundCancelled => write!(f, "refund_cancelled"),
            PaymentEvent::Refunded { amount } => write!(f, "refunded({})", amount),
        }
    }
}

/// Something that happened to a payout on the gateway side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PayoutEvent {
    /// Execution claimed; the gateway has not been called yet
    Started,
    /// Execution abandoned before the gateway accepted anything
    Released,
    /// Gateway accepted the payout under `external_id`
    Submitted { external_id: String },
    Succeeded,
    Failed { reason: Option<String> },
}

impl fmt::Display for PayoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutEvent::Started => write!(f, "started"),
            PayoutEvent::Released => write!(f, "released"),
            PayoutEvent::Submitted { external_id } => write!(f, "submitted({})", external_id),
            PayoutEvent::Succeeded => write!(f, "succeeded"),
            PayoutEvent::Failed { .. } => write!(f, "failed"),
        }
    }
}

/// Result of feeding an event into the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<S> {
    Applied { from: S, to: S },
    /// The event was already reflected in the record; nothing changed
    Duplicate(S),
}

impl<S: Copy> Transition<S> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }

    /// Status of the record after the event
    pub fn status(&self) -> S {
        match self {
            Transition::Applied { to, .. } => *to,
            Transition::Duplicate(status) => *status,
        }
    }
}

/// Backend-specific rules the lifecycle consults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LifecyclePolicy {
    /// How much less than the required amount still counts as fully paid
    pub paid_tolerance: Decimal,
}

impl LifecyclePolicy {
    pub fn with_tolerance(paid_tolerance: Decimal) -> Self {
        Self { paid_tolerance }
    }

    fn settles(&self, paid: Decimal, required: Decimal) -> bool {
        paid + self.paid_tolerance >= required
    }

    fn settled_status(&self, payment: &Payment) -> PaymentStatus {
        if self.settles(payment.amount_paid, payment.amount_required) {
            PaymentStatus::Paid
        } else {
            PaymentStatus::PartiallyPaid
        }
    }
}

fn ensure_positive(amount: Decimal, event: &PaymentEvent) -> PaymentResult<()> {
    if amount <= Decimal::ZERO {
        return Err(PaymentError::invalid_request(format!(
            "Event {} carries a non-positive amount",
            event
        )));
    }
    Ok(())
}

/// Apply `event` to `payment`, mutating it only when the transition is legal
pub fn apply_event(
    payment: &mut Payment,
    event: &PaymentEvent,
    policy: &LifecyclePolicy,
    now: DateTime<Utc>,
) -> PaymentResult<Transition<PaymentStatus>> {
    use PaymentStatus::*;

    let from = payment.status;
    let reject = || PaymentError::transition_rejected(from, event);

    let to = match event {
        PaymentEvent::Prepared => match from {
            Prepared => return Ok(Transition::Duplicate(from)),
            New => Prepared,
            _ => return Err(reject()),
        },
        PaymentEvent::Locked { amount } => {
            ensure_positive(*amount, event)?;
            match from {
                Locked if payment.amount_locked == *amount => {
                    return Ok(Transition::Duplicate(from))
                }
                New | Prepared | InProgress => {
                    payment.amount_locked = *amount;
                    Locked
                }
                _ => return Err(reject()),
            }
        }
        PaymentEvent::ChargeStarted => match from {
            InProgress => return Ok(Transition::Duplicate(from)),
            New | Prepared | Locked => InProgress,
            _ => return Err(reject()),
        },
        PaymentEvent::Paid { amount } => {
            ensure_positive(*amount, event)?;
            match from {
                Paid | PartiallyPaid if payment.amount_paid == *amount => {
                    return Ok(Transition::Duplicate(from))
                }
                // Cumulative amounts only grow; anything else is a stale notification
                PartiallyPaid if *amount < payment.amount_paid => return Err(reject()),
                New | Prepared | Locked | InProgress | PartiallyPaid => {
                    payment.amount_paid = *amount;
                    payment.last_payment_on = Some(now);
                    policy.settled_status(payment)
                }
                _ => return Err(reject()),
            }
        }
        PaymentEvent::Failed => match from {
            Failed => return Ok(Transition::Duplicate(from)),
            New | Prepared | Locked | InProgress => Failed,
            _ => return Err(reject()),
        },
        PaymentEvent::Cancelled => match from {
            Cancelled => return Ok(Transition::Duplicate(from)),
            New | Prepared | Locked => Cancelled,
            _ => return Err(reject()),
        },
        PaymentEvent::RefundStarted { amount } => {
            ensure_positive(*amount, event)?;
            match from {
                RefundStarted if payment.pending_refund == Some(*amount) => {
                    return Ok(Transition::Duplicate(from))
                }
                Paid | PartiallyPaid => {
                    if *amount > payment.refundable_amount() {
                        return Err(PaymentError::invalid_request(format!(
                            "Cannot refund {} {}, only {} is refundable",
                            amount,
                            payment.currency,
                            payment.refundable_amount()
                        )));
                    }
                    payment.pending_refund = Some(*amount);
                    RefundStarted
                }
                _ => return Err(reject()),
            }
        }
        PaymentEvent::RefundCancelled => match from {
            RefundStarted => {
                payment.pending_refund = None;
                policy.settled_status(payment)
            }
            _ => return Err(reject()),
        },
        PaymentEvent::Refunded { amount } => {
            ensure_positive(*amount, event)?;
            match from {
                Refunded => return Ok(Transition::Duplicate(from)),
                RefundStarted => {
                    if *amount > payment.refundable_amount() {
                        return Err(PaymentError::invalid_request(format!(
                            "Refund of {} exceeds the refundable amount {}",
                            amount,
                            payment.refundable_amount()
                        )));
                    }
                    payment.amount_refunded += *amount;
                    payment.pending_refund = None;
                    payment.refunded_on = Some(now);
                    if payment.amount_refunded >= payment.amount_paid {
                        Refunded
                    } else {
                        policy.settled_status(payment)
                    }
                }
                _ => return Err(reject()),
            }
        }
    };

    payment.status = to;
    payment.updated_on = now;
    Ok(Transition::Applied { from, to })
}

/// Check whether `event` would be accepted, without touching `payment`
pub fn check_event(
    payment: &Payment,
    event: &PaymentEvent,
    policy: &LifecyclePolicy,
) -> PaymentResult<Transition<PaymentStatus>> {
    let mut scratch = payment.clone();
    apply_event(&mut scratch, event, policy, Utc::now())
}

/// Apply `event` to `payout`, mutating it only when the transition is legal
pub fn apply_payout_event(
    payout: &mut Payout,
    event: &PayoutEvent,
    now: DateTime<Utc>,
) -> PaymentResult<Transition<PayoutStatus>> {
    use PayoutStatus::*;

    let from = payout.status;
    let reject = || PaymentError::transition_rejected(from, event);

    let to = match event {
        // Never a duplicate: a second claim on the same payout must lose
        PayoutEvent::Started => match from {
            New => Pending,
            _ => return Err(reject()),
        },
        PayoutEvent::Released => match from {
            Pending if payout.external_id.is_none() => New,
            _ => return Err(reject()),
        },
        PayoutEvent::Submitted { external_id } => match from {
            Pending if payout.external_id.as_deref() == Some(external_id.as_str()) => {
                return Ok(Transition::Duplicate(from))
            }
            New => {
                payout.external_id = Some(external_id.clone());
                Pending
            }
            Pending if payout.external_id.is_none() => {
                payout.external_id = Some(external_id.clone());
                Pending
            }
            _ => return Err(reject()),
        },
        PayoutEvent::Succeeded => match from {
            Success => return Ok(Transition::Duplicate(from)),
            New | Pending => Success,
            _ => return Err(reject()),
        },
        PayoutEvent::Failed { reason } => match from {
            Failed => return Ok(Transition::Duplicate(from)),
            New | Pending => {
                payout.failed_code = reason.clone();
                Failed
            }
            _ => return Err(reject()),
        },
    };

    payout.status = to;
    payout.updated_on = now;
    Ok(Transition::Applied { from, to })
}
