//! Payment gateway collaborators and in-memory implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, UserId};
use domain::{PaymentMethod, PaymentReference};
use thiserror::Error;
use tokio::sync::Mutex;

/// A charge attempt sent to a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    /// Method-specific payload, opaque to the core.
    pub details: serde_json::Value,
}

/// A gateway declined or failed the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct GatewayDecline {
    pub reason: String,
}

impl GatewayDecline {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// An external payment processor for one payment method.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Attempts a charge and returns the processor's reference for it.
    async fn charge(&self, request: ChargeRequest) -> Result<PaymentReference, GatewayDecline>;

    /// Cancels a charge that could not be recorded against its order.
    async fn void(&self, reference: &PaymentReference) -> Result<(), GatewayDecline>;
}

/// The gateways available to the settlement coordinator, one per card/wallet
/// method. Bank transfers never reach a gateway.
#[derive(Clone)]
pub struct PaymentGateways {
    stripe: Arc<dyn PaymentGateway>,
    paypal: Arc<dyn PaymentGateway>,
}

impl PaymentGateways {
    pub fn new(
        stripe: impl PaymentGateway + 'static,
        paypal: impl PaymentGateway + 'static,
    ) -> Self {
        Self {
            stripe: Arc::new(stripe),
            paypal: Arc::new(paypal),
        }
    }

    /// In-memory gateways issuing Stripe- and PayPal-shaped references.
    pub fn in_memory() -> Self {
        Self::new(
            InMemoryPaymentGateway::new("pi_"),
            InMemoryPaymentGateway::new("PAYID-"),
        )
    }

    /// Returns the gateway for `method`, or `None` for bank transfers.
    pub fn for_method(&self, method: PaymentMethod) -> Option<&dyn PaymentGateway> {
        match method {
            PaymentMethod::Stripe => Some(self.stripe.as_ref()),
            PaymentMethod::Paypal => Some(self.paypal.as_ref()),
            PaymentMethod::BankTransfer => None,
        }
    }
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    charges: HashMap<String, ChargeRequest>,
    voided: Vec<String>,
    next_id: u32,
    decline_reason: Option<String>,
    delay: Option<Duration>,
}

/// In-memory payment gateway for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    prefix: String,
    state: Arc<Mutex<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a gateway whose references start with `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            state: Arc::default(),
        }
    }

    /// Declines every subsequent charge with `reason`, or stops declining.
    pub async fn set_decline(&self, reason: Option<&str>) {
        self.state.lock().await.decline_reason = reason.map(str::to_string);
    }

    /// Makes every subsequent charge take `delay` before answering.
    pub async fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().await.delay = delay;
    }

    /// Returns the number of live (not voided) charges.
    pub async fn charge_count(&self) -> usize {
        self.state.lock().await.charges.len()
    }

    /// Returns the references voided so far.
    pub async fn voided(&self) -> Vec<String> {
        self.state.lock().await.voided.clone()
    }

    /// Returns the request recorded for a live charge.
    pub async fn recorded_charge(&self, reference: &str) -> Option<ChargeRequest> {
        self.state.lock().await.charges.get(reference).cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<PaymentReference, GatewayDecline> {
        let delay = self.state.lock().await.delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        if let Some(reason) = &state.decline_reason {
            return Err(GatewayDecline::new(reason.clone()));
        }

        state.next_id += 1;
        let reference = format!("{}{:06}", self.prefix, state.next_id);
        state.charges.insert(reference.clone(), request);

        PaymentReference::new(reference).map_err(|e| GatewayDecline::new(e.to_string()))
    }

    async fn void(&self, reference: &PaymentReference) -> Result<(), GatewayDecline> {
        let mut state = self.state.lock().await;
        if state.charges.remove(reference.as_str()).is_none() {
            return Err(GatewayDecline::new(format!("unknown charge {reference}")));
        }
        state.voided.push(reference.as_str().to_string());
        Ok(())
    }
}
