//! Payment settlement coordinator.
//!
//! Settlement turns a method-tagged payload into a payment reference and then
//! moves the order from `Pending` to `Paid` with a single conditional write.
//! The order being `Pending` is the only idempotency guard: a second attempt,
//! sequential or concurrent, ends in [`CheckoutError::NotPending`].

use std::time::{Duration, Instant};

use common::OrderId;
use domain::{Order, OrderError, OrderState, PaymentReference};
use order_store::{OrderRepository, StateWrite, StoreError};
use serde::Serialize;

use crate::cache::CacheAside;
use crate::error::{CheckoutError, Resource, Result};
use crate::gateway::{ChargeRequest, PaymentGateway, PaymentGateways};
use crate::payload::PaymentPayload;

/// Default deadline for a single gateway call.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-friendly summary of a settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Result<Order>> for SettlementOutcome {
    fn from(result: &Result<Order>) -> Self {
        match result {
            Ok(order) => Self {
                success: true,
                reference: order.payment_reference().map(|r| r.as_str().to_string()),
                error: None,
            },
            Err(err) => Self {
                success: false,
                reference: None,
                error: Some(err.to_string()),
            },
        }
    }
}

/// Where a payment reference came from; only gateway charges can be voided.
enum Obtained<'a> {
    Charged(&'a dyn PaymentGateway, PaymentReference),
    Supplied(PaymentReference),
}

impl Obtained<'_> {
    fn reference(&self) -> &PaymentReference {
        match self {
            Obtained::Charged(_, reference) | Obtained::Supplied(reference) => reference,
        }
    }
}

/// Drives `Pending -> Paid` for orders.
pub struct SettlementCoordinator<R> {
    repo: R,
    gateways: PaymentGateways,
    cache: CacheAside,
    gateway_timeout: Duration,
}

impl<R> SettlementCoordinator<R>
where
    R: OrderRepository,
{
    /// Creates a new settlement coordinator.
    pub fn new(repo: R, gateways: PaymentGateways) -> Self {
        Self {
            repo,
            gateways,
            cache: CacheAside::default(),
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }

    /// Serves reads through `cache`; pass clones of one handle to every
    /// component that writes orders.
    pub fn with_cache(mut self, cache: CacheAside) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Settles payment for a pending order.
    ///
    /// Returns the order in `Paid` state with its reference recorded. On any
    /// error the stored order is left as it was.
    #[tracing::instrument(skip(self, payload), fields(method = %payload.method()))]
    pub async fn settle_payment(&self, order_id: OrderId, payload: PaymentPayload) -> Result<Order> {
        let method = payload.method();
        let started = Instant::now();

        let result = self.settle(order_id, payload).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(CheckoutError::GatewayFailure(_)) => "declined",
            Err(CheckoutError::NotPending { .. }) => "not_pending",
            Err(_) => "error",
        };
        metrics::counter!(
            "settlements_total",
            "method" => method.as_str(),
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("settlement_duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(order) => tracing::info!(
                %order_id,
                reference = ?order.payment_reference().map(PaymentReference::as_str),
                "payment settled"
            ),
            Err(CheckoutError::GatewayFailure(reason)) => {
                tracing::warn!(%order_id, %reason, "payment gateway failure")
            }
            Err(err) => tracing::info!(%order_id, error = %err, "settlement rejected"),
        }
        result
    }

    async fn settle(&self, order_id: OrderId, payload: PaymentPayload) -> Result<Order> {
        let order = self
            .repo
            .find_by_id(order_id)
            .await?
            .ok_or(CheckoutError::NotFound(Resource::Order(order_id)))?;

        if order.state() != OrderState::Pending {
            return Err(CheckoutError::NotPending {
                order_id,
                state: order.state(),
            });
        }
        if payload.method() != order.payment_method() {
            return Err(OrderError::PaymentMethodMismatch {
                expected: order.payment_method(),
                actual: payload.method(),
            }
            .into());
        }

        let obtained = self.obtain_reference(&order, order_id, payload).await?;

        let written = match self.repo.settle(order_id, obtained.reference()).await {
            Ok(written) => written,
            Err(err) => return self.recover_failed_write(order_id, &obtained, err).await,
        };
        self.cache.invalidate(order_id).await;

        match written {
            StateWrite::Applied(order) => Ok(order),
            StateWrite::Conflict { actual } => {
                self.void(&obtained, order_id).await;
                Err(CheckoutError::NotPending {
                    order_id,
                    state: actual,
                })
            }
            StateWrite::Missing => {
                self.void(&obtained, order_id).await;
                Err(CheckoutError::NotFound(Resource::Order(order_id)))
            }
        }
    }

    async fn obtain_reference(
        &self,
        order: &Order,
        order_id: OrderId,
        payload: PaymentPayload,
    ) -> Result<Obtained<'_>> {
        let details = match payload {
            PaymentPayload::BankTransfer { proof } => {
                let reference = match proof.filter(|p| !p.trim().is_empty()) {
                    Some(proof) => PaymentReference::new(proof)?,
                    None => synthesize_transfer_reference()?,
                };
                return Ok(Obtained::Supplied(reference));
            }
            PaymentPayload::Stripe { details } | PaymentPayload::Paypal { details } => details,
        };

        let gateway = self
            .gateways
            .for_method(order.payment_method())
            .ok_or_else(|| {
                CheckoutError::Validation(format!(
                    "no gateway for {}",
                    order.payment_method()
                ))
            })?;
        let request = ChargeRequest {
            order_id,
            user_id: order.user_id(),
            amount: order.total(),
            details,
        };

        match tokio::time::timeout(self.gateway_timeout, gateway.charge(request)).await {
            Ok(Ok(reference)) => Ok(Obtained::Charged(gateway, reference)),
            Ok(Err(decline)) => Err(CheckoutError::GatewayFailure(decline.reason)),
            Err(_) => Err(CheckoutError::GatewayFailure(format!(
                "gateway timed out after {}ms",
                self.gateway_timeout.as_millis()
            ))),
        }
    }

    /// A settle write that reported an error may still have committed, for
    /// example when the commit acknowledgement was lost. The stored order
    /// decides: a charge it carries is kept, one it provably lacks is voided,
    /// and if it cannot be read the charge is left for reconciliation.
    async fn recover_failed_write(
        &self,
        order_id: OrderId,
        obtained: &Obtained<'_>,
        err: StoreError,
    ) -> Result<Order> {
        self.cache.invalidate(order_id).await;
        let reference = obtained.reference();

        match self.repo.find_by_id(order_id).await {
            Ok(Some(order)) if order.payment_reference() == Some(reference) => {
                tracing::warn!(%order_id, %reference, error = %err, "settle write reported failure after committing");
                Ok(order)
            }
            Ok(_) => {
                self.void(obtained, order_id).await;
                Err(err.into())
            }
            Err(reread) => {
                tracing::error!(
                    %order_id,
                    %reference,
                    error = %err,
                    reread_error = %reread,
                    "settlement outcome unknown, charge left for reconciliation"
                );
                Err(err.into())
            }
        }
    }

    /// Voids a charge the order could not be marked paid with.
    async fn void(&self, obtained: &Obtained<'_>, order_id: OrderId) {
        let Obtained::Charged(gateway, reference) = obtained else {
            return;
        };
        match gateway.void(reference).await {
            Ok(()) => tracing::info!(%order_id, %reference, "unrecorded charge voided"),
            Err(err) => {
                tracing::warn!(%order_id, %reference, error = %err, "failed to void unrecorded charge")
            }
        }
    }
}

fn synthesize_transfer_reference() -> std::result::Result<PaymentReference, OrderError> {
    PaymentReference::new(format!("BT-{}", uuid::Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryPaymentGateway;
    use common::{Money, ProductId, UserId};
    use domain::{LineItem, PaymentMethod};
    use order_store::InMemoryOrderRepository;

    async fn pending_order(repo: &InMemoryOrderRepository, method: PaymentMethod) -> OrderId {
        let order = Order::with_items(
            UserId::new(1),
            "9 Forge Way",
            method,
            vec![LineItem::new(ProductId::new(1), 2, Money::from_minor_units(50_000)).unwrap()],
        )
        .unwrap();
        repo.create(order).await.unwrap().id().unwrap()
    }

    fn coordinator(
        repo: &InMemoryOrderRepository,
    ) -> (
        SettlementCoordinator<InMemoryOrderRepository>,
        InMemoryPaymentGateway,
        InMemoryPaymentGateway,
    ) {
        let stripe = InMemoryPaymentGateway::new("pi_");
        let paypal = InMemoryPaymentGateway::new("PAYID-");
        let gateways = PaymentGateways::new(stripe.clone(), paypal.clone());
        (
            SettlementCoordinator::new(repo.clone(), gateways),
            stripe,
            paypal,
        )
    }

    #[tokio::test]
    async fn bank_transfer_uses_supplied_proof() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::BankTransfer).await;
        let (coordinator, _, _) = coordinator(&repo);

        let order = coordinator
            .settle_payment(id, PaymentPayload::bank_transfer(Some("TR-1")))
            .await
            .unwrap();
        assert_eq!(order.state(), OrderState::Paid);
        assert_eq!(order.payment_reference().unwrap().as_str(), "TR-1");
    }

    #[tokio::test]
    async fn bank_transfer_without_proof_gets_a_token() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::BankTransfer).await;
        let (coordinator, _, _) = coordinator(&repo);

        let order = coordinator
            .settle_payment(id, PaymentPayload::bank_transfer(None::<String>))
            .await
            .unwrap();
        let reference = order.payment_reference().unwrap().as_str();
        assert!(reference.starts_with("BT-"));
        assert_eq!(reference.len(), 3 + 32);
    }

    #[tokio::test]
    async fn stripe_charges_order_total() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Stripe).await;
        let (coordinator, stripe, paypal) = coordinator(&repo);

        let order = coordinator
            .settle_payment(id, PaymentPayload::stripe(serde_json::json!({"pm": "card"})))
            .await
            .unwrap();
        let reference = order.payment_reference().unwrap().as_str();
        assert_eq!(reference, "pi_000001");

        let charge = stripe.recorded_charge(reference).await.unwrap();
        assert_eq!(charge.amount, Money::from_minor_units(100_000));
        assert_eq!(charge.order_id, id);
        assert_eq!(paypal.charge_count().await, 0);
    }

    #[tokio::test]
    async fn second_settlement_is_not_pending() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Paypal).await;
        let (coordinator, _, paypal) = coordinator(&repo);

        let first = coordinator
            .settle_payment(id, PaymentPayload::paypal(serde_json::Value::Null))
            .await
            .unwrap();
        let second = coordinator
            .settle_payment(id, PaymentPayload::paypal(serde_json::Value::Null))
            .await;

        assert!(matches!(
            second,
            Err(CheckoutError::NotPending {
                state: OrderState::Paid,
                ..
            })
        ));
        assert_eq!(paypal.charge_count().await, 1);
        assert_eq!(repo.find_by_id(id).await.unwrap().unwrap(), first);
    }

    #[tokio::test]
    async fn decline_leaves_order_pending() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Stripe).await;
        let (coordinator, stripe, _) = coordinator(&repo);
        stripe.set_decline(Some("card_declined")).await;

        let result = coordinator
            .settle_payment(id, PaymentPayload::stripe(serde_json::Value::Null))
            .await;
        assert!(matches!(
            result,
            Err(CheckoutError::GatewayFailure(ref reason)) if reason == "card_declined"
        ));

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.state(), OrderState::Pending);
        assert_eq!(stored.payment_reference(), None);
        assert_eq!(stored.version(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gateway_timeout_is_a_failure() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Stripe).await;
        let (coordinator, stripe, _) = coordinator(&repo);
        let coordinator = coordinator.with_gateway_timeout(Duration::from_millis(50));
        stripe.set_delay(Some(Duration::from_secs(5))).await;

        let result = coordinator
            .settle_payment(id, PaymentPayload::stripe(serde_json::Value::Null))
            .await;
        assert!(matches!(result, Err(CheckoutError::GatewayFailure(_))));
        assert_eq!(
            repo.find_by_id(id).await.unwrap().unwrap().state(),
            OrderState::Pending
        );
    }

    #[tokio::test]
    async fn method_mismatch_is_validation() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Stripe).await;
        let (coordinator, stripe, _) = coordinator(&repo);

        let result = coordinator
            .settle_payment(id, PaymentPayload::bank_transfer(Some("TR-9")))
            .await;
        assert!(matches!(result, Err(CheckoutError::Validation(_))));
        assert_eq!(stripe.charge_count().await, 0);
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let repo = InMemoryOrderRepository::new();
        let (coordinator, _, _) = coordinator(&repo);

        let result = coordinator
            .settle_payment(OrderId::new(12), PaymentPayload::bank_transfer(Some("TR-1")))
            .await;
        assert!(matches!(
            result,
            Err(CheckoutError::NotFound(Resource::Order(_)))
        ));
    }

    #[tokio::test]
    async fn failed_write_voids_the_charge() {
        let repo = InMemoryOrderRepository::new();
        let id = pending_order(&repo, PaymentMethod::Stripe).await;
        let (coordinator, stripe, _) = coordinator(&repo);
        repo.set_fail_on_write(true).await;

        let result = coordinator
            .settle_payment(id, PaymentPayload::stripe(serde_json::Value::Null))
            .await;
        assert!(matches!(result, Err(CheckoutError::Storage(_))));
        assert_eq!(stripe.charge_count().await, 0);
        assert_eq!(stripe.voided().await, vec!["pi_000001".to_string()]);
    }

    #[test]
    fn outcome_summary() {
        let err: Result<Order> = Err(CheckoutError::GatewayFailure("insufficient_funds".into()));
        let outcome = SettlementOutcome::from(&err);
        assert!(!outcome.success);
        assert_eq!(outcome.reference, None);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Payment gateway failure: insufficient_funds")
        );
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"success": false, "error": "Payment gateway failure: insufficient_funds"})
        );
    }
}
