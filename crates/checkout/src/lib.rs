//! Order service and payment settlement for the marketplace order core.
//!
//! - [`OrderService`]: create, read, edit and administratively transition orders
//! - [`SettlementCoordinator`]: turn a payment payload into a reference and mark
//!   the order paid in one conditional write
//! - [`Checkout`]: both of the above wired over one set of stores
//!
//! Orders are only ever `Paid` with a reference recorded; concurrent settlement
//! attempts on the same order produce exactly one winner, the rest observe
//! [`CheckoutError::NotPending`].

pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod payload;
pub mod service;
pub mod settlement;
pub mod telemetry;

pub use app::Checkout;
pub use cache::{CacheAside, CacheError, InMemoryOrderCache, OrderCache};
pub use config::{CheckoutConfig, LogFormat, StockPolicy};
pub use error::{CheckoutError, Resource, Result};
pub use gateway::{
    ChargeRequest, GatewayDecline, InMemoryPaymentGateway, PaymentGateway, PaymentGateways,
};
pub use payload::PaymentPayload;
pub use service::{NewLineItem, OrderService};
pub use settlement::{SettlementCoordinator, SettlementOutcome};
pub use telemetry::init_tracing;
