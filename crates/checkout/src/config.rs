//! Checkout configuration loaded from environment variables.

use std::time::Duration;

/// When catalog stock is taken for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StockPolicy {
    /// Stock is left to a later fulfillment step.
    #[default]
    Deferred,
    /// Stock is decremented when the order is created and returned when it is
    /// cancelled.
    ReserveOnCreate,
}

impl StockPolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "deferred" => Some(Self::Deferred),
            "reserve_on_create" => Some(Self::ReserveOnCreate),
            _ => None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Checkout configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `DATABASE_URL`: PostgreSQL URL; in-memory stores when unset
/// - `GATEWAY_TIMEOUT_MS`: deadline for one gateway call (default: `10000`)
/// - `STOCK_POLICY`: `deferred` or `reserve_on_create` (default: `deferred`)
/// - `ORDER_CACHE`: `on` or `off` (default: `on`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutConfig {
    pub database_url: Option<String>,
    pub gateway_timeout: Duration,
    pub stock_policy: StockPolicy,
    pub order_cache: bool,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl CheckoutConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            gateway_timeout: lookup("GATEWAY_TIMEOUT_MS")
                .and_then(|ms| ms.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.gateway_timeout),
            stock_policy: lookup("STOCK_POLICY")
                .and_then(|p| StockPolicy::parse(&p))
                .unwrap_or(defaults.stock_policy),
            order_cache: lookup("ORDER_CACHE")
                .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "off" | "false" | "0"))
                .unwrap_or(defaults.order_cache),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref().map(str::trim) {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Text,
            },
        }
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            gateway_timeout: Duration::from_millis(10_000),
            stock_policy: StockPolicy::Deferred,
            order_cache: true,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
