//! Method-tagged settlement payloads.

use domain::PaymentMethod;
use serde::{Deserialize, Serialize};

/// Payment details supplied by the caller when settling an order.
///
/// Gateway payloads are opaque to this crate and passed through as-is.
///
/// ```json
/// {"method": "bank_transfer", "proof": "TR-1"}
/// {"method": "stripe", "details": {"payment_method": "pm_card_visa"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum PaymentPayload {
    Stripe {
        #[serde(default)]
        details: serde_json::Value,
    },
    Paypal {
        #[serde(default)]
        details: serde_json::Value,
    },
    BankTransfer {
        #[serde(default)]
        proof: Option<String>,
    },
}

impl PaymentPayload {
    pub fn stripe(details: serde_json::Value) -> Self {
        Self::Stripe { details }
    }

    pub fn paypal(details: serde_json::Value) -> Self {
        Self::Paypal { details }
    }

    pub fn bank_transfer(proof: Option<impl Into<String>>) -> Self {
        Self::BankTransfer {
            proof: proof.map(Into::into),
        }
    }

    /// The payment method this payload is tagged with.
    pub fn method(&self) -> PaymentMethod {
        match self {
            Self::Stripe { .. } => PaymentMethod::Stripe,
            Self::Paypal { .. } => PaymentMethod::Paypal,
            Self::BankTransfer { .. } => PaymentMethod::BankTransfer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_bank_transfer_with_proof() {
        let payload: PaymentPayload =
            serde_json::from_str(r#"{"method":"bank_transfer","proof":"TR-1"}"#).unwrap();
        assert_eq!(payload, PaymentPayload::bank_transfer(Some("TR-1")));
        assert_eq!(payload.method(), PaymentMethod::BankTransfer);
    }

    #[test]
    fn proof_and_details_are_optional() {
        let payload: PaymentPayload =
            serde_json::from_str(r#"{"method":"bank_transfer"}"#).unwrap();
        assert_eq!(payload, PaymentPayload::BankTransfer { proof: None });

        let payload: PaymentPayload = serde_json::from_str(r#"{"method":"paypal"}"#).unwrap();
        assert_eq!(payload, PaymentPayload::paypal(serde_json::Value::Null));
    }

    #[test]
    fn gateway_details_pass_through() {
        let payload: PaymentPayload = serde_json::from_str(
            r#"{"method":"stripe","details":{"payment_method":"pm_card_visa"}}"#,
        )
        .unwrap();
        assert_eq!(
            payload,
            PaymentPayload::stripe(serde_json::json!({"payment_method": "pm_card_visa"}))
        );
    }

    #[test]
    fn unknown_method_is_rejected() {
        let result = serde_json::from_str::<PaymentPayload>(r#"{"method":"cash"}"#);
        assert!(result.is_err());
    }
}
