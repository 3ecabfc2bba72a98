//! Outbound charge intents for the payment collaborator.

use std::collections::BTreeMap;

use contracts::{CheckoutRequest, DEFAULT_DISPLAY_NAME, MIN_BID_CENTS};

use crate::error::LedgerError;

/// Collaborator limit on a single metadata value.
pub const MAX_METADATA_VALUE_CHARS: usize = 500;

pub const METADATA_NAME: &str = "name";
pub const METADATA_LOGO_URL: &str = "logoUrl";
pub const METADATA_MESSAGE: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutIntent {
    pub display_name: String,
    /// Cents.
    pub amount: u64,
    pub currency: String,
    pub product_name: String,
    pub product_description: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Echoed back verbatim in the completion notification.
    pub metadata: BTreeMap<String, String>,
}

impl CheckoutIntent {
    /// Flattens the intent into the collaborator's bracketed form encoding.
    pub fn to_form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("payment_method_types[0]".to_string(), "card".to_string()),
            ("billing_address_collection".to_string(), "auto".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]".to_string(),
                self.currency.clone(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                self.product_name.clone(),
            ),
            (
                "line_items[0][price_data][product_data][description]".to_string(),
                self.product_description.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                self.amount.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
        ];
        params.extend(
            self.metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{key}]"), value.clone())),
        );
        params
    }
}

#[derive(Debug, Clone)]
pub struct CheckoutIntentBuilder {
    base_url: String,
    currency: String,
    min_amount: u64,
}

impl CheckoutIntentBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            currency: "usd".to_string(),
            min_amount: MIN_BID_CENTS,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn min_amount(&self) -> u64 {
        self.min_amount
    }

    pub fn from_request(&self, request: &CheckoutRequest) -> Result<CheckoutIntent, LedgerError> {
        let amount = request
            .amount
            .to_cents()
            .map_err(LedgerError::Validation)?;
        self.build(
            &request.name,
            amount,
            request.decoration_image.as_deref(),
            request.decoration_message.as_deref(),
        )
    }

    pub fn build(
        &self,
        display_name: &str,
        amount: u64,
        decoration_image: Option<&str>,
        decoration_message: Option<&str>,
    ) -> Result<CheckoutIntent, LedgerError> {
        if amount < self.min_amount {
            return Err(LedgerError::Validation(format!(
                "minimum amount is {} cents, got {amount}",
                self.min_amount
            )));
        }

        let display_name = match display_name.trim() {
            "" => DEFAULT_DISPLAY_NAME,
            trimmed => trimmed,
        };

        let mut metadata = BTreeMap::new();
        metadata.insert(METADATA_NAME.to_string(), display_name.to_string());
        for (key, value) in [
            (METADATA_LOGO_URL, decoration_image),
            (METADATA_MESSAGE, decoration_message),
        ] {
            if let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) {
                metadata.insert(key.to_string(), value.to_string());
            }
        }
        if let Some((key, _)) = metadata
            .iter()
            .find(|(_, value)| value.chars().count() > MAX_METADATA_VALUE_CHARS)
        {
            return Err(LedgerError::Validation(format!(
                "{key} exceeds {MAX_METADATA_VALUE_CHARS} characters"
            )));
        }

        Ok(CheckoutIntent {
            display_name: display_name.to_string(),
            amount,
            currency: self.currency.clone(),
            product_name: format!("BIDBOARD Spot - {display_name}"),
            product_description: "Claim your spot on the BIDBOARD leaderboard".to_string(),
            success_url: format!("{}?success=true", self.base_url),
            cancel_url: format!("{}?canceled=true", self.base_url),
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use contracts::MajorUnitAmount;

    use super::*;

    fn builder() -> CheckoutIntentBuilder {
        CheckoutIntentBuilder::new("https://bidboard.example/")
    }

    #[test]
    fn builds_intent_with_metadata_and_urls() {
        let intent = builder()
            .build("  Ada ", 2500, Some("https://cdn.example/a.png"), Some(""))
            .expect("valid intent");

        assert_eq!(intent.amount, 2500);
        assert_eq!(intent.product_name, "BIDBOARD Spot - Ada");
        assert_eq!(intent.success_url, "https://bidboard.example?success=true");
        assert_eq!(intent.metadata.get("name").map(String::as_str), Some("Ada"));
        assert_eq!(
            intent.metadata.get("logoUrl").map(String::as_str),
            Some("https://cdn.example/a.png")
        );
        assert!(!intent.metadata.contains_key("message"));
    }

    #[test]
    fn rejects_amount_below_one_unit() {
        let err = builder().build("Ada", 99, None, None).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert!(builder().build("Ada", 100, None, None).is_ok());
    }

    #[test]
    fn blank_name_falls_back_to_anonymous() {
        let intent = builder().build("   ", 500, None, None).expect("valid intent");
        assert_eq!(intent.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(intent.product_name, "BIDBOARD Spot - Anonymous");
        assert_eq!(
            intent.metadata.get(METADATA_NAME).map(String::as_str),
            Some(DEFAULT_DISPLAY_NAME)
        );
    }

    #[test]
    fn rejects_oversized_metadata() {
        let long = "x".repeat(MAX_METADATA_VALUE_CHARS + 1);
        assert!(matches!(
            builder().build("Ada", 500, None, Some(&long)),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn converts_request_amount_in_major_units() {
        let request = CheckoutRequest {
            name: "Ada".to_string(),
            amount: MajorUnitAmount::new("0.99"),
            decoration_image: None,
            decoration_message: None,
        };
        assert!(matches!(
            builder().from_request(&request),
            Err(LedgerError::Validation(_))
        ));

        let request = CheckoutRequest {
            amount: MajorUnitAmount::new("12.50"),
            ..request
        };
        assert_eq!(builder().from_request(&request).expect("valid").amount, 1250);
    }

    #[test]
    fn form_params_carry_amount_and_metadata() {
        let intent = builder().build("Ada", 1000, None, Some("hi")).expect("valid");
        let params = intent.to_form_params();

        assert!(params.contains(&(
            "line_items[0][price_data][unit_amount]".to_string(),
            "1000".to_string()
        )));
        assert!(params.contains(&("metadata[message]".to_string(), "hi".to_string())));
        assert!(params.contains(&("metadata[name]".to_string(), "Ada".to_string())));
    }
}
