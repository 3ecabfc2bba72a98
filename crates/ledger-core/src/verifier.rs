//! Signature verification and parsing of payment collaborator notifications.
//!
//! The collaborator signs every notification with a header of the form
//! `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`, where each `v1` value is
//! `HMAC-SHA256(secret, "<t>.<raw body>")`. Any matching `v1` authenticates the body as long
//! as `t` lies within the tolerance window.

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use contracts::{normalize_identity, EventKind, PaymentEvent, DEFAULT_DISPLAY_NAME};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;

use crate::error::LedgerError;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    PaymentCompleted(PaymentEvent),
    /// Authentic but irrelevant to the ledger; acknowledged and dropped.
    Ignored {
        event_id: Option<String>,
        event_type: EventKind,
    },
}

#[derive(Clone)]
pub struct EventVerifier {
    keyed: HmacSha256,
    tolerance_secs: u64,
}

impl fmt::Debug for EventVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventVerifier")
            .field("keyed", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    data: Option<RawData>,
}

#[derive(Debug, Deserialize)]
struct RawData {
    object: RawSession,
}

#[derive(Debug, Deserialize)]
struct RawSession {
    id: Option<String>,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    amount_total: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

impl EventVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, LedgerError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(LedgerError::Validation("webhook secret is empty".into()));
        }
        let keyed = <HmacSha256 as Mac>::new_from_slice(secret)
            .map_err(|err| LedgerError::Validation(format!("webhook secret rejected: {err}")))?;
        Ok(Self {
            keyed,
            tolerance_secs: DEFAULT_TOLERANCE_SECS,
        })
    }

    pub fn with_tolerance_secs(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    pub fn verify(&self, body: &[u8], signature: Option<&str>) -> Result<InboundEvent, LedgerError> {
        self.verify_at(body, signature, Utc::now().timestamp())
    }

    /// Same as [`Self::verify`] against an explicit clock reading.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now_unix: i64,
    ) -> Result<InboundEvent, LedgerError> {
        self.authenticate(body, signature, now_unix)?;
        parse_event(body)
    }

    /// Builds a header the collaborator would send for `body` at `timestamp`.
    pub fn sign(&self, body: &[u8], timestamp: i64) -> String {
        let digest = self.mac_for(body, timestamp).finalize().into_bytes();
        format!("t={timestamp},v1={}", hex::encode(digest))
    }

    fn authenticate(
        &self,
        body: &[u8],
        signature: Option<&str>,
        now_unix: i64,
    ) -> Result<(), LedgerError> {
        let header = signature
            .map(str::trim)
            .filter(|header| !header.is_empty())
            .ok_or_else(|| LedgerError::Authentication("signature header is missing".into()))?;

        let mut timestamp = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => timestamp = value.parse::<i64>().ok(),
                "v1" => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            LedgerError::Authentication("signature header has no timestamp".into())
        })?;
        if candidates.is_empty() {
            return Err(LedgerError::Authentication(
                "signature header has no v1 signature".into(),
            ));
        }

        let age = now_unix.abs_diff(timestamp);
        if age > self.tolerance_secs {
            return Err(LedgerError::Authentication(format!(
                "signature timestamp outside tolerance: age={age}s tolerance={}s",
                self.tolerance_secs
            )));
        }

        let mac = self.mac_for(body, timestamp);
        let matched = candidates.iter().any(|candidate| {
            hex::decode(candidate)
                .map(|expected| mac.clone().verify_slice(&expected).is_ok())
                .unwrap_or(false)
        });

        if matched {
            Ok(())
        } else {
            Err(LedgerError::Authentication(
                "no signature matches the payload".into(),
            ))
        }
    }

    fn mac_for(&self, body: &[u8], timestamp: i64) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        mac
    }
}

fn parse_event(body: &[u8]) -> Result<InboundEvent, LedgerError> {
    let raw: RawEvent = serde_json::from_slice(body)
        .map_err(|err| LedgerError::MalformedEvent(format!("body is not a valid event: {err}")))?;

    let event_type = raw
        .event_type
        .as_deref()
        .map(EventKind::from_wire)
        .ok_or_else(|| LedgerError::MalformedEvent("event type is missing".into()))?;

    if event_type != EventKind::PaymentCompleted {
        return Ok(InboundEvent::Ignored {
            event_id: raw.id,
            event_type,
        });
    }

    let session = raw
        .data
        .map(|data| data.object)
        .ok_or_else(|| LedgerError::MalformedEvent("event data object is missing".into()))?;

    let external_transaction_id = session
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| LedgerError::MalformedEvent("checkout session id is missing".into()))?;

    let amount = match session.amount_total {
        Some(Value::Number(number)) => number.as_u64().ok_or_else(|| {
            LedgerError::MalformedEvent(format!(
                "amount_total must be a non-negative integer, got {number}"
            ))
        })?,
        Some(other) => {
            return Err(LedgerError::MalformedEvent(format!(
                "amount_total must be a non-negative integer, got {other}"
            )))
        }
        None => return Err(LedgerError::MalformedEvent("amount_total is missing".into())),
    };

    let identity = session
        .customer_email
        .filter(|email| !email.trim().is_empty())
        .or_else(|| session.customer_details.and_then(|details| details.email))
        .map(|email| normalize_identity(&email))
        .unwrap_or_default();

    let metadata = session.metadata.unwrap_or_default();
    let non_blank = |key: &str| {
        metadata
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    Ok(InboundEvent::PaymentCompleted(PaymentEvent {
        event_type,
        external_transaction_id,
        identity,
        display_name: non_blank("name").unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
        amount,
        decoration_image: non_blank("logoUrl"),
        decoration_message: non_blank("message"),
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_750_000_000;

    fn completed_body(email: Option<&str>, amount: Value) -> Vec<u8> {
        json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "customer_email": email,
                    "amount_total": amount,
                    "metadata": { "name": "Ada", "logoUrl": "https://cdn.example/ada.png", "message": "  " }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature_and_parses_completion() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = completed_body(Some("Ada@Example.com"), json!(1500));
        let header = verifier.sign(&body, NOW);

        let event = verifier
            .verify_at(&body, Some(&header), NOW + 10)
            .expect("valid notification");

        let InboundEvent::PaymentCompleted(event) = event else {
            panic!("expected a completion event");
        };
        assert_eq!(event.external_transaction_id, "cs_test_1");
        assert_eq!(event.identity, "ada@example.com");
        assert_eq!(event.display_name, "Ada");
        assert_eq!(event.amount, 1500);
        assert_eq!(
            event.decoration_image.as_deref(),
            Some("https://cdn.example/ada.png")
        );
        assert_eq!(event.decoration_message, None);
    }

    #[test]
    fn rejects_wrong_secret_and_tampered_body() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = completed_body(Some("a@example.com"), json!(100));

        let forged = EventVerifier::new("wrong_secret").expect("verifier").sign(&body, NOW);
        let err = verifier.verify_at(&body, Some(&forged), NOW).unwrap_err();
        assert!(matches!(err, LedgerError::Authentication(_)));

        let header = verifier.sign(&body, NOW);
        let tampered = completed_body(Some("a@example.com"), json!(100_000));
        let err = verifier
            .verify_at(&tampered, Some(&header), NOW)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Authentication(_)));
    }

    #[test]
    fn rejects_missing_or_malformed_headers() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = completed_body(Some("a@example.com"), json!(100));

        for header in [None, Some(""), Some("garbage"), Some("t=123"), Some("v1=abcd")] {
            let err = verifier.verify_at(&body, header, NOW).unwrap_err();
            assert!(
                matches!(err, LedgerError::Authentication(_)),
                "header {header:?} should fail authentication"
            );
        }
    }

    #[test]
    fn rejects_stale_timestamp() {
        let verifier = EventVerifier::new(SECRET).expect("verifier").with_tolerance_secs(300);
        let body = completed_body(Some("a@example.com"), json!(100));
        let header = verifier.sign(&body, NOW - 600);

        let err = verifier.verify_at(&body, Some(&header), NOW).unwrap_err();
        assert!(matches!(err, LedgerError::Authentication(_)));
    }

    #[test]
    fn accepts_any_matching_v1_entry() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = completed_body(Some("a@example.com"), json!(100));
        let valid = verifier.sign(&body, NOW);
        let header = format!("t={NOW},v1=deadbeef,{}", valid.split(',').nth(1).expect("v1"));

        assert!(verifier.verify_at(&body, Some(&header), NOW).is_ok());
    }

    #[test]
    fn non_completion_events_are_ignored() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = json!({ "id": "evt_9", "type": "charge.refunded", "data": { "object": {} } })
            .to_string()
            .into_bytes();
        let header = verifier.sign(&body, NOW);

        let event = verifier.verify_at(&body, Some(&header), NOW).expect("ignored");
        assert_eq!(
            event,
            InboundEvent::Ignored {
                event_id: Some("evt_9".to_string()),
                event_type: EventKind::Other("charge.refunded".to_string()),
            }
        );
    }

    #[test]
    fn rejects_negative_fractional_or_missing_amounts() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        for amount in [json!(-5), json!(12.5), json!("100"), Value::Null] {
            let body = completed_body(Some("a@example.com"), amount.clone());
            let header = verifier.sign(&body, NOW);
            let err = verifier.verify_at(&body, Some(&header), NOW).unwrap_err();
            assert!(
                matches!(err, LedgerError::MalformedEvent(_)),
                "amount {amount} should be malformed"
            );
        }
    }

    #[test]
    fn falls_back_to_customer_details_and_default_name() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_2",
                "customer_email": null,
                "customer_details": { "email": "Bob@Example.com" },
                "amount_total": 0
            } }
        })
        .to_string()
        .into_bytes();
        let header = verifier.sign(&body, NOW);

        let InboundEvent::PaymentCompleted(event) =
            verifier.verify_at(&body, Some(&header), NOW).expect("valid")
        else {
            panic!("expected a completion event");
        };
        assert_eq!(event.identity, "bob@example.com");
        assert_eq!(event.display_name, DEFAULT_DISPLAY_NAME);
        assert_eq!(event.amount, 0);
    }

    #[test]
    fn missing_identity_parses_to_empty() {
        let verifier = EventVerifier::new(SECRET).expect("verifier");
        let body = completed_body(None, json!(100));
        let header = verifier.sign(&body, NOW);

        let InboundEvent::PaymentCompleted(event) =
            verifier.verify_at(&body, Some(&header), NOW).expect("valid")
        else {
            panic!("expected a completion event");
        };
        assert!(event.identity.is_empty());
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", EventVerifier::new(SECRET).expect("verifier"));
        assert!(!rendered.contains(SECRET));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(matches!(
            EventVerifier::new(""),
            Err(LedgerError::Validation(_))
        ));
    }
}
