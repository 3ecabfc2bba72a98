//! HTTP request and response bodies. Field names follow the browser client's camelCase.

use std::collections::BTreeMap;

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serialize};

use crate::RankedEntry;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    /// Blank or missing names are shown as the default display name.
    #[serde(default)]
    pub name: String,
    pub amount: MajorUnitAmount,
    #[serde(default)]
    pub decoration_image: Option<String>,
    #[serde(default)]
    pub decoration_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardResponse {
    pub entries: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecorationUpdateRequest {
    #[serde(default)]
    pub entry_id: Option<String>,
    #[serde(default, alias = "logoUrl")]
    pub decoration_image: Option<String>,
    #[serde(default, alias = "message")]
    pub decoration_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecorationUpdateResponse {
    pub success: bool,
    pub entry: RankedEntry,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self { received: true }
    }
}

/// Presence of each setting, never its value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnvReport {
    pub all_set: bool,
    pub variables: BTreeMap<String, bool>,
    pub base_url: String,
}

/// Amount in major currency units as typed by the bidder, e.g. `12.50` or `"12.50"`.
///
/// Converted to cents with decimal arithmetic; digits past the second fractional place round
/// half-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MajorUnitAmount(String);

impl MajorUnitAmount {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_cents(&self) -> Result<u64, String> {
        parse_major_units(&self.0)
    }
}

impl<'de> Deserialize<'de> for MajorUnitAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum AmountInput {
            String(String),
            Number(serde_json::Number),
        }

        match AmountInput::deserialize(deserializer)? {
            AmountInput::String(raw) => Ok(Self(raw)),
            AmountInput::Number(value) if value.to_string().contains(['e', 'E']) => Err(
                D::Error::custom("amount must be written as a plain decimal"),
            ),
            AmountInput::Number(value) => Ok(Self(value.to_string())),
        }
    }
}

fn parse_major_units(raw: &str) -> Result<u64, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("amount is empty".to_string());
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };

    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(format!("amount is not a plain decimal: {trimmed}"));
    }

    let whole_units = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u64>()
            .map_err(|_| format!("amount is too large: {trimmed}"))?
    };

    let digit = |idx: usize| -> u64 {
        fraction
            .as_bytes()
            .get(idx)
            .map_or(0, |b| u64::from(b - b'0'))
    };
    let mut cents = digit(0) * 10 + digit(1);
    if digit(2) >= 5 {
        cents += 1;
    }

    whole_units
        .checked_mul(100)
        .and_then(|value| value.checked_add(cents))
        .ok_or_else(|| format!("amount is too large: {trimmed}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        amount: MajorUnitAmount,
    }

    fn cents(json: &str) -> Result<u64, String> {
        let parsed: Wrapper = serde_json::from_str(json).expect("amount payload");
        parsed.amount.to_cents()
    }

    #[test]
    fn accepts_numbers_and_strings() {
        assert_eq!(cents(r#"{"amount":12}"#), Ok(1200));
        assert_eq!(cents(r#"{"amount":12.5}"#), Ok(1250));
        assert_eq!(cents(r#"{"amount":"0.99"}"#), Ok(99));
        assert_eq!(cents(r#"{"amount":".5"}"#), Ok(50));
    }

    #[test]
    fn rounds_half_up_past_two_places() {
        assert_eq!(cents(r#"{"amount":"1.005"}"#), Ok(101));
        assert_eq!(cents(r#"{"amount":"1.004"}"#), Ok(100));
        assert_eq!(cents(r#"{"amount":"0.999"}"#), Ok(100));
    }

    #[test]
    fn rejects_signs_and_garbage() {
        assert!(cents(r#"{"amount":"-5"}"#).is_err());
        assert!(cents(r#"{"amount":"five"}"#).is_err());
        assert!(cents(r#"{"amount":"."}"#).is_err());
        assert!(cents(r#"{"amount":""}"#).is_err());
    }
}
