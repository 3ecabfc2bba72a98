//! v1 cross-boundary contracts for the ledger engine, the HTTP API and the CLI.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod wire;

pub use wire::{
    CheckoutRequest, CheckoutResponse, DecorationUpdateRequest, DecorationUpdateResponse,
    EnvReport, LeaderboardResponse, MajorUnitAmount, WebhookAck,
};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Collaborator event type that carries a completed payment.
pub const PAYMENT_COMPLETED_EVENT: &str = "checkout.session.completed";

/// Smallest accepted bid, in cents.
pub const MIN_BID_CENTS: u64 = 100;

pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// One row per paying identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: String,
    pub identity: String,
    pub display_name: String,
    pub total_amount: u64,
    pub contribution_count: u64,
    pub decoration_image: Option<String>,
    pub decoration_message: Option<String>,
    pub source_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn is_decorated(&self) -> bool {
        self.decoration_image.is_some() || self.decoration_message.is_some()
    }

    pub fn to_ranked(&self) -> RankedEntry {
        RankedEntry {
            id: self.id.clone(),
            name: self.display_name.clone(),
            amount: self.total_amount,
            contribution_count: self.contribution_count,
            decoration_image: self.decoration_image.clone(),
            decoration_message: self.decoration_message.clone(),
            created_at: self.created_at,
        }
    }
}

impl fmt::Display for LedgerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "entry_id={} name={} total={} contributions={} decorated={}",
            self.id,
            self.display_name,
            self.total_amount,
            self.contribution_count,
            self.is_decorated()
        )
    }
}

/// Public projection of a ledger row. Never carries the identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub id: String,
    pub name: String,
    pub amount: u64,
    pub contribution_count: u64,
    pub decoration_image: Option<String>,
    pub decoration_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PaymentCompleted,
    Other(String),
}

impl EventKind {
    pub fn from_wire(raw: &str) -> Self {
        if raw == PAYMENT_COMPLETED_EVENT {
            Self::PaymentCompleted
        } else {
            Self::Other(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PaymentCompleted => PAYMENT_COMPLETED_EVENT,
            Self::Other(raw) => raw,
        }
    }
}

/// Canonical payment-completed event produced by the verifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentEvent {
    pub event_type: EventKind,
    pub external_transaction_id: String,
    pub identity: String,
    pub display_name: String,
    pub amount: u64,
    pub decoration_image: Option<String>,
    pub decoration_message: Option<String>,
}

impl PaymentEvent {
    pub fn new(
        external_transaction_id: impl Into<String>,
        identity: impl Into<String>,
        display_name: impl Into<String>,
        amount: u64,
    ) -> Self {
        Self {
            event_type: EventKind::PaymentCompleted,
            external_transaction_id: external_transaction_id.into(),
            identity: normalize_identity(&identity.into()),
            display_name: display_name.into(),
            amount,
            decoration_image: None,
            decoration_message: None,
        }
    }

    pub fn with_decoration(mut self, image: Option<&str>, message: Option<&str>) -> Self {
        self.decoration_image = image.map(str::to_string);
        self.decoration_message = message.map(str::to_string);
        self
    }
}

/// Emails are compared trimmed and ASCII-lowercased.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecorationPatch {
    /// An empty string leaves the image unchanged.
    pub image: Option<String>,
    /// `Some("")` clears the message.
    pub message: Option<String>,
}

impl DecorationPatch {
    /// True when applying the patch would change nothing.
    pub fn is_empty(&self) -> bool {
        self.image.as_deref().map_or(true, str::is_empty) && self.message.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthenticationFailed,
    MalformedEvent,
    ValidationFailed,
    EntryNotFound,
    TransactionConflict,
    StoreUnavailable,
    StoreTimeout,
    GatewayError,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}
