use std::time::Duration;

use async_trait::async_trait;
use ledger_core::CheckoutIntent;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

pub const CHECKOUT_SESSIONS_PATH: &str = "/v1/checkout/sessions";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("payment collaborator is not configured")]
    NotConfigured,
    #[error("payment collaborator request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("payment collaborator rejected the session (status {status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Creates hosted checkout sessions at the payment collaborator.
#[async_trait]
pub trait CheckoutGateway: Send + Sync {
    /// Returns the collaborator's session id.
    async fn create_session(&self, intent: &CheckoutIntent) -> Result<String, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    id: String,
}

#[derive(Debug)]
pub struct StripeCheckoutClient {
    endpoint: String,
    secret_key: SecretString,
    http: reqwest::Client,
}

impl StripeCheckoutClient {
    pub fn new(api_base: &str, secret_key: SecretString) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint: format!(
                "{}{CHECKOUT_SESSIONS_PATH}",
                api_base.trim_end_matches('/')
            ),
            secret_key,
            http,
        })
    }
}

#[async_trait]
impl CheckoutGateway for StripeCheckoutClient {
    async fn create_session(&self, intent: &CheckoutIntent) -> Result<String, GatewayError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.secret_key.expose_secret())
            .form(&intent.to_form_params())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "checkout session rejected");
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let session: CreatedSession = response.json().await?;
        debug!(session_id = %session.id, amount = intent.amount, "checkout session created");
        Ok(session.id)
    }
}

/// Stand-in used when no secret key is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGateway;

#[async_trait]
impl CheckoutGateway for UnconfiguredGateway {
    async fn create_session(&self, _intent: &CheckoutIntent) -> Result<String, GatewayError> {
        Err(GatewayError::NotConfigured)
    }
}
