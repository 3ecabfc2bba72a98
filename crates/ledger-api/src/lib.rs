//! Leaderboard service facade over the ledger engine, with SQLite persistence, the hosted
//! checkout gateway and the HTTP surface.

pub mod config;
pub mod gateway;
mod persistence;
mod seed;
mod server;

use std::sync::Arc;
use std::time::Duration;

use contracts::{
    CheckoutRequest, CheckoutResponse, DecorationPatch, DecorationUpdateRequest,
    DecorationUpdateResponse, EnvReport, EventKind, LeaderboardResponse, PaymentEvent,
};
use ledger_core::{
    ApplyOutcome, CheckoutIntentBuilder, EventVerifier, InboundEvent, LedgerEngine, LedgerError,
    LedgerStore, QueryService, RetryPolicy, StoreError,
};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{info, warn};

pub use config::{ConfigError, ServiceConfig};
pub use gateway::{CheckoutGateway, GatewayError, StripeCheckoutClient, UnconfiguredGateway};
pub use persistence::{PersistenceError, SqliteLedgerStore, DEFAULT_BUSY_TIMEOUT};
pub use seed::{demo_entries, seed_ledger, DEFAULT_SEED_COUNT};
pub use server::{router, serve, ServerError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("background task failed: {0}")]
    Internal(String),
}

/// What to do with a verified completion event that carries no customer email.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AnonymousPolicy {
    /// Acknowledge without touching the ledger.
    #[default]
    Reject,
    /// Give the payment its own identity, `anonymous+<transaction>@<domain>`.
    Synthesize { domain: String },
}

impl AnonymousPolicy {
    fn resolve(&self, event: &mut PaymentEvent) {
        if !event.identity.is_empty() {
            return;
        }
        if let Self::Synthesize { domain } = self {
            let local = event
                .external_transaction_id
                .chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect::<String>()
                .to_ascii_lowercase();
            event.identity = format!("anonymous+{local}@{domain}");
        }
    }
}

/// Result of handling one inbound notification that the collaborator should not redeliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Applied(ApplyOutcome),
    Ignored { event_type: EventKind },
    /// Authentic but unusable; acknowledged so the collaborator stops retrying.
    Rejected { reason: String },
}

pub struct LeaderboardService {
    verifier: EventVerifier,
    engine: LedgerEngine<SqliteLedgerStore>,
    query: QueryService<SqliteLedgerStore>,
    checkout: CheckoutIntentBuilder,
    gateway: Arc<dyn CheckoutGateway>,
    anonymous: AnonymousPolicy,
    store_timeout: Duration,
    env_report: Option<EnvReport>,
}

impl std::fmt::Debug for LeaderboardService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderboardService")
            .field("verifier", &self.verifier)
            .field("checkout", &self.checkout)
            .field("anonymous", &self.anonymous)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl LeaderboardService {
    pub fn new(
        store: Arc<SqliteLedgerStore>,
        verifier: EventVerifier,
        checkout: CheckoutIntentBuilder,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        Self {
            verifier,
            engine: LedgerEngine::new(Arc::clone(&store)),
            query: QueryService::new(store),
            checkout,
            gateway,
            anonymous: AnonymousPolicy::default(),
            store_timeout: config::DEFAULT_STORE_TIMEOUT,
            env_report: None,
        }
    }

    /// Wires the full service from configuration. The webhook secret is mandatory.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let secret = config
            .webhook_secret
            .as_ref()
            .ok_or(ConfigError::Missing {
                key: config::ENV_WEBHOOK_SECRET,
            })?;
        let verifier = EventVerifier::new(secret.expose_secret())?
            .with_tolerance_secs(config.webhook_tolerance_secs);

        let gateway: Arc<dyn CheckoutGateway> = match &config.stripe_secret_key {
            Some(key) => Arc::new(StripeCheckoutClient::new(
                &config.stripe_api_base,
                SecretString::from(key.expose_secret().to_string()),
            )?),
            None => {
                warn!("payment secret key not set; checkout sessions will fail");
                Arc::new(UnconfiguredGateway)
            }
        };

        let store = Arc::new(SqliteLedgerStore::open(
            &config.database_path,
            config.busy_timeout(),
        )?);

        let mut service = Self::new(
            store,
            verifier,
            CheckoutIntentBuilder::new(config.base_url.clone()),
            gateway,
        )
        .with_store_timeout(config.store_timeout);
        if let Some(domain) = &config.anonymous_domain {
            service = service.with_anonymous_policy(AnonymousPolicy::Synthesize {
                domain: domain.clone(),
            });
        }
        Ok(service.with_env_report(config.env_report()))
    }

    pub fn with_anonymous_policy(mut self, policy: AnonymousPolicy) -> Self {
        self.anonymous = policy;
        self
    }

    /// Bound on each blocking store call. Pair it with a store opened with
    /// [`config::busy_timeout_for`] of the same value.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_env_report(mut self, report: EnvReport) -> Self {
        self.env_report = Some(report);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.engine = self.engine.with_retry_policy(retry);
        self
    }

    pub fn store(&self) -> &Arc<SqliteLedgerStore> {
        self.engine.store()
    }

    /// Authenticates, parses and applies one payment notification.
    ///
    /// `Err` means the notification must not be acknowledged; authentication and parse failures
    /// are permanent, store failures are worth a redelivery.
    pub async fn handle_notification(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<NotificationOutcome, ServiceError> {
        let mut event = match self.verifier.verify(body, signature)? {
            InboundEvent::PaymentCompleted(event) => event,
            InboundEvent::Ignored {
                event_id,
                event_type,
            } => {
                info!(
                    event_id = event_id.as_deref().unwrap_or("-"),
                    event_type = event_type.as_str(),
                    "notification ignored"
                );
                return Ok(NotificationOutcome::Ignored { event_type });
            }
        };

        self.anonymous.resolve(&mut event);
        let engine = self.engine.clone();
        match self.run_blocking(move || engine.apply(&event)).await {
            Ok(outcome) => Ok(NotificationOutcome::Applied(outcome)),
            Err(ServiceError::Ledger(LedgerError::MalformedEvent(reason))) => {
                warn!(%reason, "authentic notification rejected");
                Ok(NotificationOutcome::Rejected { reason })
            }
            Err(err) => Err(err),
        }
    }

    pub async fn create_checkout(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        let intent = self.checkout.from_request(request)?;
        let session_id = self.gateway.create_session(&intent).await?;
        info!(%session_id, amount = intent.amount, "checkout session created");
        Ok(CheckoutResponse { session_id })
    }

    pub async fn leaderboard(&self) -> Result<LeaderboardResponse, ServiceError> {
        let query = self.query.clone();
        let entries = self.run_blocking(move || query.list_ranked()).await?;
        Ok(LeaderboardResponse { entries })
    }

    /// Direct decoration write; does not check that the entry is the leader.
    pub async fn update_decoration(
        &self,
        request: DecorationUpdateRequest,
    ) -> Result<DecorationUpdateResponse, ServiceError> {
        let entry_id = request
            .entry_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| LedgerError::Validation("entryId is required".into()))?;
        let patch = DecorationPatch {
            image: request.decoration_image,
            message: request.decoration_message,
        };

        let engine = self.engine.clone();
        let entry = self
            .run_blocking(move || engine.update_decoration(&entry_id, &patch))
            .await?;
        Ok(DecorationUpdateResponse {
            success: true,
            entry: entry.to_ranked(),
        })
    }

    pub fn env_report(&self) -> Option<&EnvReport> {
        self.env_report.as_ref()
    }

    /// Runs a blocking store call off the async workers, bounded by the store timeout.
    ///
    /// A call that times out may still commit afterwards; a redelivered notification is then
    /// absorbed by the consumed-transaction record.
    async fn run_blocking<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Result<T, LedgerError> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::task::spawn_blocking(call);
        match tokio::time::timeout(self.store_timeout, task).await {
            Ok(Ok(result)) => result.map_err(ServiceError::from),
            Ok(Err(join)) => Err(ServiceError::Internal(join.to_string())),
            Err(_) => {
                let millis = u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(timeout_ms = millis, "store call timed out");
                Err(LedgerError::from(StoreError::Timeout(millis)).into())
            }
        }
    }
}

/// Removes every entry and consumed-transaction record.
pub fn clear_ledger(store: &SqliteLedgerStore) -> Result<usize, ServiceError> {
    let removed = store.clear_all().map_err(LedgerError::from)?;
    info!(removed, "ledger cleared");
    Ok(removed)
}
