//! Ledger update engine: idempotent accumulation plus the leader-decoration transition.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use contracts::{normalize_identity, DecorationPatch, LedgerEntry, PaymentEvent};
use tracing::{debug, info, warn};

use crate::error::{LedgerError, StoreError};
use crate::store::{LedgerStore, LedgerTx};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after a store conflict.
    pub max_retries: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created,
    Accumulated,
    /// The external transaction was already counted; nothing changed.
    Duplicate,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Accumulated => "accumulated",
            Self::Duplicate => "duplicate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub disposition: Disposition,
    /// Entry state after the transition. `None` only for a duplicate whose entry is gone.
    pub entry: Option<LedgerEntry>,
    pub is_leader: bool,
    /// Other entries whose decoration was cleared.
    pub demoted: usize,
}

#[derive(Debug)]
pub struct LedgerEngine<S> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S> Clone for LedgerEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            retry: self.retry,
        }
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn apply(&self, event: &PaymentEvent) -> Result<ApplyOutcome, LedgerError> {
        self.apply_at(event, Utc::now())
    }

    /// Applies one verified payment-completed event as a single store transaction.
    pub fn apply_at(
        &self,
        event: &PaymentEvent,
        at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let identity = normalize_identity(&event.identity);
        if identity.is_empty() {
            return Err(LedgerError::MalformedEvent(format!(
                "event {} carries no identity",
                event.external_transaction_id
            )));
        }
        if event.external_transaction_id.trim().is_empty() {
            return Err(LedgerError::MalformedEvent(
                "event carries no external transaction id".into(),
            ));
        }

        let outcome = self.with_retry(|| {
            self.store
                .transact(|tx| transition(tx, event, &identity, at))
        })?;

        match (&outcome.disposition, &outcome.entry) {
            (Disposition::Duplicate, _) => warn!(
                transaction_id = %event.external_transaction_id,
                "duplicate payment notification ignored"
            ),
            (disposition, Some(entry)) => info!(
                transaction_id = %event.external_transaction_id,
                entry_id = %entry.id,
                amount = event.amount,
                total = entry.total_amount,
                contributions = entry.contribution_count,
                is_leader = outcome.is_leader,
                demoted = outcome.demoted,
                disposition = disposition.as_str(),
                "payment applied to ledger"
            ),
            (_, None) => {}
        }

        Ok(outcome)
    }

    /// Writes decoration fields straight onto an entry. Leadership is not re-checked.
    pub fn update_decoration(
        &self,
        entry_id: &str,
        patch: &DecorationPatch,
    ) -> Result<LedgerEntry, LedgerError> {
        if entry_id.trim().is_empty() {
            return Err(LedgerError::Validation("entryId is required".into()));
        }
        if patch.is_empty() {
            return Err(LedgerError::Validation(
                "provide decorationImage or decorationMessage".into(),
            ));
        }

        let entry = self.with_retry(|| self.store.update_decoration(entry_id, patch, Utc::now()))?;
        info!(entry_id = %entry.id, "decoration updated directly");
        Ok(entry)
    }

    fn with_retry<T>(
        &self,
        mut call: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, LedgerError> {
        let mut attempt = 0;
        loop {
            match call() {
                Err(StoreError::Conflict(detail)) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(attempt, %detail, "store conflict, retrying");
                    thread::sleep(self.retry.backoff * attempt);
                }
                other => return other.map_err(LedgerError::from),
            }
        }
    }
}

fn transition(
    tx: &mut dyn LedgerTx,
    event: &PaymentEvent,
    identity: &str,
    at: DateTime<Utc>,
) -> Result<ApplyOutcome, StoreError> {
    if !tx.consume_transaction(&event.external_transaction_id, identity, event.amount, at)? {
        let entry = tx.find_by_identity(identity)?;
        let leader = tx.find_max()?;
        let is_leader = matches!(
            (&entry, &leader),
            (Some(entry), Some(leader)) if entry.id == leader.id
        );
        return Ok(ApplyOutcome {
            disposition: Disposition::Duplicate,
            entry,
            is_leader,
            demoted: 0,
        });
    }

    let existed = tx.find_by_identity(identity)?.is_some();
    let mut entry = tx.upsert_accumulate(
        identity,
        event.amount,
        &event.display_name,
        &event.external_transaction_id,
        at,
    )?;

    let leader = tx.find_max()?;
    let is_leader = leader.is_some_and(|leader| leader.id == entry.id);

    let mut demoted = 0;
    if is_leader {
        let image = event
            .decoration_image
            .clone()
            .or_else(|| entry.decoration_image.clone());
        let message = event
            .decoration_message
            .clone()
            .or_else(|| entry.decoration_message.clone());
        tx.set_decoration(&entry.id, image.as_deref(), message.as_deref(), at)?;
        demoted = tx.clear_decoration_except(&entry.id)?;
        entry.decoration_image = image;
        entry.decoration_message = message;
        entry.updated_at = at;
        debug!(entry_id = %entry.id, demoted, "leader decoration enforced");
    }

    Ok(ApplyOutcome {
        disposition: if existed {
            Disposition::Accumulated
        } else {
            Disposition::Created
        },
        entry: Some(entry),
        is_leader,
        demoted,
    })
}
