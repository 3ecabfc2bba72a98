//! Payment-event verification, idempotent ledger accumulation and leadership transitions.
//!
//! The engine never performs I/O of its own: every mutation goes through a [`LedgerStore`]
//! transaction, so the same rules hold for the in-memory store used in tests and for any
//! durable backend.

pub mod checkout;
pub mod engine;
pub mod error;
pub mod query;
pub mod store;
pub mod verifier;

pub use checkout::{CheckoutIntent, CheckoutIntentBuilder};
pub use engine::{ApplyOutcome, Disposition, LedgerEngine, RetryPolicy};
pub use error::{LedgerError, StoreError};
pub use query::{rank_entries, QueryService};
pub use store::{ConsumedRecord, LedgerStore, LedgerTx, MemoryLedgerStore};
pub use verifier::{EventVerifier, InboundEvent, SIGNATURE_HEADER};
