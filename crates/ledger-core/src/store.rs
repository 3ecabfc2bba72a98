//! Ledger store contract and the in-memory reference backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use contracts::{DecorationPatch, LedgerEntry};
use uuid::Uuid;

use crate::error::StoreError;

/// Operations available inside one store transaction.
///
/// Everything done through a single `LedgerTx` commits or rolls back as a unit.
pub trait LedgerTx {
    /// Records `external_id` as consumed. Returns `false` when it was already recorded.
    fn consume_transaction(
        &mut self,
        external_id: &str,
        identity: &str,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn find_by_identity(&mut self, identity: &str) -> Result<Option<LedgerEntry>, StoreError>;

    /// Creates the entry for `identity` or adds `delta` to its total, bumping the contribution
    /// count and overwriting the display name either way.
    fn upsert_accumulate(
        &mut self,
        identity: &str,
        delta: u64,
        display_name: &str,
        source_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError>;

    /// Highest total, ties broken by earliest creation.
    fn find_max(&mut self) -> Result<Option<LedgerEntry>, StoreError>;

    fn set_decoration(
        &mut self,
        entry_id: &str,
        image: Option<&str>,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Nulls the decoration of every entry other than `entry_id`. Returns how many changed.
    fn clear_decoration_except(&mut self, entry_id: &str) -> Result<usize, StoreError>;
}

pub trait LedgerStore: Send + Sync {
    /// Runs `f` as one serializable transaction. An `Err` from `f` rolls everything back.
    fn transact<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut dyn LedgerTx) -> Result<T, StoreError>;

    /// All entries, highest total first, ties by earliest creation.
    fn list_ranked(&self) -> Result<Vec<LedgerEntry>, StoreError>;

    fn find_entry(&self, entry_id: &str) -> Result<Option<LedgerEntry>, StoreError>;

    /// Applies a decoration patch directly, without consulting leadership.
    fn update_decoration(
        &self,
        entry_id: &str,
        patch: &DecorationPatch,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError>;

    /// Removes every entry and consumed-transaction record. Returns the number of entries.
    fn clear_all(&self) -> Result<usize, StoreError>;

    /// Bulk insert of fully formed entries, used for demo seeding.
    fn insert_entries(&self, entries: &[LedgerEntry]) -> Result<usize, StoreError>;
}

pub fn new_entry_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn apply_patch(entry: &mut LedgerEntry, patch: &DecorationPatch, at: DateTime<Utc>) {
    if let Some(image) = patch.image.as_deref().filter(|image| !image.is_empty()) {
        entry.decoration_image = Some(image.to_string());
    }
    if let Some(message) = patch.message.as_deref() {
        entry.decoration_message = (!message.is_empty()).then(|| message.to_string());
    }
    entry.updated_at = at;
}

#[derive(Debug, Clone)]
struct StoredEntry {
    seq: u64,
    entry: LedgerEntry,
}

/// A notification whose amount has already been counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub identity: String,
    pub amount: u64,
    pub consumed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entries: BTreeMap<String, StoredEntry>,
    by_identity: HashMap<String, String>,
    consumed: HashMap<String, ConsumedRecord>,
    next_seq: u64,
}

impl MemoryState {
    fn ranked(&self) -> Vec<LedgerEntry> {
        let mut stored = self.entries.values().collect::<Vec<_>>();
        stored.sort_by(|a, b| {
            b.entry
                .total_amount
                .cmp(&a.entry.total_amount)
                .then(a.entry.created_at.cmp(&b.entry.created_at))
                .then(a.seq.cmp(&b.seq))
        });
        stored.into_iter().map(|s| s.entry.clone()).collect()
    }

    fn entry_mut(&mut self, entry_id: &str) -> Result<&mut LedgerEntry, StoreError> {
        self.entries
            .get_mut(entry_id)
            .map(|stored| &mut stored.entry)
            .ok_or_else(|| StoreError::NotFound(entry_id.to_string()))
    }

    fn insert(&mut self, entry: LedgerEntry) {
        self.next_seq += 1;
        self.by_identity
            .insert(entry.identity.clone(), entry.id.clone());
        self.entries.insert(
            entry.id.clone(),
            StoredEntry {
                seq: self.next_seq,
                entry,
            },
        );
    }
}

/// Mutex-guarded store. Transactions run against a copy of the state which replaces the
/// original only on success.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consumed_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.consumed.len())
    }

    pub fn consumed(&self, external_id: &str) -> Result<Option<ConsumedRecord>, StoreError> {
        Ok(self.lock()?.consumed.get(external_id).cloned())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

struct MemoryTx<'a> {
    state: &'a mut MemoryState,
}

impl LedgerTx for MemoryTx<'_> {
    fn consume_transaction(
        &mut self,
        external_id: &str,
        identity: &str,
        amount: u64,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.state.consumed.contains_key(external_id) {
            return Ok(false);
        }
        self.state.consumed.insert(
            external_id.to_string(),
            ConsumedRecord {
                identity: identity.to_string(),
                amount,
                consumed_at: at,
            },
        );
        Ok(true)
    }

    fn find_by_identity(&mut self, identity: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .state
            .by_identity
            .get(identity)
            .and_then(|id| self.state.entries.get(id))
            .map(|stored| stored.entry.clone()))
    }

    fn upsert_accumulate(
        &mut self,
        identity: &str,
        delta: u64,
        display_name: &str,
        source_transaction_id: &str,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        if let Some(id) = self.state.by_identity.get(identity).cloned() {
            let entry = self.state.entry_mut(&id)?;
            entry.total_amount = entry
                .total_amount
                .checked_add(delta)
                .ok_or_else(|| StoreError::Overflow(id.clone()))?;
            entry.contribution_count += 1;
            entry.display_name = display_name.to_string();
            entry.source_transaction_id = Some(source_transaction_id.to_string());
            entry.updated_at = at;
            return Ok(entry.clone());
        }

        let entry = LedgerEntry {
            id: new_entry_id(),
            identity: identity.to_string(),
            display_name: display_name.to_string(),
            total_amount: delta,
            contribution_count: 1,
            decoration_image: None,
            decoration_message: None,
            source_transaction_id: Some(source_transaction_id.to_string()),
            created_at: at,
            updated_at: at,
        };
        self.state.insert(entry.clone());
        Ok(entry)
    }

    fn find_max(&mut self) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self.state.ranked().into_iter().next())
    }

    fn set_decoration(
        &mut self,
        entry_id: &str,
        image: Option<&str>,
        message: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let entry = self.state.entry_mut(entry_id)?;
        entry.decoration_image = image.map(str::to_string);
        entry.decoration_message = message.map(str::to_string);
        entry.updated_at = at;
        Ok(())
    }

    fn clear_decoration_except(&mut self, entry_id: &str) -> Result<usize, StoreError> {
        let mut cleared = 0;
        for stored in self.state.entries.values_mut() {
            if stored.entry.id != entry_id && stored.entry.is_decorated() {
                stored.entry.decoration_image = None;
                stored.entry.decoration_message = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn transact<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        let mut guard = self.lock()?;
        let mut working = guard.clone();
        let result = f(&mut MemoryTx {
            state: &mut working,
        })?;
        *guard = working;
        Ok(result)
    }

    fn list_ranked(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(self.lock()?.ranked())
    }

    fn find_entry(&self, entry_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        Ok(self
            .lock()?
            .entries
            .get(entry_id)
            .map(|stored| stored.entry.clone()))
    }

    fn update_decoration(
        &self,
        entry_id: &str,
        patch: &DecorationPatch,
        at: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut guard = self.lock()?;
        let entry = guard.entry_mut(entry_id)?;
        apply_patch(entry, patch, at);
        Ok(entry.clone())
    }

    fn clear_all(&self) -> Result<usize, StoreError> {
        let mut guard = self.lock()?;
        let removed = guard.entries.len();
        *guard = MemoryState::default();
        Ok(removed)
    }

    fn insert_entries(&self, entries: &[LedgerEntry]) -> Result<usize, StoreError> {
        let mut guard = self.lock()?;
        for entry in entries {
            if guard.by_identity.contains_key(&entry.identity) {
                return Err(StoreError::Conflict(format!(
                    "entry {} duplicates an existing identity",
                    entry.id
                )));
            }
        }
        for entry in entries {
            guard.insert(entry.clone());
        }
        Ok(entries.len())
    }
}
