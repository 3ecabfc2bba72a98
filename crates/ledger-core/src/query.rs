use std::sync::Arc;

use contracts::{LedgerEntry, RankedEntry};

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// Orders entries by total descending, then by earliest creation. Stable, so entries created at
/// the same instant keep the order the store returned them in.
pub fn rank_entries(mut entries: Vec<LedgerEntry>) -> Vec<LedgerEntry> {
    entries.sort_by(|a, b| {
        b.total_amount
            .cmp(&a.total_amount)
            .then(a.created_at.cmp(&b.created_at))
    });
    entries
}

/// Read-only view over the ledger.
#[derive(Debug)]
pub struct QueryService<S> {
    store: Arc<S>,
}

impl<S> Clone for QueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn list_ranked(&self) -> Result<Vec<RankedEntry>, LedgerError> {
        let entries = rank_entries(self.store.list_ranked()?);
        Ok(entries.iter().map(LedgerEntry::to_ranked).collect())
    }

    pub fn leader(&self) -> Result<Option<RankedEntry>, LedgerError> {
        Ok(self.list_ranked()?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::*;

    fn entry(id: &str, total: u64, created_secs: i64) -> LedgerEntry {
        let at: DateTime<Utc> =
            DateTime::from_timestamp(1_750_000_000 + created_secs, 0).expect("valid timestamp");
        LedgerEntry {
            id: id.to_string(),
            identity: format!("{id}@example.com"),
            display_name: id.to_uppercase(),
            total_amount: total,
            contribution_count: 1,
            decoration_image: None,
            decoration_message: None,
            source_transaction_id: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn ranks_by_total_then_creation() {
        let ranked = rank_entries(vec![
            entry("late_tie", 500, 9),
            entry("small", 100, 0),
            entry("early_tie", 500, 1),
            entry("top", 900, 5),
        ]);

        let ids = ranked.iter().map(|e| e.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["top", "early_tie", "late_tie", "small"]);
    }
}
