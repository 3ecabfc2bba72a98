//! Demo data for local runs.

use chrono::{DateTime, Duration, Utc};
use contracts::LedgerEntry;
use ledger_core::store::new_entry_id;
use ledger_core::{LedgerError, LedgerStore};
use rand::Rng;
use tracing::info;

use crate::{ServiceError, SqliteLedgerStore};

pub const DEFAULT_SEED_COUNT: usize = 15;

const DEMO_NAMES: [&str; 15] = [
    "Nightowl", "Byte Baron", "Pixel Pirate", "Quiet Storm", "Lucky Lemur", "Moonshot",
    "Captain Cache", "Oxide", "Velvet Thunder", "Null Pointer", "Gold Rush", "Turbo Tortoise",
    "Zero Cool", "Starling", "Borrow Checker",
];

/// Undecorated entries with totals between $10 and $500, created one second apart.
pub fn demo_entries(count: usize, now: DateTime<Utc>, rng: &mut impl Rng) -> Vec<LedgerEntry> {
    (0..count)
        .map(|idx| {
            let created_at = now - Duration::seconds(i64::try_from(count - idx).unwrap_or(0));
            LedgerEntry {
                id: new_entry_id(),
                identity: format!("demo{idx}@example.com"),
                display_name: DEMO_NAMES[idx % DEMO_NAMES.len()].to_string(),
                total_amount: rng.gen_range(1_000..=50_000),
                contribution_count: 1,
                decoration_image: None,
                decoration_message: None,
                source_transaction_id: Some(format!("demo_session_{idx}")),
                created_at,
                updated_at: created_at,
            }
        })
        .collect()
}

/// Replaces the ledger contents with `count` demo entries.
pub fn seed_ledger(store: &SqliteLedgerStore, count: usize) -> Result<usize, ServiceError> {
    store.clear_all().map_err(LedgerError::from)?;
    let entries = demo_entries(count, Utc::now(), &mut rand::thread_rng());
    let inserted = store.insert_entries(&entries).map_err(LedgerError::from)?;
    info!(inserted, "demo entries seeded");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn demo_entries_stay_in_range_and_undecorated() {
        let mut rng = StdRng::seed_from_u64(7);
        let entries = demo_entries(20, Utc::now(), &mut rng);

        assert_eq!(entries.len(), 20);
        assert!(entries
            .iter()
            .all(|entry| (1_000..=50_000).contains(&entry.total_amount)));
        assert!(entries.iter().all(|entry| !entry.is_decorated()));
        assert!(entries
            .windows(2)
            .all(|pair| pair[0].created_at < pair[1].created_at));
    }

    #[test]
    fn seeding_replaces_existing_entries() {
        let store = SqliteLedgerStore::open_in_memory().expect("store");
        seed_ledger(&store, 5).expect("first seed");
        seed_ledger(&store, 3).expect("second seed");
        assert_eq!(store.list_ranked().expect("list").len(), 3);
    }
}
