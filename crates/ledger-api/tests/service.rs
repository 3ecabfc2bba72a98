use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use ledger_api::config::busy_timeout_for;
use ledger_api::{
    AnonymousPolicy, LeaderboardService, NotificationOutcome, ServiceError, SqliteLedgerStore,
    UnconfiguredGateway,
};
use rusqlite::Connection;
use ledger_core::{CheckoutIntentBuilder, Disposition, EventVerifier, LedgerError, LedgerStore};
use serde_json::json;

const SECRET: &str = "whsec_service_test";

fn service(policy: AnonymousPolicy) -> (LeaderboardService, Arc<SqliteLedgerStore>) {
    let store = Arc::new(SqliteLedgerStore::open_in_memory().expect("store"));
    let service = LeaderboardService::new(
        Arc::clone(&store),
        EventVerifier::new(SECRET).expect("verifier"),
        CheckoutIntentBuilder::new("http://localhost:3000"),
        Arc::new(UnconfiguredGateway),
    )
    .with_anonymous_policy(policy);
    (service, store)
}

/// File-backed service whose lock wait is derived from its store timeout.
fn file_service(path: &Path, store_timeout: Duration) -> LeaderboardService {
    let store = Arc::new(
        SqliteLedgerStore::open(path, busy_timeout_for(store_timeout)).expect("store"),
    );
    LeaderboardService::new(
        store,
        EventVerifier::new(SECRET).expect("verifier"),
        CheckoutIntentBuilder::new("http://localhost:3000"),
        Arc::new(UnconfiguredGateway),
    )
    .with_store_timeout(store_timeout)
}

fn named_completion(session_id: &str) -> Vec<u8> {
    json!({
        "id": format!("evt_{session_id}"),
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "amount_total": 2000,
                "customer_email": "ada@example.com",
                "metadata": { "name": "Ada" }
            }
        }
    })
    .to_string()
    .into_bytes()
}

fn lock_database(path: &Path) -> Connection {
    let blocker = Connection::open(path).expect("second connection");
    blocker
        .execute_batch("BEGIN IMMEDIATE")
        .expect("take write lock");
    blocker
}

fn signed(body: &[u8]) -> String {
    EventVerifier::new(SECRET)
        .expect("verifier")
        .sign(body, Utc::now().timestamp())
}

fn anonymous_completion(session_id: &str) -> Vec<u8> {
    json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": { "id": session_id, "amount_total": 2000, "metadata": {} } }
    })
    .to_string()
    .into_bytes()
}

#[tokio::test]
async fn synthesized_identity_accumulates_idempotently() {
    let (service, store) = service(AnonymousPolicy::Synthesize {
        domain: "guests.bidboard.example".to_string(),
    });
    let body = anonymous_completion("cs_guest_1");

    let first = service
        .handle_notification(&body, Some(&signed(&body)))
        .await
        .expect("first delivery");
    let NotificationOutcome::Applied(outcome) = first else {
        panic!("expected applied outcome, got {first:?}");
    };
    assert_eq!(outcome.disposition, Disposition::Created);

    let again = service
        .handle_notification(&body, Some(&signed(&body)))
        .await
        .expect("redelivery");
    assert!(matches!(
        again,
        NotificationOutcome::Applied(ref outcome) if outcome.disposition == Disposition::Duplicate
    ));

    let entries = store.list_ranked().expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].identity,
        "anonymous+cs_guest_1@guests.bidboard.example"
    );
    assert_eq!(entries[0].display_name, "Anonymous");
}

#[tokio::test]
async fn reject_policy_acknowledges_without_ledger_change() {
    let (service, store) = service(AnonymousPolicy::Reject);
    let body = anonymous_completion("cs_guest_2");

    let outcome = service
        .handle_notification(&body, Some(&signed(&body)))
        .await
        .expect("acknowledged");
    assert!(matches!(outcome, NotificationOutcome::Rejected { .. }));
    assert!(store.list_ranked().expect("list").is_empty());
}

#[tokio::test]
async fn missing_signature_is_an_authentication_error() {
    let (service, _) = service(AnonymousPolicy::Reject);
    let err = service
        .handle_notification(&anonymous_completion("cs_x"), None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Ledger(LedgerError::Authentication(_))
    ));
}

#[tokio::test]
async fn checkout_without_gateway_configuration_fails() {
    let (service, _) = service(AnonymousPolicy::Reject);
    let request = serde_json::from_value(json!({ "name": "Ada", "amount": "5" }))
        .expect("checkout request");
    let err = service.create_checkout(&request).await.unwrap_err();
    assert!(matches!(err, ServiceError::Gateway(_)));
}

#[tokio::test]
async fn persistent_lock_surfaces_conflict_before_store_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.sqlite");
    let store_timeout = Duration::from_millis(900);
    let service = file_service(&path, store_timeout);
    let body = named_completion("cs_held");

    let blocker = lock_database(&path);
    let started = Instant::now();
    let err = service
        .handle_notification(&body, Some(&signed(&body)))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();
    drop(blocker);

    assert!(
        matches!(err, ServiceError::Ledger(LedgerError::TransactionConflict(_))),
        "expected conflict, got {err:?}"
    );
    assert!(elapsed < store_timeout, "gave up after {elapsed:?}");
    assert!(service.store().list_ranked().expect("list").is_empty());
}

#[tokio::test]
async fn retry_succeeds_when_lock_is_released_within_store_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ledger.sqlite");
    let service = file_service(&path, Duration::from_millis(900));
    let body = named_completion("cs_brief");

    // Outlasts the first 300 ms lock wait, ends inside the retry's.
    let blocker = lock_database(&path);
    let releaser = thread::spawn(move || {
        thread::sleep(Duration::from_millis(400));
        blocker.execute_batch("ROLLBACK").expect("release lock");
    });

    let outcome = service
        .handle_notification(&body, Some(&signed(&body)))
        .await
        .expect("applied after retry");
    releaser.join().expect("releaser thread");

    assert!(matches!(
        outcome,
        NotificationOutcome::Applied(ref outcome) if outcome.disposition == Disposition::Created
    ));
    let entries = service.store().list_ranked().expect("list");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].total_amount, 2000);
}
