use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use ratchet_core::{MigrationErrorKind, PatchInfoStore, SqlitePatchStore};

fn temp_database(tag: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("ratchet-{tag}-{}-{nanos}.sqlite", process::id()))
}

struct TempDb(PathBuf);

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

#[test]
fn initialization_is_idempotent_and_starts_at_level_zero() {
    let db = TempDb(temp_database("init"));
    let store = SqlitePatchStore::new(&db.0, "orders", "node-a");

    store.ensure_initialized().unwrap();
    store.ensure_initialized().unwrap();

    assert_eq!(store.current_level().unwrap(), 0);
    assert!(store.applied_levels().unwrap().is_empty());
    assert!(!store.is_locked().unwrap());
}

#[test]
fn advance_and_revert_round_trip() {
    let db = TempDb(temp_database("roundtrip"));
    let store = SqlitePatchStore::new(&db.0, "orders", "node-a");
    store.ensure_initialized().unwrap();

    store.advance_level(1).unwrap();
    store.advance_level(3).unwrap();
    // Back-fill below the current level must not regress the scalar level.
    store.advance_level(2).unwrap();

    assert_eq!(store.current_level().unwrap(), 3);
    assert_eq!(store.applied_levels().unwrap(), vec![1, 2, 3]);
    assert!(store.is_applied(2).unwrap());
    assert!(!store.is_applied(4).unwrap());

    store.revert_level(3, 2).unwrap();
    assert_eq!(store.current_level().unwrap(), 2);
    assert_eq!(store.applied_levels().unwrap(), vec![1, 2]);
}

#[test]
fn second_acquire_is_a_state_error_and_release_is_idempotent() {
    let db = TempDb(temp_database("lock"));
    let store = SqlitePatchStore::new(&db.0, "orders", "node-a");
    store.ensure_initialized().unwrap();

    store.acquire_lock().unwrap();
    assert!(store.is_locked().unwrap());

    let error = store.acquire_lock().unwrap_err();
    assert_eq!(error.kind, MigrationErrorKind::State);

    store.release_lock().unwrap();
    store.release_lock().unwrap();
    assert!(!store.is_locked().unwrap());
    store.acquire_lock().unwrap();
}

#[test]
fn state_survives_reopening_the_database() {
    let db = TempDb(temp_database("reopen"));
    {
        let store = SqlitePatchStore::new(&db.0, "orders", "node-a");
        store.ensure_initialized().unwrap();
        store.advance_level(1).unwrap();
        store.advance_level(2).unwrap();
    }

    let reopened = SqlitePatchStore::new(&db.0, "orders", "node-a");
    assert_eq!(reopened.current_level().unwrap(), 2);
    assert_eq!(reopened.applied_levels().unwrap(), vec![1, 2]);
}

#[test]
fn records_are_scoped_by_subsystem_and_context() {
    let db = TempDb(temp_database("scoping"));
    let orders_a = SqlitePatchStore::new(&db.0, "orders", "node-a");
    let orders_b = SqlitePatchStore::new(&db.0, "orders", "node-b");
    let billing_a = SqlitePatchStore::new(&db.0, "billing", "node-a");
    for store in [&orders_a, &orders_b, &billing_a] {
        store.ensure_initialized().unwrap();
    }

    orders_a.advance_level(3).unwrap();
    orders_a.acquire_lock().unwrap();

    assert_eq!(orders_b.current_level().unwrap(), 0);
    assert_eq!(billing_a.current_level().unwrap(), 0);
    assert!(!orders_b.is_locked().unwrap());
    assert!(!billing_a.is_locked().unwrap());
    // The sibling can take its own lock while orders/node-a holds one.
    orders_b.acquire_lock().unwrap();
}

#[test]
fn advance_on_an_uninitialized_record_creates_it() {
    let db = TempDb(temp_database("implicit"));
    let store = SqlitePatchStore::new(&db.0, "orders", "node-a");

    store.advance_level(1).unwrap();

    assert_eq!(store.current_level().unwrap(), 1);
    assert_eq!(store.applied_levels().unwrap(), vec![1]);
}
