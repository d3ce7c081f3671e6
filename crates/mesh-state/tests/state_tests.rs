//! State synchronizer tests: version gating, replica tracking, conflict
//! detection, and ledger replay.

use mesh_state::StateStore;
use serde_json::json;

#[test]
fn test_set_bumps_version_and_checksum() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.set("config", json!({"mode": "fast"}));
    let v1 = store.version("config").unwrap();
    assert_eq!(v1.current_version, 1);
    assert_eq!(v1.modified_by, "a1");
    let checksum1 = v1.checksum.clone();

    store.set("config", json!({"mode": "slow"}));
    let v2 = store.version("config").unwrap();
    assert_eq!(v2.current_version, 2);
    assert_ne!(v2.checksum, checksum1);
    assert_eq!(store.get("config"), Some(&json!({"mode": "slow"})));
}

#[test]
fn test_change_ledger_records_old_and_new() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.set("k", json!(1));
    let change_id = store.set("k", json!(2));

    let change = store.change(&change_id).unwrap();
    assert_eq!(change.old_value, Some(json!(1)));
    assert_eq!(change.new_value, json!(2));
    assert_eq!(change.version, 2);
    assert!(!change.propagated);
}

#[test]
fn test_stale_sync_is_strict_noop() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("reader", dir.path()).unwrap();

    store.set("x", json!(10));
    store.set("x", json!(20)); // local version now 2

    assert!(!store.sync("x", json!(99), 2, "writer"), "equal version is stale");
    assert!(!store.sync("x", json!(99), 1, "writer"));

    assert_eq!(store.get("x"), Some(&json!(20)));
    assert_eq!(store.version("x").unwrap().current_version, 2);
    assert!(
        store.replica_state("writer").is_none(),
        "a rejected sync must not record a replica"
    );
}

#[test]
fn test_fresh_sync_mutates_and_records_replica() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("reader", dir.path()).unwrap();

    assert!(store.sync("x", json!(5), 1, "writer"));
    assert_eq!(store.get("x"), Some(&json!(5)));
    assert_eq!(
        store.replica_state("writer").unwrap().get("x"),
        Some(&json!(5))
    );
}

#[test]
fn test_writer_reader_sync_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut writer = StateStore::open("writer", dir.path()).unwrap();
    let mut reader = StateStore::open("reader", dir.path()).unwrap();

    writer.set("x", json!(1));
    let v1 = writer.version("x").unwrap().current_version;
    assert_eq!(v1, 1);
    assert!(reader.sync("x", json!(1), v1, "writer"));
    assert_eq!(reader.get("x"), Some(&json!(1)));

    writer.set("x", json!(2));
    let v2 = writer.version("x").unwrap().current_version;
    assert_eq!(v2, 2);
    assert!(reader.sync("x", json!(2), v2, "writer"));
    assert_eq!(reader.get("x"), Some(&json!(2)));

    assert!(
        !reader.sync("x", json!(1), v1, "writer"),
        "replayed old write must be rejected"
    );
    assert_eq!(reader.get("x"), Some(&json!(2)));
}

#[test]
fn test_detect_conflicts_empty_when_replicas_match() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.sync("k", json!("same"), 1, "peer");
    assert!(store.detect_conflicts().is_empty());
}

#[test]
fn test_detect_conflicts_reports_divergent_replica() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.sync("k", json!("theirs"), 1, "peer");
    // Local overwrite diverges from what the peer last pushed.
    store.set("k", json!("ours"));

    let conflicts = store.detect_conflicts();
    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.key, "k");
    assert_eq!(conflict.replica_agent, "peer");
    assert_eq!(conflict.replica_value, json!("theirs"));
    assert_eq!(conflict.local_value, Some(json!("ours")));
    assert_eq!(conflict.local_version, 2);
}

#[test]
fn test_resolve_conflict_is_a_local_write() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.sync("k", json!("theirs"), 1, "peer");
    store.set("k", json!("ours"));
    assert_eq!(store.detect_conflicts().len(), 1);

    store.resolve_conflict("k", json!("theirs"));
    assert_eq!(store.get("k"), Some(&json!("theirs")));
    assert_eq!(store.version("k").unwrap().current_version, 3);
    assert!(
        store.detect_conflicts().is_empty(),
        "accepting the replica's value clears the divergence"
    );
}

#[test]
fn test_mark_propagated_bookkeeping() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    let change_id = store.set("k", json!(1));
    assert!(!store.mark_propagated("missing", vec!["p1".into()]));
    assert!(store.mark_propagated(&change_id, vec!["p1".into(), "p2".into()]));

    let change = store.change(&change_id).unwrap();
    assert!(change.propagated);
    assert_eq!(change.replicas, vec!["p1", "p2"]);
    assert_eq!(store.consistency_status().propagated_changes, 1);
}

#[test]
fn test_consistency_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = StateStore::open("a1", dir.path()).unwrap();

    store.sync("synced", json!(1), 1, "peer");
    store.sync("diverged", json!("old"), 1, "peer");
    store.set("diverged", json!("new"));
    store.set("local-only", json!(true));

    let status = store.consistency_status();
    assert_eq!(status.total_keys, 3);
    assert_eq!(status.fully_synced_keys, 1);
    assert_eq!(status.partially_synced_keys, 0);
    assert_eq!(status.replica_count, 1);
}

#[test]
fn test_ledger_replay_across_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut store = StateStore::open("a1", dir.path()).unwrap();
        store.set("x", json!(1));
        store.set("x", json!(2));
        store.set("y", json!("kept"));
    }

    let mut store = StateStore::open("a1", dir.path()).unwrap();
    assert_eq!(store.get("x"), Some(&json!(2)));
    assert_eq!(store.get("y"), Some(&json!("kept")));
    assert_eq!(store.version("x").unwrap().current_version, 2);

    // Versions keep climbing from where the ledger left off.
    store.set("x", json!(3));
    assert_eq!(store.version("x").unwrap().current_version, 3);
}
