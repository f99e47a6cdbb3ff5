//! End-to-end engine tests: in-memory store, scripted device, recording
//! remote.

use std::sync::Arc;

use chrono::{Duration as TimeDelta, Local, NaiveDateTime, Utc};

use turnstile_core::settings::keys;
use turnstile_core::time::event_uid;
use turnstile_core::{Machine, NewMachine, Settings};
use turnstile_db::{Database, DbConfig};
use turnstile_sync::remote::{format_wire_time, models};
use turnstile_sync::testing::{MockDevice, MockRemote};
use turnstile_sync::{
    fetch_machine, link_machine, retention, sync_all, test_connection, Scheduler, SyncError,
};

async fn store() -> Database {
    Database::new(DbConfig::in_memory()).await.unwrap()
}

async fn register(db: &Database, name: &str, address: &str) -> Machine {
    db.machines()
        .insert(NewMachine::new(name, address))
        .await
        .unwrap()
}

async fn settings(db: &Database) -> Settings {
    db.settings().load().await.unwrap()
}

/// A device wall-clock timestamp `days` days ago at the given time.
fn days_ago(days: i64, hour: u32, minute: u32) -> NaiveDateTime {
    (Local::now().naive_local().date() - TimeDelta::days(days))
        .and_hms_opt(hour, minute, 0)
        .unwrap()
}

/// Stages a pending attendance row the way fetch would.
async fn stage(db: &Database, machine_id: i64, user: &str, ts: NaiveDateTime) {
    let uid = event_uid(machine_id, user, ts);
    assert!(db
        .attendance()
        .insert_if_absent(machine_id, user, &uid, ts)
        .await
        .unwrap());
}

// =============================================================================
// Fetch
// =============================================================================

#[tokio::test]
async fn fetch_is_idempotent() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    let device = MockDevice::new();
    device.enroll(1, "100", "Ada");
    device.clock("100", days_ago(1, 8, 30));
    device.clock("100", days_ago(1, 12, 0));
    device.clock("100", days_ago(2, 9, 0));

    let cfg = settings(&db).await;
    let first = fetch_machine(&db, &device, &machine, &cfg).await.unwrap();
    assert_eq!(first.users_seen, 1);
    assert_eq!(first.attendance_inserted, 3);

    let second = fetch_machine(&db, &device, &machine, &cfg).await.unwrap();
    assert_eq!(second.attendance_inserted, 0, "no new rows on re-fetch");

    assert_eq!(db.attendance().for_machine(machine.id).await.unwrap().len(), 3);
    // session released once per fetch
    assert_eq!(device.disconnect_count(), 2);

    // derived fields written back
    let machine = db.machines().get(machine.id).await.unwrap();
    assert_eq!(machine.serial_number.as_deref(), Some("MOCK-0001"));
    assert!(machine.last_connected.is_some());
}

#[tokio::test]
async fn first_fetch_respects_lookback_window() {
    let db = store().await;
    db.settings().set(keys::DAYS_BACK, "5").await.unwrap();
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    let device = MockDevice::new();
    device.enroll(1, "100", "Ada");
    device.clock("100", days_ago(1, 8, 0));
    device.clock("100", days_ago(2, 8, 0));
    device.clock("100", days_ago(4, 8, 0));
    device.clock("100", days_ago(10, 8, 0)); // outside the window

    let cfg = settings(&db).await;
    let outcome = fetch_machine(&db, &device, &machine, &cfg).await.unwrap();
    assert_eq!(outcome.attendance_inserted, 3);

    // The watermark is the newest day's start, so an earlier event on
    // that same day still comes in on the next fetch.
    device.clock("100", days_ago(1, 7, 0));
    let outcome = fetch_machine(&db, &device, &machine, &cfg).await.unwrap();
    assert_eq!(outcome.attendance_inserted, 1);
}

#[tokio::test]
async fn fetch_discards_future_events() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    let device = MockDevice::new();
    device.enroll(1, "100", "Ada");
    device.clock("100", Local::now().naive_local() + TimeDelta::days(1));

    let cfg = settings(&db).await;
    let outcome = fetch_machine(&db, &device, &machine, &cfg).await.unwrap();
    assert_eq!(outcome.attendance_inserted, 0, "clock-skew noise discarded");
}

#[tokio::test]
async fn fetch_failure_is_isolated_per_machine() {
    let db = store().await;
    let healthy = register(&db, "Lobby", "10.0.0.1").await;
    let broken = register(&db, "Warehouse", "10.0.0.2").await;

    let device = MockDevice::new();
    device.enroll(1, "100", "Ada");
    device.clock("100", days_ago(1, 8, 0));
    device.fail_address("10.0.0.2");

    let remote = MockRemote::new();
    let scheduler = Scheduler::new(db.clone(), Arc::new(device), Arc::new(remote));
    let report = scheduler.run_once().await.unwrap();

    assert_eq!(report.fetches.len(), 2);
    for (machine_id, result) in &report.fetches {
        if *machine_id == broken.id {
            assert!(matches!(result, Err(SyncError::Device(_))));
        } else {
            assert_eq!(result.as_ref().unwrap().attendance_inserted, 1);
        }
    }

    // the healthy machine's data landed despite the neighbor's failure
    assert_eq!(db.attendance().for_machine(healthy.id).await.unwrap().len(), 1);

    // the failure is on the audit surface, attributed to its machine
    let entries = db.audit().recent(50).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.operation == "error" && e.machine_id == Some(broken.id)));
}

// =============================================================================
// Sync
// =============================================================================

#[tokio::test]
async fn sync_chunks_by_batch_size() {
    let db = store().await;
    db.settings().set(keys::BATCH_SIZE, "2").await.unwrap();
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();

    for i in 0..5u32 {
        stage(&db, machine.id, &format!("u{i}"), days_ago(1, 8, i)).await;
    }

    let remote = MockRemote::new();
    let outcome = sync_all(&db, &remote, &settings(&db).await).await.unwrap();

    assert_eq!(outcome.attendance_synced, 5);
    assert_eq!(remote.create_sizes(models::ATTENDANCE), vec![2, 2, 1]);
    assert_eq!(db.attendance().count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn sync_excludes_already_remote_but_marks_them() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();

    let t = days_ago(1, 9, 0);
    let t_plus = days_ago(1, 9, 1);
    stage(&db, machine.id, "100", t).await;
    stage(&db, machine.id, "100", t_plus).await;

    let remote = MockRemote::new();
    remote.seed_latest(77, "100", &format_wire_time(t));

    let before = Utc::now();
    let outcome = sync_all(&db, &remote, &settings(&db).await).await.unwrap();

    // only the strictly newer record goes out...
    assert_eq!(outcome.attendance_synced, 1);
    let sent = remote.created_records(models::ATTENDANCE);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["timestamp"], format_wire_time(t_plus));

    // ...but both rows advanced the local watermark
    assert_eq!(db.attendance().count_pending().await.unwrap(), 0);
    for row in db.attendance().for_machine(machine.id).await.unwrap() {
        assert!(row.synced_at.unwrap() >= before);
    }
}

#[tokio::test]
async fn sync_chunk_failure_leaves_rows_for_next_pass() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();

    for minute in 0..3u32 {
        stage(&db, machine.id, "100", days_ago(1, 8, minute)).await;
    }

    let remote = MockRemote::new();
    remote.fail_next_creates(1);

    let cfg = settings(&db).await;
    let outcome = sync_all(&db, &remote, &cfg).await.unwrap();
    assert_eq!(outcome.attendance_synced, 0);
    assert_eq!(db.attendance().count_pending().await.unwrap(), 3, "no local state change");

    // next pass retries the whole chunk and succeeds
    let outcome = sync_all(&db, &remote, &cfg).await.unwrap();
    assert_eq!(outcome.attendance_synced, 3);
    assert_eq!(db.attendance().count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn sync_auth_failure_aborts_whole_pass() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();
    db.users().upsert_enrolled(machine.id, 1, "100", "Ada").await.unwrap();
    stage(&db, machine.id, "100", days_ago(1, 8, 0)).await;

    let remote = MockRemote::new();
    remote.fail_auth(true);

    let result = sync_all(&db, &remote, &settings(&db).await).await;
    assert!(matches!(result, Err(SyncError::RemoteAuth(_))));

    // nothing was attempted past authentication
    assert_eq!(remote.auth_calls(), 1);
    assert_eq!(remote.search_calls(), 0);
    assert!(remote.create_sizes(models::USER).is_empty());
    assert!(remote.create_sizes(models::ATTENDANCE).is_empty());
    assert_eq!(db.attendance().count_pending().await.unwrap(), 1);
}

#[tokio::test]
async fn sync_users_only_from_linked_machines() {
    let db = store().await;
    let linked = register(&db, "Linked", "10.0.0.1").await;
    db.machines().set_remote_link(linked.id, 77, None).await.unwrap();
    let unlinked = register(&db, "Unlinked", "10.0.0.2").await;

    db.users().upsert_enrolled(linked.id, 1, "100", "Ada").await.unwrap();
    db.users().upsert_enrolled(unlinked.id, 2, "200", "Grace").await.unwrap();

    let remote = MockRemote::new();
    let outcome = sync_all(&db, &remote, &settings(&db).await).await.unwrap();

    assert_eq!(outcome.users_synced, 1);
    let created = remote.created_records(models::USER);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0]["user_id"], "100");
    assert_eq!(created[0]["machine_id"], 77);

    let pushed = db.users().get_by_key(linked.id, "100").await.unwrap().unwrap();
    assert!(pushed.synced_at.is_some());
    let waiting = db.users().get_by_key(unlinked.id, "200").await.unwrap().unwrap();
    assert!(waiting.synced_at.is_none());
}

#[tokio::test]
async fn user_create_failure_does_not_block_siblings() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();
    db.users().upsert_enrolled(machine.id, 1, "100", "Ada").await.unwrap();
    db.users().upsert_enrolled(machine.id, 2, "200", "Grace").await.unwrap();

    let remote = MockRemote::new();
    remote.fail_next_creates(1);

    let outcome = sync_all(&db, &remote, &settings(&db).await).await.unwrap();
    assert_eq!(outcome.users_synced, 1, "second user pushed despite first failing");

    // the failed user is still pending for the next pass
    let pending = db.users().pending_linked().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].user_id, "100");
}

#[tokio::test]
async fn sync_converts_wall_clock_to_utc_on_the_wire() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines()
        .set_remote_link(machine.id, 77, Some("Asia/Karachi"))
        .await
        .unwrap();

    // 09:00 in Karachi (UTC+5, no DST) is 04:00 UTC.
    stage(&db, machine.id, "100", days_ago(1, 9, 0)).await;

    let remote = MockRemote::new();
    sync_all(&db, &remote, &settings(&db).await).await.unwrap();

    let sent = remote.created_records(models::ATTENDANCE);
    assert_eq!(sent[0]["timestamp"], format_wire_time(days_ago(1, 4, 0)));
    // the staged row keeps its naive device time
    let rows = db.attendance().for_machine(machine.id).await.unwrap();
    assert_eq!(rows[0].timestamp, days_ago(1, 9, 0));
}

#[tokio::test]
async fn sync_remote_read_failure_is_conservative() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();
    stage(&db, machine.id, "100", days_ago(1, 8, 0)).await;

    let remote = MockRemote::new();
    remote.fail_searches(true);
    // even though the remote claims to have this record, the failed read
    // means we cannot know, so it is included in the outgoing batch
    remote.seed_latest(77, "100", &format_wire_time(days_ago(1, 8, 0)));

    let outcome = sync_all(&db, &remote, &settings(&db).await).await.unwrap();
    assert_eq!(outcome.attendance_synced, 1);
    assert_eq!(remote.create_sizes(models::ATTENDANCE), vec![1]);
}

// =============================================================================
// Retention
// =============================================================================

#[tokio::test]
async fn retention_prunes_strictly_by_age() {
    let db = store().await;
    db.settings().set(keys::CLEAN_LOGS_DAYS, "0").await.unwrap();
    let machine = register(&db, "Lobby", "10.0.0.1").await;

    stage(&db, machine.id, "100", days_ago(200, 8, 0)).await;
    stage(&db, machine.id, "100", days_ago(1, 8, 0)).await;
    db.audit()
        .append(None, turnstile_core::AuditOp::Scheduler, "about to be pruned")
        .await
        .unwrap();

    let outcome = retention::run(&db, &settings(&db).await).await.unwrap();

    assert_eq!(outcome.attendance_pruned, 1);
    assert!(outcome.audit_pruned >= 1);

    let rows = db.attendance().for_machine(machine.id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, days_ago(1, 8, 0));
}

// =============================================================================
// Manual operations
// =============================================================================

#[tokio::test]
async fn link_machine_stores_remote_id_and_timezone() {
    let db = store().await;
    let machine = db
        .machines()
        .insert(NewMachine::new("Lobby", "10.0.0.1").remote_name("Front Gate"))
        .await
        .unwrap();

    let remote = MockRemote::new();
    remote.seed_machine("Front Gate", 55, Some("Europe/Berlin"));

    assert_eq!(link_machine(&db, &remote, &machine).await.unwrap(), 55);

    let machine = db.machines().get(machine.id).await.unwrap();
    assert_eq!(machine.remote_id, Some(55));
    assert_eq!(machine.timezone.as_deref(), Some("Europe/Berlin"));
}

#[tokio::test]
async fn link_machine_handles_unset_remote_timezone() {
    let db = store().await;
    let machine = db
        .machines()
        .insert(NewMachine::new("Side", "10.0.0.3").remote_name("Side Gate"))
        .await
        .unwrap();

    let remote = MockRemote::new();
    remote.seed_machine("Side Gate", 56, None); // reported as boolean false

    link_machine(&db, &remote, &machine).await.unwrap();
    let machine = db.machines().get(machine.id).await.unwrap();
    assert_eq!(machine.remote_id, Some(56));
    assert_eq!(machine.timezone, None);
}

#[tokio::test]
async fn link_machine_error_cases() {
    let db = store().await;
    let remote = MockRemote::new();

    let unnamed = register(&db, "Lobby", "10.0.0.1").await;
    assert!(matches!(
        link_machine(&db, &remote, &unnamed).await,
        Err(SyncError::MissingRemoteName(_))
    ));

    let missing = db
        .machines()
        .insert(NewMachine::new("Lobby", "10.0.0.1").remote_name("Nowhere"))
        .await
        .unwrap();
    assert!(matches!(
        link_machine(&db, &remote, &missing).await,
        Err(SyncError::RemoteEntityNotFound(_))
    ));

    remote.seed_machine("Twin", 1, None);
    remote.seed_machine("Twin", 2, None);
    let twin = db
        .machines()
        .insert(NewMachine::new("Lobby", "10.0.0.1").remote_name("Twin"))
        .await
        .unwrap();
    assert!(matches!(
        link_machine(&db, &remote, &twin).await,
        Err(SyncError::AmbiguousRemoteEntity(_))
    ));
}

#[tokio::test]
async fn test_connection_writes_back_derived_fields() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    let device = MockDevice::new().with_serial("SN-42");

    let serial = test_connection(&db, &device, &machine).await.unwrap();
    assert_eq!(serial, "SN-42");
    assert_eq!(device.disconnect_count(), 1);

    let machine = db.machines().get(machine.id).await.unwrap();
    assert_eq!(machine.serial_number.as_deref(), Some("SN-42"));
    assert!(machine.last_connected.is_some());
}

#[tokio::test]
async fn test_connection_failure_is_audited() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    let device = MockDevice::new();
    device.fail_connections(true);

    assert!(test_connection(&db, &device, &machine).await.is_err());

    let machine = db.machines().get(machine.id).await.unwrap();
    assert!(machine.serial_number.is_none());
    let entries = db.audit().recent(10).await.unwrap();
    assert!(entries.iter().any(|e| e.operation == "error"));
}

// =============================================================================
// Scheduler
// =============================================================================

#[tokio::test(start_paused = true)]
async fn scheduled_run_ingests_and_pushes() {
    let db = store().await;
    let machine = register(&db, "Lobby", "10.0.0.1").await;
    db.machines().set_remote_link(machine.id, 77, None).await.unwrap();

    let device = MockDevice::new();
    device.enroll(1, "100", "Ada");
    device.clock("100", days_ago(1, 8, 0));
    let remote = MockRemote::new();

    let mut scheduler = Scheduler::new(
        db.clone(),
        Arc::new(device.clone()),
        Arc::new(remote.clone()),
    );
    scheduler.start().await;

    // Paused clock fast-forwards the grace wait, the detached tasks and
    // the follow-up run (a sync dispatched alongside a fetch can beat it
    // to the store; the next run always delivers).
    let mut delivered = false;
    for _ in 0..120 {
        tokio::time::sleep(std::time::Duration::from_secs(10)).await;
        if db.attendance().count_pending().await.unwrap() == 0
            && !db.attendance().for_machine(machine.id).await.unwrap().is_empty()
        {
            delivered = true;
            break;
        }
    }
    assert!(delivered, "scheduled run fetched and pushed the event");
    assert!(!remote.created_records(models::ATTENDANCE).is_empty());
    assert!(scheduler.status().await.last_run.is_some());

    scheduler.stop().await;
}
