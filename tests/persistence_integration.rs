//! Persistence integration test, run in its own test binary so the
//! process-wide `OnceLock` only ever sees one `init()` call — unlike the
//! colocated unit tests in `src/persistence.rs`, which share a binary with
//! every other unit test and can't assume they're first to call `init()`.

use captrace::persistence::{self, StoredSource};
use captrace::types::{derive_uuid, SourceDefinition};

fn temp_db_path() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("sources.sled");
    (dir, path)
}

#[test]
fn init_then_store_and_load_round_trips() {
    let (_dir, path) = temp_db_path();
    persistence::init(&path).expect("open sled db");

    let definition = SourceDefinition::parse("wlan0:type=linuxwifi").unwrap();
    let uuid = derive_uuid("linuxwifi", "wlan0");
    persistence::store_definition(uuid, &definition, true).unwrap();

    let all = persistence::load_all_sources().unwrap();
    let entry = all.iter().find(|s| s.uuid == uuid).expect("stored source must round-trip");
    assert!(entry.auto_open);
    assert_eq!(entry.definition, "wlan0:type=linuxwifi");
}

#[test]
fn remove_source_reports_whether_an_entry_existed() {
    let (_dir, path) = temp_db_path();
    persistence::init(&path).expect("open sled db");

    let uuid = derive_uuid("virtualscan", "scan0");
    persistence::store_source(&StoredSource {
        uuid,
        definition: "scan0".to_string(),
        auto_open: false,
    })
    .unwrap();

    assert!(persistence::remove_source(&uuid).unwrap());
    assert!(!persistence::remove_source(&uuid).unwrap());
    assert!(!persistence::load_all_sources().unwrap().iter().any(|s| s.uuid == uuid));
}

#[test]
fn second_init_call_is_a_harmless_no_op() {
    let (_dir, path) = temp_db_path();
    persistence::init(&path).expect("first init succeeds");
    // A second init (e.g. a different temp dir) must not replace the
    // already-installed global handle, matching the OnceLock contract.
    let (_dir2, other_path) = temp_db_path();
    persistence::init(&other_path).expect("second init is a no-op, not an error");

    let uuid = derive_uuid("virtualscan", "scan9");
    persistence::store_source(&StoredSource {
        uuid,
        definition: "scan9".to_string(),
        auto_open: false,
    })
    .unwrap();
    assert!(persistence::load_all_sources().unwrap().iter().any(|s| s.uuid == uuid));
}
