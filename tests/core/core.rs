#[path = "../common/mod.rs"]
mod common;

use common::runtime;
use ntm_orch::core::command::{CommandFacts, PollKind};
use ntm_orch::core::error::{Disposition, GateError};
use ntm_orch::core::session::SessionName;
use ntm_orch::core::store::{RuntimeStore, ensure_secure_dir};
use ntm_orch::plugins::registry::GlobalIndex;
use std::fs;
use std::os::unix::fs::{PermissionsExt, symlink};
use tempfile::tempdir;

fn mode(path: &std::path::Path) -> u32 {
    fs::symlink_metadata(path).expect("stat").permissions().mode() & 0o777
}

#[test]
fn ensure_root_creates_private_directory() {
    let (_tmp, store) = runtime();
    store.ensure_root().expect("secure root");
    assert!(store.root().is_dir());
    assert_eq!(mode(store.root()), 0o700);
}

#[test]
fn loose_permissions_are_tightened() {
    let (_tmp, store) = runtime();
    fs::create_dir_all(store.root()).expect("mkdir");
    fs::set_permissions(store.root(), fs::Permissions::from_mode(0o750)).expect("chmod");

    store.ensure_root().expect("tightened");
    assert_eq!(mode(store.root()), 0o700);
}

#[test]
fn symlinked_root_is_a_security_violation() {
    let tmp = tempdir().expect("tempdir");
    let real = tmp.path().join("real");
    fs::create_dir(&real).expect("mkdir");
    let link = tmp.path().join("runtime");
    symlink(&real, &link).expect("symlink");

    let err = RuntimeStore::new(&link).ensure_root().unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
    assert_eq!(err.disposition(), Disposition::FailClosed);
    assert!(err.detail().starts_with("Not a real directory"));
}

#[test]
fn regular_file_in_place_of_root_is_a_security_violation() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("runtime");
    fs::write(&path, "x").expect("write");

    let err = ensure_secure_dir(&path).unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
}

#[test]
fn writes_outside_root_are_refused() {
    let (tmp, store) = runtime();
    store.ensure_root().expect("root");

    let outside = tmp.path().join("elsewhere.json");
    let err = store.write_atomic(&outside, b"{}").unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
    assert!(!outside.exists());

    let escaping = store.root().join("alpha/../../escape.json");
    let err = store.write_atomic(&escaping, b"{}").unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
    assert!(!tmp.path().join("escape.json").exists());
}

#[test]
fn atomic_write_leaves_private_file_and_no_temp() {
    let (_tmp, store) = runtime();
    let alpha = SessionName::parse("alpha").expect("name");
    let path = store.state_path(&alpha);

    store.write_atomic(&path, b"{\"v\":1}").expect("write");
    store.write_atomic(&path, b"{\"v\":2}").expect("overwrite");

    assert_eq!(fs::read_to_string(&path).expect("read"), "{\"v\":2}");
    assert_eq!(mode(&path), 0o600);
    assert_eq!(mode(&store.session_dir(&alpha)), 0o700);
    let leftovers: Vec<_> = fs::read_dir(store.session_dir(&alpha))
        .expect("readdir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn corrupt_records_report_corruption_and_heal() {
    let (_tmp, store) = runtime();
    store.ensure_root().expect("root");
    let index = store.global_index_path();
    fs::write(&index, "{not json").expect("write");

    let err = store.read_record::<GlobalIndex>(&index).unwrap_err();
    assert!(matches!(err, GateError::StateCorruption { .. }));
    assert_eq!(err.disposition(), Disposition::FailOpen);

    assert!(store.load_or_heal::<GlobalIndex>(&index).is_none());
    assert!(!index.exists());
    assert!(store.read_record::<GlobalIndex>(&index).expect("read").is_none());
}

#[test]
fn delete_owned_file_refuses_unsafe_targets() {
    let (tmp, store) = runtime();
    let alpha = SessionName::parse("alpha").expect("name");
    store.ensure_session_dir(&alpha).expect("session dir");

    // Missing files are fine.
    store
        .delete_owned_file(&store.state_path(&alpha))
        .expect("missing ok");

    let err = store.delete_owned_file(&store.session_dir(&alpha)).unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));

    let victim = tmp.path().join("victim.txt");
    fs::write(&victim, "keep").expect("write");
    let link = store.state_path(&alpha);
    symlink(&victim, &link).expect("symlink");
    let err = store.delete_owned_file(&link).unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
    assert!(victim.exists());

    let err = store.delete_owned_file(&victim).unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
    assert_eq!(fs::read_to_string(&victim).expect("read"), "keep");
}

#[test]
fn hostile_session_names_stay_under_root() {
    let (_tmp, store) = runtime();
    let name = SessionName::parse("../../etc/passwd").expect("sanitized");
    assert_eq!(name.as_str(), ".._.._etc_passwd");
    assert!(store.contains(&store.state_path(&name)));

    assert!(SessionName::parse("   ").is_err());
    assert!(SessionName::parse("..").is_err());
    let long = "x".repeat(300);
    assert_eq!(SessionName::parse(&long).expect("capped").as_str().len(), 128);
}

#[test]
fn classification_of_compound_commands() {
    let facts = CommandFacts::classify("ntm save alpha -o ./outputs && ntm kill alpha");
    assert_eq!(facts.save, Some("alpha"));
    assert_eq!(facts.kill, Some("alpha"));
    assert!(facts.ntm_mode_allowed);

    let facts = CommandFacts::classify("ntm --robot-health=alpha");
    let poll = facts.poll.expect("poll");
    assert_eq!(poll.kind, PollKind::Health);
    assert_eq!(poll.session, Some("alpha"));

    let facts = CommandFacts::classify("git status");
    assert!(facts.is_untracked());
}
