#[path = "../common/mod.rs"]
mod common;

use chrono::Duration;
use common::{runtime, t0};
use ntm_orch::core::error::GateError;
use ntm_orch::core::session::SessionName;
use ntm_orch::core::time;
use ntm_orch::plugins::capture::{
    CaptureGuard, CaptureMarker, DestroyAuthorization, RefusalReason,
};
use std::fs;

fn alpha() -> SessionName {
    SessionName::parse("alpha").expect("name")
}

fn refusal_reason(auth: DestroyAuthorization) -> RefusalReason {
    match auth {
        DestroyAuthorization::Refused(refusal) => refusal.reason,
        DestroyAuthorization::Authorized { .. } => panic!("expected refusal"),
    }
}

#[test]
fn kill_without_capture_is_refused_with_remediation() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);

    match guard.authorize_destroy(&alpha(), t0()) {
        DestroyAuthorization::Refused(refusal) => {
            assert_eq!(refusal.reason, RefusalReason::NoMarker);
            assert_eq!(refusal.session, alpha());
            let msg = refusal.message();
            assert!(msg.contains("Cannot kill session 'alpha' without capturing output first."));
            assert!(msg.contains("ntm save alpha -o ./outputs"));
        }
        other => panic!("expected refusal, got {:?}", other),
    }
}

#[test]
fn fresh_capture_authorizes_kill() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);

    let marker = guard
        .record_capture(&alpha(), "ntm save alpha -o ./outputs", t0())
        .expect("record");
    assert!(marker.save_attempted);
    assert_eq!(marker.saved_at, time::to_iso(t0()));

    let auth = guard.authorize_destroy(&alpha(), t0() + Duration::minutes(10));
    assert!(auth.is_authorized());
    // The boundary itself is still inside the TTL.
    assert!(
        guard
            .authorize_destroy(&alpha(), t0() + Duration::minutes(60))
            .is_authorized()
    );
}

#[test]
fn stale_capture_is_refused() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);
    guard
        .record_capture(&alpha(), "ntm save alpha", t0())
        .expect("record");

    let auth = guard.authorize_destroy(&alpha(), t0() + Duration::minutes(61));
    assert_eq!(refusal_reason(auth), RefusalReason::Expired);
}

#[test]
fn custom_ttl_is_honored() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::with_ttl(&store, Duration::minutes(5));
    guard
        .record_capture(&alpha(), "ntm save alpha", t0())
        .expect("record");
    assert!(
        !guard
            .authorize_destroy(&alpha(), t0() + Duration::minutes(6))
            .is_authorized()
    );
}

#[test]
fn marker_without_attempt_flag_is_refused() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);
    let marker = CaptureMarker {
        session: "alpha".into(),
        saved_at: time::to_iso(t0()),
        save_attempted: false,
        save_succeeded: false,
        command: String::new(),
    };
    store
        .write_record(&store.capture_marker_path(&alpha()), &marker)
        .expect("write");

    let auth = guard.authorize_destroy(&alpha(), t0());
    assert_eq!(refusal_reason(auth), RefusalReason::SaveNotAttempted);
}

#[test]
fn unparseable_timestamp_is_refused() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);
    store
        .write_atomic(
            &store.capture_marker_path(&alpha()),
            br#"{"session":"alpha","saved_at":"yesterday","save_attempted":true}"#,
        )
        .expect("write");

    let auth = guard.authorize_destroy(&alpha(), t0());
    assert_eq!(refusal_reason(auth), RefusalReason::UnparseableTimestamp);
}

#[test]
fn corrupt_marker_reads_as_missing() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);
    store.ensure_session_dir(&alpha()).expect("dir");
    fs::write(store.capture_marker_path(&alpha()), "{").expect("write");

    let auth = guard.authorize_destroy(&alpha(), t0());
    assert_eq!(refusal_reason(auth), RefusalReason::NoMarker);
}

#[test]
fn recorded_command_is_truncated() {
    let (_tmp, store) = runtime();
    let guard = CaptureGuard::new(&store);
    let long = format!("ntm save alpha {}", "y".repeat(500));
    guard.record_capture(&alpha(), &long, t0()).expect("record");

    let marker = guard.marker(&alpha()).expect("marker");
    assert_eq!(marker.command.chars().count(), 200);
    assert!(marker.command.starts_with("ntm save alpha "));
}

#[test]
fn insecure_session_path_fails_closed() {
    let (_tmp, store) = runtime();
    store.ensure_root().expect("root");
    fs::write(store.session_dir(&alpha()), "not a dir").expect("write");

    let err = CaptureGuard::new(&store)
        .record_capture(&alpha(), "ntm save alpha", t0())
        .unwrap_err();
    assert!(matches!(err, GateError::SecurityViolation(_)));
}
