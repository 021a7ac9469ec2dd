#[path = "../common/mod.rs"]
mod common;

use chrono::Duration;
use common::{FakeTmux, at_secs, runtime, t0};
use ntm_orch::core::command::PollKind;
use ntm_orch::core::session::SessionName;
use ntm_orch::plugins::oracle::ReconciliationOracle;
use ntm_orch::plugins::registry::SessionRegistry;
use ntm_orch::plugins::throttle::{PollOutcome, PollScope, PollThrottle};
use std::fs;

fn session(raw: &str) -> PollScope {
    PollScope::Session(SessionName::parse(raw).expect("name"))
}

#[test]
fn status_poll_inside_interval_is_refused() {
    let (_tmp, store) = runtime();
    let throttle = PollThrottle::new(&store);
    let alpha = session("alpha");

    assert!(
        throttle
            .check_and_record(&alpha, PollKind::Status, t0())
            .expect("first")
            .is_accepted()
    );

    let refused = throttle
        .check_and_record(&alpha, PollKind::Status, at_secs(30))
        .expect("second");
    assert_eq!(
        refused,
        PollOutcome::TooFast {
            key: "alpha|status".into(),
            delta_secs: 30.0,
            min_interval_secs: 90,
        }
    );

    assert!(
        throttle
            .check_and_record(&alpha, PollKind::Status, at_secs(91))
            .expect("third")
            .is_accepted()
    );
}

#[test]
fn refusal_does_not_reset_the_window() {
    let (_tmp, store) = runtime();
    let throttle = PollThrottle::new(&store);
    let alpha = session("alpha");

    throttle
        .check_and_record(&alpha, PollKind::Tail, t0())
        .expect("first");
    throttle
        .check_and_record(&alpha, PollKind::Tail, at_secs(80))
        .expect("refused");
    // Measured from the accepted poll at t0, not the refused one.
    assert!(
        throttle
            .check_and_record(&alpha, PollKind::Tail, at_secs(90))
            .expect("boundary")
            .is_accepted()
    );
}

#[test]
fn kinds_sessions_and_global_scope_are_independent() {
    let (_tmp, store) = runtime();
    let throttle = PollThrottle::new(&store);

    for (scope, kind) in [
        (session("alpha"), PollKind::Status),
        (session("alpha"), PollKind::Snapshot),
        (session("beta"), PollKind::Status),
        (PollScope::Global, PollKind::Status),
    ] {
        assert!(
            throttle
                .check_and_record(&scope, kind, t0())
                .expect("poll")
                .is_accepted(),
            "{} {} should be accepted",
            scope,
            kind
        );
    }

    let global = throttle.ledger(&PollScope::Global).expect("global ledger");
    assert_eq!(
        global.last_poll_ms.keys().collect::<Vec<_>>(),
        vec!["__global__|status"]
    );
    let alpha = throttle.ledger(&session("alpha")).expect("alpha ledger");
    assert_eq!(alpha.last_poll_ms.len(), 2);
}

#[test]
fn health_grace_window_after_spawn() {
    let (_tmp, store) = runtime();
    let tmux = FakeTmux::new();
    let oracle = ReconciliationOracle::new(&tmux);
    let name = SessionName::parse("alpha").expect("name");
    SessionRegistry::new(&store, &oracle)
        .admit(&name, t0(), 1)
        .expect("admit");

    let throttle = PollThrottle::new(&store);
    let alpha = PollScope::Session(name);

    assert_eq!(throttle.min_interval_secs(&alpha, PollKind::Health, at_secs(5)), 10);
    assert_eq!(throttle.min_interval_secs(&alpha, PollKind::Health, at_secs(180)), 10);
    assert_eq!(throttle.min_interval_secs(&alpha, PollKind::Health, at_secs(200)), 90);
    assert_eq!(throttle.min_interval_secs(&alpha, PollKind::Status, at_secs(5)), 90);
    assert_eq!(
        throttle.min_interval_secs(&PollScope::Global, PollKind::Health, at_secs(5)),
        90
    );

    assert!(
        throttle
            .check_and_record(&alpha, PollKind::Health, at_secs(5))
            .expect("first")
            .is_accepted()
    );
    assert!(
        !throttle
            .check_and_record(&alpha, PollKind::Health, at_secs(10))
            .expect("too soon")
            .is_accepted()
    );
    assert!(
        throttle
            .check_and_record(&alpha, PollKind::Health, at_secs(15))
            .expect("after grace interval")
            .is_accepted()
    );
    // Outside the grace window the baseline applies again.
    let outcome = throttle
        .check_and_record(&alpha, PollKind::Health, at_secs(200))
        .expect("late");
    assert!(outcome.is_accepted());
    let outcome = throttle
        .check_and_record(&alpha, PollKind::Health, at_secs(200) + Duration::seconds(20))
        .expect("late refused");
    assert!(matches!(
        outcome,
        PollOutcome::TooFast {
            min_interval_secs: 90,
            ..
        }
    ));
}

#[test]
fn health_without_recorded_spawn_uses_baseline() {
    let (_tmp, store) = runtime();
    let throttle = PollThrottle::new(&store);
    assert_eq!(
        throttle.min_interval_secs(&session("ghost"), PollKind::Health, t0()),
        90
    );
}

#[test]
fn corrupt_ledger_is_reset() {
    let (_tmp, store) = runtime();
    let throttle = PollThrottle::new(&store);
    let alpha = SessionName::parse("alpha").expect("name");
    store.ensure_session_dir(&alpha).expect("dir");
    fs::write(store.poll_ledger_path(&alpha), "garbage").expect("write");

    let scope = PollScope::Session(alpha);
    assert!(
        throttle
            .check_and_record(&scope, PollKind::Status, t0())
            .expect("poll")
            .is_accepted()
    );
    let ledger = throttle.ledger(&scope).expect("rewritten");
    assert_eq!(ledger.last_poll_ms.len(), 1);
}
