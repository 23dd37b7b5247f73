use std::error::Error;

use attrsync_core::{AttributeKey, SyncEvent, UserId, Value, Version};
use attrsync_engine::{CommitOutcome, Phase, ReconcileOutcome, TxState};
use attrsync_harness::profile::{ACCENT_COLOR, BIO, COVER_POSITION};
use attrsync_harness::{TestNetwork, profile_registry};

fn network() -> TestNetwork {
    TestNetwork::new(profile_registry())
}

/// An announcement from a session this test does not model.
fn remote(key: &AttributeKey, value: impl Into<Value>, version: u64) -> SyncEvent {
    SyncEvent {
        key: key.clone(),
        value: value.into(),
        version: Version::new(version),
        origin_session: None,
    }
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Version gate
// ============================================================================

#[tokio::test]
async fn older_versions_never_replace_newer() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let session = net.session(a);
    let key = session.key(BIO);
    let recorder = session.record(BIO);

    let apply = |value: &str, version| session.engine.apply_remote(remote(&key, value, version));
    assert_eq!(apply("five", 5), ReconcileOutcome::Applied);
    assert_eq!(apply("three", 3), ReconcileOutcome::StaleIgnored);
    assert_eq!(apply("five again", 5), ReconcileOutcome::StaleIgnored);

    assert_eq!(session.engine.read(&key), Value::from("five"));
    assert_eq!(session.engine.version(&key), Version::new(5));
    assert_eq!(recorder.values(Phase::Remote), vec![Value::from("five")]);
    Ok(())
}

#[tokio::test]
async fn refresh_never_regresses() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let key = net.session(a).key(BIO);
    net.store().seed(&key, Value::from("old replica"));

    let session = net.session(a);
    session.engine.apply_remote(remote(&key, "pushed", 7));

    assert_eq!(session.engine.refresh(&key).await?, Some(ReconcileOutcome::StaleIgnored));
    assert_eq!(session.engine.read(&key), Value::from("pushed"));
    assert_eq!(session.engine.version(&key), Version::new(7));
    Ok(())
}

#[tokio::test]
async fn refresh_of_missing_value_keeps_default() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let session = net.session(a);
    let key = session.key(ACCENT_COLOR);

    assert_eq!(session.engine.refresh(&key).await?, None);
    assert_eq!(session.engine.read(&key), Value::from("#3b82f6"));
    assert!(session.engine.read_attribute(&key).is_none());
    Ok(())
}

#[tokio::test]
async fn refresh_reports_unavailable_store() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let session = net.session(a);
    let key = session.key(BIO);

    net.store().set_unavailable(true);
    let err = session.engine.refresh(&key).await.unwrap_err();
    assert!(matches!(err, attrsync_engine::SyncError::ReadFailure { .. }));
    assert_eq!(session.engine.read(&key), Value::from(""));
    Ok(())
}

// ============================================================================
// Deferral
// ============================================================================

#[tokio::test]
async fn remote_value_waits_for_draft_to_end() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let key = net.session(a).key(BIO);
    for text in ["one", "two", "three", "four"] {
        net.store().seed(&key, Value::from(text));
    }

    let session = net.session(a);
    session.engine.refresh(&key).await?;
    assert_eq!(session.engine.version(&key), Version::new(4));
    let recorder = session.record(BIO);

    session.engine.begin_draft(&key, session.engine.read(&key))?;
    session.engine.update_draft(&key, Value::from("mine"))?;
    session.engine.run_frame();

    assert_eq!(session.engine.apply_remote(remote(&key, "theirs", 5)), ReconcileOutcome::Deferred);
    assert_eq!(session.engine.read(&key), Value::from("mine"));
    assert!(recorder.values(Phase::Remote).is_empty());

    session.engine.cancel(&key)?;

    assert_eq!(session.engine.read(&key), Value::from("theirs"));
    assert_eq!(session.engine.version(&key), Version::new(5));
    assert_eq!(
        recorder.phases(),
        vec![Phase::Draft, Phase::Draft, Phase::Reverted, Phase::Remote]
    );
    Ok(())
}

#[tokio::test]
async fn deferred_value_older_than_own_commit_is_dropped() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let key = net.session(a).key(BIO);
    net.store().seed(&key, Value::from("start"));

    let session = net.session(a);
    session.engine.refresh(&key).await?;
    session.engine.begin_draft(&key, session.engine.read(&key))?;
    session.engine.update_draft(&key, Value::from("mine"))?;

    // Another device writes while this session is editing.
    let theirs = net.store().seed(&key, Value::from("theirs"));
    let event = remote(&key, "theirs", theirs.get());
    assert_eq!(session.engine.apply_remote(event), ReconcileOutcome::Deferred);

    let outcome = session.engine.commit(&key).await?;
    assert!(matches!(
        outcome,
        CommitOutcome::Committed(ref attr) if attr.version == Version::new(3)
    ));
    assert_eq!(session.engine.read(&key), Value::from("mine"));
    assert_eq!(session.engine.version(&key), Version::new(3));
    Ok(())
}

#[tokio::test]
async fn deferred_value_newer_than_own_commit_wins() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let session = net.session(a);
    let key = session.key(BIO);

    session.engine.begin_draft(&key, session.engine.read(&key))?;
    session.engine.update_draft(&key, Value::from("mine"))?;
    assert_eq!(session.engine.apply_remote(remote(&key, "theirs", 9)), ReconcileOutcome::Deferred);
    assert_eq!(session.engine.apply_remote(remote(&key, "earlier", 8)), ReconcileOutcome::Deferred);

    session.engine.commit(&key).await?;

    assert_eq!(session.engine.read(&key), Value::from("theirs"));
    assert_eq!(session.engine.version(&key), Version::new(9));
    Ok(())
}

#[tokio::test]
async fn remote_value_waits_for_commit_in_flight() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let store = net.store().clone();
    let session = net.session(a);
    let engine = &session.engine;
    let key = session.key(ACCENT_COLOR);

    engine.begin_draft(&key, engine.read(&key))?;
    engine.update_draft(&key, Value::from("#abcdef"))?;

    store.hold();
    let push = async {
        settle().await;
        assert_eq!(engine.state(&key), TxState::Committing);
        let outcome = engine.apply_remote(remote(&key, "#000000", 4));
        assert_eq!(outcome, ReconcileOutcome::Deferred);
        assert_eq!(engine.read(&key), Value::from("#abcdef"), "optimistic value stays visible");
        store.release();
    };
    let (committed, ()) = tokio::join!(engine.commit(&key), push);
    committed?;

    assert_eq!(engine.read(&key), Value::from("#000000"));
    assert_eq!(engine.version(&key), Version::new(4));
    Ok(())
}

// ============================================================================
// Cross-session propagation
// ============================================================================

#[tokio::test]
async fn cover_drag_reaches_other_session_as_one_value() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let user = UserId::new();
    let a = net.add_session(user)?;
    let b = net.add_session(user)?;
    let key = net.session(a).key(COVER_POSITION);
    net.store().seed(&key, Value::point(50.0, 50.0));
    net.session(a).engine.refresh(&key).await?;
    net.session(b).engine.refresh(&key).await?;

    let watcher = net.session(b).record(COVER_POSITION);
    let drag = &net.session(a).engine;

    drag.begin_draft(&key, drag.read(&key))?;
    for step in 1..=10 {
        drag.update_draft(&key, Value::point(50.0, 50.0 - 2.0 * step as f64))?;
        drag.run_frame();
    }
    let outcome = drag.commit(&key).await?;

    let CommitOutcome::Committed(attribute) = outcome else {
        panic!("expected a write, got {outcome:?}");
    };
    assert_eq!(attribute.version, Version::new(2));
    assert_eq!(net.store().puts_for(&key), vec![Value::point(50.0, 30.0)]);
    assert!(watcher.notes().is_empty(), "drafts never leave the session");

    assert_eq!(net.session_mut(b).drain_push(), vec![ReconcileOutcome::Applied]);
    assert_eq!(net.session(b).engine.read(&key), Value::point(50.0, 30.0));
    assert_eq!(net.session(b).engine.version(&key), Version::new(2));
    assert_eq!(watcher.values(Phase::Remote), vec![Value::point(50.0, 30.0)]);
    assert_eq!(watcher.notes().len(), 1);
    Ok(())
}

#[tokio::test]
async fn own_commit_echo_is_ignored() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let key = net.session(a).key(ACCENT_COLOR);
    let recorder = net.session(a).record(ACCENT_COLOR);

    net.session(a).engine.set(&key, Value::from("#ff8800")).await?;
    recorder.clear();

    assert_eq!(net.session_mut(a).drain_push(), vec![ReconcileOutcome::Echo]);
    assert!(recorder.notes().is_empty());
    Ok(())
}

#[tokio::test]
async fn duplicate_delivery_applies_once() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let user = UserId::new();
    let a = net.add_session(user)?;
    let b = net.add_session(user)?;
    let key = net.session(a).key(BIO);
    let watcher = net.session(b).record(BIO);

    net.hub().set_duplicate(true);
    net.session(a).engine.set(&key, Value::from("Gaffer")).await?;

    assert_eq!(
        net.session_mut(b).drain_push(),
        vec![ReconcileOutcome::Applied, ReconcileOutcome::StaleIgnored]
    );
    assert_eq!(watcher.values(Phase::Remote), vec![Value::from("Gaffer")]);
    Ok(())
}

#[tokio::test]
async fn other_users_are_not_told() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let c = net.add_session(UserId::new())?;
    let key = net.session(a).key(BIO);

    net.session(a).engine.set(&key, Value::from("mine")).await?;

    assert!(net.session_mut(c).drain_push().is_empty());
    assert_eq!(net.hub().published().len(), 1);
    Ok(())
}

#[tokio::test]
async fn offline_push_is_recovered_by_refresh() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let user = UserId::new();
    let a = net.add_session(user)?;
    let b = net.add_session(user)?;
    let key = net.session(a).key(BIO);

    net.hub().set_offline(true);
    let outcome = net.session(a).engine.set(&key, Value::from("quiet")).await?;
    assert!(matches!(outcome, CommitOutcome::Committed(_)), "push failures never fail a commit");
    assert!(net.session_mut(b).drain_push().is_empty());

    assert_eq!(
        net.session(b).engine.refresh(&key).await?,
        Some(ReconcileOutcome::Applied)
    );
    assert_eq!(net.session(b).engine.read(&key), Value::from("quiet"));
    Ok(())
}

#[tokio::test]
async fn pump_applies_until_channel_closes() -> Result<(), Box<dyn Error>> {
    let mut net = network();
    let a = net.add_session(UserId::new())?;
    let key = net.session(a).key(BIO);

    let (sender, mut receiver) = tokio::sync::mpsc::unbounded_channel();
    sender.send(remote(&key, "first", 1))?;
    sender.send(remote(&key, "second", 2))?;
    drop(sender);

    net.session(a).engine.pump_remote(&mut receiver).await;

    assert_eq!(net.session(a).engine.read(&key), Value::from("second"));
    assert_eq!(net.session(a).engine.version(&key), Version::new(2));
    Ok(())
}
