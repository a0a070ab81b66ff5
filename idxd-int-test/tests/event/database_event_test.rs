use idxd::errors::ErrorKind;
use idxd::event::{ChangeInfo, DatabaseEvent, DatabaseEventListener};
use idxd::operation::Operation;
use idxd::store::memory::MemoryEngine;
use idxd::store::TransactionMode;
use idxd::transaction::Sequence;
use idxd::Idxd;
use idxd_int_test::test_util::{cleanup, create_test_context, library_schema, random_name, run_test};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn recorder() -> (Arc<Mutex<Vec<DatabaseEvent>>>, DatabaseEventListener) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let listener = DatabaseEventListener::new(move |event| {
        if let Ok(mut events) = sink.lock() {
            events.push(event);
        }
        Ok(())
    });
    (events, listener)
}

fn names(events: &Arc<Mutex<Vec<DatabaseEvent>>>) -> Vec<&'static str> {
    events
        .lock()
        .map(|events| events.iter().map(DatabaseEvent::name).collect())
        .unwrap_or_default()
}

fn changes(events: &Arc<Mutex<Vec<DatabaseEvent>>>) -> Vec<ChangeInfo> {
    events
        .lock()
        .map(|events| {
            events
                .iter()
                .filter_map(|event| match event {
                    DatabaseEvent::Change(change) => Some(change.clone()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_ready_event_on_open() {
    let db = Idxd::with_engine(&random_name(), MemoryEngine::new()).unwrap();
    db.version(1, library_schema()).unwrap();
    let (events, listener) = recorder();
    db.subscribe(listener).unwrap();

    db.open().wait().unwrap();
    assert_eq!(names(&events), vec!["ready"]);

    db.open().wait().unwrap();
    assert_eq!(names(&events), vec!["ready"]);
}

#[test]
fn test_error_event_on_failed_open() {
    let engine = MemoryEngine::new();
    let name = random_name();
    let newer = Idxd::with_engine(&name, engine.clone()).unwrap();
    newer.version(3, library_schema()).unwrap();
    newer.open().wait().unwrap();
    newer.close().unwrap();

    let older = Idxd::with_engine(&name, engine).unwrap();
    older.version(1, library_schema()).unwrap();
    let (events, listener) = recorder();
    older.subscribe(listener).unwrap();

    assert!(older.open().wait().is_err());
    let received = events.lock().map(|events| events.clone()).unwrap_or_default();
    assert_eq!(received.len(), 1);
    match &received[0] {
        DatabaseEvent::Error(e) => assert_eq!(e.kind(), &ErrorKind::VersionError),
        other => panic!("expected an error event, got {:?}", other),
    }
}

#[test]
fn test_change_event_after_commit() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let (events, listener) = recorder();
            db.subscribe(listener)?;

            db.transaction(
                ["books", "authors"],
                TransactionMode::ReadWrite,
                Sequence::new()
                    .then(|tx, _| Ok(tx.store("authors")?.set(json!({"name": "Herbert"}))))
                    .then(|tx, _| Ok(tx.store("books")?.set(json!({"title": "Dune"}))))
                    .then(|tx, _| Ok(tx.store("books")?.delete(1.into())))
                    .finish(|_| Ok(())),
            )
            .wait()?;

            let changes = changes(&events);
            assert_eq!(changes.len(), 2);
            assert_eq!(changes[0].store(), "authors");
            assert_eq!(changes[0].added(), &[json!({"name": "Herbert"})]);
            assert!(changes[0].removed().is_empty());
            assert_eq!(changes[1].store(), "books");
            assert_eq!(changes[1].added(), &[json!({"id": 1, "title": "Dune"})]);
            assert_eq!(changes[1].removed(), &[json!({"id": 1, "title": "Dune"})]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_read_only_session_publishes_no_change() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let (events, listener) = recorder();
            db.subscribe(listener)?;

            db.store("books").get_all().wait()?;
            db.store("books").count().wait()?;
            assert!(names(&events).is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_error_event_after_abort() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let (events, listener) = recorder();
            db.subscribe(listener)?;

            let result = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::<()>::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(json!({"title": "Dune"}))))
                        .then_abort(),
                )
                .wait();
            assert!(result.is_err());
            assert_eq!(names(&events), vec!["error"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_unsubscribe() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let (events, listener) = recorder();
            let subscriber = db.subscribe(listener)?;

            db.store("books").set(json!({"title": "Dune"})).wait()?;
            db.unsubscribe(subscriber)?;
            db.store("books").set(json!({"title": "Emma"})).wait()?;

            assert_eq!(names(&events), vec!["change"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
