use idxd::errors::{ErrorKind, IdxdError};
use idxd::migration::{LostData, SchemaSnapshot, StoreSpec};
use idxd::ConnectionState;
use idxd_int_test::test_util::{cleanup, create_test_context_with, run_test};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn two_stores() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .store(StoreSpec::new("a").key_path("id"))
        .store(StoreSpec::new("b").auto_increment(true))
}

fn three_stores() -> SchemaSnapshot {
    two_stores().store(StoreSpec::new("c").key_path("id"))
}

fn only_a() -> SchemaSnapshot {
    SchemaSnapshot::new().store(StoreSpec::new("a").key_path("id"))
}

#[test]
fn test_deleted_store_is_rescued() {
    run_test(
        || create_test_context_with(|builder| builder.version(1, two_stores())),
        |ctx| {
            let db = ctx.db();
            db.store("a").set(json!({"id": "keep"})).wait()?;
            db.store("b").bulk_set(vec![json!({"a": 1}), json!({"a": 2})]).wait()?;
            db.close()?;

            let rescued: Arc<Mutex<Option<LostData>>> = Arc::new(Mutex::new(None));
            let sink = rescued.clone();
            let upgraded = ctx.sibling()?;
            upgraded.version(1, two_stores())?;
            upgraded.version_with_rescue(2, only_a(), move |lost| {
                if let Ok(mut slot) = sink.lock() {
                    *slot = Some(lost);
                }
                Ok(())
            })?;
            upgraded.open().wait()?;

            let mut expected = BTreeMap::new();
            expected.insert("b".to_string(), vec![json!({"a": 1}), json!({"a": 2})]);
            let lost = rescued.lock().ok().and_then(|mut slot| slot.take());
            assert_eq!(lost, Some(expected));

            assert_eq!(upgraded.store_names()?, vec!["a".to_string()]);
            assert_eq!(upgraded.store("a").count().wait()?, 1);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_two_deleted_stores_are_rescued_together() {
    run_test(
        || create_test_context_with(|builder| builder.version(1, three_stores())),
        |ctx| {
            let db = ctx.db();
            db.store("a").set(json!({"id": "keep"})).wait()?;
            db.store("b").bulk_set(vec![json!({"a": 1}), json!({"a": 2})]).wait()?;
            db.store("c").set(json!({"id": "c1"})).wait()?;
            db.close()?;

            let calls = Arc::new(Mutex::new(Vec::new()));
            let sink = calls.clone();
            let upgraded = ctx.sibling()?;
            upgraded.version(1, three_stores())?;
            upgraded.version_with_rescue(2, only_a(), move |lost| {
                if let Ok(mut calls) = sink.lock() {
                    calls.push(lost);
                }
                Ok(())
            })?;
            upgraded.open().wait()?;

            let mut expected = BTreeMap::new();
            expected.insert("b".to_string(), vec![json!({"a": 1}), json!({"a": 2})]);
            expected.insert("c".to_string(), vec![json!({"id": "c1"})]);
            let calls = calls.lock().map(|calls| calls.clone()).unwrap_or_default();
            assert_eq!(calls, vec![expected]);

            assert_eq!(upgraded.store_names()?, vec!["a".to_string()]);
            assert_eq!(upgraded.store("a").count().wait()?, 1);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_deleted_store_without_rescue() {
    run_test(
        || create_test_context_with(|builder| builder.version(1, two_stores())),
        |ctx| {
            let db = ctx.db();
            db.store("b").set(json!({"a": 1})).wait()?;
            db.close()?;

            let upgraded = ctx.sibling()?;
            upgraded.version(1, two_stores())?;
            upgraded.version(2, only_a())?;
            upgraded.open().wait()?;
            assert_eq!(upgraded.store_names()?, vec!["a".to_string()]);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_rescue_runs_with_nothing_deleted() {
    run_test(
        || create_test_context_with(|builder| builder.version(1, only_a())),
        |ctx| {
            let db = ctx.db();
            db.close()?;

            let calls = Arc::new(Mutex::new(Vec::new()));
            let sink = calls.clone();
            let upgraded = ctx.sibling()?;
            upgraded.version(1, only_a())?;
            upgraded.version_with_rescue(2, two_stores(), move |lost| {
                if let Ok(mut calls) = sink.lock() {
                    calls.push(lost);
                }
                Ok(())
            })?;
            upgraded.open().wait()?;

            let calls = calls.lock().map(|calls| calls.clone()).unwrap_or_default();
            assert_eq!(calls, vec![LostData::new()]);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_failed_rescue_aborts_upgrade() {
    run_test(
        || create_test_context_with(|builder| builder.version(1, two_stores())),
        |ctx| {
            let db = ctx.db();
            db.store("b").set(json!({"a": 1})).wait()?;
            db.close()?;

            let upgraded = ctx.sibling()?;
            upgraded.version(1, two_stores())?;
            upgraded.version_with_rescue(2, only_a(), |_| {
                Err(IdxdError::new("backup target unavailable", ErrorKind::ScriptError))
            })?;
            let err = upgraded.open().wait().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::MigrationError);
            assert_eq!(err.cause().map(|cause| cause.kind()), Some(&ErrorKind::ScriptError));
            assert_eq!(upgraded.state(), ConnectionState::Errored);

            let previous = ctx.sibling()?;
            previous.version(1, two_stores())?;
            previous.open().wait()?;
            assert_eq!(previous.current_version(), Some(1));
            assert_eq!(previous.store_names()?, vec!["a".to_string(), "b".to_string()]);
            assert_eq!(previous.store("b").get_all().wait()?, vec![json!({"a": 1})]);
            previous.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_fresh_open_deletes_intermediate_store() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder
                    .version(1, two_stores())
                    .version_with_rescue(2, only_a(), |lost| {
                        assert_eq!(lost.get("b"), Some(&Vec::new()));
                        Ok(())
                    })
            })
        },
        |ctx| {
            assert_eq!(ctx.db().store_names()?, vec!["a".to_string()]);
            assert_eq!(ctx.db().current_version(), Some(2));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
