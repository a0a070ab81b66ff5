use idxd::common::{KeyRange, Target};
use idxd::errors::ErrorKind;
use idxd::migration::{IndexSpec, SchemaSnapshot, StoreSpec};
use idxd::store::memory::MemoryEngine;
use idxd::store::StorageEngineProvider;
use idxd::Idxd;
use idxd_int_test::test_util::{cleanup, create_test_context, create_test_context_with, library_schema, run_test};
use serde_json::json;

#[test]
fn test_first_open_creates_stores() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.current_version(), Some(1));
            assert_eq!(db.store_names()?, vec!["authors".to_string(), "books".to_string()]);
            assert_eq!(ctx.engine().database_names(), vec![ctx.name().to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_fresh_open_walks_every_version() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder
                    .version(1, SchemaSnapshot::new().store(StoreSpec::new("a")))
                    .version(3, SchemaSnapshot::new().store(StoreSpec::new("a")).store(StoreSpec::new("c")))
            })
        },
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.current_version(), Some(3));
            assert_eq!(db.store_names()?, vec!["a".to_string(), "c".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_fresh_open_across_large_version_gap() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder
                    .version(1, SchemaSnapshot::new().store(StoreSpec::new("a")))
                    .version(1_000_000, SchemaSnapshot::new().store(StoreSpec::new("b")))
            })
        },
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.current_version(), Some(1_000_000));
            assert_eq!(db.store_names()?, vec!["b".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_fresh_open_walks_many_consecutive_versions() {
    run_test(
        || {
            create_test_context_with(|builder| {
                (1..=20_000).fold(builder, |builder, version| {
                    builder.version(version, SchemaSnapshot::new().store(StoreSpec::new("a")))
                })
            })
        },
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.current_version(), Some(20_000));
            assert_eq!(db.store_names()?, vec!["a".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_open_at_highest_version_number() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder
                    .version(1, SchemaSnapshot::new().store(StoreSpec::new("a")))
                    .version(u32::MAX, SchemaSnapshot::new().store(StoreSpec::new("a")).store(StoreSpec::new("z")))
            })
        },
        |ctx| {
            let db = ctx.db();
            assert_eq!(db.current_version(), Some(u32::MAX));
            assert_eq!(db.store_names()?, vec!["a".to_string(), "z".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_upgrade_across_version_gap_keeps_data() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("authors").set(json!({"name": "Austen"})).wait()?;
            db.close()?;

            let upgraded = ctx.sibling()?;
            upgraded.version(1, library_schema())?;
            upgraded.version(5, library_schema().store(StoreSpec::new("loans").auto_increment(true)))?;
            upgraded.open().wait()?;

            assert_eq!(upgraded.current_version(), Some(5));
            assert_eq!(
                upgraded.store_names()?,
                vec!["authors".to_string(), "books".to_string(), "loans".to_string()]
            );
            assert_eq!(upgraded.store("authors").get_all().wait()?, vec![json!({"name": "Austen"})]);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_upgrade_across_large_version_gap() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").set(json!({"title": "Emma", "author": "Austen"})).wait()?;
            db.close()?;

            let upgraded = ctx.sibling()?;
            upgraded.version(1, library_schema())?;
            upgraded.version(2_000_000, library_schema())?;
            upgraded.version(20_261_016, library_schema().store(StoreSpec::new("loans")))?;
            upgraded.open().wait()?;

            assert_eq!(upgraded.current_version(), Some(20_261_016));
            assert_eq!(upgraded.store("books").count().wait()?, 1);
            assert!(upgraded.store_names()?.contains(&"loans".to_string()));
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_upgrade_adds_store_and_keeps_data() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").set(json!({"title": "Dune", "author": "Herbert"})).wait()?;
            db.close()?;

            let upgraded = ctx.sibling()?;
            upgraded.version(1, library_schema())?;
            upgraded.version(2, library_schema().store(StoreSpec::new("loans").auto_increment(true)))?;
            upgraded.open().wait()?;

            assert_eq!(upgraded.current_version(), Some(2));
            assert_eq!(
                upgraded.store_names()?,
                vec!["authors".to_string(), "books".to_string(), "loans".to_string()]
            );
            assert_eq!(upgraded.store("books").count().wait()?, 1);
            assert_eq!(upgraded.store("loans").count().wait()?, 0);
            upgraded.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_upgrade_reconciles_indexes() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books")
                .bulk_set(vec![
                    json!({"title": "Dune", "author": "Herbert", "year": 1965}),
                    json!({"title": "Emma", "author": "Austen", "year": 1815}),
                ])
                .wait()?;
            db.close()?;

            let reindexed = ctx.sibling()?;
            reindexed.version(1, library_schema())?;
            reindexed.version(
                2,
                SchemaSnapshot::new()
                    .store(
                        StoreSpec::new("books")
                            .key_path("id")
                            .auto_increment(true)
                            .index(IndexSpec::new("year").named("by_year")),
                    )
                    .store(StoreSpec::new("authors").key_path("name")),
            )?;
            reindexed.open().wait()?;

            let old = reindexed
                .store("books")
                .get_by_range(Target::index("by_year", KeyRange::upper_bound(1900, false)))
                .wait()?;
            assert_eq!(old.len(), 1);
            assert_eq!(old[0]["title"], "Emma");

            let dropped = reindexed
                .store("books")
                .get_by_range(Target::whole_index("author"))
                .wait();
            assert_eq!(dropped.unwrap_err().kind(), &ErrorKind::IndexNotFound);
            reindexed.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_reopen_at_same_version_skips_migration() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("authors").set(json!({"name": "Austen"})).wait()?;
            db.close()?;

            let again = ctx.sibling()?;
            again.version_with_rescue(1, SchemaSnapshot::new(), |_| {
                panic!("no migration should run at the stored version")
            })?;
            again.open().wait()?;
            assert_eq!(again.store_names()?, vec!["authors".to_string(), "books".to_string()]);
            again.close()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_open_below_stored_version_fails() {
    let engine = MemoryEngine::new();
    let newer = Idxd::with_engine("catalog", engine.clone()).unwrap();
    newer.version(1, library_schema()).unwrap();
    newer.version(2, library_schema()).unwrap();
    newer.open().wait().unwrap();
    newer.close().unwrap();

    let older = Idxd::with_engine("catalog", engine).unwrap();
    older.version(1, library_schema()).unwrap();
    let err = older.open().wait().unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::VersionError);
    assert!(!older.is_open());
}
