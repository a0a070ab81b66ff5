use idxd::common::{from_records, to_record, Key, KeyRange, Target};
use idxd::errors::ErrorKind;
use idxd::migration::{SchemaSnapshot, StoreSpec};
use idxd_int_test::test_util::{
    cleanup, create_test_context, create_test_context_with, library_schema, run_test,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    name: String,
    born: u32,
}

#[test]
fn test_set_and_get() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            let stored = books.set(json!({"title": "Dune"})).wait()?;
            assert_eq!(stored, Some(json!({"id": 1, "title": "Dune"})));

            assert_eq!(books.get(1).wait()?, stored);
            assert_eq!(books.get(2).wait()?, None);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_set_replaces_existing_record() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            books.set(json!({"title": "Dune"})).wait()?;
            books.set(json!({"id": 1, "title": "Dune Messiah"})).wait()?;

            assert_eq!(books.count().wait()?, 1);
            assert_eq!(books.get(1).wait()?, Some(json!({"id": 1, "title": "Dune Messiah"})));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_set_with_out_of_line_key() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder.version(1, library_schema().store(StoreSpec::new("notes")))
            })
        },
        |ctx| {
            let notes = ctx.db().store("notes");
            notes.set_with_key(json!("remember the milk"), "monday").wait()?;
            notes.set_with_key(json!("call home"), "tuesday").wait()?;

            assert_eq!(notes.get("monday").wait()?, Some(json!("remember the milk")));
            assert_eq!(notes.count().wait()?, 2);

            let err = ctx.db().store("books").set_with_key(json!({"title": "Dune"}), 7).wait();
            assert_eq!(err.unwrap_err().kind(), &ErrorKind::DataError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_typed_records() {
    run_test(
        || create_test_context(),
        |ctx| {
            let authors = ctx.db().store("authors");
            let le_guin = Author {
                name: "Le Guin".to_string(),
                born: 1929,
            };
            let herbert = Author {
                name: "Herbert".to_string(),
                born: 1920,
            };
            authors
                .bulk_set(vec![to_record(&le_guin)?, to_record(&herbert)?])
                .wait()?;

            let all: Vec<Author> = from_records(authors.get_all().wait()?)?;
            assert_eq!(all, vec![herbert, le_guin]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_get_by_range() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            books
                .bulk_set((1..=5).map(|n| json!({"title": format!("Volume {}", n)})).collect())
                .wait()?;

            let middle = books
                .get_by_range(Target::range(KeyRange::bound(2, 4, false, true)?))
                .wait()?;
            let ids: Vec<_> = middle.iter().map(|record| record["id"].clone()).collect();
            assert_eq!(ids, vec![json!(2), json!(3)]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_delete() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            books.set(json!({"title": "Dune"})).wait()?;

            assert_eq!(books.delete(1).wait()?, Some(json!({"id": 1, "title": "Dune"})));
            assert_eq!(books.delete(1).wait()?, None);
            assert_eq!(books.count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_bulk_set_and_bulk_delete() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            let stored = books
                .bulk_set(vec![
                    json!({"title": "Dune"}),
                    json!({"title": "Emma"}),
                    json!({"title": "Ulysses"}),
                ])
                .wait()?;
            let ids: Vec<_> = stored.iter().map(|record| record["id"].clone()).collect();
            assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

            let removed = books
                .bulk_delete(vec![Key::from(1), Key::from(3), Key::from(42)])
                .wait()?;
            assert_eq!(removed.len(), 2);
            assert_eq!(books.get_all().wait()?, vec![json!({"id": 2, "title": "Emma"})]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_bulk_set_is_atomic() {
    run_test(
        || create_test_context(),
        |ctx| {
            let authors = ctx.db().store("authors");
            let result = authors
                .bulk_set(vec![json!({"name": "Austen"}), json!({"born": 1775})])
                .wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::DataError);
            assert_eq!(authors.count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_clear_is_idempotent() {
    run_test(
        || create_test_context(),
        |ctx| {
            let books = ctx.db().store("books");
            books
                .bulk_set(vec![json!({"title": "Dune"}), json!({"title": "Emma"})])
                .wait()?;

            assert_eq!(books.clear().wait()?.len(), 2);
            assert!(books.clear().wait()?.is_empty());
            assert_eq!(books.count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_unknown_store() {
    run_test(
        || create_test_context(),
        |ctx| {
            let result = ctx.db().store("magazines").count().wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::StoreNotFound);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_closed_database() {
    run_test(
        || {
            create_test_context_with(|builder| {
                builder.version(1, SchemaSnapshot::new().store(StoreSpec::new("books")))
            })
        },
        |ctx| {
            let db = ctx.db();
            db.close()?;
            let result = db.store("books").count().wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::DatabaseClosed);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
