use crate::transaction::{book, shelf};
use idxd::common::{KeyRange, Target};
use idxd::errors::{ErrorKind, IdxdError};
use idxd::operation::{Operation, Outcome};
use idxd::store::TransactionMode;
use idxd::transaction::{script_fn, Sequence, Step};
use idxd_int_test::test_util::{cleanup, create_test_context, run_test};
use serde_json::json;

#[test]
fn test_session_commits_every_write() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let count = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Emma", "Austen", 40))))
                        .then(|tx, _| Ok(tx.store("books")?.count()))
                        .finish(|outcome| outcome.into_count()),
                )
                .wait()?;
            assert_eq!(count, 2);
            assert_eq!(db.store("books").count().wait()?, 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_each_step_sees_previous_result() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let stored = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then(|tx, stored| {
                            let mut record = stored.into_record()?.unwrap_or_default();
                            record["pages"] = json!(31);
                            Ok(tx.store("books")?.set(record))
                        })
                        .then(|tx, _| Ok(tx.store("books")?.get(1.into())))
                        .finish(|outcome| outcome.into_record()),
                )
                .wait()?;
            assert_eq!(
                stored,
                Some(json!({"id": 1, "title": "Dune", "author": "Herbert", "pages": 31}))
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_script_error_rolls_back() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let result = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::<()>::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then(|_, _| Err(IdxdError::new("out of shelf space", ErrorKind::ScriptError))),
                )
                .wait();
            let err = result.unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ScriptError);
            assert_eq!(err.message(), "out of shelf space");
            assert_eq!(db.store("books").count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_explicit_abort_rolls_back() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").set(book("Emma", "Austen", 40)).wait()?;

            let result = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::<()>::new()
                        .then(|tx, _| Ok(tx.store("books")?.clear()))
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then_abort(),
                )
                .wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::TransactionAborted);

            let books = db.store("books").get_all().wait()?;
            assert_eq!(books.len(), 1);
            assert_eq!(books[0]["title"], "Emma");
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_failed_operation_rolls_back() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let result = db
                .transaction(
                    ["books", "authors"],
                    TransactionMode::ReadWrite,
                    Sequence::<()>::new()
                        .then(|tx, _| Ok(tx.store("authors")?.set(json!({"name": "Herbert"}))))
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then(|tx, _| Ok(tx.store("authors")?.set(json!({"born": 1920}))))
                        .finish(|_| Ok(())),
                )
                .wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::DataError);
            assert_eq!(db.store("authors").count().wait()?, 0);
            assert_eq!(db.store("books").count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_store_outside_scope() {
    run_test(
        || create_test_context(),
        |ctx| {
            let result = ctx
                .db()
                .transaction(
                    "books",
                    TransactionMode::ReadOnly,
                    Sequence::new()
                        .then(|tx, _| Ok(tx.store("authors")?.count()))
                        .finish(|outcome| outcome.into_count()),
                )
                .wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::StoreNotFound);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_write_in_read_only_session_fails() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let result = db
                .transaction(
                    "books",
                    TransactionMode::ReadOnly,
                    Sequence::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .finish(|outcome| outcome.into_record()),
                )
                .wait();
            assert!(result.is_err());
            assert_eq!(db.store("books").count().wait()?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_unknown_store_in_scope() {
    run_test(
        || create_test_context(),
        |ctx| {
            let result = ctx
                .db()
                .transaction(
                    "magazines",
                    TransactionMode::ReadOnly,
                    script_fn(|_, _| Ok(Step::Done(()))),
                )
                .wait();
            assert_eq!(result.unwrap_err().kind(), &ErrorKind::StoreNotFound);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_custom_script_loops_over_outcomes() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            // Reads every book one key at a time until a key is missing.
            let mut next_key = 1;
            let mut titles = Vec::new();
            let titles = db
                .transaction(
                    "books",
                    TransactionMode::ReadOnly,
                    script_fn(move |tx, outcome| {
                        if next_key > 1 {
                            match outcome.into_record()? {
                                Some(record) => titles.push(record["title"].clone()),
                                None => return Ok(Step::Done(std::mem::take(&mut titles))),
                            }
                        }
                        let key = next_key;
                        next_key += 1;
                        Ok(Step::Yield(tx.store("books")?.get(key.into())))
                    }),
                )
                .wait()?;
            assert_eq!(
                titles,
                vec![
                    json!("A Wizard of Earthsea"),
                    json!("The Left Hand of Darkness"),
                    json!("Dune")
                ]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_read_through_index() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let by_le_guin = db
                .transaction(
                    "books",
                    TransactionMode::ReadOnly,
                    Sequence::new()
                        .then(|tx, _| {
                            Ok(tx
                                .store("books")?
                                .get_by_range(Target::index("author", KeyRange::only("Le Guin"))))
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(by_le_guin.len(), 2);
            assert!(by_le_guin.iter().all(|record| record["author"] == "Le Guin"));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_delete_by_range() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let removed = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| {
                            Ok(tx
                                .store("books")?
                                .delete_by_range(Target::range(KeyRange::upper_bound(2, false))))
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(removed.len(), 2);
            let left = db.store("books").get_all().wait()?;
            assert_eq!(left.len(), 1);
            assert_eq!(left[0]["id"], 3);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_early_done_skips_remaining_stages() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            let result = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| Ok(tx.store("books")?.set(book("Dune", "Herbert", 30))))
                        .then_step(|_, outcome: Outcome| Ok(Step::Done(outcome.into_record()?.is_some())))
                        .then(|tx, _| Ok(tx.store("books")?.clear()))
                        .finish(|_| Ok(false)),
                )
                .wait()?;
            assert!(result);
            assert_eq!(db.store("books").count().wait()?, 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
