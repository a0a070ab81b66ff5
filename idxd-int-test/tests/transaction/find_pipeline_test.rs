use crate::transaction::shelf;
use idxd::common::{KeyRange, Target};
use idxd::operation::Operation;
use idxd::store::TransactionMode;
use idxd::transaction::Sequence;
use idxd_int_test::test_util::{cleanup, create_test_context, run_test};
use serde_json::json;
use std::sync::{Arc, Mutex};

#[test]
fn test_filter_then_map() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let pages = db
                .transaction(
                    "books",
                    TransactionMode::ReadOnly,
                    Sequence::new()
                        .then(|tx, _| {
                            Ok(tx
                                .store("books")?
                                .find(Target::all())
                                .filter(|record| record["pages"].as_u64().unwrap_or_default() > 15)
                                .map(|record| record["pages"].clone())
                                .to_array())
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(pages, vec![json!(20), json!(30)]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_each_visits_in_index_order() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let seen = Arc::new(Mutex::new(Vec::new()));
            let visited = seen.clone();
            db.transaction(
                "books",
                TransactionMode::ReadOnly,
                Sequence::new()
                    .then(move |tx, _| {
                        Ok(tx
                            .store("books")?
                            .find(Target::whole_index("author"))
                            .each(move |record| {
                                if let Ok(mut seen) = visited.lock() {
                                    seen.push(record["author"].clone());
                                }
                            }))
                    })
                    .finish(|_| Ok(())),
            )
            .wait()?;

            let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
            assert_eq!(seen, vec![json!("Herbert"), json!("Le Guin"), json!("Le Guin")]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_find_over_key_range() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let found = db
                .store("books")
                .find(Target::range(KeyRange::lower_bound(2, false)), |pipeline| {
                    pipeline.map(|record| record["title"].clone())
                })
                .wait()?;
            assert_eq!(found, vec![json!("The Left Hand of Darkness"), json!("Dune")]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_batch_update() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let updated = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| {
                            Ok(tx
                                .store("books")?
                                .find(Target::index("author", KeyRange::only("Le Guin")))
                                .batch_update(|mut record| {
                                    let pages = record["pages"].as_u64()?;
                                    record["pages"] = json!(pages * 2);
                                    Some(record)
                                }))
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(updated.len(), 2);

            let pages: Vec<_> = db
                .store("books")
                .get_all()
                .wait()?
                .into_iter()
                .map(|record| record["pages"].clone())
                .collect();
            assert_eq!(pages, vec![json!(20), json!(40), json!(30)]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_batch_update_skips_unchanged() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.db();
            db.store("books").bulk_set(shelf()).wait()?;

            let updated = db
                .transaction(
                    "books",
                    TransactionMode::ReadWrite,
                    Sequence::new()
                        .then(|tx, _| {
                            Ok(tx.store("books")?.find(Target::all()).batch_update(|record| {
                                if record["author"] == "Herbert" {
                                    let mut record = record;
                                    record["title"] = json!("Dune Messiah");
                                    Some(record)
                                } else {
                                    None
                                }
                            }))
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(updated.len(), 1);
            assert_eq!(updated[0]["title"], "Dune Messiah");
            assert_eq!(db.store("books").get(3).wait()?.unwrap_or_default()["title"], "Dune Messiah");
            assert_eq!(db.store("books").get(1).wait()?.unwrap_or_default()["title"], "A Wizard of Earthsea");
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_batch_delete() {
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
                                .find(Target::all())
                                .filter(|record| record["author"] == "Le Guin")
                                .batch_delete())
                        })
                        .finish(|outcome| outcome.into_records()),
                )
                .wait()?;
            assert_eq!(removed.len(), 2);

            let left = db.store("books").get_all().wait()?;
            assert_eq!(left.len(), 1);
            assert_eq!(left[0]["author"], "Herbert");
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
