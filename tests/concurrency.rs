//! Isolation and cache coherence under concurrent access to a file database

mod test_utils;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde_json::json;

use funcbase::catalog::IndexSpec;
use funcbase::rows::RowQuery;
use funcbase::storage::Datum;
use funcbase::{Caller, ErrorKind};

use test_utils::{object, tasks_spec, Harness};

fn file_harness(dir: &tempfile::TempDir) -> Harness {
    Harness::file(&dir.path().join("funcbase.db"))
}

#[test]
fn test_uncommitted_write_is_invisible_to_readers() {
    let dir = tempfile::tempdir().unwrap();
    let h = file_harness(&dir);
    h.fb.create_table(&tasks_spec()).unwrap();

    let tx = h.engine.begin_write().unwrap();
    tx.execute(
        "INSERT INTO tasks (id, title) VALUES (?1, ?2)",
        &[Datum::from("t1"), Datum::from("draft")],
    )
    .unwrap();

    // Readers come from the pool, so they neither block nor see the insert
    assert_eq!(h.count("tasks"), 0);
    let page = h
        .fb
        .fetch_rows("tasks", &RowQuery::default(), &Caller::anonymous())
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(h.fb.fetch_row("tasks", "t1").unwrap().is_none());

    tx.commit().unwrap();
    assert_eq!(h.count("tasks"), 1);

    // Dropped without commit: rolled back
    let tx = h.engine.begin_write().unwrap();
    tx.execute("DELETE FROM tasks", &[]).unwrap();
    drop(tx);
    assert_eq!(h.count("tasks"), 1);
}

#[test]
fn test_schema_reads_never_lag_finished_mutations() {
    const ROUNDS: usize = 12;
    let dir = tempfile::tempdir().unwrap();
    let h = file_harness(&dir);
    h.fb.create_table(&tasks_spec()).unwrap();

    let created = AtomicUsize::new(0);
    let dropped = AtomicBool::new(false);
    let done = AtomicBool::new(false);

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let anyone = Caller::anonymous();
                while !done.load(Ordering::SeqCst) {
                    // Anything finished before these loads must be visible
                    let gone = dropped.load(Ordering::SeqCst);
                    let floor = created.load(Ordering::SeqCst);

                    match h.fb.describe_table("tasks", &["indexes"]) {
                        Ok(info) => {
                            assert!(!gone, "described a dropped table");
                            let n = info.indexes.map_or(0, |i| i.len());
                            assert!(n >= floor, "{n} indexes described after {floor} were created");
                        }
                        Err(e) => assert_eq!(e.kind(), ErrorKind::Schema),
                    }
                    match h.fb.list_columns("tasks", false, &anyone) {
                        Ok(_) => assert!(!gone, "listed columns of a dropped table"),
                        Err(e) => assert_eq!(e.kind(), ErrorKind::Schema),
                    }
                    match h.fb.list_indexes("tasks") {
                        Ok(names) => {
                            assert!(!gone, "listed indexes of a dropped table");
                            assert!(names.len() >= floor);
                        }
                        Err(e) => assert_eq!(e.kind(), ErrorKind::Schema),
                    }
                }
            });
        }

        for i in 0..ROUNDS {
            let index = IndexSpec::new(format!("idx_tasks_{i}"), vec!["title".into()]);
            h.fb.create_index("tasks", &index).unwrap();
            created.store(i + 1, Ordering::SeqCst);

            let info = h.fb.describe_table("tasks", &["indexes"]).unwrap();
            assert_eq!(info.indexes.map(|ix| ix.len()), Some(i + 1));
        }

        h.fb.drop_table("tasks").unwrap();
        dropped.store(true, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(20));
        done.store(true, Ordering::SeqCst);
    });

    let err = h.fb.describe_table::<&str>("tasks", &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Schema);
}

#[test]
fn test_concurrent_writers_serialize() {
    let dir = tempfile::tempdir().unwrap();
    let h = file_harness(&dir);
    h.fb.create_table(&tasks_spec()).unwrap();

    thread::scope(|s| {
        for t in 0..4 {
            let fb = &h.fb;
            s.spawn(move || {
                let caller = Caller::user(format!("u{t}"));
                for _ in 0..10 {
                    fb.insert_row("tasks", &object(json!({"title": "$user.id"})), &caller)
                        .unwrap();
                }
            });
        }
    });

    assert_eq!(h.count("tasks"), 40);
    let mine = h
        .fb
        .fetch_rows(
            "tasks",
            &RowQuery::default().filter(json!({"title": "$user.id"})),
            &Caller::user("u2"),
        )
        .unwrap();
    assert_eq!(mine.total, 10);
}
