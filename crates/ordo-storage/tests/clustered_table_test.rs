//! Clustered table integration tests.
//!
//! Exercises the storage core against an on-disk object store:
//! - Randomized inserts and deletes checked against the table invariants
//! - Secondary index completeness under cascading shifts
//! - Reopening tables and indexes from disk
//! - Lazy scans and predicate selections

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

use ordo_common::{PageId, TypeId, Value};
use ordo_storage::{
    ClusteredTable, ColumnDef, Combinator, CompareOp, DiskStore, DiskStoreConfig, IndexBinding,
    ObjectStore, Predicate, Selection, TableSchema,
};

// =============================================================================
// Helpers
// =============================================================================

fn students_schema() -> TableSchema {
    TableSchema::new(
        "students",
        "id",
        vec![
            ColumnDef::new("id", TypeId::Int),
            ColumnDef::new("name", TypeId::Text),
            ColumnDef::new("gpa", TypeId::Double),
        ],
    )
    .unwrap()
}

fn create_disk_store() -> (Arc<dyn ObjectStore>, TempDir) {
    let dir = tempdir().unwrap();
    let store = DiskStore::new(DiskStoreConfig {
        data_dir: dir.path().to_path_buf(),
        fsync_enabled: false,
    })
    .unwrap();
    (Arc::new(store), dir)
}

fn binding(column: &str) -> IndexBinding {
    IndexBinding {
        column: column.to_string(),
        index_name: format!("{}Index", column),
    }
}

fn insert(table: &mut ClusteredTable, id: i64, name: &str, gpa: f64) -> PageId {
    table
        .insert_row(&[
            ("id", Value::Int(id)),
            ("name", Value::from(name)),
            ("gpa", Value::Double(gpa)),
        ])
        .unwrap()
}

fn all_ids(table: &ClusteredTable) -> Vec<i64> {
    table
        .scan()
        .map(|t| t.unwrap().key(0).as_int().unwrap())
        .collect()
}

// =============================================================================
// Invariants under random workloads
// =============================================================================

#[test]
fn test_random_inserts_keep_global_order() {
    let (store, _dir) = create_disk_store();
    let mut table = ClusteredTable::create(students_schema(), 8, 4, store).unwrap();
    table.create_index(&binding("name"), 4).unwrap();
    table.create_index(&binding("gpa"), 4).unwrap();

    let mut rng = StdRng::seed_from_u64(42);
    let mut ids: Vec<i64> = (0..400).collect();
    ids.shuffle(&mut rng);
    for (i, id) in ids.iter().enumerate() {
        let name = format!("n{}", rng.gen_range(0..20));
        insert(&mut table, *id, &name, (*id % 7) as f64 / 2.0);
        if i % 97 == 0 {
            table.verify().unwrap();
        }
    }

    table.verify().unwrap();
    assert_eq!(all_ids(&table), (0..400).collect::<Vec<_>>());
    assert_eq!(table.row_count(), 400);
    for (_, range) in table.page_ranges() {
        assert!(range.rows >= 1 && range.rows <= 8);
    }
    println!(
        "400 shuffled inserts: {} pages, name index height {}",
        table.page_count(),
        table.index("name").unwrap().tree().height()
    );
}

#[test]
fn test_random_mixed_workload() {
    let (store, _dir) = create_disk_store();
    let mut table = ClusteredTable::create(students_schema(), 5, 3, store).unwrap();
    table.create_index(&binding("name"), 3).unwrap();

    let mut rng = StdRng::seed_from_u64(7);
    let mut live: Vec<i64> = Vec::new();
    for step in 0..600 {
        let roll: u8 = rng.gen_range(0..10);
        if roll < 6 || live.is_empty() {
            let id = rng.gen_range(0..1000);
            let name = ["a", "b", "c"][rng.gen_range(0..3)];
            insert(&mut table, id, name, 1.0);
            live.push(id);
        } else if roll < 8 {
            let id = live[rng.gen_range(0..live.len())];
            let removed = table.delete_rows(&[("id", Value::Int(id))]).unwrap();
            let before = live.len();
            live.retain(|v| *v != id);
            assert_eq!(removed, before - live.len());
        } else {
            let id = live[rng.gen_range(0..live.len())];
            let name = ["a", "b", "c"][rng.gen_range(0..3)];
            table
                .update_row(&Value::Int(id), &[("name", Value::from(name))])
                .unwrap();
        }
        if step % 50 == 0 {
            table.verify().unwrap();
        }
    }

    table.verify().unwrap();
    live.sort();
    assert_eq!(all_ids(&table), live);
}

#[test]
fn test_delete_by_name_drops_pages_and_entries() {
    let (store, _dir) = create_disk_store();
    let mut table = ClusteredTable::create(students_schema(), 10, 4, store.clone()).unwrap();
    table.create_index(&binding("name"), 4).unwrap();
    for id in 0..50 {
        insert(&mut table, id, if id < 20 { "b" } else { "a" }, 0.5 + id as f64);
    }
    assert_eq!(table.page_count(), 5);

    let removed = table.delete_rows(&[("name", Value::from("a"))]).unwrap();
    assert_eq!(removed, 30);
    assert_eq!(table.page_ids(), vec![PageId(0), PageId(1)]);
    for page in 2..5 {
        assert!(store.load("students", &format!("page-{}", page)).unwrap().is_none());
    }
    assert!(table
        .index("name")
        .unwrap()
        .entry(&Value::from("a"))
        .unwrap()
        .is_empty());
    table.verify().unwrap();
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_reopen_from_disk() {
    let (store, _dir) = create_disk_store();
    let schema = {
        let mut table = ClusteredTable::create(students_schema(), 4, 3, store.clone()).unwrap();
        table.create_index(&binding("gpa"), 3).unwrap();
        for id in (0..60).rev() {
            insert(&mut table, id, "x", (id % 5) as f64);
        }
        table.delete_rows(&[("gpa", Value::Double(2.0))]).unwrap();
        table.schema().clone()
    };

    let mut table = ClusteredTable::open(schema, store).unwrap();
    table.verify().unwrap();
    assert_eq!(table.row_count(), 48);
    let pages = table.index("gpa").unwrap().pages_for(&Value::Double(4.0)).unwrap();
    assert!(!pages.is_empty());

    // page ids keep growing after a reopen
    let before = table.page_ids();
    for id in 1000..1005 {
        insert(&mut table, id, "y", 1.0);
    }
    let added = table.page_ids();
    assert!(added.len() > before.len());
    assert!(added.last().unwrap() > before.iter().max().unwrap());
    table.verify().unwrap();
}

// =============================================================================
// Selection
// =============================================================================

#[test]
fn test_selection_over_pages() {
    let (store, _dir) = create_disk_store();
    let mut table = ClusteredTable::create(students_schema(), 16, 4, store).unwrap();
    for id in 0..100 {
        insert(&mut table, id, if id % 2 == 0 { "even" } else { "odd" }, id as f64 / 10.0);
    }

    let selection = Selection::new(
        &table,
        &[
            Predicate::new("students", "name", CompareOp::Eq, "odd"),
            Predicate::new("students", "gpa", CompareOp::Ge, 9.0),
        ],
        &[Combinator::And],
    )
    .unwrap();
    let ids: Vec<i64> = selection
        .map(|t| t.unwrap().key(0).as_int().unwrap())
        .collect();
    assert_eq!(ids, vec![91, 93, 95, 97, 99]);

    let mut selection = Selection::new(
        &table,
        &[Predicate::new("students", "id", CompareOp::Lt, 3)],
        &[],
    )
    .unwrap();
    assert_eq!(selection.next().unwrap().unwrap().to_string(), "0,even,0");
    assert_eq!(selection.by_ref().count(), 2);
    assert!(selection.next().is_none());
}
