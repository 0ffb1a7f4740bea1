use granite::btree::{BPlusTree, KeyCodec};
use granite::engine::StorageEngine;
use granite::record::{Column, Field, Row, RowId, Schema};
use granite::{INDEX_ROOTS_PAGE_ID, INVALID_PAGE_ID};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tempfile::tempdir;

fn engine(pool_size: usize) -> (tempfile::TempDir, StorageEngine) {
    let dir = tempdir().unwrap();
    let engine = StorageEngine::create(dir.path().join("test.db"), pool_size).unwrap();
    (dir, engine)
}

fn int_codec() -> KeyCodec {
    KeyCodec::new(Schema::new(vec![Column::new_int("k", 0, false, true)]))
}

fn key(v: i32) -> Row {
    Row::new(vec![Field::Int(v)])
}

fn small_tree(engine: &StorageEngine, index_id: i32) -> BPlusTree {
    BPlusTree::new(
        index_id,
        engine.buffer_pool().clone(),
        int_codec(),
        Some(4),
        Some(4),
    )
    .unwrap()
}

/// Decoded int keys in scan order.
fn scan_keys(tree: &BPlusTree) -> Vec<i32> {
    tree.begin()
        .unwrap()
        .map(|(bytes, _)| match tree.codec().decode(&bytes).fields[0] {
            Field::Int(v) => v,
            ref other => panic!("unexpected key field {other:?}"),
        })
        .collect()
}

#[test]
fn sequential_inserts_split_and_scan_in_order() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);

    for i in 1..=8 {
        assert!(tree.insert(&key(i), RowId::new(0, i as u32)).unwrap());
    }

    let pairs: Vec<(i32, RowId)> = tree
        .begin()
        .unwrap()
        .map(|(bytes, rid)| match tree.codec().decode(&bytes).fields[0] {
            Field::Int(v) => (v, rid),
            ref other => panic!("unexpected key field {other:?}"),
        })
        .collect();
    let expected: Vec<(i32, RowId)> = (1..=8).map(|i| (i, RowId::new(0, i as u32))).collect();
    assert_eq!(pairs, expected);

    // Eight keys at fan-out four cannot fit under a single leaf root.
    let root = engine.buffer_pool().fetch_page(tree.root_page_id()).unwrap();
    assert!(!root.read().btree_is_leaf());

    for i in 1..=8 {
        assert_eq!(tree.get_value(&key(i)).unwrap(), Some(RowId::new(0, i as u32)));
    }
    assert_eq!(tree.get_value(&key(9)).unwrap(), None);
}

#[test]
fn duplicate_key_is_rejected() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);
    assert!(tree.insert(&key(1), RowId::new(0, 1)).unwrap());
    assert!(!tree.insert(&key(1), RowId::new(0, 2)).unwrap());
    assert_eq!(tree.get_value(&key(1)).unwrap(), Some(RowId::new(0, 1)));
}

#[test]
fn deletes_merge_down_to_a_leaf_root() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);

    for i in 1..=8 {
        tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
    }
    for i in 4..=8 {
        tree.remove(&key(i)).unwrap();
    }

    assert_eq!(scan_keys(&tree), vec![1, 2, 3]);
    assert_eq!(tree.get_value(&key(5)).unwrap(), None);

    // Height shrank back to a lone leaf, and the root map tracked it.
    let root_page_id = tree.root_page_id();
    let root = engine.buffer_pool().fetch_page(root_page_id).unwrap();
    assert!(root.read().btree_is_leaf());
    drop(root);
    let roots = engine.buffer_pool().fetch_page(INDEX_ROOTS_PAGE_ID).unwrap();
    assert_eq!(roots.read().roots_get(0), Some(root_page_id));
}

#[test]
fn removing_everything_empties_the_tree() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);
    for i in 0..20 {
        tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
    }
    for i in 0..20 {
        tree.remove(&key(i)).unwrap();
    }
    assert!(tree.is_empty());
    assert_eq!(tree.root_page_id(), INVALID_PAGE_ID);
    assert_eq!(scan_keys(&tree), Vec::<i32>::new());

    // An emptied tree accepts new keys again.
    tree.insert(&key(7), RowId::new(1, 7)).unwrap();
    assert_eq!(scan_keys(&tree), vec![7]);
}

#[test]
fn remove_of_absent_key_is_a_noop() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);
    tree.remove(&key(5)).unwrap();
    for i in [1, 3, 5] {
        tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
    }
    tree.remove(&key(4)).unwrap();
    assert_eq!(scan_keys(&tree), vec![1, 3, 5]);
}

#[test]
fn range_scan_starts_at_the_seek_key() {
    let (_dir, engine) = engine(64);
    let tree = small_tree(&engine, 0);
    for i in (10..=100).step_by(10) {
        tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
    }

    let from_55: Vec<i32> = tree
        .begin_at(&key(55))
        .unwrap()
        .map(|(bytes, _)| match tree.codec().decode(&bytes).fields[0] {
            Field::Int(v) => v,
            ref other => panic!("unexpected key field {other:?}"),
        })
        .collect();
    assert_eq!(from_55, vec![60, 70, 80, 90, 100]);

    // An exact hit starts at the key itself; past-the-end is empty.
    assert_eq!(tree.begin_at(&key(100)).unwrap().count(), 1);
    assert_eq!(tree.begin_at(&key(101)).unwrap().count(), 0);
}

#[test]
fn randomized_inserts_and_deletes_keep_order() {
    let (_dir, engine) = engine(128);
    let tree = BPlusTree::new(
        0,
        engine.buffer_pool().clone(),
        int_codec(),
        Some(5),
        Some(5),
    )
    .unwrap();
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);

    let mut keys: Vec<i32> = (0..400).collect();
    keys.shuffle(&mut rng);
    for &k in &keys {
        assert!(tree.insert(&key(k), RowId::new(k, 0)).unwrap());
    }
    assert_eq!(scan_keys(&tree), (0..400).collect::<Vec<_>>());

    keys.shuffle(&mut rng);
    let (gone, kept) = keys.split_at(200);
    for &k in gone {
        tree.remove(&key(k)).unwrap();
    }
    let mut expected: Vec<i32> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(scan_keys(&tree), expected);

    for &k in gone {
        assert_eq!(tree.get_value(&key(k)).unwrap(), None);
    }
    for &k in kept {
        assert_eq!(tree.get_value(&key(k)).unwrap(), Some(RowId::new(k, 0)));
    }
    assert!(engine.buffer_pool().check_all_unpinned());
}

#[test]
fn destroy_returns_every_page_and_clears_the_root_entry() {
    let (_dir, engine) = engine(64);
    let pages_before = engine.disk().meta().num_allocated_pages;

    let tree = small_tree(&engine, 3);
    for i in 0..100 {
        tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
    }
    assert!(engine.disk().meta().num_allocated_pages > pages_before);

    tree.destroy().unwrap();
    assert_eq!(engine.disk().meta().num_allocated_pages, pages_before);
    let roots = engine.buffer_pool().fetch_page(INDEX_ROOTS_PAGE_ID).unwrap();
    assert_eq!(roots.read().roots_get(3), None);
}

#[test]
fn root_survives_reopen_through_the_roots_page() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    {
        let engine = StorageEngine::create(&path, 64).unwrap();
        let tree = small_tree(&engine, 9);
        for i in 0..50 {
            tree.insert(&key(i), RowId::new(0, i as u32)).unwrap();
        }
        engine.flush().unwrap();
    }
    let engine = StorageEngine::open(&path, 64).unwrap();
    let tree = small_tree(&engine, 9);
    assert!(!tree.is_empty());
    assert_eq!(scan_keys(&tree), (0..50).collect::<Vec<_>>());
    assert_eq!(tree.get_value(&key(17)).unwrap(), Some(RowId::new(0, 17)));
}
