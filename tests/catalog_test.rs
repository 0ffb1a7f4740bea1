use granite::engine::StorageEngine;
use granite::record::{Column, Field, Row, RowId, Schema};
use granite::EngineError;
use tempfile::tempdir;

fn schema() -> Schema {
    Schema::new(vec![
        Column::new_int("id", 0, false, true),
        Column::new_char("owner", 12, 1, false, false),
        Column::new_float("balance", 2, true, false),
    ])
}

fn account(id: i32, owner: &str, balance: f32) -> Row {
    Row::new(vec![
        Field::Int(id),
        Field::Char(owner.into()),
        Field::Float(balance),
    ])
}

#[test]
fn table_lifecycle_and_name_conflicts() {
    let dir = tempdir().unwrap();
    let mut engine = StorageEngine::create(dir.path().join("test.db"), 64).unwrap();
    let catalog = engine.catalog_mut();

    let table = catalog.create_table("accounts", schema()).unwrap();
    assert_eq!(table.name(), "accounts");
    assert_eq!(table.schema().column_count(), 3);

    assert!(matches!(
        catalog.create_table("accounts", schema()),
        Err(EngineError::TableAlreadyExists(_))
    ));
    assert!(matches!(
        catalog.get_table("missing"),
        Err(EngineError::TableNotFound(_))
    ));

    catalog.create_table("orders", schema()).unwrap();
    let names: Vec<String> = catalog
        .get_tables()
        .iter()
        .map(|t| t.name().to_string())
        .collect();
    assert_eq!(names, vec!["accounts", "orders"]);

    catalog.drop_table("accounts").unwrap();
    assert!(matches!(
        catalog.get_table("accounts"),
        Err(EngineError::TableNotFound(_))
    ));
    assert!(matches!(
        catalog.drop_table("accounts"),
        Err(EngineError::TableNotFound(_))
    ));
    assert_eq!(catalog.get_tables().len(), 1);
}

#[test]
fn index_lifecycle_and_errors() {
    let dir = tempdir().unwrap();
    let mut engine = StorageEngine::create(dir.path().join("test.db"), 64).unwrap();
    let catalog = engine.catalog_mut();
    catalog.create_table("accounts", schema()).unwrap();

    assert!(matches!(
        catalog.create_index("missing", "idx", &["id"]),
        Err(EngineError::TableNotFound(_))
    ));
    assert!(matches!(
        catalog.create_index("accounts", "idx", &["nope"]),
        Err(EngineError::ColumnNotFound(_))
    ));

    let index = catalog
        .create_index("accounts", "accounts_by_id", &["id"])
        .unwrap();
    assert_eq!(index.key_column_indexes(), &[0]);
    assert!(matches!(
        catalog.create_index("accounts", "accounts_by_id", &["id"]),
        Err(EngineError::IndexAlreadyExists(_))
    ));

    catalog
        .create_index("accounts", "accounts_by_owner", &["owner"])
        .unwrap();
    let names: Vec<String> = catalog
        .get_table_indexes("accounts")
        .unwrap()
        .iter()
        .map(|i| i.name().to_string())
        .collect();
    assert_eq!(names, vec!["accounts_by_id", "accounts_by_owner"]);

    catalog.drop_index("accounts", "accounts_by_id").unwrap();
    assert!(matches!(
        catalog.get_index("accounts", "accounts_by_id"),
        Err(EngineError::IndexNotFound(_))
    ));
    assert_eq!(catalog.get_table_indexes("accounts").unwrap().len(), 1);
}

#[test]
fn drop_table_takes_its_indexes_with_it() {
    let dir = tempdir().unwrap();
    let mut engine = StorageEngine::create(dir.path().join("test.db"), 64).unwrap();
    let pages_at_start = engine.disk().meta().num_allocated_pages;
    let catalog = engine.catalog_mut();

    let table = catalog.create_table("accounts", schema()).unwrap();
    let index = catalog
        .create_index("accounts", "accounts_by_id", &["id"])
        .unwrap();
    for id in 0..200 {
        let mut row = account(id, "ada", 1.0);
        let rid = table.heap().insert_tuple(&mut row).unwrap();
        index
            .tree()
            .insert(&row.key_row(index.key_column_indexes()), rid)
            .unwrap();
    }

    catalog.drop_table("accounts").unwrap();
    assert!(matches!(
        catalog.get_index("accounts", "accounts_by_id"),
        Err(EngineError::IndexNotFound(_))
    ));
    // Heap chain, tree pages, and both metadata pages all returned.
    assert_eq!(engine.disk().meta().num_allocated_pages, pages_at_start);
}

#[test]
fn catalog_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.db");
    let stored_rid: RowId;
    {
        let mut engine = StorageEngine::create(&path, 64).unwrap();
        let catalog = engine.catalog_mut();
        let table = catalog.create_table("accounts", schema()).unwrap();
        let index = catalog
            .create_index("accounts", "accounts_by_id", &["id"])
            .unwrap();

        let mut rid = RowId::default();
        for id in 0..50 {
            let mut row = account(id, &format!("owner{id}"), id as f32 * 1.5);
            rid = table.heap().insert_tuple(&mut row).unwrap();
            index
                .tree()
                .insert(&row.key_row(index.key_column_indexes()), rid)
                .unwrap();
        }
        stored_rid = rid;
        engine.flush().unwrap();
    }

    let engine = StorageEngine::open(&path, 64).unwrap();
    let catalog = engine.catalog();

    let table = catalog.get_table("accounts").unwrap();
    assert_eq!(table.schema(), &schema());
    assert_eq!(table.heap().iter().unwrap().count(), 50);

    let last = table.heap().get_tuple(stored_rid).unwrap().unwrap();
    assert_eq!(
        last.fields,
        vec![
            Field::Int(49),
            Field::Char("owner49".into()),
            Field::Float(73.5)
        ]
    );

    let index = catalog.get_index("accounts", "accounts_by_id").unwrap();
    let probe = Row::new(vec![Field::Int(49)]);
    assert_eq!(index.tree().get_value(&probe).unwrap(), Some(stored_rid));

    // Ids keep counting up after a reload instead of being reused.
    let mut engine = engine;
    let table2 = engine.catalog_mut().create_table("orders", schema()).unwrap();
    assert_eq!(table2.table_id(), 1);
}
