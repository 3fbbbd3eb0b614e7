mod common;

use std::fs;

use tablet_orm::migrations::{ColumnDefinition, ColumnType, MigrationLedger};
use tablet_orm::{
    DatabaseValue, MigrateTarget, MigrationConfig, MigrationRunner, MigrationSet, MigrationUnit, MigrationVersion, OrmError,
    RollbackTarget,
};
use tempfile::TempDir;

use common::{memory_pool, table_names};

fn catalog() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::change(1, "create artists", |schema| {
            schema.create_table("artists", |table| {
                table.id("id");
                table.string("name", Some(255)).not_null();
            });
        })
        .unwrap(),
        MigrationUnit::change(2, "add genre", |schema| {
            schema.add_column("artists", ColumnDefinition::new("genre", ColumnType::Text));
        })
        .unwrap(),
        MigrationUnit::change(3, "create albums", |schema| {
            schema.create_table("albums", |table| {
                table.id("id");
                table.integer("artist_id").not_null();
                table.string("title", None);
                table.foreign_key("artist_id", "artists", "id");
            });
            schema.rename_column("artists", "genre", "style");
        })
        .unwrap(),
    ]
}

fn versions(list: &[MigrationVersion]) -> Vec<i64> {
    list.iter().map(|version| version.0).collect()
}

#[tokio::test]
async fn test_migrate_then_rollback_all_restores_empty_schema() {
    let pool = memory_pool().await;
    let runner = MigrationRunner::new(pool.clone(), MigrationSet::new(catalog()).unwrap(), &MigrationConfig::default());

    let applied = runner.migrate(MigrateTarget::Latest).await.unwrap();
    assert_eq!(versions(&applied.applied), vec![1, 2, 3]);
    assert_eq!(table_names(&pool).await, vec!["albums", "artists", "schema_migrations"]);

    let reverted = runner.rollback(RollbackTarget::All).await.unwrap();
    assert_eq!(versions(&reverted.reverted), vec![3, 2, 1]);
    assert_eq!(table_names(&pool).await, vec!["schema_migrations"]);
    assert!(runner.ledger().applied().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let runner = MigrationRunner::new(memory_pool().await, MigrationSet::new(catalog()).unwrap(), &MigrationConfig::default());

    runner.migrate(MigrateTarget::Latest).await.unwrap();
    let second = runner.migrate(MigrateTarget::Latest).await.unwrap();

    assert!(second.applied.is_empty());
    assert_eq!(second.skipped_count, 3);
    assert_eq!(runner.current_version().await.unwrap(), Some(MigrationVersion(3)));
}

#[tokio::test]
async fn test_targets_bound_migrate_and_rollback() {
    let runner = MigrationRunner::new(memory_pool().await, MigrationSet::new(catalog()).unwrap(), &MigrationConfig::default());

    let applied = runner.migrate(MigrateTarget::Version(MigrationVersion(2))).await.unwrap();
    assert_eq!(versions(&applied.applied), vec![1, 2]);

    // A target below the current version applies nothing
    let below = runner.migrate(MigrateTarget::Version(MigrationVersion(1))).await.unwrap();
    assert!(below.applied.is_empty());

    runner.migrate(MigrateTarget::Latest).await.unwrap();
    let reverted = runner.rollback(RollbackTarget::Version(MigrationVersion(1))).await.unwrap();
    assert_eq!(versions(&reverted.reverted), vec![3, 2]);
    assert_eq!(runner.current_version().await.unwrap(), Some(MigrationVersion(1)));
}

#[tokio::test]
async fn test_failed_unit_stops_the_run_and_leaves_no_trace() {
    let pool = memory_pool().await;
    let units = vec![
        catalog().remove(0),
        MigrationUnit::up_down(
            2,
            "broken",
            |schema| {
                schema.create_table("albums", |table| {
                    table.id("id");
                });
                schema.execute("INSERT INTO missing_table (id) VALUES (1)");
            },
            |schema| {
                schema.drop_table("albums");
            },
        ),
        MigrationUnit::change(3, "create labels", |schema| {
            schema.create_table("labels", |table| {
                table.id("id");
            });
        })
        .unwrap(),
    ];
    let runner = MigrationRunner::new(pool.clone(), MigrationSet::new(units).unwrap(), &MigrationConfig::default());

    let error = runner.migrate(MigrateTarget::Latest).await.unwrap_err();
    match &error {
        OrmError::MigrationApply { version, name, .. } => {
            assert_eq!(*version, MigrationVersion(2));
            assert_eq!(name, "broken");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(!error.is_retryable());

    assert_eq!(runner.current_version().await.unwrap(), Some(MigrationVersion(1)));
    assert_eq!(table_names(&pool).await, vec!["artists", "schema_migrations"]);
}

#[tokio::test]
async fn test_irreversible_unit_fails_rollback() {
    let units = vec![
        catalog().remove(0),
        MigrationUnit::up_down(
            2,
            "seed artists",
            |schema| {
                schema.execute("INSERT INTO artists (name) VALUES ('Jon')");
            },
            |_| {},
        ),
    ];
    let runner = MigrationRunner::new(memory_pool().await, MigrationSet::new(units).unwrap(), &MigrationConfig::default());
    runner.migrate(MigrateTarget::Latest).await.unwrap();

    let error = runner.rollback(RollbackTarget::All).await.unwrap_err();
    assert!(matches!(
        error,
        OrmError::MigrationRevert { version: MigrationVersion(2), .. }
    ));
    assert_eq!(runner.current_version().await.unwrap(), Some(MigrationVersion(2)));
}

#[tokio::test]
async fn test_unapplied_older_unit_is_not_applied_later() {
    let pool = memory_pool().await;
    let config = MigrationConfig::default();
    let labels = || {
        MigrationUnit::change(3, "create labels", |schema| {
            schema.create_table("labels", |table| {
                table.id("id");
            });
        })
        .unwrap()
    };

    MigrationRunner::new(pool.clone(), MigrationSet::new(vec![catalog().remove(0), labels()]).unwrap(), &config)
        .migrate(MigrateTarget::Latest)
        .await
        .unwrap();

    let full = vec![catalog().remove(0), catalog().remove(1), labels()];
    let runner = MigrationRunner::new(pool, MigrationSet::new(full).unwrap(), &config);
    let result = runner.migrate(MigrateTarget::Latest).await.unwrap();

    assert!(result.applied.is_empty());
    assert!(!runner.ledger().is_applied(MigrationVersion(2)).await.unwrap());
}

#[tokio::test]
async fn test_custom_ledger_table() {
    let pool = memory_pool().await;
    let config = MigrationConfig {
        ledger_table: "tablet_versions".to_string(),
        ..MigrationConfig::default()
    };

    let runner = MigrationRunner::new(pool.clone(), MigrationSet::new(catalog()).unwrap(), &config);
    runner.migrate(MigrateTarget::Latest).await.unwrap();

    assert!(table_names(&pool).await.contains(&"tablet_versions".to_string()));
    let ledger = MigrationLedger::new(pool, "tablet_versions");
    assert_eq!(ledger.applied().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_units_loaded_from_directory() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("0001_create_artists.sql"),
        "-- change\nCREATE TABLE artists (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    name TEXT NOT NULL\n);\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("0002_seed_artists.sql"),
        "-- up\nINSERT INTO artists (name) VALUES ('Jon');\n-- down\nDELETE FROM artists WHERE name = 'Jon';\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("20240101_120000_add_genre.sql"),
        "-- change\nALTER TABLE artists ADD COLUMN genre TEXT;\n",
    )
    .unwrap();

    let pool = memory_pool().await;
    let config = MigrationConfig {
        migrations_dir: dir.path().to_path_buf(),
        ..MigrationConfig::default()
    };
    let runner = MigrationRunner::from_directory(pool.clone(), &config).unwrap();
    assert_eq!(runner.units().len(), 3);

    let applied = runner.migrate(MigrateTarget::Version(MigrationVersion(2))).await.unwrap();
    assert_eq!(versions(&applied.applied), vec![1, 2]);

    let applied = runner.migrate(MigrateTarget::Latest).await.unwrap();
    assert_eq!(versions(&applied.applied), vec![20240101120000]);

    let rows = pool.fetch_all("SELECT name, genre FROM artists", &[]).await.unwrap();
    assert_eq!(rows.len(), 1);

    let reverted = runner.rollback(RollbackTarget::All).await.unwrap();
    assert_eq!(versions(&reverted.reverted), vec![20240101120000, 2, 1]);
    assert_eq!(table_names(&pool).await, vec!["schema_migrations"]);
}

#[tokio::test]
async fn test_duplicate_sequence_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("0001_create_artists.sql"), "-- change\nCREATE TABLE artists (id INTEGER);").unwrap();
    fs::write(dir.path().join("0001_create_albums.sql"), "-- change\nCREATE TABLE albums (id INTEGER);").unwrap();

    let config = MigrationConfig {
        migrations_dir: dir.path().to_path_buf(),
        ..MigrationConfig::default()
    };
    let result = MigrationRunner::from_directory(memory_pool().await, &config);

    assert!(matches!(result, Err(OrmError::Discovery { .. })));
}

#[tokio::test]
async fn test_change_unit_reverts_in_reverse_order() {
    let pool = memory_pool().await;
    let unit = MigrationUnit::change(1, "create labels", |schema| {
        schema.create_table("labels", |table| {
            table.id("id");
        });
        schema.add_column("labels", ColumnDefinition::new("country", ColumnType::Text));
    })
    .unwrap();

    let descriptions: Vec<String> = unit.reverse_operations().unwrap().iter().map(|op| op.describe()).collect();
    assert_eq!(descriptions, vec!["remove_column(labels, country)", "drop_table(labels)"]);

    let runner = MigrationRunner::new(pool.clone(), MigrationSet::new(vec![unit]).unwrap(), &MigrationConfig::default());
    runner.migrate(MigrateTarget::Latest).await.unwrap();
    pool.execute("INSERT INTO labels (country) VALUES ('NO')", &[]).await.unwrap();

    // Dropping the table first would leave remove_column nothing to act on
    let reverted = runner.rollback(RollbackTarget::Previous).await.unwrap();
    assert_eq!(versions(&reverted.reverted), vec![1]);
    assert_eq!(table_names(&pool).await, vec!["schema_migrations"]);
    assert!(runner.ledger().applied().await.unwrap().is_empty());
}

fn directory_config(dir: &TempDir) -> MigrationConfig {
    MigrationConfig {
        migrations_dir: dir.path().to_path_buf(),
        ..MigrationConfig::default()
    }
}

#[tokio::test]
async fn test_table_options_survive_migration() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("0001_create_items.sql"),
        "-- up\nCREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER) STRICT;\n-- down\nDROP TABLE items;\n",
    )
    .unwrap();

    let pool = memory_pool().await;
    let runner = MigrationRunner::from_directory(pool.clone(), &directory_config(&dir)).unwrap();
    runner.migrate(MigrateTarget::Latest).await.unwrap();

    pool.execute("INSERT INTO items (qty) VALUES (3)", &[]).await.unwrap();
    assert!(pool.execute("INSERT INTO items (qty) VALUES ('three')", &[]).await.is_err());

    runner.rollback(RollbackTarget::All).await.unwrap();
    assert_eq!(table_names(&pool).await, vec!["schema_migrations"]);
}

#[tokio::test]
async fn test_trigger_file_migrates_and_rolls_back() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("0001_create_items.sql"),
        "-- change\nCREATE TABLE items (id INTEGER PRIMARY KEY, qty INTEGER);\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("0002_qty_trigger.sql"),
        "-- up\n\
         CREATE TRIGGER items_qty AFTER INSERT ON items\n\
         BEGIN\n\
           UPDATE items SET qty = 0 WHERE qty IS NULL AND id = NEW.id;\n\
         END;\n\
         -- down\n\
         DROP TRIGGER items_qty;\n",
    )
    .unwrap();

    let pool = memory_pool().await;
    let runner = MigrationRunner::from_directory(pool.clone(), &directory_config(&dir)).unwrap();
    let applied = runner.migrate(MigrateTarget::Latest).await.unwrap();
    assert_eq!(versions(&applied.applied), vec![1, 2]);

    pool.execute("INSERT INTO items (id) VALUES (1)", &[]).await.unwrap();
    let qty = pool
        .fetch_optional("SELECT qty FROM items WHERE id = 1", &[])
        .await
        .unwrap()
        .unwrap()
        .get_by_name("qty")
        .unwrap();
    assert_eq!(qty.as_i64(), Some(0));

    let reverted = runner.rollback(RollbackTarget::Previous).await.unwrap();
    assert_eq!(versions(&reverted.reverted), vec![2]);

    pool.execute("INSERT INTO items (id) VALUES (2)", &[]).await.unwrap();
    let qty = pool
        .fetch_optional("SELECT qty FROM items WHERE id = 2", &[])
        .await
        .unwrap()
        .unwrap()
        .get_by_name("qty")
        .unwrap();
    assert_eq!(qty, DatabaseValue::Null);
}

#[tokio::test]
async fn test_pool_health_check() {
    let pool = memory_pool().await;
    assert!(pool.health_check().await.is_ok());

    pool.close().await.unwrap();
    assert!(pool.health_check().await.is_err());
}
