use std::sync::Arc;

use tablet_orm::backends::SqliteBackend;
use tablet_orm::{DatabaseBackend, DatabasePool, DatabasePoolConfig};

/// Fresh in-memory database on a single connection
pub async fn memory_pool() -> Arc<dyn DatabasePool> {
    SqliteBackend::new()
        .create_pool("sqlite::memory:", DatabasePoolConfig::single_connection())
        .await
        .expect("in-memory SQLite pool")
}

/// User tables, excluding SQLite's internal ones
#[allow(dead_code)]
pub async fn table_names(pool: &Arc<dyn DatabasePool>) -> Vec<String> {
    pool.fetch_all(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        &[],
    )
    .await
    .expect("list tables")
    .iter()
    .map(|row| {
        row.get_by_name("name")
            .expect("name column")
            .as_str()
            .expect("text name")
            .to_string()
    })
    .collect()
}
