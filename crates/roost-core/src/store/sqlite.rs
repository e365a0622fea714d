use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::{info, warn};

use super::{AclRecord, Scope, Store};
use crate::error::{StoreError, StoreResult};

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// SQLite [`Store`] backend built on a `sqlx` pool.
///
/// Schema migrations are embedded and applied on [`connect`](Self::connect).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Opens (or creates) the database at `path`.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let pool = if path == ":memory:" {
            // Unique shared-cache name so parallel tests do not collide.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let uri = format!(
                "file:roost-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );
            let options = SqliteConnectOptions::new()
                .filename(&uri)
                .shared_cache(true)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
                && let Err(e) = std::fs::create_dir_all(parent)
            {
                warn!(path = %parent.display(), error = %e, "Failed to create database directory");
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true);
            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(path = %path, "Store connected");

        Ok(Self { pool })
    }

    /// Underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, scope: &Scope, key: &str) -> StoreResult<Option<String>> {
        let value: Option<String> = match scope {
            Scope::Room(room) => {
                sqlx::query_scalar("SELECT value FROM room_data WHERE roomid = ? AND key = ?")
                    .bind(room)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?
            }
            Scope::Plugin(plugin) => {
                sqlx::query_scalar(
                    "SELECT value FROM plugin_data WHERE pluginname = ? AND key = ?",
                )
                .bind(plugin)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
            }
            Scope::RoomPlugin { room, plugin } => {
                sqlx::query_scalar(
                    "SELECT value FROM room_plugin_data WHERE roomid = ? AND pluginname = ? AND key = ?",
                )
                .bind(room)
                .bind(plugin)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?
            }
            Scope::Global => {
                sqlx::query_scalar("SELECT value FROM global_data WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(value)
    }

    async fn set(&self, scope: &Scope, key: &str, value: &str) -> StoreResult<()> {
        let query = match scope {
            Scope::Room(room) => sqlx::query(
                "INSERT INTO room_data (roomid, key, value) VALUES (?, ?, ?)
                 ON CONFLICT (roomid, key) DO UPDATE SET value = excluded.value",
            )
            .bind(room),
            Scope::Plugin(plugin) => sqlx::query(
                "INSERT INTO plugin_data (pluginname, key, value) VALUES (?, ?, ?)
                 ON CONFLICT (pluginname, key) DO UPDATE SET value = excluded.value",
            )
            .bind(plugin),
            Scope::RoomPlugin { room, plugin } => sqlx::query(
                "INSERT INTO room_plugin_data (roomid, pluginname, key, value) VALUES (?, ?, ?, ?)
                 ON CONFLICT (roomid, pluginname, key) DO UPDATE SET value = excluded.value",
            )
            .bind(room)
            .bind(plugin),
            Scope::Global => sqlx::query(
                "INSERT INTO global_data (key, value) VALUES (?, ?)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
            ),
        };
        query.bind(key).bind(value).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete(&self, scope: &Scope, key: &str) -> StoreResult<()> {
        let query = match scope {
            Scope::Room(room) => {
                sqlx::query("DELETE FROM room_data WHERE roomid = ? AND key = ?").bind(room)
            }
            Scope::Plugin(plugin) => {
                sqlx::query("DELETE FROM plugin_data WHERE pluginname = ? AND key = ?")
                    .bind(plugin)
            }
            Scope::RoomPlugin { room, plugin } => sqlx::query(
                "DELETE FROM room_plugin_data WHERE roomid = ? AND pluginname = ? AND key = ?",
            )
            .bind(room)
            .bind(plugin),
            Scope::Global => sqlx::query("DELETE FROM global_data WHERE key = ?"),
        };
        query.bind(key).execute(&self.pool).await?;
        Ok(())
    }

    async fn keys(&self, scope: &Scope) -> StoreResult<Vec<String>> {
        let keys: Vec<String> = match scope {
            Scope::Room(room) => {
                sqlx::query_scalar("SELECT key FROM room_data WHERE roomid = ? ORDER BY key")
                    .bind(room)
                    .fetch_all(&self.pool)
                    .await?
            }
            Scope::Plugin(plugin) => {
                sqlx::query_scalar(
                    "SELECT key FROM plugin_data WHERE pluginname = ? ORDER BY key",
                )
                .bind(plugin)
                .fetch_all(&self.pool)
                .await?
            }
            Scope::RoomPlugin { room, plugin } => {
                sqlx::query_scalar(
                    "SELECT key FROM room_plugin_data WHERE roomid = ? AND pluginname = ? ORDER BY key",
                )
                .bind(room)
                .bind(plugin)
                .fetch_all(&self.pool)
                .await?
            }
            Scope::Global => {
                sqlx::query_scalar("SELECT key FROM global_data ORDER BY key")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(keys)
    }

    async fn active_plugins(&self, room_id: &str) -> StoreResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT pluginname FROM room_plugins WHERE roomid = ? ORDER BY pluginname",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn add_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO room_plugins (roomid, pluginname) VALUES (?, ?)")
            .bind(room_id)
            .bind(plugin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM room_plugins WHERE roomid = ? AND pluginname = ?")
            .bind(room_id)
            .bind(plugin)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_config_link(&self, source: &str, target: &str) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO config_room (source_roomid, target_roomid) VALUES (?, ?)",
        )
        .bind(source)
        .bind(target)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_config_link(&self, source: &str, target: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM config_room WHERE source_roomid = ? AND target_roomid = ?")
            .bind(source)
            .bind(target)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn config_targets(&self, source: &str) -> StoreResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT target_roomid FROM config_room WHERE source_roomid = ? ORDER BY target_roomid",
        )
        .bind(source)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn config_sources(&self, target: &str) -> StoreResult<Vec<String>> {
        Ok(sqlx::query_scalar(
            "SELECT source_roomid FROM config_room WHERE target_roomid = ? ORDER BY source_roomid",
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn load_acl(&self, room_id: &str) -> StoreResult<Option<AclRecord>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT acl_blob, revision FROM config_acl WHERE roomid = ?")
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(blob, revision)| AclRecord {
            blob,
            revision: revision as u64,
        }))
    }

    async fn save_acl(
        &self,
        room_id: &str,
        blob: &str,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let (result, revision) = match expected {
            None => (
                sqlx::query(
                    "INSERT OR IGNORE INTO config_acl (roomid, acl_blob, revision) VALUES (?, ?, 1)",
                )
                .bind(room_id)
                .bind(blob)
                .execute(&self.pool)
                .await?,
                1,
            ),
            Some(rev) => (
                sqlx::query(
                    "UPDATE config_acl SET acl_blob = ?, revision = revision + 1
                     WHERE roomid = ? AND revision = ?",
                )
                .bind(blob)
                .bind(room_id)
                .bind(rev as i64)
                .execute(&self.pool)
                .await?,
                rev + 1,
            ),
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                room_id: room_id.to_string(),
            });
        }
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_round_trip_and_revision() {
        let store = SqliteStore::connect(":memory:").await.unwrap();

        store
            .set(&Scope::room_plugin("!a", "echo"), "greeting", "hi")
            .await
            .unwrap();
        store
            .set(&Scope::room_plugin("!a", "echo"), "greeting", "hello")
            .await
            .unwrap();
        assert_eq!(
            store
                .get(&Scope::room_plugin("!a", "echo"), "greeting")
                .await
                .unwrap()
                .as_deref(),
            Some("hello")
        );

        store.add_active_plugin("!a", "echo").await.unwrap();
        store.add_active_plugin("!a", "echo").await.unwrap();
        assert_eq!(store.active_plugins("!a").await.unwrap(), vec!["echo"]);

        assert_eq!(store.save_acl("!a", "{}", None).await.unwrap(), 1);
        assert!(matches!(
            store.save_acl("!a", "{}", None).await,
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.save_acl("!a", "{}", Some(1)).await.unwrap(), 2);
    }
}
