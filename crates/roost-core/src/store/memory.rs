use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{AclRecord, Scope, Store};
use crate::error::{StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    data: HashMap<Scope, BTreeMap<String, String>>,
    room_plugins: HashMap<String, BTreeSet<String>>,
    /// (source, target) edges.
    config_room: BTreeSet<(String, String)>,
    config_acl: HashMap<String, AclRecord>,
}

/// In-memory [`Store`] backend.
///
/// Contents are lost when the process exits.  Cloning is not supported; share
/// it through an `Arc`.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, scope: &Scope, key: &str) -> StoreResult<Option<String>> {
        Ok(self
            .tables
            .read()
            .data
            .get(scope)
            .and_then(|m| m.get(key))
            .cloned())
    }

    async fn set(&self, scope: &Scope, key: &str, value: &str) -> StoreResult<()> {
        self.tables
            .write()
            .data
            .entry(scope.clone())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, scope: &Scope, key: &str) -> StoreResult<()> {
        if let Some(map) = self.tables.write().data.get_mut(scope) {
            map.remove(key);
        }
        Ok(())
    }

    async fn keys(&self, scope: &Scope) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .data
            .get(scope)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn active_plugins(&self, room_id: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .room_plugins
            .get(room_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()> {
        self.tables
            .write()
            .room_plugins
            .entry(room_id.to_string())
            .or_default()
            .insert(plugin.to_string());
        Ok(())
    }

    async fn remove_active_plugin(&self, room_id: &str, plugin: &str) -> StoreResult<()> {
        if let Some(set) = self.tables.write().room_plugins.get_mut(room_id) {
            set.remove(plugin);
        }
        Ok(())
    }

    async fn add_config_link(&self, source: &str, target: &str) -> StoreResult<()> {
        self.tables
            .write()
            .config_room
            .insert((source.to_string(), target.to_string()));
        Ok(())
    }

    async fn remove_config_link(&self, source: &str, target: &str) -> StoreResult<()> {
        self.tables
            .write()
            .config_room
            .remove(&(source.to_string(), target.to_string()));
        Ok(())
    }

    async fn config_targets(&self, source: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .config_room
            .iter()
            .filter(|(s, _)| s == source)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn config_sources(&self, target: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .tables
            .read()
            .config_room
            .iter()
            .filter(|(_, t)| t == target)
            .map(|(s, _)| s.clone())
            .collect())
    }

    async fn load_acl(&self, room_id: &str) -> StoreResult<Option<AclRecord>> {
        Ok(self.tables.read().config_acl.get(room_id).cloned())
    }

    async fn save_acl(
        &self,
        room_id: &str,
        blob: &str,
        expected: Option<u64>,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write();
        let current = tables.config_acl.get(room_id).map(|r| r.revision);
        if current != expected {
            return Err(StoreError::Conflict {
                room_id: room_id.to_string(),
            });
        }
        let revision = current.map_or(1, |r| r + 1);
        tables.config_acl.insert(
            room_id.to_string(),
            AclRecord {
                blob: blob.to_string(),
                revision,
            },
        );
        Ok(revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = MemoryStore::new();
        store.set(&Scope::room("!a"), "k", "room").await.unwrap();
        store.set(&Scope::plugin("echo"), "k", "plugin").await.unwrap();
        store
            .set(&Scope::room_plugin("!a", "echo"), "k", "both")
            .await
            .unwrap();
        store.set(&Scope::Global, "k", "global").await.unwrap();

        assert_eq!(
            store.get(&Scope::room("!a"), "k").await.unwrap().as_deref(),
            Some("room")
        );
        assert_eq!(
            store
                .get(&Scope::room_plugin("!a", "echo"), "k")
                .await
                .unwrap()
                .as_deref(),
            Some("both")
        );
        assert_eq!(store.get(&Scope::room("!b"), "k").await.unwrap(), None);

        store.delete(&Scope::Global, "k").await.unwrap();
        assert!(store.keys(&Scope::Global).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_links() {
        let store = MemoryStore::new();
        store.add_config_link("!cfg", "!a").await.unwrap();
        store.add_config_link("!cfg", "!b").await.unwrap();
        store.add_config_link("!cfg", "!a").await.unwrap();

        assert_eq!(store.config_targets("!cfg").await.unwrap(), vec!["!a", "!b"]);
        assert_eq!(store.config_sources("!b").await.unwrap(), vec!["!cfg"]);

        store.remove_config_link("!cfg", "!a").await.unwrap();
        assert_eq!(store.config_targets("!cfg").await.unwrap(), vec!["!b"]);
    }

    #[tokio::test]
    async fn test_acl_revision_check() {
        let store = MemoryStore::new();
        assert_eq!(store.save_acl("!a", "{}", None).await.unwrap(), 1);
        assert!(matches!(
            store.save_acl("!a", "{}", None).await,
            Err(StoreError::Conflict { .. })
        ));
        assert_eq!(store.save_acl("!a", "{\"x\":1}", Some(1)).await.unwrap(), 2);
        assert!(store.save_acl("!a", "{}", Some(1)).await.is_err());
        assert_eq!(store.load_acl("!a").await.unwrap().unwrap().revision, 2);
    }
}
