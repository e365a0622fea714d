//! Scoped, transactional per-room permission store.
//!
//! A room's ACL grants named roles either to specific users or to everyone
//! at or above a power-level threshold.  The model is purely additive: there
//! are no deny entries.  Bot admins satisfy every check.
//!
//! Mutation happens on a working copy obtained from [`RoomAcl::scope`]:
//!
//! ```rust,ignore
//! let mut scope = room.acl().scope().await?;
//! scope.user_role_add("@alice:example.org", "config");
//! scope.commit().await?;          // dropping the scope instead discards it
//! ```
//!
//! [`RoomAcl::update`] wraps the same flow around a closure: the working copy
//! is committed when the closure returns `Ok` and discarded on `Err`.
//!
//! Commits are checked against the revision loaded when the scope was opened.
//! If another scope committed in between, [`AclError::Conflict`] is returned
//! and nothing is written.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AclError, AclResult};
use crate::store::BoxedStore;

/// Role that allows reconfiguring a room through its config room.
pub const CONFIG_ROLE: &str = "config";

/// Serialized content of one room's ACL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclSnapshot {
    /// Explicit per-user grants.
    #[serde(default)]
    pub users: BTreeMap<String, BTreeSet<String>>,
    /// Grants to every user whose power level is at least the key.
    #[serde(default)]
    pub levels: BTreeMap<i64, BTreeSet<String>>,
}

impl AclSnapshot {
    /// Evaluates a role check against this snapshot (admins not included).
    pub fn grants(&self, role: &str, user_id: Option<&str>, power_level: Option<i64>) -> bool {
        if let Some(user) = user_id
            && self.users.get(user).is_some_and(|roles| roles.contains(role))
        {
            return true;
        }
        if let Some(level) = power_level {
            return self
                .levels
                .range(..=level)
                .any(|(_, roles)| roles.contains(role));
        }
        false
    }

    /// Returns `true` if nothing is granted.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.levels.is_empty()
    }
}

/// Lazy handle to one room's ACL.
///
/// Cheap to clone; every method reads the persisted document afresh.
#[derive(Clone)]
pub struct RoomAcl {
    room_id: String,
    store: BoxedStore,
    admins: Arc<BTreeSet<String>>,
}

impl RoomAcl {
    /// Creates a handle for `room_id`.
    pub fn new(room_id: impl Into<String>, store: BoxedStore, admins: Arc<BTreeSet<String>>) -> Self {
        Self {
            room_id: room_id.into(),
            store,
            admins,
        }
    }

    /// Room this handle belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Returns `true` if `user_id` is a bot admin.
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }

    /// Loads the persisted snapshot, or an empty one.
    pub async fn snapshot(&self) -> AclResult<AclSnapshot> {
        Ok(self.load().await?.0)
    }

    /// Opens a working copy.
    pub async fn scope(&self) -> AclResult<AclScope> {
        let (snapshot, revision) = self.load().await?;
        Ok(AclScope {
            acl: self.clone(),
            snapshot,
            revision,
            dirty: false,
        })
    }

    /// Runs `f` on a working copy and commits it if `f` succeeds.
    ///
    /// Returns `Ok(Err(e))` when `f` failed and the copy was discarded.
    pub async fn update<T, E, F>(&self, f: F) -> AclResult<Result<T, E>>
    where
        F: FnOnce(&mut AclScope) -> Result<T, E>,
    {
        let mut scope = self.scope().await?;
        match f(&mut scope) {
            Ok(value) => {
                scope.commit().await?;
                Ok(Ok(value))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    /// Checks whether a user or power level holds `role`.
    ///
    /// True if `user_id` is a bot admin, has an explicit grant, or if any
    /// threshold `<= power_level` grants the role.
    pub async fn is_allowed(
        &self,
        role: &str,
        user_id: Option<&str>,
        power_level: Option<i64>,
    ) -> AclResult<bool> {
        if user_id.is_some_and(|u| self.is_admin(u)) {
            return Ok(true);
        }
        Ok(self.snapshot().await?.grants(role, user_id, power_level))
    }

    async fn load(&self) -> AclResult<(AclSnapshot, Option<u64>)> {
        match self.store.load_acl(&self.room_id).await? {
            Some(record) => {
                let snapshot =
                    serde_json::from_str(&record.blob).map_err(|source| AclError::Codec {
                        room_id: self.room_id.clone(),
                        source,
                    })?;
                Ok((snapshot, Some(record.revision)))
            }
            None => Ok((AclSnapshot::default(), None)),
        }
    }
}

impl std::fmt::Debug for RoomAcl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomAcl")
            .field("room_id", &self.room_id)
            .finish_non_exhaustive()
    }
}

/// Working copy of a room ACL.
///
/// Mutations only touch the copy.  [`commit`](Self::commit) writes it back;
/// dropping the scope discards it.
#[derive(Debug)]
pub struct AclScope {
    acl: RoomAcl,
    snapshot: AclSnapshot,
    revision: Option<u64>,
    dirty: bool,
}

impl AclScope {
    /// The working copy.
    pub fn snapshot(&self) -> &AclSnapshot {
        &self.snapshot
    }

    /// Returns `true` if the working copy was modified.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Grants `role` to `user_id`.
    pub fn user_role_add(&mut self, user_id: &str, role: &str) {
        self.snapshot
            .users
            .entry(user_id.to_string())
            .or_default()
            .insert(role.to_string());
        self.dirty = true;
    }

    /// Revokes `role` from `user_id`.
    pub fn user_role_remove(&mut self, user_id: &str, role: &str) {
        if let Some(roles) = self.snapshot.users.get_mut(user_id) {
            roles.remove(role);
            if roles.is_empty() {
                self.snapshot.users.remove(user_id);
            }
        }
        self.dirty = true;
    }

    /// Revokes every role of `user_id`.
    pub fn user_roles_clear(&mut self, user_id: &str) {
        self.snapshot.users.remove(user_id);
        self.dirty = true;
    }

    /// Grants `role` to every user at or above `level`.
    pub fn level_role_add(&mut self, level: i64, role: &str) {
        self.snapshot
            .levels
            .entry(level)
            .or_default()
            .insert(role.to_string());
        self.dirty = true;
    }

    /// Revokes `role` from the `level` threshold.
    pub fn level_role_remove(&mut self, level: i64, role: &str) {
        if let Some(roles) = self.snapshot.levels.get_mut(&level) {
            roles.remove(role);
            if roles.is_empty() {
                self.snapshot.levels.remove(&level);
            }
        }
        self.dirty = true;
    }

    /// Removes every threshold grant at `level`.
    pub fn level_roles_clear(&mut self, level: i64) {
        self.snapshot.levels.remove(&level);
        self.dirty = true;
    }

    /// Checks a role against the working copy (admins included).
    pub fn is_allowed(&self, role: &str, user_id: Option<&str>, power_level: Option<i64>) -> bool {
        user_id.is_some_and(|u| self.acl.is_admin(u))
            || self.snapshot.grants(role, user_id, power_level)
    }

    /// Writes the working copy back if it was modified.
    ///
    /// Returns `true` if anything was written.
    pub async fn commit(self) -> AclResult<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let blob = serde_json::to_string(&self.snapshot).map_err(|source| AclError::Codec {
            room_id: self.acl.room_id.clone(),
            source,
        })?;
        let revision = self
            .acl
            .store
            .save_acl(&self.acl.room_id, &blob, self.revision)
            .await?;
        debug!(room_id = %self.acl.room_id, revision, "ACL committed");
        Ok(true)
    }
}
