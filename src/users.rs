//! Workspace user directory: full refresh to disk, single-user lookups over
//! the API, and an explicit in-process cache over the `users.json` snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{info, warn};

use crate::archive::Archiver;
use crate::layout::ExportLayout;
use crate::output::{CsvTable, read_json, write_json};
use crate::paginate::walk_pages;
use crate::slack::SlackClient;
use crate::{AppError, Result};

const USER_HEADERS: [&str; 2] = ["User ID", "Slack User Name"];
const BOT_HEADERS: [&str; 2] = ["User ID", "Slack Bot Name"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserKind {
    Active,
    Bot,
    Deleted,
}

impl UserKind {
    /// Bot status wins over deletion.
    pub fn classify(user: &Value) -> Self {
        if flag(user, "is_bot") {
            UserKind::Bot
        } else if flag(user, "deleted") {
            UserKind::Deleted
        } else {
            UserKind::Active
        }
    }

    fn file_stem(&self) -> &'static str {
        match self {
            UserKind::Active => "active_users",
            UserKind::Bot => "bot_users",
            UserKind::Deleted => "delete_users",
        }
    }

    fn headers(&self) -> &'static [&'static str] {
        match self {
            UserKind::Bot => &BOT_HEADERS,
            _ => &USER_HEADERS,
        }
    }
}

fn flag(value: &Value, key: &str) -> bool {
    value.get(key).and_then(Value::as_bool).unwrap_or(false)
}

pub fn user_id(user: &Value) -> Option<&str> {
    user.get("id").and_then(Value::as_str)
}

/// `profile.real_name`, then `real_name`, then `name`.
pub fn user_real_name(user: &Value) -> String {
    user.get("profile")
        .and_then(|p| p.get("real_name"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .or_else(|| user.get("real_name").and_then(Value::as_str))
        .or_else(|| user.get("name").and_then(Value::as_str))
        .unwrap_or_default()
        .to_string()
}

/// Users split into the three mutually exclusive groups.
#[derive(Debug, Default, Clone)]
pub struct UserPartitions {
    pub active: Vec<Value>,
    pub bots: Vec<Value>,
    pub deleted: Vec<Value>,
}

impl UserPartitions {
    pub fn from_users(users: &[Value]) -> Self {
        let mut partitions = Self::default();
        for user in users {
            let bucket = match UserKind::classify(user) {
                UserKind::Active => &mut partitions.active,
                UserKind::Bot => &mut partitions.bots,
                UserKind::Deleted => &mut partitions.deleted,
            };
            bucket.push(user.clone());
        }
        partitions
    }

    fn groups(&self) -> [(UserKind, &[Value]); 3] {
        [
            (UserKind::Active, self.active.as_slice()),
            (UserKind::Deleted, self.deleted.as_slice()),
            (UserKind::Bot, self.bots.as_slice()),
        ]
    }

    pub fn total(&self) -> usize {
        self.active.len() + self.bots.len() + self.deleted.len()
    }
}

/// Lazily loaded id → user map over a `users.json` snapshot.
///
/// The snapshot is read on first lookup and kept until [`UserCache::invalidate`]
/// or [`UserCache::rebuild`] is called.
#[derive(Debug)]
pub struct UserCache {
    path: PathBuf,
    users: Mutex<Option<Arc<HashMap<String, Value>>>>,
}

impl UserCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            users: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<HashMap<String, Value>>>> {
        // A poisoned lock only means another lookup panicked; the map itself is intact.
        self.users.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) -> Result<HashMap<String, Value>> {
        let users: Vec<Value> = read_json(&self.path)?;
        Ok(users
            .into_iter()
            .filter_map(|u| Some((user_id(&u)?.to_string(), u)))
            .collect())
    }

    fn snapshot(&self) -> Arc<HashMap<String, Value>> {
        let mut slot = self.slot();
        if let Some(users) = slot.as_ref() {
            return Arc::clone(users);
        }

        let users = match self.load() {
            Ok(users) => users,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "user snapshot unavailable, lookups will miss");
                HashMap::new()
            }
        };
        let users = Arc::new(users);
        *slot = Some(Arc::clone(&users));
        users
    }

    pub fn lookup(&self, user_id: &str) -> Option<Value> {
        self.snapshot().get(user_id).cloned()
    }

    pub fn invalidate(&self) {
        *self.slot() = None;
    }

    /// Reloads the snapshot from disk immediately.
    pub fn rebuild(&self) -> Result<usize> {
        let users = self.load()?;
        let count = users.len();
        *self.slot() = Some(Arc::new(users));
        Ok(count)
    }
}

pub struct UserDirectory {
    client: SlackClient,
    layout: ExportLayout,
    archiver: Archiver,
    cache: UserCache,
}

impl UserDirectory {
    pub fn new(client: SlackClient, layout: ExportLayout, archiver: Archiver) -> Self {
        let cache = UserCache::new(layout.users_json());
        Self {
            client,
            layout,
            archiver,
            cache,
        }
    }

    /// Replaces `users.json` and the active/deleted/bot files with a fresh
    /// full listing, rebuilds the cache and archives the users folder.
    pub async fn refresh_user_list(&self) -> Result<UserPartitions> {
        let collected = walk_pages("users.list", self.client.cancellation(), |cursor| {
            self.client.users_list(cursor)
        })
        .await;
        if collected.is_partial() {
            return Err(AppError::IncompleteListing("users".to_string()));
        }

        let users = collected.items;
        let users_dir = self.layout.users_dir();
        write_json(&self.layout.users_json(), &users)?;

        let partitions = UserPartitions::from_users(&users);
        for (kind, group) in partitions.groups() {
            write_json(&users_dir.join(format!("{}.json", kind.file_stem())), group)?;

            let mut table = CsvTable::new(kind.headers());
            for user in group {
                table.push(vec![
                    user_id(user).unwrap_or_default().to_string(),
                    user_real_name(user),
                ]);
            }
            table.write(&users_dir.join(format!("{}.csv", kind.file_stem())))?;
        }
        info!(
            total = users.len(),
            active = partitions.active.len(),
            deleted = partitions.deleted.len(),
            bots = partitions.bots.len(),
            "user list refreshed"
        );

        self.cache.rebuild()?;

        self.archiver
            .archive_best_effort(&users_dir, &self.layout.users_zip(), "users")
            .await;

        Ok(partitions)
    }

    /// Fetches one user's detail from the API, bypassing the cache.
    pub async fn get_user_info(&self, user_id: &str) -> Result<Value> {
        info!(user_id, "fetching users.info");
        self.client.users_info(user_id).await
    }

    /// Looks a user up in the last written `users.json`.
    pub fn lookup_user_locally(&self, user_id: &str) -> Option<Value> {
        self.cache.lookup(user_id)
    }
}
