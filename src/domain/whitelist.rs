//! Whitelist of tracked entities
//!
//! The chat front end owns the real whitelist (one list per chat/user). The
//! pipeline only reads it through [`WhitelistProvider`].

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Set of lowercased entity names.
pub type Whitelist = BTreeSet<String>;

#[async_trait]
pub trait WhitelistProvider: Send + Sync {
    /// Union of every scope's members.
    async fn united_members(&self) -> Whitelist;

    /// Members of one scope (a chat, a user, ...). Unknown scopes are empty.
    async fn members_for(&self, filter: &str) -> Whitelist;
}

/// Normalize a name the way whitelist membership compares it.
pub fn normalize_member(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Case-insensitive exact membership test.
pub fn is_member(whitelist: &Whitelist, name: &str) -> bool {
    whitelist.contains(&normalize_member(name))
}

/// Build a [`Whitelist`] from arbitrary names.
pub fn whitelist_of<I, S>(names: I) -> Whitelist
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|n| normalize_member(n.as_ref()))
        .filter(|n| !n.is_empty())
        .collect()
}

/// In-process whitelist keyed by scope, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct InMemoryWhitelist {
    scopes: RwLock<HashMap<String, Whitelist>>,
}

impl InMemoryWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope<I, S>(scope: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scopes = HashMap::new();
        scopes.insert(scope.to_string(), whitelist_of(names));
        Self {
            scopes: RwLock::new(scopes),
        }
    }

    /// Returns true when the member was newly added.
    pub async fn add(&self, scope: &str, name: &str) -> bool {
        let member = normalize_member(name);
        if member.is_empty() {
            return false;
        }
        self.scopes
            .write()
            .await
            .entry(scope.to_string())
            .or_default()
            .insert(member)
    }

    /// Returns true when the member was present.
    pub async fn remove(&self, scope: &str, name: &str) -> bool {
        let mut scopes = self.scopes.write().await;
        scopes
            .get_mut(scope)
            .is_some_and(|members| members.remove(&normalize_member(name)))
    }
}

#[async_trait]
impl WhitelistProvider for InMemoryWhitelist {
    async fn united_members(&self) -> Whitelist {
        self.scopes
            .read()
            .await
            .values()
            .flat_map(|members| members.iter().cloned())
            .collect()
    }

    async fn members_for(&self, filter: &str) -> Whitelist {
        self.scopes
            .read()
            .await
            .get(filter)
            .cloned()
            .unwrap_or_default()
    }
}
