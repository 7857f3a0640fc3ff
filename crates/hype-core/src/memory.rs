//! In-memory [`Store`] implementation.
//!
//! Used for development, demos and tests. Everything is lost on restart.

use crate::message::Message;
use crate::store::{FriendEdge, FriendState, FriendStatus, Store, StoreError};
use crate::user::{User, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::trace;

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, User>,
    tokens: HashMap<UserId, String>,
    names: HashMap<String, UserId>,
    messages: Vec<Message>,
    edges: HashMap<(UserId, UserId), FriendStatus>,
    next_user_id: i64,
    next_message_id: i64,
}

impl Tables {
    fn users_sorted(&self, ids: impl Iterator<Item = UserId>) -> Vec<User> {
        let mut users: Vec<User> = ids.filter_map(|id| self.users.get(&id).cloned()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name));
        users
    }
}

/// A store that keeps all tables in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, name: &str, token: &str) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.names.contains_key(name) {
            return Err(StoreError::Conflict(format!("user {name} already exists")));
        }

        tables.next_user_id += 1;
        let user = User::new(tables.next_user_id, name);
        tables.names.insert(name.to_string(), user.id);
        tables.tokens.insert(user.id, token.to_string());
        tables.users.insert(user.id, user.clone());
        trace!(user = %user.name, id = %user.id, "Inserted user");

        Ok(user)
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .names
            .get(name)
            .and_then(|id| tables.users.get(id))
            .cloned())
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn verify_token(&self, name: &str, token: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        let Some(id) = tables.names.get(name) else {
            return Ok(None);
        };
        if tables.tokens.get(id).map(String::as_str) != Some(token) {
            return Ok(None);
        }
        Ok(tables.users.get(id).cloned())
    }

    async fn insert_message(
        &self,
        from: &User,
        to: &User,
        body: &str,
        sent_at: u64,
    ) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&from.id) || !tables.users.contains_key(&to.id) {
            return Err(StoreError::NotFound);
        }

        tables.next_message_id += 1;
        let message = Message {
            id: tables.next_message_id,
            from: from.clone(),
            to: to.clone(),
            body: body.to_string(),
            sent_at,
        };
        tables.messages.push(message.clone());

        Ok(message)
    }

    async fn query_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read().await;
        let mut messages: Vec<Message> = tables
            .messages
            .iter()
            .filter(|m| {
                (m.from.id == a && m.to.id == b) || (m.from.id == b && m.to.id == a)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| (m.sent_at, m.id));

        let skip = messages.len().saturating_sub(limit as usize);
        Ok(messages.split_off(skip))
    }

    async fn friend_edge(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<FriendEdge>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .edges
            .get(&(from, to))
            .map(|status| FriendEdge::new(from, to, *status)))
    }

    async fn upsert_friend_edges(&self, edges: &[FriendEdge]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if edges
            .iter()
            .any(|e| !tables.users.contains_key(&e.from) || !tables.users.contains_key(&e.to))
        {
            return Err(StoreError::NotFound);
        }
        for edge in edges {
            tables.edges.insert((edge.from, edge.to), edge.status);
        }
        Ok(())
    }

    async fn delete_friend_edge(
        &self,
        from: UserId,
        to: UserId,
        status: FriendStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.edges.get(&(from, to)) == Some(&status) {
            tables.edges.remove(&(from, to));
            return Ok(true);
        }
        Ok(false)
    }

    async fn query_friend_state(&self, user: UserId) -> Result<FriendState, StoreError> {
        let tables = self.tables.read().await;

        let friends = tables.users_sorted(tables.edges.iter().filter_map(|((from, to), status)| {
            (*from == user && *status == FriendStatus::Accepted).then_some(*to)
        }));
        let pending_incoming =
            tables.users_sorted(tables.edges.iter().filter_map(|((from, to), status)| {
                (*to == user && *status == FriendStatus::Pending).then_some(*from)
            }));

        Ok(FriendState {
            friends,
            pending_incoming,
        })
    }
}
