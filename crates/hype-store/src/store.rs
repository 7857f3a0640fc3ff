//! [`Store`] implementation over a shared [`Database`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hype_core::{
    FriendEdge, FriendState, FriendStatus, Message, Store, StoreError, User, UserId,
};
use tracing::trace;

use crate::database::Database;
use crate::error::DbError;

/// SQLite-backed [`Store`].
///
/// Queries run on tokio's blocking pool; the connection is shared behind a
/// mutex, so they execute one at a time.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(Self::from_database(Database::open_at(path.as_ref())?))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    /// Wrap an already opened database.
    pub fn from_database(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T, DbError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut db = db.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut db)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("store task failed: {e}")))?
        .map_err(StoreError::from)
    }

    /// Number of stored messages.
    pub async fn message_count(&self) -> Result<u64, StoreError> {
        self.call(|db| db.count_messages()).await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_user(&self, name: &str, token: &str) -> Result<User, StoreError> {
        let (name, token) = (name.to_string(), token.to_string());
        let user = self.call(move |db| db.insert_user(&name, &token)).await?;
        trace!(user = %user.name, id = %user.id, "Inserted user");
        Ok(user)
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        let name = name.to_string();
        self.call(move |db| db.get_user_by_name(&name)).await
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.call(move |db| db.get_user_by_id(id)).await
    }

    async fn verify_token(&self, name: &str, token: &str) -> Result<Option<User>, StoreError> {
        let (name, token) = (name.to_string(), token.to_string());
        self.call(move |db| db.get_user_by_token(&name, &token)).await
    }

    async fn insert_message(
        &self,
        from: &User,
        to: &User,
        body: &str,
        sent_at: u64,
    ) -> Result<Message, StoreError> {
        let (from, to, body) = (from.clone(), to.clone(), body.to_string());
        self.call(move |db| db.insert_message(&from, &to, &body, sent_at))
            .await
    }

    async fn query_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.call(move |db| db.get_conversation(a, b, limit)).await
    }

    async fn friend_edge(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<FriendEdge>, StoreError> {
        self.call(move |db| db.get_friend_edge(from, to)).await
    }

    async fn upsert_friend_edges(&self, edges: &[FriendEdge]) -> Result<(), StoreError> {
        let edges = edges.to_vec();
        self.call(move |db| db.upsert_friend_edges(&edges)).await
    }

    async fn delete_friend_edge(
        &self,
        from: UserId,
        to: UserId,
        status: FriendStatus,
    ) -> Result<bool, StoreError> {
        self.call(move |db| db.delete_friend_edge(from, to, status))
            .await
    }

    async fn query_friend_state(&self, user: UserId) -> Result<FriendState, StoreError> {
        self.call(move |db| db.get_friend_state(user)).await
    }
}
