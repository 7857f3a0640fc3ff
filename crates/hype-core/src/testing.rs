//! Shared helpers for unit tests.

use crate::handle::SessionHandle;
use crate::hub::{Hub, HubConfig};
use crate::identity::StoreIdentity;
use crate::memory::MemoryStore;
use crate::message::Message;
use crate::store::{FriendEdge, FriendState, FriendStatus, Store, StoreError};
use crate::user::{User, UserId};
use async_trait::async_trait;
use hype_protocol::ServerEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Store wrapper whose message writes can be made to fail.
#[derive(Default)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_messages: AtomicBool,
}

#[async_trait]
impl Store for FlakyStore {
    async fn insert_user(&self, name: &str, token: &str) -> Result<User, StoreError> {
        self.inner.insert_user(name, token).await
    }

    async fn user_by_name(&self, name: &str) -> Result<Option<User>, StoreError> {
        self.inner.user_by_name(name).await
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.user_by_id(id).await
    }

    async fn verify_token(&self, name: &str, token: &str) -> Result<Option<User>, StoreError> {
        self.inner.verify_token(name, token).await
    }

    async fn insert_message(
        &self,
        from: &User,
        to: &User,
        body: &str,
        sent_at: u64,
    ) -> Result<Message, StoreError> {
        if self.fail_messages.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("disk full".to_string()));
        }
        self.inner.insert_message(from, to, body, sent_at).await
    }

    async fn query_history(
        &self,
        a: UserId,
        b: UserId,
        limit: u32,
    ) -> Result<Vec<Message>, StoreError> {
        self.inner.query_history(a, b, limit).await
    }

    async fn friend_edge(
        &self,
        from: UserId,
        to: UserId,
    ) -> Result<Option<FriendEdge>, StoreError> {
        self.inner.friend_edge(from, to).await
    }

    async fn upsert_friend_edges(&self, edges: &[FriendEdge]) -> Result<(), StoreError> {
        self.inner.upsert_friend_edges(edges).await
    }

    async fn delete_friend_edge(
        &self,
        from: UserId,
        to: UserId,
        status: FriendStatus,
    ) -> Result<bool, StoreError> {
        self.inner.delete_friend_edge(from, to, status).await
    }

    async fn query_friend_state(&self, user: UserId) -> Result<FriendState, StoreError> {
        self.inner.query_friend_state(user).await
    }
}

/// Hub over a [`FlakyStore`] with auto-registration enabled.
pub(crate) fn hub_with(store: Arc<FlakyStore>, config: HubConfig) -> Arc<Hub> {
    let identity = Arc::new(StoreIdentity::new(store.clone(), true));
    Arc::new(Hub::new(store, identity, config))
}

/// Hub over a fresh store with default configuration.
pub(crate) fn hub() -> (Arc<FlakyStore>, Arc<Hub>) {
    let store = Arc::new(FlakyStore::default());
    (store.clone(), hub_with(store, HubConfig::default()))
}

/// Create a user directly in the store.
pub(crate) async fn user(store: &FlakyStore, name: &str) -> User {
    store.inner.insert_user(name, "token").await.unwrap()
}

/// Register a fresh connection for `user` and return its queue.
pub(crate) fn connect(hub: &Hub, user: &User) -> (SessionHandle, mpsc::Receiver<ServerEvent>) {
    let (handle, rx) = SessionHandle::channel(64);
    hub.presence().register(user, handle.clone());
    (handle, rx)
}

/// Take every queued event.
pub(crate) fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
