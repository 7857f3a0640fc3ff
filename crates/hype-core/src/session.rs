//! Connection sessions.
//!
//! A [`Session`] is the server-side view of one authenticated connection. The
//! transport decodes inbound events and hands them to [`Session::dispatch`];
//! everything the client should see is pushed into the session's
//! [`SessionHandle`]. A failing request becomes an `error` event and the
//! connection carries on.

use crate::friends::FriendError;
use crate::handle::{SessionHandle, SessionId};
use crate::hub::Hub;
use crate::router::RouterError;
use crate::store::StoreError;
use crate::user::User;
use hype_protocol::{ClientEvent, ServerEvent, PROTOCOL_VERSION};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors produced while handling a client event.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Messaging failed.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// The friend workflow refused the request.
    #[error(transparent)]
    Friend(#[from] FriendError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    /// Error code reported to clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            SessionError::Router(e) => e.code(),
            SessionError::Friend(e) => e.code(),
            SessionError::Store(e) => e.code(),
        }
    }
}

/// One authenticated connection.
pub struct Session {
    hub: Arc<Hub>,
    user: User,
    handle: SessionHandle,
    closed: AtomicBool,
}

impl Session {
    /// Register `user` as online through `handle` and push the greeting.
    ///
    /// The client receives `connected` followed by `initial_data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the friend state cannot be loaded; the
    /// registration is rolled back first.
    pub async fn open(hub: Arc<Hub>, user: User, handle: SessionHandle) -> Result<Self, StoreError> {
        hub.presence().register(&user, handle.clone());

        let state = match hub.friends().initial_state(&user).await {
            Ok(state) => state,
            Err(e) => {
                warn!(user = %user.name, session = %handle.id(), error = %e, "Failed to load initial state");
                hub.disconnect(&user, handle.id());
                return Err(e);
            }
        };

        handle.deliver(ServerEvent::Connected {
            session_id: handle.id().0,
            username: user.name.clone(),
            version: PROTOCOL_VERSION.major,
            heartbeat: hub.config().heartbeat_interval_ms,
        });
        handle.deliver(ServerEvent::InitialData {
            friends: state.friends.into_iter().map(|u| u.name).collect(),
            pending_requests: state.pending_incoming.into_iter().map(|u| u.name).collect(),
        });

        debug!(user = %user.name, session = %handle.id(), "Session opened");

        Ok(Self {
            hub,
            user,
            handle,
            closed: AtomicBool::new(false),
        })
    }

    /// Get the authenticated user.
    pub fn user(&self) -> &User {
        &self.user
    }

    /// Get the outbound handle.
    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Get the session identifier.
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Handle one inbound event.
    ///
    /// Returns the error code reported to the client, if the event failed.
    pub async fn dispatch(&self, event: ClientEvent) -> Option<u16> {
        let kind = event.kind();
        match self.handle_event(event).await {
            Ok(()) => None,
            Err(e) => {
                let code = e.code();
                debug!(user = %self.user.name, event = kind, code, error = %e, "Request failed");
                self.handle.deliver(ServerEvent::error(code, e.to_string()));
                Some(code)
            }
        }
    }

    async fn handle_event(&self, event: ClientEvent) -> Result<(), SessionError> {
        let hub = &self.hub;
        let user = &self.user;

        match event {
            ClientEvent::Connect { .. } => {
                trace!(user = %user.name, "Repeated connect ignored");
            }

            ClientEvent::ChatMessage { to, body } => {
                hub.router()
                    .send(user, Some(&self.handle), &to, &body)
                    .await?;
            }

            ClientEvent::DemoMessage { body } => {
                hub.router().broadcast_demo(user, &body);
            }

            ClientEvent::GetHistory { partner, limit } => {
                let messages = hub.router().history(user, &partner, limit).await?;
                self.handle.deliver(ServerEvent::MessageHistory {
                    partner,
                    messages: messages.iter().map(|m| m.to_history_entry()).collect(),
                });
            }

            ClientEvent::FriendRequest { to } => {
                hub.friends().request(user, &to).await?;
            }

            ClientEvent::AcceptFriend { from } => {
                hub.friends().accept(user, &from).await?;
            }

            ClientEvent::RejectFriend { from } => {
                hub.friends().reject(user, &from).await?;
            }

            ClientEvent::CallAttempt { to } => {
                hub.ring(user, &to).await?;
            }

            ClientEvent::SdpOffer { to, sdp } => {
                hub.offer(user, &to, sdp).await?;
            }

            ClientEvent::SdpAnswer { to, sdp } => {
                hub.calls().answer(user, &to, sdp);
            }

            ClientEvent::IceCandidate { to, candidate } => {
                hub.calls().relay_ice(user, &to, candidate);
            }

            ClientEvent::CallEnd { to } => {
                hub.end_call(user, &to).await?;
            }

            ClientEvent::Ping { timestamp } => {
                self.handle.deliver(ServerEvent::pong(timestamp));
            }

            ClientEvent::Unknown => {
                trace!(user = %user.name, "Unknown event ignored");
            }
        }

        Ok(())
    }

    /// Unregister the connection and hang up any call it leaves behind.
    ///
    /// Returns `false` if the session was already closed.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.hub.disconnect(&self.user, self.handle.id());
        debug!(user = %self.user.name, session = %self.handle.id(), "Session closed");
        true
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
