//! Call signaling for Hype.
//!
//! The relay forwards WebRTC negotiation between exactly two users and keeps
//! one [`CallSession`] per call. A user takes part in at most one call at a
//! time. SDP and ICE payloads are opaque and relayed verbatim.
//!
//! ```text
//!   Idle ──sdp_offer──▶ Offering ──sdp_answer──▶ Active
//!     ▲                    │                        │
//!     └────────────── call_end / disconnect / offer timeout
//! ```
//!
//! Stray signaling (an answer without an offer, ICE without a session) is
//! dropped without telling anyone.

use crate::presence::PresenceRegistry;
use crate::user::{User, UserId};
use hype_protocol::ServerEvent;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// State of a call as seen by the relay.
///
/// The callee's client-side "answering" phase, between receiving the offer
/// and sending its answer, is `Offering` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// The caller sent an offer; no answer yet.
    Offering,
    /// The callee answered.
    Active,
}

/// An ongoing call between two users.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// User who sent the offer.
    pub caller: User,
    /// User the offer was sent to.
    pub callee: User,
    /// Current state.
    pub state: CallState,
    /// The caller's session description.
    pub offer_sdp: Value,
    /// The callee's session description, once answered.
    pub answer_sdp: Option<Value>,
    /// When the offer arrived.
    pub started_at: Instant,
}

impl CallSession {
    /// Get the other participant.
    #[must_use]
    pub fn partner_of(&self, user: UserId) -> Option<&User> {
        if self.caller.id == user {
            Some(&self.callee)
        } else if self.callee.id == user {
            Some(&self.caller)
        } else {
            None
        }
    }
}

/// Result of an `sdp_offer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// A session was created and the offer forwarded to the online callee.
    Forwarded,
    /// A session was created but the callee is offline; the offer is lost.
    CalleeOffline,
    /// The callee is in another call; the caller was sent `call_end`.
    CalleeBusy,
    /// The caller already has a call; the offer was dropped.
    Dropped,
}

type PairKey = (UserId, UserId);

fn pair_key(a: UserId, b: UserId) -> PairKey {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Default)]
struct CallTable {
    sessions: HashMap<PairKey, CallSession>,
    by_user: HashMap<UserId, PairKey>,
}

impl CallTable {
    fn session_of(&self, user: UserId) -> Option<&CallSession> {
        self.by_user.get(&user).and_then(|key| self.sessions.get(key))
    }

    fn session_of_mut(&mut self, user: UserId) -> Option<&mut CallSession> {
        let key = self.by_user.get(&user)?;
        self.sessions.get_mut(key)
    }

    fn insert(&mut self, session: CallSession) {
        let key = pair_key(session.caller.id, session.callee.id);
        self.by_user.insert(session.caller.id, key);
        self.by_user.insert(session.callee.id, key);
        self.sessions.insert(key, session);
    }

    fn remove(&mut self, key: PairKey) -> Option<CallSession> {
        let session = self.sessions.remove(&key)?;
        self.by_user.remove(&session.caller.id);
        self.by_user.remove(&session.callee.id);
        Some(session)
    }
}

/// Tracks calls and relays signaling between their participants.
pub struct CallCoordinator {
    table: Mutex<CallTable>,
    presence: Arc<PresenceRegistry>,
}

impl CallCoordinator {
    /// Create a new coordinator.
    #[must_use]
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self {
            table: Mutex::new(CallTable::default()),
            presence,
        }
    }

    fn table(&self) -> MutexGuard<'_, CallTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ring `callee` ahead of an offer.
    ///
    /// Forwards `incoming_call` only when both users are idle and the callee
    /// is online. No state changes.
    pub fn ring(&self, caller: &User, callee: &User) -> bool {
        {
            let table = self.table();
            if table.by_user.contains_key(&caller.id) || table.by_user.contains_key(&callee.id) {
                trace!(caller = %caller.name, callee = %callee.name, "Ring dropped, a party is busy");
                return false;
            }
        }
        self.presence.deliver(
            callee.id,
            ServerEvent::IncomingCall {
                from: caller.name.clone(),
            },
        )
    }

    /// `caller` offers a call to `callee`.
    pub fn offer(&self, caller: &User, callee: &User, sdp: Value) -> OfferOutcome {
        if caller.id == callee.id {
            return OfferOutcome::Dropped;
        }

        {
            let mut table = self.table();
            if table.by_user.contains_key(&caller.id) {
                debug!(caller = %caller.name, "Offer dropped, caller already in a call");
                return OfferOutcome::Dropped;
            }
            if table.by_user.contains_key(&callee.id) {
                drop(table);
                debug!(caller = %caller.name, callee = %callee.name, "Callee busy");
                self.presence
                    .deliver(caller.id, ServerEvent::call_end(callee.name.clone()));
                return OfferOutcome::CalleeBusy;
            }

            table.insert(CallSession {
                caller: caller.clone(),
                callee: callee.clone(),
                state: CallState::Offering,
                offer_sdp: sdp.clone(),
                answer_sdp: None,
                started_at: Instant::now(),
            });
        }

        let forwarded = self.presence.deliver(
            callee.id,
            ServerEvent::SdpOffer {
                from: caller.name.clone(),
                sdp,
            },
        );
        info!(caller = %caller.name, callee = %callee.name, forwarded, "Call offered");

        if forwarded {
            OfferOutcome::Forwarded
        } else {
            OfferOutcome::CalleeOffline
        }
    }

    /// `callee` answers the offer made by the user named `caller`.
    ///
    /// Returns `true` if the answer was applied and forwarded. An answer
    /// without a matching offer, or a second answer, is dropped.
    pub fn answer(&self, callee: &User, caller: &str, sdp: Value) -> bool {
        let caller_id = {
            let mut table = self.table();
            let Some(session) = table.session_of_mut(callee.id) else {
                trace!(user = %callee.name, "Stray answer dropped");
                return false;
            };
            if session.callee.id != callee.id
                || session.caller.name != caller
                || session.answer_sdp.is_some()
            {
                trace!(user = %callee.name, "Unexpected answer dropped");
                return false;
            }
            session.answer_sdp = Some(sdp.clone());
            session.state = CallState::Active;
            session.caller.id
        };

        info!(caller = %caller, callee = %callee.name, "Call active");
        self.presence.deliver(
            caller_id,
            ServerEvent::SdpAnswer {
                from: callee.name.clone(),
                sdp,
            },
        );
        true
    }

    /// Relay an ICE candidate from `from` to their call partner named `to`.
    ///
    /// Returns `true` if forwarded; candidates outside a session are dropped.
    pub fn relay_ice(&self, from: &User, to: &str, candidate: Value) -> bool {
        let partner = {
            let table = self.table();
            match table
                .session_of(from.id)
                .and_then(|s| s.partner_of(from.id))
            {
                Some(partner) if partner.name == to => partner.id,
                _ => {
                    trace!(user = %from.name, to = %to, "ICE candidate outside a call dropped");
                    return false;
                }
            }
        };

        self.presence.deliver(
            partner,
            ServerEvent::IceCandidate {
                from: from.name.clone(),
                candidate,
            },
        )
    }

    /// `from` ends, cancels or rejects the call with `to`.
    ///
    /// Clears the session between the two if there is one and always
    /// forwards `call_end` to `to`. Returns `true` if a session was cleared.
    pub fn end(&self, from: &User, to: &User) -> bool {
        let cleared = {
            let mut table = self.table();
            let key = pair_key(from.id, to.id);
            table.remove(key).is_some()
        };

        self.presence
            .deliver(to.id, ServerEvent::call_end(from.name.clone()));
        if cleared {
            info!(from = %from.name, to = %to.name, "Call ended");
        }
        cleared
    }

    /// Tear down the call `user` is in, as if they had sent `call_end`.
    ///
    /// Only a call started no later than `cutoff` is ended; a call placed
    /// from a connection that registered afterwards is left alone. Returns
    /// the partner that was notified.
    pub fn end_all_for(&self, user: &User, cutoff: Instant) -> Option<User> {
        let partner = {
            let mut table = self.table();
            let key = *table.by_user.get(&user.id)?;
            if table.sessions.get(&key)?.started_at > cutoff {
                trace!(user = %user.name, "Call newer than disconnect kept");
                return None;
            }
            let session = table.remove(key)?;
            session.partner_of(user.id).cloned()
        }?;

        self.presence
            .deliver(partner.id, ServerEvent::call_end(user.name.clone()));
        info!(user = %user.name, partner = %partner.name, "Call ended by disconnect");
        Some(partner)
    }

    /// End every call still `Offering` after `timeout`.
    ///
    /// Each party is sent `call_end` naming the other. Returns the number of
    /// calls ended.
    pub fn expire_stale_offers(&self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<CallSession> = {
            let mut table = self.table();
            let keys: Vec<PairKey> = table
                .sessions
                .iter()
                .filter(|(_, s)| {
                    s.state == CallState::Offering
                        && now.saturating_duration_since(s.started_at) >= timeout
                })
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter().filter_map(|key| table.remove(key)).collect()
        };

        for session in &expired {
            info!(caller = %session.caller.name, callee = %session.callee.name, "Unanswered call expired");
            self.presence.deliver(
                session.caller.id,
                ServerEvent::call_end(session.callee.name.clone()),
            );
            self.presence.deliver(
                session.callee.id,
                ServerEvent::call_end(session.caller.name.clone()),
            );
        }

        expired.len()
    }

    /// State of the call `user` is in, if any.
    #[must_use]
    pub fn state_of(&self, user: UserId) -> Option<CallState> {
        self.table().session_of(user).map(|s| s.state)
    }

    /// The session between two users, if any.
    #[must_use]
    pub fn session_between(&self, a: UserId, b: UserId) -> Option<CallSession> {
        self.table().sessions.get(&pair_key(a, b)).cloned()
    }

    /// Number of ongoing calls.
    #[must_use]
    pub fn active_calls(&self) -> usize {
        self.table().sessions.len()
    }
}
