//! Membership controller: joins a room, tracks the roster and turns roster
//! traffic into notices for the owner.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::connection::{Connection, Outbox};
use crate::client::context::SessionContext;
use crate::client::handlers::HandlerId;
use crate::error::SessionError;
use crate::models::{
    decode_payload, Event, JoinMessage, JoinedMessage, Member, MemberLeftMessage, SyncCodeMessage,
    TransportErrorMessage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipState {
    Disconnected,
    Joining,
    Joined,
}

/// Something the owner should show the user.
#[derive(Debug, Clone, PartialEq)]
pub enum MembershipNotice {
    PeerJoined(Member),
    PeerLeft(Member),
    ConnectionLost(String),
}

struct MembershipInner {
    ctx: SessionContext,
    state: MembershipState,
    members: Vec<Member>,
    notices: Vec<MembershipNotice>,
}

impl MembershipInner {
    fn on_joined(&mut self, payload: &Value, outbox: &Outbox) {
        let joined: JoinedMessage = match decode_payload(Event::Joined, payload) {
            Ok(joined) => joined,
            Err(violation) => {
                warn!("Skipping roster update: {}", violation);
                return;
            }
        };
        if self.state == MembershipState::Disconnected {
            return;
        }

        let self_id = self.ctx.connection_id();
        self.state = MembershipState::Joined;
        self.members = joined.members;

        if joined.joiner_id != self_id {
            let joiner = self
                .members
                .iter()
                .find(|m| m.connection_id == joined.joiner_id)
                .cloned()
                .unwrap_or_else(|| Member::new(joined.joiner_id.clone(), String::new()));
            info!("{} joined room {}", joiner.display_name, self.ctx.room_id());
            self.notices.push(MembershipNotice::PeerJoined(joiner));
        }

        outbox.send(
            Event::SyncCode,
            &SyncCodeMessage {
                code: self.ctx.code(),
                requester_id: self_id,
            },
        );
    }

    fn on_member_left(&mut self, payload: &Value) {
        let left: MemberLeftMessage = match decode_payload(Event::MemberLeft, payload) {
            Ok(left) => left,
            Err(violation) => {
                warn!("Skipping departure: {}", violation);
                return;
            }
        };
        let Some(index) = self.members.iter().position(|m| m.connection_id == left.connection_id) else {
            debug!("MEMBER_LEFT for unknown member {}", left.connection_id);
            return;
        };
        let member = self.members.remove(index);
        info!("{} left room {}", member.display_name, self.ctx.room_id());
        self.notices.push(MembershipNotice::PeerLeft(member));
    }

    fn on_connection_lost(&mut self, event: Event, payload: &Value) {
        let message = decode_payload::<TransportErrorMessage>(event, payload)
            .map(|m| m.message)
            .unwrap_or_else(|_| "connection lost".to_string());
        warn!("Room {}: {} ({})", self.ctx.room_id(), event, message);
        self.state = MembershipState::Disconnected;
        self.notices.push(MembershipNotice::ConnectionLost(message));
    }
}

pub struct MembershipController {
    inner: Arc<Mutex<MembershipInner>>,
    subscriptions: Vec<(Event, HandlerId)>,
}

impl MembershipController {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MembershipInner {
                ctx,
                state: MembershipState::Disconnected,
                members: Vec::new(),
                notices: Vec::new(),
            })),
            subscriptions: Vec::new(),
        }
    }

    fn inner(&self) -> MutexGuard<'_, MembershipInner> {
        lock(&self.inner)
    }

    /// Subscribe to roster events and send `JOIN`.
    pub fn join(&mut self, conn: &mut Connection) -> Result<(), SessionError> {
        let (room_id, display_name) = {
            let inner = self.inner();
            (inner.ctx.room_id(), inner.ctx.display_name())
        };
        if room_id.trim().is_empty() {
            return Err(SessionError::InvalidJoin("roomId"));
        }
        if display_name.trim().is_empty() {
            return Err(SessionError::InvalidJoin("displayName"));
        }

        if self.subscriptions.is_empty() {
            let joined = self.inner.clone();
            let id = conn.on(
                Event::Joined,
                Box::new(move |payload, outbox| lock(&joined).on_joined(payload, outbox)),
            );
            self.subscriptions.push((Event::Joined, id));

            let left = self.inner.clone();
            let id = conn.on(
                Event::MemberLeft,
                Box::new(move |payload, _| lock(&left).on_member_left(payload)),
            );
            self.subscriptions.push((Event::MemberLeft, id));

            for event in [Event::ConnectError, Event::ConnectFailed] {
                let lost = self.inner.clone();
                let id = conn.on(
                    event,
                    Box::new(move |payload, _| lock(&lost).on_connection_lost(event, payload)),
                );
                self.subscriptions.push((event, id));
            }
        }

        self.inner().state = MembershipState::Joining;
        info!("Joining room {} as {}", room_id, display_name);
        conn.send(Event::Join, &JoinMessage { room_id, display_name });
        Ok(())
    }

    /// Drop every roster handler. Returns false if there was nothing to leave.
    pub fn leave(&mut self, conn: &mut Connection) -> bool {
        let had_subscriptions = !self.subscriptions.is_empty();
        for (event, id) in self.subscriptions.drain(..) {
            conn.off(event, id);
        }
        let mut inner = self.inner();
        let was_connected = inner.state != MembershipState::Disconnected;
        inner.state = MembershipState::Disconnected;
        inner.members.clear();
        had_subscriptions || was_connected
    }

    pub fn state(&self) -> MembershipState {
        self.inner().state
    }

    pub fn members(&self) -> Vec<Member> {
        self.inner().members.clone()
    }

    pub fn take_notices(&self) -> Vec<MembershipNotice> {
        std::mem::take(&mut self.inner().notices)
    }

    pub fn is_connection_lost(&self) -> bool {
        self.inner()
            .notices
            .iter()
            .any(|n| matches!(n, MembershipNotice::ConnectionLost(_)))
    }
}

fn lock(inner: &Mutex<MembershipInner>) -> MutexGuard<'_, MembershipInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
