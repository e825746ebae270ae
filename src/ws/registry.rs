//! Relay-side room registry.
//!
//! Maps room ids to their members and owns each member's outgoing frame
//! channel. Every fan-out happens while the registry write lock is held, so
//! all recipients observe relay messages in the same relative order.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

use crate::models::{CodeChangeMessage, Envelope, Event, JoinedMessage, Member, MemberLeftMessage};

/// Outgoing text frames for one connection; drained by its socket writer task.
pub type PeerSender = mpsc::UnboundedSender<String>;

struct RoomMember {
    member: Member,
    sender: PeerSender,
    /// Joined a non-empty room and has not received a document yet.
    awaiting_sync: bool,
}

#[derive(Default)]
struct Room {
    members: Vec<RoomMember>,
}

impl Room {
    fn roster(&self) -> Vec<Member> {
        self.members.iter().map(|m| m.member.clone()).collect()
    }

    fn position(&self, connection_id: &str) -> Option<usize> {
        self.members
            .iter()
            .position(|m| m.member.connection_id == connection_id)
    }

    fn get(&self, connection_id: &str) -> Option<&RoomMember> {
        self.members
            .iter()
            .find(|m| m.member.connection_id == connection_id)
    }
}

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<String, Room>,
    /// connection id -> room id
    memberships: HashMap<String, String>,
}

/// Counters exposed through the diagnostics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub rooms: usize,
    pub connections: usize,
    pub awaiting_sync: usize,
}

#[derive(Default)]
pub struct RoomRegistry {
    state: RwLock<RegistryState>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `member` to `room_id` and announce `JOINED` to every member,
    /// the joiner included.
    ///
    /// A connection already in another room leaves it first. Returns the
    /// roster after the join.
    pub async fn join(&self, room_id: &str, member: Member, sender: PeerSender) -> Vec<Member> {
        let mut state = self.state.write().await;
        let connection_id = member.connection_id.clone();

        if let Some(previous) = state.memberships.get(&connection_id).cloned() {
            if previous != room_id {
                info!("Connection {} switches from room {} to {}", connection_id, previous, room_id);
                Self::remove_locked(&mut state, &connection_id);
            }
        }

        let room = state.rooms.entry(room_id.to_string()).or_default();
        match room.position(&connection_id) {
            Some(idx) => {
                // Repeated JOIN for the same room only refreshes the display name.
                room.members[idx].member.display_name = member.display_name.clone();
                room.members[idx].sender = sender;
            }
            None => {
                let awaiting_sync = !room.members.is_empty();
                room.members.push(RoomMember {
                    member: member.clone(),
                    sender,
                    awaiting_sync,
                });
            }
        }

        let roster = room.roster();
        let joined = JoinedMessage {
            members: roster.clone(),
            joiner_id: connection_id.clone(),
        };
        let recipients: Vec<&RoomMember> = room.members.iter().collect();
        let delivered = deliver(&recipients, Event::Joined, &joined);
        state.memberships.insert(connection_id.clone(), room_id.to_string());

        info!(
            "{} ({}) joined room {} ({} members, JOINED sent to {})",
            member.display_name,
            connection_id,
            room_id,
            roster.len(),
            delivered
        );
        roster
    }

    /// Forward a local edit to every other member of the sender's room.
    ///
    /// Returns the number of members the frame was delivered to.
    pub async fn relay_code_change(&self, from: &str, room_id: &str, code: Option<String>) -> usize {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.get_mut(room_id) else {
            return 0;
        };
        if room.position(from).is_none() {
            return 0;
        }

        let has_code = code.is_some();
        let msg = CodeChangeMessage {
            room_id: Some(room_id.to_string()),
            code,
        };
        let recipients: Vec<&RoomMember> = room
            .members
            .iter()
            .filter(|m| m.member.connection_id != from)
            .collect();
        let delivered = deliver(&recipients, Event::CodeChange, &msg);

        if has_code {
            for m in room.members.iter_mut().filter(|m| m.member.connection_id != from) {
                m.awaiting_sync = false;
            }
        }
        debug!("CODE_CHANGE from {} in room {} delivered to {}", from, room_id, delivered);
        delivered
    }

    /// Route a `SYNC_CODE` to the members of the sender's room still waiting
    /// for a document.
    ///
    /// Ignored when the sender is itself waiting (it has nothing authoritative)
    /// or carries no code. Never delivered to the sender or `requester_id`.
    pub async fn route_sync(&self, from: &str, code: Option<String>, requester_id: &str) -> usize {
        let mut state = self.state.write().await;
        let Some(room_id) = state.memberships.get(from).cloned() else {
            return 0;
        };
        let Some(room) = state.rooms.get_mut(&room_id) else {
            return 0;
        };
        let Some(sender) = room.get(from) else {
            return 0;
        };
        if sender.awaiting_sync {
            debug!("Ignoring SYNC_CODE from {} in room {}: sender not caught up", from, room_id);
            return 0;
        }
        let Some(code) = code else {
            debug!("Ignoring SYNC_CODE without code from {} in room {}", from, room_id);
            return 0;
        };

        let msg = CodeChangeMessage {
            room_id: Some(room_id.clone()),
            code: Some(code),
        };
        let is_target = |m: &RoomMember| {
            m.awaiting_sync && m.member.connection_id != from && m.member.connection_id != requester_id
        };
        let recipients: Vec<&RoomMember> = room.members.iter().filter(|m| is_target(m)).collect();
        let delivered = deliver(&recipients, Event::CodeChange, &msg);
        for m in room.members.iter_mut() {
            if is_target(m) {
                m.awaiting_sync = false;
            }
        }

        if delivered > 0 {
            info!("Caught up {} member(s) of room {} from {}", delivered, room_id, from);
        }
        delivered
    }

    /// Remove a connection and announce `MEMBER_LEFT` to the rest of its room.
    ///
    /// Safe to call for unknown or already removed connections.
    pub async fn leave(&self, connection_id: &str) -> Option<Member> {
        let mut state = self.state.write().await;
        Self::remove_locked(&mut state, connection_id)
    }

    fn remove_locked(state: &mut RegistryState, connection_id: &str) -> Option<Member> {
        let room_id = state.memberships.remove(connection_id)?;
        let room = state.rooms.get_mut(&room_id)?;
        let idx = room.position(connection_id)?;
        let departed = room.members.remove(idx).member;

        if room.members.is_empty() {
            state.rooms.remove(&room_id);
            info!("{} ({}) left room {}; room removed (empty)", departed.display_name, connection_id, room_id);
            return Some(departed);
        }

        // Nobody left who could catch up the waiting members.
        if room.members.iter().all(|m| m.awaiting_sync) {
            for m in room.members.iter_mut() {
                m.awaiting_sync = false;
            }
        }

        let left = MemberLeftMessage {
            connection_id: departed.connection_id.clone(),
            display_name: departed.display_name.clone(),
        };
        let recipients: Vec<&RoomMember> = room.members.iter().collect();
        let delivered = deliver(&recipients, Event::MemberLeft, &left);
        info!(
            "{} ({}) left room {} (MEMBER_LEFT sent to {})",
            departed.display_name, connection_id, room_id, delivered
        );
        Some(departed)
    }

    pub async fn room_of(&self, connection_id: &str) -> Option<String> {
        self.state.read().await.memberships.get(connection_id).cloned()
    }

    pub async fn members(&self, room_id: &str) -> Option<Vec<Member>> {
        self.state.read().await.rooms.get(room_id).map(Room::roster)
    }

    pub async fn stats(&self) -> RegistryStats {
        let state = self.state.read().await;
        RegistryStats {
            rooms: state.rooms.len(),
            connections: state.memberships.len(),
            awaiting_sync: state
                .rooms
                .values()
                .flat_map(|r| r.members.iter())
                .filter(|m| m.awaiting_sync)
                .count(),
        }
    }
}

/// Encode once and push to every recipient. Returns how many accepted the frame.
fn deliver<T: Serialize>(recipients: &[&RoomMember], event: Event, payload: &T) -> usize {
    let text = match Envelope::encode(event, payload) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode {}: {}", event, e);
            return 0;
        }
    };
    recipients
        .iter()
        .filter(|m| match m.sender.send(text.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!("Dropping {} for closed connection {}", event, m.member.connection_id);
                false
            }
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeChangeMessage, JoinedMessage, MemberLeftMessage};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn peer(id: &str) -> (Member, PeerSender, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Member::new(id, format!("user-{id}")), tx, rx)
    }

    fn frames(rx: &mut UnboundedReceiver<String>) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(text) = rx.try_recv() {
            out.push(Envelope::parse(&text).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn join_announces_roster_to_everyone_including_joiner() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = peer("a");
        let (b, b_tx, mut b_rx) = peer("b");

        registry.join("R1", a.clone(), a_tx).await;
        let roster = registry.join("R1", b.clone(), b_tx).await;
        assert_eq!(roster, vec![a.clone(), b.clone()]);

        let a_frames = frames(&mut a_rx);
        assert_eq!(a_frames.len(), 2);
        let joined: JoinedMessage = a_frames[1].payload_as().unwrap();
        assert_eq!(joined.joiner_id, "b");
        assert_eq!(joined.members.len(), 2);

        let b_frames = frames(&mut b_rx);
        assert_eq!(b_frames.len(), 1);
        assert_eq!(b_frames[0].event, Event::Joined);
    }

    #[tokio::test]
    async fn code_change_is_not_echoed_to_sender() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = peer("a");
        let (b, b_tx, mut b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b, b_tx).await;
        frames(&mut a_rx);
        frames(&mut b_rx);

        let delivered = registry.relay_code_change("a", "R1", Some("x".into())).await;
        assert_eq!(delivered, 1);
        assert!(frames(&mut a_rx).is_empty());
        let got = frames(&mut b_rx);
        let msg: CodeChangeMessage = got[0].payload_as().unwrap();
        assert_eq!(msg.code.as_deref(), Some("x"));
        assert_eq!(msg.room_id.as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn code_change_for_foreign_room_is_dropped() {
        let registry = RoomRegistry::new();
        let (a, a_tx, _a_rx) = peer("a");
        let (b, b_tx, mut b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R2", b, b_tx).await;
        frames(&mut b_rx);

        assert_eq!(registry.relay_code_change("a", "R2", Some("x".into())).await, 0);
        assert!(frames(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn sync_reaches_only_members_awaiting_catch_up() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = peer("a");
        let (b, b_tx, mut b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b, b_tx).await;
        assert_eq!(registry.stats().await.awaiting_sync, 1);
        frames(&mut a_rx);
        frames(&mut b_rx);

        // The joiner's own sync carries nothing authoritative.
        assert_eq!(registry.route_sync("b", Some(String::new()), "b").await, 0);
        assert!(frames(&mut a_rx).is_empty());

        assert_eq!(registry.route_sync("a", Some("hello".into()), "a").await, 1);
        let got = frames(&mut b_rx);
        assert_eq!(got[0].event, Event::CodeChange);
        let msg: CodeChangeMessage = got[0].payload_as().unwrap();
        assert_eq!(msg.code.as_deref(), Some("hello"));
        assert_eq!(registry.stats().await.awaiting_sync, 0);

        // Already caught up: a second sync goes nowhere.
        assert_eq!(registry.route_sync("a", Some("hello".into()), "a").await, 0);
    }

    #[tokio::test]
    async fn sync_without_code_is_ignored() {
        let registry = RoomRegistry::new();
        let (a, a_tx, _a_rx) = peer("a");
        let (b, b_tx, mut b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b, b_tx).await;
        frames(&mut b_rx);

        assert_eq!(registry.route_sync("a", None, "a").await, 0);
        assert!(frames(&mut b_rx).is_empty());
        assert_eq!(registry.stats().await.awaiting_sync, 1);
    }

    #[tokio::test]
    async fn leave_announces_departure_and_drops_empty_rooms() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = peer("a");
        let (b, b_tx, _b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b.clone(), b_tx).await;
        frames(&mut a_rx);

        assert_eq!(registry.leave("b").await, Some(b));
        let got = frames(&mut a_rx);
        let left: MemberLeftMessage = got[0].payload_as().unwrap();
        assert_eq!(left.connection_id, "b");
        assert_eq!(left.display_name, "user-b");

        assert!(registry.leave("b").await.is_none());
        registry.leave("a").await;
        assert!(registry.members("R1").await.is_none());
        assert_eq!(registry.stats().await, RegistryStats::default());
    }

    #[tokio::test]
    async fn waiting_members_are_released_when_no_source_remains() {
        let registry = RoomRegistry::new();
        let (a, a_tx, _a_rx) = peer("a");
        let (b, b_tx, _b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b, b_tx).await;
        assert_eq!(registry.stats().await.awaiting_sync, 1);

        registry.leave("a").await;
        assert_eq!(registry.stats().await.awaiting_sync, 0);
    }

    #[tokio::test]
    async fn joining_another_room_leaves_the_previous_one() {
        let registry = RoomRegistry::new();
        let (a, a_tx, mut a_rx) = peer("a");
        let (b, b_tx, _b_rx) = peer("b");
        registry.join("R1", a, a_tx).await;
        registry.join("R1", b.clone(), b_tx.clone()).await;
        frames(&mut a_rx);

        registry.join("R2", b, b_tx).await;
        assert_eq!(frames(&mut a_rx)[0].event, Event::MemberLeft);
        assert_eq!(registry.room_of("b").await.as_deref(), Some("R2"));
        assert_eq!(registry.members("R1").await.unwrap().len(), 1);
    }
}
