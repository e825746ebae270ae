//! Event-handler registration table keyed by event name.

use std::collections::HashMap;

use serde_json::Value;

use crate::client::connection::Outbox;
use crate::models::Event;

/// A registered callback. Receives the raw payload and the connection's
/// outbox so it can reply without borrowing the connection itself.
pub type Handler = Box<dyn FnMut(&Value, &Outbox) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct HandlerTable {
    next_id: u64,
    entries: HashMap<Event, Vec<(HandlerId, Handler)>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event: Event, handler: Handler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.entries.entry(event).or_default().push((id, handler));
        id
    }

    /// Remove one handler. Returns false if it was not registered.
    pub fn remove(&mut self, event: Event, id: HandlerId) -> bool {
        let Some(list) = self.entries.get_mut(&event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(hid, _)| *hid != id);
        let removed = list.len() != before;
        if list.is_empty() {
            self.entries.remove(&event);
        }
        removed
    }

    pub fn remove_all(&mut self, event: Event) -> usize {
        self.entries.remove(&event).map_or(0, |list| list.len())
    }

    pub fn clear(&mut self) -> usize {
        let count = self.len();
        self.entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, event: Event) -> usize {
        self.entries.get(&event).map_or(0, Vec::len)
    }

    /// Run every handler registered for `event`, in registration order.
    pub fn dispatch(&mut self, event: Event, payload: &Value, outbox: &Outbox) -> usize {
        match self.entries.get_mut(&event) {
            Some(list) => {
                for (_, handler) in list.iter_mut() {
                    handler(payload, outbox);
                }
                list.len()
            }
            None => 0,
        }
    }
}
