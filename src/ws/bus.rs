//! Broadcast bus
//! Mission: fan typed events out to connected sessions with room-style
//! targeting, and track who is online for the admin monitor.

use crate::store::Role;
use crate::ws::events::ServerEvent;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Delivery scope of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Global,
    /// The personal room `user:<id>`.
    User(i64),
    Admins,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub target: Target,
    pub event: ServerEvent,
}

impl Envelope {
    /// Whether a session with this identity should receive the envelope.
    pub fn matches(&self, user_id: i64, role: Role) -> bool {
        match self.target {
            Target::Global => true,
            Target::User(id) => id == user_id,
            Target::Admins => role == Role::Admin,
        }
    }
}

/// One point-in-time presence sample for the monitor history.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSample {
    pub timestamp: i64,
    pub online_count: usize,
}

const PRESENCE_HISTORY_CAP: usize = 1440;

/// Push channel to connected clients plus presence bookkeeping.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Envelope>,
    connected: Arc<RwLock<HashMap<i64, usize>>>,
    presence_history: Arc<RwLock<VecDeque<PresenceSample>>>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self {
            tx,
            connected: Arc::new(RwLock::new(HashMap::new())),
            presence_history: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    fn emit(&self, target: Target, event: ServerEvent) {
        // Send errors just mean nobody is connected right now.
        if self.tx.send(Envelope { target, event }).is_err() {
            debug!("no connected sessions for broadcast");
        }
    }

    pub fn global_emit(&self, event: ServerEvent) {
        self.emit(Target::Global, event);
    }

    pub fn to_user(&self, user_id: i64, event: ServerEvent) {
        self.emit(Target::User(user_id), event);
    }

    pub fn to_admins(&self, event: ServerEvent) {
        self.emit(Target::Admins, event);
    }

    // --- presence ---

    pub fn session_connected(&self, user_id: i64) {
        *self.connected.write().entry(user_id).or_insert(0) += 1;
    }

    pub fn session_disconnected(&self, user_id: i64) {
        let mut connected = self.connected.write();
        if let Some(count) = connected.get_mut(&user_id) {
            *count -= 1;
            if *count == 0 {
                connected.remove(&user_id);
            }
        }
    }

    pub fn online_user_ids(&self) -> Vec<i64> {
        self.connected.read().keys().copied().collect()
    }

    pub fn online_count(&self) -> usize {
        self.connected.read().len()
    }

    /// Record a presence sample (called periodically from main).
    pub fn record_presence_sample(&self, now: i64) {
        let sample = PresenceSample {
            timestamp: now,
            online_count: self.online_count(),
        };
        let mut history = self.presence_history.write();
        history.push_back(sample);
        while history.len() > PRESENCE_HISTORY_CAP {
            history.pop_front();
        }
    }

    pub fn presence_history(&self) -> Vec<PresenceSample> {
        self.presence_history.read().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_targeting() {
        let global = Envelope {
            target: Target::Global,
            event: ServerEvent::ClearNews,
        };
        assert!(global.matches(1, Role::User));
        assert!(global.matches(2, Role::Admin));

        let personal = Envelope {
            target: Target::User(7),
            event: ServerEvent::ClearNews,
        };
        assert!(personal.matches(7, Role::User));
        assert!(!personal.matches(8, Role::User));

        let admins = Envelope {
            target: Target::Admins,
            event: ServerEvent::ClearNews,
        };
        assert!(admins.matches(1, Role::Admin));
        assert!(!admins.matches(1, Role::User));
    }

    #[tokio::test]
    async fn test_bus_delivers_to_subscribers() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        bus.global_emit(ServerEvent::ClearNews);
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.target, Target::Global);
    }

    #[test]
    fn test_presence_counts_multiple_sessions() {
        let bus = Bus::new(16);
        bus.session_connected(1);
        bus.session_connected(1);
        bus.session_connected(2);
        assert_eq!(bus.online_count(), 2);

        bus.session_disconnected(1);
        assert_eq!(bus.online_count(), 2);
        bus.session_disconnected(1);
        assert_eq!(bus.online_count(), 1);

        bus.record_presence_sample(1000);
        let history = bus.presence_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].online_count, 1);
    }
}
