//! Per-connection route subscriptions.
//!
//! The registry is the only state shared between connections. Every mutation
//! goes through the one mutex and wakes the broadcaster so it can arm or
//! disarm its timer.

use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use transit_types::{RouteType, ServerEvent};

pub type ConnectionId = u64;
pub type Outbound = mpsc::UnboundedSender<ServerEvent>;

/// One entry of a connection's subscription set, as announced by `route-add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribedRoute {
    pub route: String,
    pub color: String,
    pub route_type: RouteType,
}

struct ConnectionEntry {
    routes: BTreeMap<String, SubscribedRoute>,
    idle: bool,
    /// Bumped on every change to `routes` or `idle`.
    revision: u64,
    outbound: Outbound,
}

/// A connection that currently wants pushes.
pub struct Subscriber {
    pub id: ConnectionId,
    pub revision: u64,
    pub routes: Vec<String>,
    pub outbound: Outbound,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    connections: Mutex<FxHashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
    changed: Arc<Notify>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<ConnectionId, ConnectionEntry>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Signalled after every mutation.
    pub fn changed(&self) -> Arc<Notify> {
        self.changed.clone()
    }

    fn notify(&self) {
        self.changed.notify_one();
    }

    /// Registers a new connection with an empty subscription set.
    pub fn open(&self, outbound: Outbound) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().insert(
            id,
            ConnectionEntry {
                routes: BTreeMap::new(),
                idle: false,
                revision: 0,
                outbound,
            },
        );
        id
    }

    pub fn close(&self, connection: ConnectionId) {
        let removed = self.lock().remove(&connection);
        if removed.is_some() {
            self.notify();
        }
    }

    /// Adds `route` to the connection's set. Returns false when it was already
    /// present or the connection is unknown.
    pub fn subscribe(&self, connection: ConnectionId, route: SubscribedRoute) -> bool {
        let added = match self.lock().get_mut(&connection) {
            Some(entry) if !entry.routes.contains_key(&route.route) => {
                entry.routes.insert(route.route.clone(), route);
                entry.revision += 1;
                true
            }
            _ => false,
        };
        if added {
            self.notify();
        }
        added
    }

    pub fn unsubscribe(&self, connection: ConnectionId, route: &str) -> bool {
        let removed = match self.lock().get_mut(&connection) {
            Some(entry) => {
                let removed = entry.routes.remove(route).is_some();
                if removed {
                    entry.revision += 1;
                }
                removed
            }
            None => false,
        };
        if removed {
            self.notify();
        }
        removed
    }

    pub fn clear(&self, connection: ConnectionId) {
        let cleared = match self.lock().get_mut(&connection) {
            Some(entry) if !entry.routes.is_empty() => {
                entry.routes.clear();
                entry.revision += 1;
                true
            }
            _ => false,
        };
        if cleared {
            self.notify();
        }
    }

    /// Presence hint. Idle connections are not polled for and get no pushes.
    pub fn set_idle(&self, connection: ConnectionId, idle: bool) {
        let changed = match self.lock().get_mut(&connection) {
            Some(entry) if entry.idle != idle => {
                entry.idle = idle;
                entry.revision += 1;
                true
            }
            _ => false,
        };
        if changed {
            self.notify();
        }
    }

    pub fn routes_of(&self, connection: ConnectionId) -> Vec<String> {
        self.lock()
            .get(&connection)
            .map(|entry| entry.routes.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Union of the sets of every active connection. Routes are deduplicated
    /// by identifier; the first announcement's color and type win.
    pub fn polled_routes(&self) -> Vec<SubscribedRoute> {
        let connections = self.lock();
        let mut union: BTreeMap<&str, &SubscribedRoute> = BTreeMap::new();
        for entry in connections.values().filter(|entry| !entry.idle) {
            for (id, route) in &entry.routes {
                union.entry(id.as_str()).or_insert(route);
            }
        }
        union.into_values().cloned().collect()
    }

    /// Active connections with at least one route.
    pub fn subscribers(&self) -> Vec<Subscriber> {
        self.lock()
            .iter()
            .filter(|(_, entry)| !entry.idle && !entry.routes.is_empty())
            .map(|(id, entry)| Subscriber {
                id: *id,
                revision: entry.revision,
                routes: entry.routes.keys().cloned().collect(),
                outbound: entry.outbound.clone(),
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(route: &str) -> SubscribedRoute {
        SubscribedRoute {
            route: route.to_string(),
            color: "#ff0000".to_string(),
            route_type: RouteType::Bus,
        }
    }

    fn open(registry: &SubscriptionRegistry) -> ConnectionId {
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.open(tx)
    }

    fn ids(routes: Vec<SubscribedRoute>) -> Vec<String> {
        routes.into_iter().map(|r| r.route).collect()
    }

    #[test]
    fn subscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let conn = open(&registry);
        assert!(registry.subscribe(conn, bus("22")));
        assert!(!registry.subscribe(conn, bus("22")));
        assert_eq!(registry.routes_of(conn), vec!["22"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = SubscriptionRegistry::new();
        let conn = open(&registry);
        registry.subscribe(conn, bus("22"));
        assert!(registry.unsubscribe(conn, "22"));
        assert!(!registry.unsubscribe(conn, "22"));
        assert!(!registry.unsubscribe(conn, "36"));
        assert!(registry.routes_of(conn).is_empty());
    }

    #[test]
    fn revision_moves_only_on_change() {
        let registry = SubscriptionRegistry::new();
        let conn = open(&registry);
        registry.subscribe(conn, bus("22"));
        registry.subscribe(conn, bus("36"));
        let before = registry.subscribers()[0].revision;

        assert!(!registry.unsubscribe(conn, "8"));
        assert_eq!(registry.subscribers()[0].revision, before);

        assert!(registry.unsubscribe(conn, "36"));
        assert_eq!(registry.subscribers()[0].revision, before + 1);
        assert_eq!(registry.routes_of(conn), vec!["22"]);
    }

    #[test]
    fn union_deduplicates_across_connections() {
        let registry = SubscriptionRegistry::new();
        let a = open(&registry);
        let b = open(&registry);
        registry.subscribe(a, bus("22"));
        registry.subscribe(a, bus("36"));
        registry.subscribe(b, bus("22"));
        assert_eq!(ids(registry.polled_routes()), vec!["22", "36"]);

        registry.clear(a);
        assert_eq!(ids(registry.polled_routes()), vec!["22"]);
        registry.close(b);
        assert!(registry.polled_routes().is_empty());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn idle_connections_are_not_polled() {
        let registry = SubscriptionRegistry::new();
        let conn = open(&registry);
        registry.subscribe(conn, bus("22"));
        registry.set_idle(conn, true);
        assert!(registry.polled_routes().is_empty());
        assert!(registry.subscribers().is_empty());
        // Subscriptions survive the idle period.
        registry.set_idle(conn, false);
        assert_eq!(ids(registry.polled_routes()), vec!["22"]);
    }

    #[test]
    fn unknown_connection_is_ignored() {
        let registry = SubscriptionRegistry::new();
        assert!(!registry.subscribe(42, bus("22")));
        assert!(registry.polled_routes().is_empty());
    }

    #[tokio::test]
    async fn mutations_wake_listeners() {
        let registry = SubscriptionRegistry::new();
        let changed = registry.changed();
        let conn = open(&registry);
        registry.subscribe(conn, bus("22"));
        // notify_one stores a permit when nobody is waiting yet.
        tokio::time::timeout(std::time::Duration::from_secs(1), changed.notified())
            .await
            .unwrap();
    }
}
