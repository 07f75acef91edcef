//! Periodic vehicle position polling for every subscribed route.

use crate::gateway::{GatewayError, TransitGateway};
use crate::subscriptions::{ConnectionId, SubscribedRoute, SubscriptionRegistry};
use futures::future::join_all;
use log::{debug, error, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use transit_types::{ServerEvent, Vehicle};

#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing is subscribed; no upstream call was made.
    Idle,
    /// Failed routes count as empty; their subscribers still get a snapshot.
    Pushed { polled: usize, failed: usize, sent: usize },
    /// The upstream has been unusable for `outage_ticks` ticks in a row;
    /// subscribers were told to start over.
    Failed { polled: usize },
}

pub struct Broadcaster {
    registry: Arc<SubscriptionRegistry>,
    gateway: Arc<dyn TransitGateway>,
    period: Duration,
    call_timeout: Duration,
    /// Subscription revision and fingerprint of the last snapshot sent.
    last_sent: FxHashMap<ConnectionId, (u64, u64)>,
    outage_ticks: u32,
    /// Consecutive ticks in which every polled route failed.
    failed_ticks: u32,
}

pub const DEFAULT_OUTAGE_TICKS: u32 = 3;

fn fingerprint(frame: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    frame.hash(&mut hasher);
    hasher.finish()
}

impl Broadcaster {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        gateway: Arc<dyn TransitGateway>,
        period: Duration,
        call_timeout: Duration,
    ) -> Self {
        Broadcaster {
            registry,
            gateway,
            period,
            call_timeout,
            last_sent: FxHashMap::default(),
            outage_ticks: DEFAULT_OUTAGE_TICKS,
            failed_ticks: 0,
        }
    }

    /// Number of consecutive all-failed ticks treated as an upstream outage.
    pub fn with_outage_ticks(mut self, ticks: u32) -> Self {
        self.outage_ticks = ticks.max(1);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs forever. The timer only exists while something is subscribed;
    /// ticks are awaited in sequence so they never overlap.
    pub async fn run(mut self) {
        let changed = self.registry.changed();
        loop {
            while self.registry.polled_routes().is_empty() {
                self.last_sent.clear();
                self.failed_ticks = 0;
                changed.notified().await;
            }

            info!("Broadcaster armed, polling every {:?}", self.period);
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if self.tick().await == TickOutcome::Idle {
                            break;
                        }
                    }
                    _ = changed.notified() => {
                        if self.registry.polled_routes().is_empty() {
                            break;
                        }
                    }
                }
            }
            info!("Broadcaster disarmed, nothing subscribed");
        }
    }

    async fn poll_route(&self, route: &SubscribedRoute) -> Result<Vec<Vehicle>, GatewayError> {
        let ids = std::slice::from_ref(&route.route);
        let call = self.gateway.get_vehicle_positions(ids, route.route_type);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.call_timeout)),
        }
    }

    /// One polling cycle: scatter one upstream call per subscribed route,
    /// gather per route, then push each connection its own slice.
    pub async fn tick(&mut self) -> TickOutcome {
        let routes = self.registry.polled_routes();
        if routes.is_empty() {
            return TickOutcome::Idle;
        }

        let results = join_all(routes.iter().map(|route| self.poll_route(route))).await;

        let mut failed = 0;
        let mut merged: FxHashMap<&str, Vec<Vehicle>> = FxHashMap::default();
        for (route, result) in routes.iter().zip(results) {
            let vehicles = match result {
                Ok(vehicles) => vehicles,
                Err(e) => {
                    warn!("No positions for route {} this tick: {e}", route.route);
                    failed += 1;
                    Vec::new()
                }
            };
            let mut seen = FxHashSet::default();
            let vehicles = vehicles
                .into_iter()
                .filter(|v| seen.insert(v.id.clone()))
                .map(|mut v| {
                    v.route = route.route.clone();
                    v.color = route.color.clone();
                    v
                })
                .collect();
            merged.insert(route.route.as_str(), vehicles);
        }

        if failed < routes.len() {
            self.failed_ticks = 0;
        } else {
            self.failed_ticks += 1;
        }

        let subscribers = self.registry.subscribers();
        if self.failed_ticks >= self.outage_ticks {
            error!(
                "Upstream unusable for {} ticks in a row, resetting subscribers",
                self.failed_ticks
            );
            self.failed_ticks = 0;
            for subscriber in subscribers {
                let _ = subscriber.outbound.send(ServerEvent::ServerError);
                self.registry.clear(subscriber.id);
                self.last_sent.remove(&subscriber.id);
            }
            return TickOutcome::Failed { polled: routes.len() };
        }

        let mut sent = 0;
        let mut live = FxHashSet::default();
        for subscriber in subscribers {
            live.insert(subscriber.id);
            let snapshot: Vec<Vehicle> = subscriber
                .routes
                .iter()
                .filter_map(|route| merged.get(route.as_str()))
                .flatten()
                .cloned()
                .collect();
            let event = ServerEvent::UpdateVehicles(snapshot);
            let print = match event.to_frame() {
                Ok(frame) => fingerprint(&frame),
                Err(e) => {
                    warn!("Could not encode snapshot for connection {}: {e}", subscriber.id);
                    continue;
                }
            };
            if self.last_sent.get(&subscriber.id) == Some(&(subscriber.revision, print)) {
                continue;
            }
            if subscriber.outbound.send(event).is_err() {
                debug!("Connection {} went away mid-tick", subscriber.id);
                self.registry.close(subscriber.id);
                continue;
            }
            self.last_sent.insert(subscriber.id, (subscriber.revision, print));
            sent += 1;
        }
        self.last_sent.retain(|id, _| live.contains(id));

        debug!("Tick polled {} routes, {failed} failed, {sent} pushes", routes.len());
        TickOutcome::Pushed {
            polled: routes.len(),
            failed,
            sent,
        }
    }
}
