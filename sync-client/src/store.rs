use crate::api::{ApiError, TransitApi};
use crate::cancellation::{CancellationManager, RequestClass, RequestToken};
use crate::channel::{ChannelEvent, PushChannel, TransportError};
use crate::state::{reduce, Action, ConnectionState, StoreState};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use transit_types::{ClientEvent, Pattern, Point, Route, Stop, Vehicle};

/// Result of a pattern fetch, waiting to re-enter the store.
#[derive(Debug)]
pub struct PatternCompletion {
    token: RequestToken,
    route: String,
    result: Result<Vec<Pattern>, ApiError>,
}

/// Single writer for [`StoreState`].
///
/// Local actions are applied optimistically and mirrored to the server as
/// subscription intents. Network results never touch the state directly:
/// they come back through [`SyncStore::process_next`] and are checked against
/// the cancellation manager first.
pub struct SyncStore {
    state: StoreState,
    channel: Arc<dyn PushChannel>,
    api: Arc<dyn TransitApi>,
    cancellation: CancellationManager,
    pattern_route: Option<String>,
    completions_tx: mpsc::UnboundedSender<PatternCompletion>,
    completions_rx: mpsc::UnboundedReceiver<PatternCompletion>,
}

impl SyncStore {
    pub fn new(channel: Arc<dyn PushChannel>, api: Arc<dyn TransitApi>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        SyncStore {
            state: StoreState {
                connection: channel.state(),
                ..StoreState::default()
            },
            channel,
            api,
            cancellation: CancellationManager::new(),
            pattern_route: None,
            completions_tx,
            completions_rx,
        }
    }

    pub fn snapshot(&self) -> &StoreState {
        &self.state
    }

    fn dispatch(&mut self, action: Action) {
        let state = std::mem::take(&mut self.state);
        self.state = reduce(state, action);
    }

    fn cancel_pattern_fetch(&mut self) {
        self.cancellation.cancel(RequestClass::Pattern);
        self.pattern_route = None;
        self.dispatch(Action::SetPatternLoading(false));
    }

    /// Selects `route`, starts loading its patterns and tells the server.
    /// Selecting an already selected route does nothing.
    pub fn set_route(&mut self, route: Route) -> Result<(), TransportError> {
        if self.state.is_selected(&route.route) {
            return Ok(());
        }
        let intent = ClientEvent::RouteAdd {
            route: route.route.clone(),
            color: route.color.clone(),
            route_type: route.route_type,
        };

        self.dispatch(Action::SetRoute(route.clone()));
        self.fetch_patterns(route);
        self.channel.emit(intent)
    }

    fn fetch_patterns(&mut self, route: Route) {
        let token = self.cancellation.issue(RequestClass::Pattern);
        self.pattern_route = Some(route.route.clone());
        self.dispatch(Action::SetPatternLoading(true));

        let api = self.api.clone();
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.get_patterns(&route.route, &route.color, route.route_type).await;
            let _ = completions.send(PatternCompletion {
                token,
                route: route.route,
                result,
            });
        });
    }

    pub fn remove_route(&mut self, id: &str) -> Result<(), TransportError> {
        let Some(route) = self.state.route(id).cloned() else {
            return Ok(());
        };
        if self.pattern_route.as_deref() == Some(id) {
            self.cancel_pattern_fetch();
        }
        self.dispatch(Action::RemoveRoute(route.route.clone()));
        self.channel.emit(ClientEvent::RouteRemove {
            route: route.route,
            route_type: route.route_type,
        })
    }

    pub fn remove_all_routes(&mut self) -> Result<(), TransportError> {
        self.cancel_pattern_fetch();
        self.dispatch(Action::RemoveAllRoutes);
        self.channel.emit(ClientEvent::RouteRemoveAll)
    }

    /// Replaces the vehicle list with the latest push.
    pub fn set_vehicles(&mut self, vehicles: Vec<Vehicle>) {
        self.dispatch(Action::SetVehicles(vehicles));
    }

    pub fn open_stop(&mut self, stop: Stop) {
        self.dispatch(Action::SetStop(Some(stop)));
    }

    pub fn close_stop(&mut self) {
        self.dispatch(Action::SetStop(None));
    }

    pub fn set_current_location(&mut self, point: Point) {
        self.dispatch(Action::SetCurrentLocation(point));
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.dispatch(Action::SetError(error));
    }

    /// Presence hint; an idle client receives no pushes until active again.
    pub fn set_idle(&mut self, idle: bool) -> Result<(), TransportError> {
        self.channel
            .emit(if idle { ClientEvent::Idle } else { ClientEvent::Active })
    }

    fn flush(&mut self) {
        self.cancellation.cancel(RequestClass::Pattern);
        self.pattern_route = None;
        self.dispatch(Action::Flush);
    }

    pub fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connect => {
                // Intents are accepted as soon as the socket is up, so the
                // server may already hold routes this flush drops.
                let stale = !self.state.routes.is_empty();
                self.flush();
                self.dispatch(Action::SetConnection(ConnectionState::Connected));
                self.dispatch(Action::SetError(None));
                if stale {
                    if let Err(e) = self.channel.emit(ClientEvent::RouteRemoveAll) {
                        debug!("Could not reset the server selection on connect: {e}");
                    }
                }
            }
            ChannelEvent::Disconnect => {
                self.flush();
                self.dispatch(Action::SetConnection(ConnectionState::Disconnected));
            }
            ChannelEvent::Error(message) => {
                self.flush();
                self.dispatch(Action::SetConnection(ConnectionState::Error));
                self.dispatch(Action::SetError(Some(message)));
            }
            ChannelEvent::ServerError => {
                info!("Server reset its subscriptions, dropping the local selection");
                self.flush();
                self.dispatch(Action::SetError(Some("server error".to_string())));
                if let Err(e) = self.channel.emit(ClientEvent::RouteRemoveAll) {
                    debug!("Could not confirm remove-all after a server error: {e}");
                }
            }
            ChannelEvent::UpdateVehicles(vehicles) => self.set_vehicles(vehicles),
        }
    }

    /// Applies a finished pattern fetch. Returns false when it was discarded.
    pub fn apply_completion(&mut self, completion: PatternCompletion) -> bool {
        let PatternCompletion { token, route, result } = completion;
        if !self.cancellation.is_current(&token) || !self.state.is_selected(&route) {
            debug!("Discarding stale patterns for route {route}");
            return false;
        }
        self.cancellation.settle(&token);
        self.pattern_route = None;

        match result {
            Ok(patterns) => self.dispatch(Action::SetPatterns { route, patterns }),
            Err(e) => {
                warn!("Loading patterns for route {route} failed: {e}");
                self.dispatch(Action::SetError(Some(e.to_string())));
            }
        }
        self.dispatch(Action::SetPatternLoading(false));
        true
    }

    /// Waits for the next pattern fetch to finish and applies it.
    pub async fn process_next(&mut self) -> bool {
        match self.completions_rx.recv().await {
            Some(completion) => self.apply_completion(completion),
            None => false,
        }
    }

    /// Applies every completion that has already arrived.
    pub fn drain_completions(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions_rx.try_recv() {
            if self.apply_completion(completion) {
                applied += 1;
            }
        }
        applied
    }
}
