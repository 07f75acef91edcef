use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use transit_types::{Pattern, Point, Route, Stop, Vehicle};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Everything the view layer renders. Only [`reduce`] produces new values.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    /// Selected routes in selection order, unique by id.
    pub routes: Vec<Route>,
    pub patterns: Vec<Pattern>,
    pub vehicles: Vec<Vehicle>,
    /// Ids of `routes`; vehicles outside this set are never kept.
    pub vehicle_routes: BTreeSet<String>,
    pub stop: Option<Stop>,
    pub connection: ConnectionState,
    pub pattern_loading: bool,
    pub error: Option<String>,
    pub current_location: Option<Point>,
}

impl StoreState {
    pub fn is_selected(&self, route: &str) -> bool {
        self.vehicle_routes.contains(route)
    }

    pub fn route(&self, route: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.route == route)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SetRoute(Route),
    RemoveRoute(String),
    RemoveAllRoutes,
    SetPatternLoading(bool),
    /// Patterns of one route; replaces whatever that route had.
    SetPatterns { route: String, patterns: Vec<Pattern> },
    SetVehicles(Vec<Vehicle>),
    SetStop(Option<Stop>),
    SetConnection(ConnectionState),
    SetCurrentLocation(Point),
    SetError(Option<String>),
    /// Drops every selection and everything derived from it.
    Flush,
}

fn derive_vehicle_routes(state: &mut StoreState) {
    state.vehicle_routes = state.routes.iter().map(|r| r.route.clone()).collect();
}

fn clear_selection(state: &mut StoreState) {
    state.routes.clear();
    state.patterns.clear();
    state.vehicles.clear();
    state.vehicle_routes.clear();
    state.pattern_loading = false;
}

pub fn reduce(mut state: StoreState, action: Action) -> StoreState {
    match action {
        Action::SetRoute(route) => {
            if !state.is_selected(&route.route) {
                state.routes.push(route);
                derive_vehicle_routes(&mut state);
            }
        }
        Action::RemoveRoute(id) => {
            state.routes.retain(|r| r.route != id);
            state.patterns.retain(|p| p.route != id);
            state.vehicles.retain(|v| v.route != id);
            derive_vehicle_routes(&mut state);
        }
        Action::RemoveAllRoutes | Action::Flush => clear_selection(&mut state),
        Action::SetPatternLoading(loading) => state.pattern_loading = loading,
        Action::SetPatterns { route, patterns } => {
            if state.is_selected(&route) {
                state.patterns.retain(|p| p.route != route);
                state.patterns.extend(patterns);
            }
        }
        Action::SetVehicles(vehicles) => {
            state.vehicles = vehicles
                .into_iter()
                .filter(|v| state.vehicle_routes.contains(&v.route))
                .collect();
        }
        Action::SetStop(stop) => state.stop = stop,
        Action::SetConnection(connection) => state.connection = connection,
        Action::SetCurrentLocation(point) => state.current_location = Some(point),
        Action::SetError(error) => state.error = error,
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_types::RouteType;

    fn route(id: &str) -> Route {
        Route {
            route: id.to_string(),
            name: format!("Route {id}"),
            color: "#336699".to_string(),
            route_type: RouteType::Bus,
        }
    }

    fn vehicle(id: &str, route: &str) -> Vehicle {
        Vehicle {
            id: id.to_string(),
            route: route.to_string(),
            position: Point::new(41.9, -87.6),
            heading: 90,
            destination: "Howard".to_string(),
            delayed: false,
            timestamp: "2024-01-05 14:32".to_string(),
            color: "#336699".to_string(),
            route_type: RouteType::Bus,
        }
    }

    fn pattern(id: u64, route: &str) -> Pattern {
        Pattern {
            id,
            route: route.to_string(),
            direction: "Northbound".to_string(),
            fill_color: "#336699".to_string(),
            stroke_color: "#336699".to_string(),
            paths: vec![Point::new(41.9, -87.6)],
            stops: Vec::new(),
            route_type: RouteType::Bus,
        }
    }

    fn apply(actions: Vec<Action>) -> StoreState {
        actions.into_iter().fold(StoreState::default(), reduce)
    }

    #[test]
    fn selecting_twice_keeps_one_entry() {
        let state = apply(vec![Action::SetRoute(route("22")), Action::SetRoute(route("22"))]);
        assert_eq!(state.routes.len(), 1);
        assert_eq!(state.vehicle_routes.len(), 1);
    }

    #[test]
    fn vehicles_outside_selection_are_dropped() {
        let state = apply(vec![
            Action::SetRoute(route("22")),
            Action::SetVehicles(vec![vehicle("1", "22"), vehicle("2", "36")]),
        ]);
        assert_eq!(state.vehicles, vec![vehicle("1", "22")]);
    }

    #[test]
    fn removing_a_route_drops_its_patterns_and_vehicles() {
        let state = apply(vec![
            Action::SetRoute(route("22")),
            Action::SetRoute(route("36")),
            Action::SetPatterns {
                route: "22".to_string(),
                patterns: vec![pattern(1, "22")],
            },
            Action::SetPatterns {
                route: "36".to_string(),
                patterns: vec![pattern(2, "36")],
            },
            Action::SetVehicles(vec![vehicle("1", "22"), vehicle("2", "36")]),
            Action::RemoveRoute("22".to_string()),
        ]);
        assert_eq!(state.routes, vec![route("36")]);
        assert_eq!(state.patterns, vec![pattern(2, "36")]);
        assert_eq!(state.vehicles, vec![vehicle("2", "36")]);
        assert!(!state.is_selected("22"));
    }

    #[test]
    fn patterns_for_unselected_route_are_ignored() {
        let state = apply(vec![Action::SetPatterns {
            route: "22".to_string(),
            patterns: vec![pattern(1, "22")],
        }]);
        assert!(state.patterns.is_empty());
    }

    #[test]
    fn patterns_replace_per_route() {
        let state = apply(vec![
            Action::SetRoute(route("22")),
            Action::SetPatterns {
                route: "22".to_string(),
                patterns: vec![pattern(1, "22")],
            },
            Action::SetPatterns {
                route: "22".to_string(),
                patterns: vec![pattern(2, "22"), pattern(3, "22")],
            },
        ]);
        let ids: Vec<u64> = state.patterns.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn flush_keeps_stop_and_connection() {
        let stop = Stop {
            id: "1836".to_string(),
            name: "Clark & Belmont".to_string(),
            position: Point::new(41.94, -87.65),
            route: "22".to_string(),
            route_type: RouteType::Bus,
        };
        let state = apply(vec![
            Action::SetConnection(ConnectionState::Connected),
            Action::SetRoute(route("22")),
            Action::SetPatternLoading(true),
            Action::SetStop(Some(stop.clone())),
            Action::SetVehicles(vec![vehicle("1", "22")]),
            Action::Flush,
        ]);
        assert!(state.routes.is_empty());
        assert!(state.vehicles.is_empty());
        assert!(state.vehicle_routes.is_empty());
        assert!(!state.pattern_loading);
        assert_eq!(state.stop, Some(stop));
        assert_eq!(state.connection, ConnectionState::Connected);
    }

    #[test]
    fn connection_state_names() {
        assert_eq!(ConnectionState::default().to_string(), "disconnected");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connecting).unwrap(),
            "\"connecting\""
        );
    }
}
