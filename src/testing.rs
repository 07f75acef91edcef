//! In-memory gateway shared by the server's tests.

use crate::gateway::{GatewayError, GatewayFuture, TransitGateway};
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use transit_types::{Pattern, Point, Prediction, Route, RouteType, Vehicle};

#[derive(Default)]
pub struct FakeGateway {
    catalog: Mutex<Vec<Route>>,
    patterns: Mutex<FxHashMap<String, Vec<Pattern>>>,
    vehicles: Mutex<FxHashMap<String, Result<Vec<Vehicle>, String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn with_catalog(routes: Vec<Route>) -> Self {
        let gateway = FakeGateway::default();
        *gateway.catalog.lock().unwrap() = routes;
        gateway
    }

    pub fn answer(&self, route: &str, result: Result<Vec<Vehicle>, String>) {
        self.vehicles.lock().unwrap().insert(route.to_string(), result);
    }

    pub fn set_patterns(&self, route: &str, patterns: Vec<Pattern>) {
        self.patterns.lock().unwrap().insert(route.to_string(), patterns);
    }

    /// Every upstream call so far, as `<call>:<argument>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Vehicle position calls only, by route.
    pub fn position_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| call.strip_prefix("vehicles:").map(str::to_string))
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl TransitGateway for FakeGateway {
    fn list_routes(&self) -> GatewayFuture<'_, Vec<Route>> {
        Box::pin(async move {
            self.record("routes:".to_string());
            Ok(self.catalog.lock().unwrap().clone())
        })
    }

    fn get_patterns<'a>(&'a self, route: &'a str, color: &'a str, _: RouteType) -> GatewayFuture<'a, Vec<Pattern>> {
        Box::pin(async move {
            self.record(format!("patterns:{route}"));
            let mut patterns = self.patterns.lock().unwrap().get(route).cloned().unwrap_or_default();
            for pattern in &mut patterns {
                pattern.fill_color = color.to_string();
                pattern.stroke_color = color.to_string();
            }
            Ok(patterns)
        })
    }

    fn get_predictions<'a>(&'a self, stop_id: &'a str, _: RouteType) -> GatewayFuture<'a, Vec<Prediction>> {
        Box::pin(async move {
            self.record(format!("predictions:{stop_id}"));
            Ok(Vec::new())
        })
    }

    fn get_vehicle_positions<'a>(
        &'a self,
        route_ids: &'a [String],
        _: RouteType,
    ) -> GatewayFuture<'a, Vec<Vehicle>> {
        Box::pin(async move {
            let mut result = Vec::new();
            for id in route_ids {
                self.record(format!("vehicles:{id}"));
                match self.vehicles.lock().unwrap().get(id) {
                    Some(Ok(vehicles)) => result.extend(vehicles.iter().cloned()),
                    Some(Err(msg)) => return Err(GatewayError::Upstream(msg.clone())),
                    None => {}
                }
            }
            Ok(result)
        })
    }
}

pub fn vehicle(id: &str, route: &str) -> Vehicle {
    Vehicle {
        id: id.to_string(),
        route: route.to_string(),
        position: Point::new(41.9, -87.6),
        heading: 0,
        destination: String::new(),
        delayed: false,
        timestamp: "2024-01-05 14:32".to_string(),
        color: String::new(),
        route_type: RouteType::Bus,
    }
}

pub fn route(id: &str, name: &str, color: &str) -> Route {
    Route {
        route: id.to_string(),
        name: name.to_string(),
        color: color.to_string(),
        route_type: RouteType::Bus,
    }
}
