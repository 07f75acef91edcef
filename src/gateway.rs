//! Access to the upstream transit authority. Stateless request/response.

use crate::configuration::Configuration;
use crate::upstream::{
    check_bus_errors, check_train_error, train_catalog, ArrivalsResponse, BusEnvelope,
    PatternsResponse, PositionsResponse, PredictionsResponse, RoutesResponse, TrainEnvelope,
    VehiclesResponse,
};
use log::debug;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use transit_types::{Pattern, Prediction, Route, RouteType, Vehicle};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream reported an error: {0}")]
    Upstream(String),
    #[error("upstream did not answer within {0:?}")]
    Timeout(Duration),
}

pub type GatewayFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, GatewayError>> + Send + 'a>>;

/// Source of catalog and real-time data.
pub trait TransitGateway: Send + Sync {
    /// Full route catalog, buses first.
    fn list_routes(&self) -> GatewayFuture<'_, Vec<Route>>;

    /// Patterns of one route, colored with `color`.
    fn get_patterns<'a>(
        &'a self,
        route: &'a str,
        color: &'a str,
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Pattern>>;

    fn get_predictions<'a>(
        &'a self,
        stop_id: &'a str,
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Prediction>>;

    /// Current positions of every vehicle serving one of `route_ids`.
    fn get_vehicle_positions<'a>(
        &'a self,
        route_ids: &'a [String],
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Vehicle>>;
}

/// Chicago Transit Authority Bus Tracker and Train Tracker client.
pub struct CtaGateway {
    client: reqwest::Client,
    bus_api_url: String,
    bus_api_key: String,
    train_api_url: String,
    train_api_key: String,
}

impl CtaGateway {
    pub fn new(config: &Configuration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.gateway_timeout())
            .build()?;
        Ok(CtaGateway {
            client,
            bus_api_url: config.bus_api_url.trim_end_matches('/').to_string(),
            bus_api_key: config.bus_api_key.clone(),
            train_api_url: config.train_api_url.trim_end_matches('/').to_string(),
            train_api_key: config.train_api_key.clone(),
        })
    }

    async fn bus_get<T: DeserializeOwned>(&self, call: &str, params: &[(&str, &str)]) -> Result<T, GatewayError> {
        debug!("bus tracker {call} {params:?}");
        let response = self
            .client
            .get(format!("{}/{call}", self.bus_api_url))
            .query(&[("key", self.bus_api_key.as_str()), ("format", "json")])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let envelope: BusEnvelope<T> = response.json().await?;
        Ok(envelope.response)
    }

    async fn train_get<T: DeserializeOwned>(&self, call: &str, params: &[(&str, &str)]) -> Result<T, GatewayError> {
        debug!("train tracker {call} {params:?}");
        let response = self
            .client
            .get(format!("{}/{call}", self.train_api_url))
            .query(&[("key", self.train_api_key.as_str()), ("outputType", "JSON")])
            .query(params)
            .send()
            .await?
            .error_for_status()?;
        let envelope: TrainEnvelope<T> = response.json().await?;
        Ok(envelope.ctatt)
    }

    async fn bus_routes(&self) -> Result<Vec<Route>, GatewayError> {
        let response: RoutesResponse = self.bus_get("getroutes", &[]).await?;
        check_bus_errors(&response.error).map_err(GatewayError::Upstream)?;
        Ok(response.routes.into_iter().map(|r| r.into_route()).collect())
    }

    async fn bus_patterns(&self, route: &str, color: &str) -> Result<Vec<Pattern>, GatewayError> {
        let response: PatternsResponse = self.bus_get("getpatterns", &[("rt", route)]).await?;
        check_bus_errors(&response.error).map_err(GatewayError::Upstream)?;
        Ok(response
            .ptr
            .into_iter()
            .map(|p| p.into_pattern(route, color))
            .collect())
    }

    async fn bus_predictions(&self, stop_id: &str) -> Result<Vec<Prediction>, GatewayError> {
        let response: PredictionsResponse = self.bus_get("getpredictions", &[("stpid", stop_id)]).await?;
        check_bus_errors(&response.error).map_err(GatewayError::Upstream)?;
        Ok(response.prd.into_iter().map(|p| p.into_prediction()).collect())
    }

    async fn bus_vehicles(&self, route_ids: &[String]) -> Result<Vec<Vehicle>, GatewayError> {
        let routes = route_ids.join(",");
        let response: VehiclesResponse = self.bus_get("getvehicles", &[("rt", routes.as_str())]).await?;
        check_bus_errors(&response.error).map_err(GatewayError::Upstream)?;
        Ok(response.vehicle.into_iter().map(|v| v.into_vehicle()).collect())
    }

    async fn train_predictions(&self, stop_id: &str) -> Result<Vec<Prediction>, GatewayError> {
        // Station ids (4xxxx) cover every platform, stop ids (3xxxx) one direction.
        let key = if stop_id.starts_with('4') { "mapid" } else { "stpid" };
        let response: ArrivalsResponse = self.train_get("ttarrivals.aspx", &[(key, stop_id)]).await?;
        check_train_error(&response.err_cd, &response.err_nm).map_err(GatewayError::Upstream)?;
        Ok(response.eta.into_vec().into_iter().map(|a| a.into_prediction()).collect())
    }

    async fn train_vehicles(&self, route_ids: &[String]) -> Result<Vec<Vehicle>, GatewayError> {
        let routes = route_ids.join(",");
        let response: PositionsResponse = self.train_get("ttpositions.aspx", &[("rt", routes.as_str())]).await?;
        check_train_error(&response.err_cd, &response.err_nm).map_err(GatewayError::Upstream)?;

        let mut vehicles = Vec::new();
        for route in response.route {
            // The feed answers with lowercase line names.
            let route_id = route_ids
                .iter()
                .find(|id| id.eq_ignore_ascii_case(&route.name))
                .cloned()
                .unwrap_or(route.name);
            vehicles.extend(route.train.into_vec().into_iter().map(|t| t.into_vehicle(&route_id)));
        }
        Ok(vehicles)
    }
}

impl TransitGateway for CtaGateway {
    fn list_routes(&self) -> GatewayFuture<'_, Vec<Route>> {
        Box::pin(async move {
            let mut routes = self.bus_routes().await?;
            routes.extend(train_catalog());
            Ok(routes)
        })
    }

    fn get_patterns<'a>(
        &'a self,
        route: &'a str,
        color: &'a str,
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Pattern>> {
        Box::pin(async move {
            match route_type {
                RouteType::Bus => self.bus_patterns(route, color).await,
                // Rail geometry is not published by the Train Tracker.
                RouteType::Train => Ok(Vec::new()),
            }
        })
    }

    fn get_predictions<'a>(
        &'a self,
        stop_id: &'a str,
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Prediction>> {
        Box::pin(async move {
            match route_type {
                RouteType::Bus => self.bus_predictions(stop_id).await,
                RouteType::Train => self.train_predictions(stop_id).await,
            }
        })
    }

    fn get_vehicle_positions<'a>(
        &'a self,
        route_ids: &'a [String],
        route_type: RouteType,
    ) -> GatewayFuture<'a, Vec<Vehicle>> {
        Box::pin(async move {
            if route_ids.is_empty() {
                return Ok(Vec::new());
            }
            match route_type {
                RouteType::Bus => self.bus_vehicles(route_ids).await,
                RouteType::Train => self.train_vehicles(route_ids).await,
            }
        })
    }
}
