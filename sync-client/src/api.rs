use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use transit_types::{Pattern, Prediction, Route, RouteType};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {message}")]
    Status { status: u16, message: String },
}

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ApiError>> + Send + 'a>>;

/// One page of the route catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteQuery {
    pub search: Option<String>,
    /// Route ids left out of the page.
    pub filter: Vec<String>,
    pub limit: usize,
    /// 1-based page number.
    pub index: usize,
}

impl Default for RouteQuery {
    fn default() -> Self {
        RouteQuery {
            search: None,
            filter: Vec::new(),
            limit: 10,
            index: 1,
        }
    }
}

/// The REST surface of the tracking server.
pub trait TransitApi: Send + Sync {
    fn get_routes(&self, query: RouteQuery) -> ApiFuture<'_, Vec<Route>>;

    fn get_patterns<'a>(
        &'a self,
        route: &'a str,
        color: &'a str,
        route_type: RouteType,
    ) -> ApiFuture<'a, Vec<Pattern>>;

    fn get_predictions<'a>(
        &'a self,
        stop_id: &'a str,
        route_type: RouteType,
    ) -> ApiFuture<'a, Vec<Prediction>>;

    fn get_route_colors<'a>(&'a self, ids: &'a [String]) -> ApiFuture<'a, BTreeMap<String, String>>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: String,
}

impl HttpApi {
    pub fn new(base: &str) -> Self {
        HttpApi {
            client: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T, ApiError> {
        let response = self
            .client
            .get(format!("{}/{}", self.base, path))
            .query(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => status.canonical_reason().unwrap_or("unknown error").to_string(),
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

fn type_param(route_type: RouteType) -> String {
    route_type.to_string()
}

impl TransitApi for HttpApi {
    fn get_routes(&self, query: RouteQuery) -> ApiFuture<'_, Vec<Route>> {
        Box::pin(async move {
            let mut params = vec![
                ("limit", query.limit.to_string()),
                ("index", query.index.to_string()),
            ];
            if let Some(search) = query.search.filter(|s| !s.is_empty()) {
                params.push(("search", search));
            }
            if !query.filter.is_empty() {
                params.push(("filter", query.filter.join(",")));
            }
            self.get("routes", &params).await
        })
    }

    fn get_patterns<'a>(
        &'a self,
        route: &'a str,
        color: &'a str,
        route_type: RouteType,
    ) -> ApiFuture<'a, Vec<Pattern>> {
        Box::pin(async move {
            let params = [
                ("route", route.to_string()),
                ("color", color.to_string()),
                ("type", type_param(route_type)),
            ];
            self.get("patterns", &params).await
        })
    }

    fn get_predictions<'a>(
        &'a self,
        stop_id: &'a str,
        route_type: RouteType,
    ) -> ApiFuture<'a, Vec<Prediction>> {
        Box::pin(async move {
            let params = [("stop", stop_id.to_string()), ("type", type_param(route_type))];
            self.get("predictions", &params).await
        })
    }

    fn get_route_colors<'a>(&'a self, ids: &'a [String]) -> ApiFuture<'a, BTreeMap<String, String>> {
        Box::pin(async move { self.get("route-color", &[("ids", ids.join(","))]).await })
    }
}
