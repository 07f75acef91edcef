use crate::broadcaster::Broadcaster;
use crate::configuration::Configuration;
use crate::gateway::{CtaGateway, GatewayError, TransitGateway};
use crate::search::{query_catalog, DEFAULT_LIMIT};
use crate::socket;
use crate::subscriptions::SubscriptionRegistry;
use crate::web_cache::{cache_key, ResponseCache};
use anyhow::Context;
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use transit_types::{Route, RouteType};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// Malformed query parameters. Reported as 400 with the message, never retried.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing query parameter '{0}'")]
    Missing(&'static str),
    #[error("query parameter '{param}' must be a positive integer, got '{value}'")]
    NotPositive { param: &'static str, value: String },
    #[error("unknown route type '{0}'")]
    RouteType(String),
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl warp::reject::Reject for ApiError {}

pub struct AppData {
    pub gateway: Arc<dyn TransitGateway>,
    pub registry: Arc<SubscriptionRegistry>,
    pub cache: ResponseCache,
}

#[derive(Deserialize)]
pub struct RoutesQuery {
    pub search: Option<String>,
    pub filter: Option<String>,
    pub limit: Option<String>,
    pub index: Option<String>,
}

#[derive(Deserialize)]
pub struct PatternsQuery {
    pub route: Option<String>,
    pub color: Option<String>,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
}

#[derive(Deserialize)]
pub struct PredictionsQuery {
    pub stop: Option<String>,
    #[serde(rename = "type")]
    pub route_type: Option<String>,
}

#[derive(Deserialize)]
pub struct RouteColorQuery {
    pub ids: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn positive(param: &'static str, value: Option<&str>, default: usize) -> Result<usize, ValidationError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(default);
    };
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ValidationError::NotPositive {
            param,
            value: value.to_string(),
        }),
    }
}

fn required<'a>(param: &'static str, value: &'a Option<String>) -> Result<&'a str, ValidationError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::Missing(param))
}

fn parse_route_type(value: Option<&str>) -> Result<RouteType, ValidationError> {
    match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("b") | Some("bus") => Ok(RouteType::Bus),
        Some("t") | Some("train") => Ok(RouteType::Train),
        Some(other) => Err(ValidationError::RouteType(other.to_string())),
    }
}

fn split_ids(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Serves `key` from the cache or stores what `fetch` returns.
async fn cached<T, F>(ad: &AppData, key: u64, fetch: F) -> Result<T, ApiError>
where
    T: Serialize + DeserializeOwned,
    F: std::future::Future<Output = Result<T, GatewayError>>,
{
    if let Some(value) = ad.cache.get(key) {
        if let Ok(hit) = serde_json::from_value(value) {
            return Ok(hit);
        }
    }
    let fresh = fetch.await?;
    if let Ok(value) = serde_json::to_value(&fresh) {
        ad.cache.insert(key, value);
    }
    Ok(fresh)
}

async fn catalog(ad: &AppData) -> Result<Vec<Route>, ApiError> {
    cached(ad, cache_key("routes", &[]), ad.gateway.list_routes()).await
}

async fn list_routes(ad: Arc<AppData>, query: RoutesQuery) -> Result<impl Reply, Rejection> {
    let limit = positive("limit", query.limit.as_deref(), DEFAULT_LIMIT).map_err(ApiError::from)?;
    let index = positive("index", query.index.as_deref(), 1).map_err(ApiError::from)?;
    let exclude = split_ids(query.filter.as_deref());

    let routes = catalog(&ad).await?;
    let page = query_catalog(routes, query.search.as_deref(), &exclude, limit, index);
    Ok(warp::reply::json(&page))
}

async fn get_patterns(ad: Arc<AppData>, query: PatternsQuery) -> Result<impl Reply, Rejection> {
    let route = required("route", &query.route).map_err(ApiError::from)?;
    let color = query.color.as_deref().unwrap_or_default();
    let route_type = parse_route_type(query.route_type.as_deref()).map_err(ApiError::from)?;
    let type_code = route_type.to_string();

    let key = cache_key("patterns", &[route, color, type_code.as_str()]);
    let patterns: Vec<transit_types::Pattern> =
        cached(&ad, key, ad.gateway.get_patterns(route, color, route_type)).await?;
    Ok(warp::reply::json(&patterns))
}

async fn get_predictions(ad: Arc<AppData>, query: PredictionsQuery) -> Result<impl Reply, Rejection> {
    let stop = required("stop", &query.stop).map_err(ApiError::from)?;
    let route_type = parse_route_type(query.route_type.as_deref()).map_err(ApiError::from)?;
    let predictions = ad
        .gateway
        .get_predictions(stop, route_type)
        .await
        .map_err(ApiError::from)?;
    Ok(warp::reply::json(&predictions))
}

async fn route_colors(ad: Arc<AppData>, query: RouteColorQuery) -> Result<impl Reply, Rejection> {
    let ids = split_ids(query.ids.as_deref());
    let colors: BTreeMap<String, String> = catalog(&ad)
        .await?
        .into_iter()
        .filter(|route| ids.contains(&route.route))
        .map(|route| (route.route, route.color))
        .collect();
    Ok(warp::reply::json(&colors))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(e) = err.find::<ApiError>() {
        let status = match e {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Gateway(_) => StatusCode::BAD_GATEWAY,
        };
        (status, e.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{err:?}"))
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        status,
    ))
}

fn with_appdata(
    ad: Arc<AppData>,
) -> impl Filter<Extract = (Arc<AppData>,), Error = Infallible> + Clone {
    warp::any().map(move || ad.clone())
}

/// Every endpoint, including the push channel at `/ws`.
pub fn routes(ad: Arc<AppData>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors_policy = warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "Access-Control-Allow-Origin",
            "Origin",
            "Accept",
            "X-Requested-With",
            "Content-Type",
        ])
        .allow_methods(["GET"]);

    let list = warp::get()
        .and(warp::path!("routes"))
        .and(with_appdata(ad.clone()))
        .and(warp::query::<RoutesQuery>())
        .and_then(list_routes);

    let patterns = warp::get()
        .and(warp::path!("patterns"))
        .and(with_appdata(ad.clone()))
        .and(warp::query::<PatternsQuery>())
        .and_then(get_patterns);

    let predictions = warp::get()
        .and(warp::path!("predictions"))
        .and(with_appdata(ad.clone()))
        .and(warp::query::<PredictionsQuery>())
        .and_then(get_predictions);

    let colors = warp::get()
        .and(warp::path!("route-color"))
        .and(with_appdata(ad.clone()))
        .and(warp::query::<RouteColorQuery>())
        .and_then(route_colors);

    let version = warp::get()
        .and(warp::path!("version"))
        .map(|| warp::reply::json(&json!({ "version": env!("CARGO_PKG_VERSION") })));

    let registry = ad.registry.clone();
    let push = warp::path!("ws")
        .and(warp::ws())
        .map(move |ws: warp::ws::Ws| {
            let registry = registry.clone();
            ws.on_upgrade(move |socket| socket::client_connection(socket, registry))
        });

    push.or(list)
        .or(patterns)
        .or(predictions)
        .or(colors)
        .or(version)
        .recover(handle_rejection)
        .with(cors_policy)
        .with(warp::log("tracktransit"))
}

pub async fn main(config: Configuration) -> anyhow::Result<()> {
    let gateway: Arc<dyn TransitGateway> =
        Arc::new(CtaGateway::new(&config).context("building the upstream client")?);
    let registry = Arc::new(SubscriptionRegistry::new());

    Broadcaster::new(
        registry.clone(),
        gateway.clone(),
        config.tick_interval(),
        config.gateway_timeout(),
    )
    .with_outage_ticks(config.outage_ticks)
    .spawn();

    let appdata = Arc::new(AppData {
        gateway,
        registry,
        cache: ResponseCache::new(config.cache_capacity, config.cache_ttl()),
    });

    info!("Setup done, listening on port {}", config.port);
    let server = warp::serve(routes(appdata));

    #[cfg(feature = "https")]
    server
        .tls()
        .cert_path(&config.tls_cert)
        .key_path(&config.tls_key)
        .run(([0, 0, 0, 0], config.port))
        .await;

    #[cfg(not(feature = "https"))]
    server.run(([0, 0, 0, 0], config.port)).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::{Broadcaster, TickOutcome};
    use crate::testing::{route, vehicle, FakeGateway};
    use std::time::Duration;
    use transit_types::{ClientEvent, Pattern, ServerEvent};

    fn app(gateway: Arc<FakeGateway>) -> Arc<AppData> {
        Arc::new(AppData {
            gateway,
            registry: Arc::new(SubscriptionRegistry::new()),
            cache: ResponseCache::new(16, Duration::from_secs(60)),
        })
    }

    fn catalog() -> Arc<FakeGateway> {
        Arc::new(FakeGateway::with_catalog(vec![
            route("4", "Cottage Grove", "#cc0000"),
            route("22", "Clark", "#00aa00"),
            route("36", "Broadway", "#0000ff"),
            route("X9", "Ashland Express", "#999999"),
        ]))
    }

    fn route_ids(body: &[u8]) -> Vec<String> {
        let routes: Vec<Route> = serde_json::from_slice(body).unwrap();
        routes.into_iter().map(|r| r.route).collect()
    }

    #[tokio::test]
    async fn routes_are_paged_and_filtered() {
        let filter = routes(app(catalog()));

        let res = warp::test::request()
            .path("/routes?limit=2&index=2")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(route_ids(res.body()), vec!["36", "X9"]);

        let res = warp::test::request()
            .path("/routes?filter=22,4&limit=10")
            .reply(&filter)
            .await;
        assert_eq!(route_ids(res.body()), vec!["36", "X9"]);

        let res = warp::test::request()
            .path("/routes?search=clark")
            .reply(&filter)
            .await;
        assert_eq!(route_ids(res.body())[0], "22");
    }

    #[tokio::test]
    async fn catalog_is_fetched_once() {
        let gateway = catalog();
        let filter = routes(app(gateway.clone()));
        for _ in 0..3 {
            let res = warp::test::request().path("/routes").reply(&filter).await;
            assert_eq!(res.status(), 200);
        }
        let res = warp::test::request()
            .path("/route-color?ids=22,36,nope")
            .reply(&filter)
            .await;
        let colors: BTreeMap<String, String> = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(colors.len(), 2);
        assert_eq!(colors["22"], "#00aa00");

        let fetched = gateway.calls().iter().filter(|c| *c == "routes:").count();
        assert_eq!(fetched, 1);
    }

    #[tokio::test]
    async fn bad_paging_is_rejected() {
        let filter = routes(app(catalog()));
        for path in ["/routes?limit=0", "/routes?index=-1", "/routes?limit=ten"] {
            let res = warp::test::request().path(path).reply(&filter).await;
            assert_eq!(res.status(), 400, "{path}");
            let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
            assert!(body["error"].as_str().unwrap().contains("positive integer"));
        }
    }

    #[tokio::test]
    async fn patterns_require_a_route_and_are_cached() {
        let gateway = catalog();
        gateway.set_patterns(
            "22",
            vec![Pattern {
                id: 3936,
                route: "22".to_string(),
                direction: "Northbound".to_string(),
                fill_color: String::new(),
                stroke_color: String::new(),
                paths: Vec::new(),
                stops: Vec::new(),
                route_type: RouteType::Bus,
            }],
        );
        let filter = routes(app(gateway.clone()));

        let res = warp::test::request().path("/patterns").reply(&filter).await;
        assert_eq!(res.status(), 400);

        let res = warp::test::request()
            .path("/patterns?route=22&type=bogus")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), 400);

        for _ in 0..2 {
            let res = warp::test::request()
                .path("/patterns?route=22&color=%23abcdef")
                .reply(&filter)
                .await;
            assert_eq!(res.status(), 200);
            let patterns: Vec<Pattern> = serde_json::from_slice(res.body()).unwrap();
            assert_eq!(patterns[0].fill_color, "#abcdef");
        }
        let fetched = gateway.calls().iter().filter(|c| *c == "patterns:22").count();
        assert_eq!(fetched, 1);
    }

    #[tokio::test]
    async fn predictions_pass_through() {
        let gateway = catalog();
        let filter = routes(app(gateway.clone()));
        let res = warp::test::request()
            .path("/predictions?stop=1836&type=bus")
            .reply(&filter)
            .await;
        assert_eq!(res.status(), 200);
        assert_eq!(&res.body()[..], b"[]");
        assert!(gateway.calls().contains(&"predictions:1836".to_string()));
    }

    #[tokio::test]
    async fn unknown_paths_are_json_errors() {
        let filter = routes(app(catalog()));
        let res = warp::test::request().path("/nope").reply(&filter).await;
        assert_eq!(res.status(), 404);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["error"], "not found");
    }

    #[tokio::test]
    async fn push_channel_delivers_subscribed_vehicles() {
        let gateway = catalog();
        gateway.answer("22", Ok(vec![vehicle("1001", "22")]));
        let appdata = app(gateway.clone());
        let mut broadcaster = Broadcaster::new(
            appdata.registry.clone(),
            gateway.clone(),
            Duration::from_secs(5),
            Duration::from_secs(4),
        );
        let filter = routes(appdata.clone());

        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(filter)
            .await
            .expect("handshake");

        let add = ClientEvent::RouteAdd {
            route: "22".to_string(),
            color: "#00aa00".to_string(),
            route_type: RouteType::Bus,
        };
        client.send_text(add.to_frame().unwrap()).await;

        for _ in 0..100 {
            if !appdata.registry.polled_routes().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(broadcaster.tick().await, TickOutcome::Pushed { sent: 1, .. }));

        let message = client.recv().await.expect("update frame");
        let event = ServerEvent::from_frame(message.to_str().unwrap()).unwrap();
        match event {
            ServerEvent::UpdateVehicles(vehicles) => {
                assert_eq!(vehicles.len(), 1);
                assert_eq!(vehicles[0].id, "1001");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
