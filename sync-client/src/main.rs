use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use sync_client::channel::{self, ChannelConfig, ChannelEvent};
use sync_client::search::SearchSession;
use sync_client::{HttpApi, RouteQuery, SyncStore, TransitApi};
use transit_types::Route;

/// Follows live vehicles of the given routes.
#[derive(Parser, Debug)]
#[command(name = "track-cli", version)]
struct Args {
    /// Base URL of the tracking server
    #[arg(long, env = "TRACK_SERVER", default_value = "http://localhost:3030")]
    server: String,

    /// Route ids to follow, e.g. 22 36 Red
    routes: Vec<String>,

    /// Reconnection attempts before giving up
    #[arg(long, default_value_t = 5)]
    max_reconnects: u32,

    /// Quiet period before a search query is sent
    #[arg(long, default_value_t = 400)]
    debounce_ms: u64,

    /// Print the first catalog page matching this query and exit
    #[arg(long)]
    search: Option<String>,
}

fn socket_url(server: &str) -> String {
    let base = server.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{base}/ws")
}

async fn search(api: Arc<HttpApi>, query: &str, debounce: Duration) -> anyhow::Result<()> {
    let mut session = SearchSession::new(api, debounce, 10);
    session.set_query(query);
    session.process_next().await;
    for entry in session.entries() {
        println!("{:>6}  {}  {}", entry.route.route, entry.route.color, entry.route.name);
    }
    Ok(())
}

async fn resolve(api: &HttpApi, ids: &[String]) -> anyhow::Result<Vec<Route>> {
    let catalog = api
        .get_routes(RouteQuery {
            limit: 1000,
            ..RouteQuery::default()
        })
        .await
        .context("fetching the route catalog")?;

    let mut routes = Vec::new();
    for id in ids {
        match catalog.iter().find(|r| r.route.eq_ignore_ascii_case(id)) {
            Some(route) => routes.push(route.clone()),
            None => warn!("Unknown route {id}, skipping"),
        }
    }
    Ok(routes)
}

async fn follow(args: Args, api: Arc<HttpApi>) -> anyhow::Result<()> {
    let wanted = resolve(&api, &args.routes).await?;
    if wanted.is_empty() {
        bail!("no known route to follow");
    }

    let mut config = ChannelConfig::new(socket_url(&args.server));
    config.max_reconnects = args.max_reconnects;
    let (handle, mut events, join) = channel::open(config);
    let mut store = SyncStore::new(Arc::new(handle.clone()), api);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing the push channel");
                handle.close();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("push channel gave up after {} reconnects", args.max_reconnects);
                };
                let connected = event == ChannelEvent::Connect;
                store.handle_channel_event(event);
                if connected {
                    for route in &wanted {
                        if let Err(e) = store.set_route(route.clone()) {
                            warn!("Could not subscribe to {}: {e}", route.route);
                        }
                    }
                }
                let state = store.snapshot();
                info!(
                    "{} | {} routes | {} vehicles",
                    state.connection,
                    state.routes.len(),
                    state.vehicles.len()
                );
                for vehicle in &state.vehicles {
                    println!(
                        "{:>6} {:>6} {:>9.5},{:>10.5} {:>3}° {}{}",
                        vehicle.route,
                        vehicle.id,
                        vehicle.position.lat,
                        vehicle.position.lng,
                        vehicle.heading,
                        vehicle.destination,
                        if vehicle.delayed { " (delayed)" } else { "" }
                    );
                }
            }
            applied = store.process_next() => {
                if applied {
                    info!("{} patterns loaded", store.snapshot().patterns.len());
                }
            }
        }
    }

    join.await.context("push channel task")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let api = Arc::new(HttpApi::new(&args.server));
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async move {
        match args.search.clone() {
            Some(query) => search(api, &query, Duration::from_millis(args.debounce_ms)).await,
            None => follow(args, api).await,
        }
    })
}
