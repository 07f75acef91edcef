//! Server end of the push channel.

use crate::subscriptions::{ConnectionId, SubscribedRoute, SubscriptionRegistry};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use transit_types::{ClientEvent, ServerEvent};
use warp::ws::{Message, WebSocket};

/// Applies one subscription intent or presence hint to the registry.
pub fn apply_client_event(registry: &SubscriptionRegistry, connection: ConnectionId, event: ClientEvent) {
    debug!("Connection {connection} sent {}", event.name());
    match event {
        ClientEvent::RouteAdd {
            route,
            color,
            route_type,
        } => {
            registry.subscribe(
                connection,
                SubscribedRoute {
                    route,
                    color,
                    route_type,
                },
            );
        }
        ClientEvent::RouteRemove { route, .. } => {
            registry.unsubscribe(connection, &route);
        }
        ClientEvent::RouteRemoveAll => registry.clear(connection),
        ClientEvent::Idle => registry.set_idle(connection, true),
        ClientEvent::Active => registry.set_idle(connection, false),
    }
}

/// Lives as long as the socket. The subscription set is created empty when
/// the socket opens and destroyed when it closes; outbound events are written
/// in the order the broadcaster queued them.
pub async fn client_connection(socket: WebSocket, registry: Arc<SubscriptionRegistry>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let connection = registry.open(tx);
    info!("Connection {connection} opened");

    let forward = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Dropping unencodable event for connection {connection}: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::text(frame)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(result) = ws_rx.next().await {
        let message = match result {
            Ok(message) => message,
            Err(e) => {
                warn!("Connection {connection} failed: {e}");
                break;
            }
        };
        if message.is_close() {
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        match ClientEvent::from_frame(text) {
            Ok(event) => apply_client_event(&registry, connection, event),
            Err(e) => warn!("Connection {connection} sent a malformed frame: {e}"),
        }
    }

    registry.close(connection);
    forward.abort();
    info!("Connection {connection} closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use transit_types::RouteType;

    #[test]
    fn intents_drive_the_registry() {
        let registry = SubscriptionRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = registry.open(tx);

        let add = |route: &str| ClientEvent::RouteAdd {
            route: route.to_string(),
            color: "#ff0000".to_string(),
            route_type: RouteType::Bus,
        };
        apply_client_event(&registry, conn, add("22"));
        apply_client_event(&registry, conn, add("22"));
        apply_client_event(&registry, conn, add("36"));
        assert_eq!(registry.routes_of(conn), vec!["22", "36"]);

        apply_client_event(
            &registry,
            conn,
            ClientEvent::RouteRemove {
                route: "36".to_string(),
                route_type: RouteType::Bus,
            },
        );
        assert_eq!(registry.routes_of(conn), vec!["22"]);

        apply_client_event(&registry, conn, ClientEvent::Idle);
        assert!(registry.polled_routes().is_empty());
        apply_client_event(&registry, conn, ClientEvent::Active);
        assert_eq!(registry.polled_routes().len(), 1);

        apply_client_event(&registry, conn, ClientEvent::RouteRemoveAll);
        assert!(registry.routes_of(conn).is_empty());
    }
}
