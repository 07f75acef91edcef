//! Push channel frames.
//!
//! Every frame is a JSON text message of the form
//! `{"event": "<name>", "data": <payload>}`; events without a payload carry
//! only the `event` key. Connection-level events (`connect`, `disconnect`,
//! `error`) are produced by the transport itself and never appear on the wire.

use crate::models::{RouteType, Vehicle};
use serde::{Deserialize, Serialize};

/// Subscription intents and presence hints sent by a client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    RouteAdd {
        route: String,
        color: String,
        #[serde(rename = "type", default)]
        route_type: RouteType,
    },
    RouteRemove {
        route: String,
        #[serde(rename = "type", default)]
        route_type: RouteType,
    },
    RouteRemoveAll,
    Idle,
    Active,
}

/// Frames pushed by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UpdateVehicles(Vec<Vehicle>),
    ServerError,
}

impl ClientEvent {
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RouteAdd { .. } => "route-add",
            ClientEvent::RouteRemove { .. } => "route-remove",
            ClientEvent::RouteRemoveAll => "route-remove-all",
            ClientEvent::Idle => "idle",
            ClientEvent::Active => "active",
        }
    }
}

impl ServerEvent {
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_frame(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }
}
