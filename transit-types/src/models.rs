use serde::{Deserialize, Serialize};
use std::fmt;

/// Transit mode of a route. Serialized with the single-letter codes the
/// clients already persist (`"B"`, `"T"`).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RouteType {
    #[default]
    #[serde(rename = "B")]
    Bus,
    #[serde(rename = "T")]
    Train,
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteType::Bus => write!(f, "bus"),
            RouteType::Train => write!(f, "train"),
        }
    }
}

/// Arrival or departure.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Juncture {
    #[serde(rename = "A")]
    Arrival,
    #[serde(rename = "D")]
    Departure,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub route: String,
    pub name: String,
    pub color: String,
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub position: Point,
    pub route: String,
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
}

/// Geometry and stops of one direction of one route.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Pattern {
    pub id: u64,
    pub route: String,
    pub direction: String,
    #[serde(rename = "fillColor")]
    pub fill_color: String,
    #[serde(rename = "strokeColor")]
    pub stroke_color: String,
    pub paths: Vec<Point>,
    pub stops: Vec<Stop>,
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
}

/// Live position of one vehicle. Superseded wholesale on every tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub route: String,
    pub position: Point,
    /// Compass heading rounded to the nearest 45 degrees.
    pub heading: u16,
    pub destination: String,
    pub delayed: bool,
    pub timestamp: String,
    #[serde(default)]
    pub color: String,
    #[serde(rename = "type", default)]
    pub route_type: RouteType,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Prediction {
    #[serde(rename = "type")]
    pub juncture: Juncture,
    pub name: String,
    #[serde(rename = "stopId")]
    pub stop_id: String,
    pub route: String,
    pub direction: String,
    /// Minutes until the vehicle reaches the stop.
    pub time: i64,
    pub timestamp: String,
    pub delayed: bool,
    #[serde(rename = "vehicleId")]
    pub vehicle_id: String,
    pub destination: String,
}

/// Rounds a compass heading in degrees to one of the eight 45 degree buckets.
pub fn heading_bucket(degrees: f64) -> u16 {
    if !degrees.is_finite() {
        return 0;
    }
    let normalized = degrees.rem_euclid(360.0);
    let bucket = (normalized / 45.0).round() as u16 % 8;
    bucket * 45
}
