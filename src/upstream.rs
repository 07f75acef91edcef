//! Raw response documents of the CTA Bus Tracker and Train Tracker APIs and
//! their reshaping into the shared model.

use crate::time::{clock_time, display_timestamp, minutes_between};
use serde::{Deserialize, Deserializer};
use transit_types::{heading_bucket, Juncture, Pattern, Point, Prediction, Route, RouteType, Stop, Vehicle};

/// Messages the Bus Tracker returns as "errors" when a query simply matched
/// nothing. They mean an empty result, not a failure.
const EMPTY_RESULT_MESSAGES: [&str; 3] = ["No data found", "No service scheduled", "No arrival times"];

#[derive(Deserialize, Debug)]
pub struct BusEnvelope<T> {
    #[serde(rename = "bustime-response")]
    pub response: T,
}

#[derive(Deserialize, Debug)]
pub struct BusError {
    #[serde(default)]
    pub msg: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct RoutesResponse {
    #[serde(default)]
    pub routes: Vec<BusRoute>,
    #[serde(default)]
    pub error: Vec<BusError>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PatternsResponse {
    #[serde(default)]
    pub ptr: Vec<BusPattern>,
    #[serde(default)]
    pub error: Vec<BusError>,
}

#[derive(Deserialize, Debug, Default)]
pub struct PredictionsResponse {
    #[serde(default)]
    pub prd: Vec<BusPrediction>,
    #[serde(default)]
    pub error: Vec<BusError>,
}

#[derive(Deserialize, Debug, Default)]
pub struct VehiclesResponse {
    #[serde(default)]
    pub vehicle: Vec<BusVehicle>,
    #[serde(default)]
    pub error: Vec<BusError>,
}

#[derive(Deserialize, Debug)]
pub struct BusRoute {
    pub rt: String,
    pub rtnm: String,
    pub rtclr: String,
}

#[derive(Deserialize, Debug)]
pub struct BusPattern {
    #[serde(deserialize_with = "lenient_u64")]
    pub pid: u64,
    #[serde(default)]
    pub rtdir: String,
    #[serde(default)]
    pub pt: Vec<BusPatternPoint>,
}

#[derive(Deserialize, Debug)]
pub struct BusPatternPoint {
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
    pub typ: String,
    #[serde(default)]
    pub stpid: Option<String>,
    #[serde(default)]
    pub stpnm: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct BusPrediction {
    pub tmstmp: String,
    pub typ: String,
    pub stpnm: String,
    pub stpid: String,
    pub vid: String,
    pub rt: String,
    #[serde(default)]
    pub rtdir: String,
    #[serde(default)]
    pub des: String,
    pub prdtm: String,
    #[serde(default)]
    pub dly: bool,
    /// Minutes until arrival, or `DUE` / `DLY`.
    #[serde(default)]
    pub prdctdn: String,
}

#[derive(Deserialize, Debug)]
pub struct BusVehicle {
    pub vid: String,
    pub tmstmp: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub hdg: f64,
    pub rt: String,
    #[serde(default)]
    pub des: String,
    #[serde(default)]
    pub dly: bool,
}

#[derive(Deserialize, Debug)]
pub struct TrainEnvelope<T> {
    pub ctatt: T,
}

#[derive(Deserialize, Debug, Default)]
pub struct PositionsResponse {
    #[serde(rename = "errCd", default)]
    pub err_cd: String,
    #[serde(rename = "errNm", default)]
    pub err_nm: Option<String>,
    #[serde(default)]
    pub route: Vec<TrainRoute>,
}

#[derive(Deserialize, Debug)]
pub struct TrainRoute {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(default)]
    pub train: OneOrMany<TrainPosition>,
}

#[derive(Deserialize, Debug)]
pub struct TrainPosition {
    pub rn: String,
    #[serde(rename = "destNm", default)]
    pub dest_nm: String,
    pub prdt: String,
    #[serde(rename = "isDly", default)]
    pub is_dly: String,
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub heading: f64,
}

#[derive(Deserialize, Debug, Default)]
pub struct ArrivalsResponse {
    #[serde(rename = "errCd", default)]
    pub err_cd: String,
    #[serde(rename = "errNm", default)]
    pub err_nm: Option<String>,
    #[serde(default)]
    pub eta: OneOrMany<TrainArrival>,
}

#[derive(Deserialize, Debug)]
pub struct TrainArrival {
    #[serde(rename = "stpId")]
    pub stp_id: String,
    #[serde(rename = "staNm")]
    pub sta_nm: String,
    #[serde(rename = "stpDe", default)]
    pub stp_de: String,
    pub rn: String,
    pub rt: String,
    #[serde(rename = "destNm", default)]
    pub dest_nm: String,
    pub prdt: String,
    #[serde(rename = "arrT")]
    pub arr_t: String,
    #[serde(rename = "isDly", default)]
    pub is_dly: String,
}

/// The Train Tracker collapses single-element arrays into a bare object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = lenient_f64(deserializer)?;
    if value < 0.0 {
        return Err(serde::de::Error::custom("negative identifier"));
    }
    Ok(value as u64)
}

/// Splits upstream error entries into "nothing matched" (`Ok`) and real
/// failures (`Err` carrying the joined messages).
pub fn check_bus_errors(errors: &[BusError]) -> Result<(), String> {
    let failures: Vec<&str> = errors
        .iter()
        .map(|e| e.msg.as_str())
        .filter(|msg| !EMPTY_RESULT_MESSAGES.iter().any(|empty| msg.starts_with(empty)))
        .collect();
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

/// Train Tracker error codes: 0 is success, 100-series are request problems.
/// Code 101-ish "no trains" conditions arrive with an empty list instead.
pub fn check_train_error(err_cd: &str, err_nm: &Option<String>) -> Result<(), String> {
    match err_cd.trim() {
        "" | "0" => Ok(()),
        code => Err(format!("{code}: {}", err_nm.as_deref().unwrap_or("unknown error"))),
    }
}

impl BusRoute {
    pub fn into_route(self) -> Route {
        Route {
            route: self.rt,
            name: self.rtnm,
            color: self.rtclr,
            route_type: RouteType::Bus,
        }
    }
}

impl BusPattern {
    /// Waypoints (`W`) become the path, stop points (`S`) become stops.
    pub fn into_pattern(self, route: &str, color: &str) -> Pattern {
        let mut paths = Vec::with_capacity(self.pt.len());
        let mut stops = Vec::new();

        for point in self.pt {
            let position = Point::new(point.lat, point.lon);
            match point.typ.as_str() {
                "W" => paths.push(position),
                "S" => stops.push(Stop {
                    id: point.stpid.unwrap_or_default(),
                    name: point.stpnm.unwrap_or_default(),
                    position,
                    route: route.to_string(),
                    route_type: RouteType::Bus,
                }),
                _ => {}
            }
        }

        Pattern {
            id: self.pid,
            route: route.to_string(),
            direction: self.rtdir,
            fill_color: color.to_string(),
            stroke_color: color.to_string(),
            paths,
            stops,
            route_type: RouteType::Bus,
        }
    }
}

impl BusPrediction {
    pub fn into_prediction(self) -> Prediction {
        let countdown = self.prdctdn.trim();
        let time = match countdown {
            "DUE" => 0,
            _ => countdown
                .parse()
                .ok()
                .or_else(|| minutes_between(&self.tmstmp, &self.prdtm))
                .unwrap_or(0),
        };
        Prediction {
            juncture: if self.typ == "D" { Juncture::Departure } else { Juncture::Arrival },
            time,
            delayed: self.dly || countdown == "DLY",
            timestamp: clock_time(&self.prdtm),
            name: self.stpnm,
            stop_id: self.stpid,
            route: self.rt,
            direction: self.rtdir,
            vehicle_id: self.vid,
            destination: self.des,
        }
    }
}

impl BusVehicle {
    pub fn into_vehicle(self) -> Vehicle {
        Vehicle {
            id: self.vid,
            route: self.rt,
            position: Point::new(self.lat, self.lon),
            heading: heading_bucket(self.hdg),
            destination: self.des,
            delayed: self.dly,
            timestamp: display_timestamp(&self.tmstmp),
            color: String::new(),
            route_type: RouteType::Bus,
        }
    }
}

impl TrainPosition {
    pub fn into_vehicle(self, route: &str) -> Vehicle {
        Vehicle {
            id: self.rn,
            route: route.to_string(),
            position: Point::new(self.lat, self.lon),
            heading: heading_bucket(self.heading),
            destination: self.dest_nm,
            delayed: self.is_dly == "1",
            timestamp: display_timestamp(&self.prdt),
            color: String::new(),
            route_type: RouteType::Train,
        }
    }
}

impl TrainArrival {
    pub fn into_prediction(self) -> Prediction {
        Prediction {
            juncture: Juncture::Arrival,
            time: minutes_between(&self.prdt, &self.arr_t).unwrap_or(0),
            timestamp: clock_time(&self.arr_t),
            name: self.sta_nm,
            stop_id: self.stp_id,
            route: self.rt,
            direction: self.stp_de,
            delayed: self.is_dly == "1",
            vehicle_id: self.rn,
            destination: self.dest_nm,
        }
    }
}

/// CTA rail lines with their official colors. The Train Tracker has no route
/// listing call.
pub fn train_catalog() -> Vec<Route> {
    [
        ("Red", "Red Line", "#c60c30"),
        ("Blue", "Blue Line", "#00a1de"),
        ("Brn", "Brown Line", "#62361b"),
        ("G", "Green Line", "#009b3a"),
        ("Org", "Orange Line", "#f9461c"),
        ("P", "Purple Line", "#522398"),
        ("Pink", "Pink Line", "#e27ea6"),
        ("Y", "Yellow Line", "#f9e300"),
    ]
    .into_iter()
    .map(|(route, name, color)| Route {
        route: route.to_string(),
        name: name.to_string(),
        color: color.to_string(),
        route_type: RouteType::Train,
    })
    .collect()
}
