//! Climatological station observations (DPClim).
//!
//! Data is not served directly: an order is placed for a station and a
//! period, the server prepares a CSV file, and the file is fetched once ready.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use log::{debug, info};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::Client;
use crate::error::{Error, Result};
use crate::table::Table;

pub const DPCLIM_ENTRY_POINT: &str = "DPClim/v1";

const EARTH_RADIUS_KM: f64 = 6371.01;
const FILE_NOT_READY_CODE: u16 = 204;
const STATION_ID_LEN: usize = 8;

/// Departement codes accepted by the station listing.
pub const DEPARTEMENTS: &[&str] = &[
    "01", "02", "03", "04", "05", "06", "07", "08", "09", "10", "11", "12", "13", "14", "15", "16",
    "17", "18", "19", "2A", "2B", "21", "22", "23", "24", "25", "26", "27", "28", "29", "30", "31",
    "32", "33", "34", "35", "36", "37", "38", "39", "40", "41", "42", "43", "44", "45", "46", "47",
    "48", "49", "50", "51", "52", "53", "54", "55", "56", "57", "58", "59", "60", "61", "62", "63",
    "64", "65", "66", "67", "68", "69", "70", "71", "72", "73", "74", "75", "76", "77", "78", "79",
    "80", "81", "82", "83", "84", "85", "86", "87", "88", "89", "90", "91", "92", "93", "94", "95",
    "99", "971", "972", "973", "974", "975", "984", "985", "986", "987", "988",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Frequency {
    /// Every 6 minutes.
    SixMinutes,
    #[default]
    Hourly,
    Daily,
    /// Ten-day periods.
    Decade,
    Monthly,
}

impl Frequency {
    /// Path segment of the order endpoint.
    pub fn endpoint(self) -> &'static str {
        match self {
            Frequency::SixMinutes => "infrahoraire-6m",
            Frequency::Hourly => "horaire",
            Frequency::Daily => "quotidienne",
            Frequency::Decade => "decadaire",
            Frequency::Monthly => "mensuelle",
        }
    }

    /// Path segment of the station listing; daily and coarser share one list.
    pub fn listing_endpoint(self) -> &'static str {
        match self {
            Frequency::SixMinutes | Frequency::Hourly => self.endpoint(),
            _ => "quotidienne",
        }
    }

    /// Trims `dt` to the precision the order endpoint accepts and formats it
    /// as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn format_datetime(self, dt: NaiveDateTime) -> String {
        let (hour, minute) = match self {
            Frequency::SixMinutes => (dt.hour(), dt.minute() / 6 * 6),
            Frequency::Hourly => (dt.hour(), 0),
            Frequency::Daily | Frequency::Decade | Frequency::Monthly => (0, 0),
        };
        let trimmed = dt
            .date()
            .and_hms_opt(hour, minute, 0)
            .unwrap_or(dt);
        trimmed.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::SixMinutes => "6m",
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
            Frequency::Decade => "decade",
            Frequency::Monthly => "monthly",
        })
    }
}

impl FromStr for Frequency {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "6m" => Ok(Frequency::SixMinutes),
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            "decade" => Ok(Frequency::Decade),
            "monthly" => Ok(Frequency::Monthly),
            other => Err(Error::Validation(format!(
                "Parameter `frequency` must be in ('6m', 'hourly', 'daily', 'decade', 'monthly'), got {:?}",
                other
            ))),
        }
    }
}

/// Normalises a departement code ("1" -> "01") and checks it exists.
pub fn format_departement(departement: impl ToString) -> Result<String> {
    let raw = departement.to_string();
    let raw = raw.trim();
    let code = if raw.len() == 1 {
        format!("0{}", raw)
    } else {
        raw.to_ascii_uppercase()
    };
    if DEPARTEMENTS.contains(&code.as_str()) {
        Ok(code)
    } else {
        Err(Error::Validation(format!("Invalid departement {}", raw)))
    }
}

/// Great-circle distance in km.
pub fn distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let cos_angle = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * (lon1 - lon2).cos();
    EARTH_RADIUS_KM * cos_angle.clamp(-1.0, 1.0).acos()
}

/// Station ids are 8 digits; the API sometimes loses the leading zeros.
fn pad_station_id(id: &str) -> String {
    format!("{:0>width$}", id, width = STATION_ID_LEN)
}

fn station_id<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(pad_station_id(&s)),
        Value::Number(n) => Ok(pad_station_id(&n.to_string())),
        other => Err(de::Error::custom(format!("invalid station id {}", other))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(deserialize_with = "station_id")]
    pub id: String,
    #[serde(default)]
    pub nom: String,
    #[serde(rename = "posteOuvert", default)]
    pub open: bool,
    #[serde(rename = "typePoste", default)]
    pub station_type: Option<i64>,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub alt: Option<f64>,
    #[serde(rename = "postePublic", default)]
    pub public: bool,
}

impl Station {
    pub fn distance_to(&self, lat: f64, lon: f64) -> f64 {
        distance_km(lat, lon, self.lat, self.lon)
    }
}

/// Sorts `stations` closest first.
pub fn sort_stations_by_distance(lat: f64, lon: f64, stations: &mut [Station]) {
    stations.sort_by(|a, b| a.distance_to(lat, lon).total_cmp(&b.distance_to(lat, lon)));
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "elaboreProduitAvecDemandeResponse")]
    response: OrderReturn,
}

#[derive(Debug, Deserialize)]
struct OrderReturn {
    #[serde(rename = "return")]
    order_id: Value,
}

/// Station observation client for one sampling frequency.
#[derive(Debug)]
pub struct Observation {
    client: Arc<Client>,
    frequency: Frequency,
    order_wait: Duration,
    poll_interval: Duration,
    max_polls: usize,
    stations: Mutex<HashMap<String, Vec<Station>>>,
    station_info: Mutex<HashMap<String, Value>>,
}

impl Observation {
    pub fn new(client: Arc<Client>, frequency: Frequency) -> Self {
        Self {
            client,
            frequency,
            order_wait: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            max_polls: 10,
            stations: Mutex::new(HashMap::new()),
            station_info: Mutex::new(HashMap::new()),
        }
    }

    /// Pause between placing an order and the first download attempt.
    pub fn with_order_wait(mut self, wait: Duration) -> Self {
        self.order_wait = wait;
        self
    }

    /// How often, and how many times, to ask for a file that is not ready.
    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    /// Stations of a departement, fetched once per departement.
    ///
    /// With `near`, stations are sorted by distance to that point, closest
    /// first.
    pub fn get_stations(
        &self,
        departement: impl ToString,
        near: Option<(f64, f64)>,
        open_only: bool,
    ) -> Result<Vec<Station>> {
        self.get_stations_in(&[departement.to_string()], near, open_only)
    }

    /// Stations of several departements (typically one and its neighbours).
    pub fn get_stations_in<S: AsRef<str>>(
        &self,
        departements: &[S],
        near: Option<(f64, f64)>,
        open_only: bool,
    ) -> Result<Vec<Station>> {
        let mut out = Vec::new();
        for departement in departements {
            let code = format_departement(departement.as_ref())?;
            out.extend(self.stations_of(&code)?);
        }
        if open_only {
            out.retain(|s| s.open);
        }
        if let Some((lat, lon)) = near {
            sort_stations_by_distance(lat, lon, &mut out);
        }
        Ok(out)
    }

    fn stations_of(&self, code: &str) -> Result<Vec<Station>> {
        if let Some(cached) = self.lock_stations().get(code) {
            return Ok(cached.clone());
        }
        let url = format!(
            "{}/liste-stations/{}",
            DPCLIM_ENTRY_POINT,
            self.frequency.listing_endpoint()
        );
        let stations: Vec<Station> = self.client.get(&url, [("id-departement", code)])?.json()?;
        debug!("{} stations in departement {}", stations.len(), code);
        self.lock_stations()
            .insert(code.to_string(), stations.clone());
        Ok(stations)
    }

    fn lock_stations(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Station>>> {
        self.stations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw metadata of a station, fetched once per station.
    pub fn get_station_info(&self, station_id: &str) -> Result<Value> {
        let cached = self
            .station_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(station_id)
            .cloned();
        if let Some(info) = cached {
            return Ok(info);
        }

        let url = format!("{}/information-station", DPCLIM_ENTRY_POINT);
        let list: Vec<Value> = self.client.get(&url, [("id-station", station_id)])?.json()?;
        let mut info = list.into_iter().next().ok_or_else(|| Error::MissingData {
            url: url.clone(),
            message: format!("no information for station {}", station_id),
        })?;
        let id = match info.get("id") {
            Some(Value::String(s)) => Some(pad_station_id(s)),
            Some(Value::Number(n)) => Some(pad_station_id(&n.to_string())),
            _ => None,
        };
        if let (Some(id), Some(obj)) = (id, info.as_object_mut()) {
            obj.insert("id".to_string(), Value::String(id));
        }

        self.station_info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(station_id.to_string(), info.clone());
        Ok(info)
    }

    /// Observations of `station_id` between two instants, trimmed to the
    /// frequency's precision.
    pub fn fetch_data_between(
        &self,
        station_id: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Table> {
        self.fetch_data(
            station_id,
            &self.frequency.format_datetime(start),
            &self.frequency.format_datetime(end),
        )
    }

    /// Observations of `station_id` between `start` and `end`, given as
    /// `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn fetch_data(&self, station_id: &str, start: &str, end: &str) -> Result<Table> {
        let order_id = self.order_data(station_id, start, end)?;
        thread::sleep(self.order_wait);
        let text = self.retrieve_file(&order_id)?;
        Table::from_csv(&text, b';')
    }

    /// Places an order and returns its id.
    pub fn order_data(&self, station_id: &str, start: &str, end: &str) -> Result<String> {
        let url = format!(
            "{}/commande-station/{}",
            DPCLIM_ENTRY_POINT,
            self.frequency.endpoint()
        );
        let resp: OrderResponse = self
            .client
            .get(
                &url,
                [
                    ("id-station", station_id),
                    ("date-deb-periode", start),
                    ("date-fin-periode", end),
                ],
            )?
            .json()?;
        let order_id = match resp.response.order_id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        info!("order {} placed for station {}", order_id, station_id);
        Ok(order_id)
    }

    /// Downloads the CSV of an order, asking again while the server answers
    /// that the file is not ready yet.
    pub fn retrieve_file(&self, order_id: &str) -> Result<String> {
        let url = format!("{}/commande/fichier", DPCLIM_ENTRY_POINT);
        for poll in 1..=self.max_polls {
            match self.client.get(&url, [("id-cmde", order_id)]) {
                Ok(resp) => return Ok(resp.text()),
                Err(e) if e.status() == Some(FILE_NOT_READY_CODE) => {
                    info!("order {} not ready ({}/{})", order_id, poll, self.max_polls);
                    if poll < self.max_polls {
                        thread::sleep(self.poll_interval);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::RetriesExhausted {
            status: FILE_NOT_READY_CODE,
            url,
            message: format!("order {} still not ready after {} polls", order_id, self.max_polls),
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::config::ClientConfig;
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::{Method, RawResponse};

    const STATIONS: &str = r#"[
        {"id":"75114001","nom":"PARIS-MONTSOURIS","posteOuvert":true,"typePoste":0,"lon":2.3378,"lat":48.8217,"alt":75,"postePublic":true},
        {"id":"75106001","nom":"PARIS-LUXEMBOURG","posteOuvert":true,"typePoste":2,"lon":2.3375,"lat":48.8445,"alt":46,"postePublic":true},
        {"id":"75116008","nom":"PARIS-LONGCHAMP","posteOuvert":false,"typePoste":1,"lon":2.2333,"lat":48.8550,"alt":33,"postePublic":false}
    ]"#;

    fn observation(responses: Vec<RawResponse>, frequency: Frequency) -> (Observation, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let client = Client::from_config(ClientConfig::with_api_key("k"))
            .unwrap()
            .with_transport(Arc::clone(&transport))
            .with_backoff(Duration::ZERO);
        let obs = Observation::new(Arc::new(client), frequency)
            .with_order_wait(Duration::ZERO)
            .with_polling(Duration::ZERO, 3);
        (obs, transport)
    }

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap()
    }

    #[test]
    fn datetimes_are_trimmed_to_the_frequency() {
        let t = dt(2024, 3, 5, 14, 47, 31);
        assert_eq!(Frequency::SixMinutes.format_datetime(t), "2024-03-05T14:42:00Z");
        assert_eq!(Frequency::Hourly.format_datetime(t), "2024-03-05T14:00:00Z");
        assert_eq!(Frequency::Daily.format_datetime(t), "2024-03-05T00:00:00Z");
        assert_eq!(Frequency::Monthly.format_datetime(t), "2024-03-05T00:00:00Z");
    }

    #[test]
    fn frequency_names() {
        assert_eq!("6m".parse::<Frequency>().unwrap(), Frequency::SixMinutes);
        assert_eq!(Frequency::Decade.endpoint(), "decadaire");
        assert_eq!(Frequency::Monthly.listing_endpoint(), "quotidienne");
        assert_eq!(Frequency::SixMinutes.listing_endpoint(), "infrahoraire-6m");
        assert!(matches!("weekly".parse::<Frequency>(), Err(Error::Validation(_))));
    }

    #[test]
    fn departements_are_normalised() {
        assert_eq!(format_departement(1).unwrap(), "01");
        assert_eq!(format_departement("1").unwrap(), "01");
        assert_eq!(format_departement("2a").unwrap(), "2A");
        assert_eq!(format_departement(971).unwrap(), "971");
        assert!(format_departement(20).is_err());
        assert!(format_departement("unknown").is_err());
    }

    #[test]
    fn distance_between_paris_and_marseille() {
        let d = distance_km(48.8566, 2.3522, 43.2965, 5.3698);
        assert!((d - 661.0).abs() < 5.0, "{}", d);
        assert!(distance_km(45.0, 3.0, 45.0, 3.0) < 1e-3);
    }

    #[test]
    fn stations_are_listed_once_per_departement() {
        let (obs, transport) = observation(vec![RawResponse::new(200, STATIONS)], Frequency::Daily);

        let all = obs.get_stations("75", None, false).unwrap();
        assert_eq!(all.len(), 3);
        let open = obs.get_stations(75, Some((48.845, 2.337)), true).unwrap();
        assert_eq!(
            open.iter().map(|s| s.nom.as_str()).collect::<Vec<_>>(),
            ["PARIS-LUXEMBOURG", "PARIS-MONTSOURIS"]
        );

        assert_eq!(transport.count(Method::Get), 1);
        let req = &transport.requests()[0];
        assert!(req.url.ends_with("/DPClim/v1/liste-stations/quotidienne"));
        assert_eq!(req.query, vec![("id-departement".to_string(), "75".to_string())]);
    }

    #[test]
    fn station_info_id_is_padded_and_cached() {
        let (obs, transport) = observation(
            vec![RawResponse::new(200, r#"[{"id":1014002,"nom":"AMBERIEU"}]"#)],
            Frequency::Hourly,
        );
        let info = obs.get_station_info("01014002").unwrap();
        assert_eq!(info["id"], "01014002");
        obs.get_station_info("01014002").unwrap();
        assert_eq!(transport.count(Method::Get), 1);
    }

    #[test]
    fn numeric_station_ids_keep_their_zeros() {
        let s: Station = serde_json::from_str(r#"{"id":1014002,"posteOuvert":true}"#).unwrap();
        assert_eq!(s.id, "01014002");
        assert!(s.open);
    }

    #[test]
    fn order_then_poll_until_ready() {
        let (obs, transport) = observation(
            vec![
                RawResponse::new(202, r#"{"elaboreProduitAvecDemandeResponse":{"return":"777"}}"#),
                RawResponse::new(204, ""),
                RawResponse::new(201, "POSTE;DATE;T\n75114001;2024010100;7,9\n"),
            ],
            Frequency::Hourly,
        );

        let table = obs
            .fetch_data_between("75114001", dt(2024, 1, 1, 0, 12, 0), dt(2024, 1, 1, 1, 59, 0))
            .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0][2], serde_json::json!(7.9));

        let requests = transport.requests();
        assert!(requests[0].url.ends_with("/commande-station/horaire"));
        assert_eq!(
            requests[0].query,
            vec![
                ("id-station".to_string(), "75114001".to_string()),
                ("date-deb-periode".to_string(), "2024-01-01T00:00:00Z".to_string()),
                ("date-fin-periode".to_string(), "2024-01-01T01:00:00Z".to_string()),
            ]
        );
        assert_eq!(requests[1].query, vec![("id-cmde".to_string(), "777".to_string())]);
        assert_eq!(requests.len(), 3);
    }

    #[test]
    fn polling_gives_up() {
        let (obs, transport) = observation(
            (0..3).map(|_| RawResponse::new(204, "")).collect(),
            Frequency::Daily,
        );
        let err = obs.retrieve_file("42").unwrap_err();
        assert!(matches!(err, Error::RetriesExhausted { status: 204, .. }));
        assert_eq!(transport.count(Method::Get), 3);
    }

    #[test]
    fn order_errors_propagate() {
        let (obs, _) = observation(vec![RawResponse::new(400, "station inconnue")], Frequency::Daily);
        assert!(matches!(
            obs.fetch_data("00000000", "2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z"),
            Err(Error::Parameter { .. })
        ));
    }
}
