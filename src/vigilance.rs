//! Weather vigilance bulletins (DPVigilance).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, warn};
use serde_json::{Map, Value};

use crate::client::{Client, NO_PARAMS};
use crate::error::{Error, Result};
use crate::table::Table;

pub const DPVIGILANCE_ENTRY_POINT: &str = "DPVigilance/v1";

const NO_BULLETIN_MARKER: &str = "no matching blob";
const DEFAULT_VIGNETTE_NAME: &str = "vignette_nationale.png";

/// Echeances covered by the map: today and tomorrow.
const ECHEANCES: [&str; 2] = ["J", "J1"];

/// Label of a phenomenon id.
pub fn phenomenon_label(id: &str) -> Option<&'static str> {
    Some(match id {
        "1" => "vent",
        "2" => "pluie",
        "3" => "orages",
        "4" => "crues",
        "5" => "neige / verglas",
        "6" => "canicule",
        "7" => "grand froid",
        "8" => "avalanches",
        "9" => "vagues submersion",
        _ => return None,
    })
}

#[derive(Debug, Clone)]
pub struct Vigilance {
    client: Arc<Client>,
}

impl Vigilance {
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    fn url(resource: &str) -> String {
        format!("{}/{}", DPVIGILANCE_ENTRY_POINT, resource)
    }

    /// Current bulletin texts.
    ///
    /// When the situation needs no bulletin the service answers 404; that is
    /// reported as an empty object.
    pub fn get_textes_vigilance(&self) -> Result<Value> {
        match self.client.get(&Self::url("textesvigilance/encours"), NO_PARAMS) {
            Ok(resp) => resp.json(),
            Err(Error::MissingData { message, .. }) => {
                if message.contains(NO_BULLETIN_MARKER) {
                    warn!("current vigilance level needs no bulletin");
                } else {
                    error!("no vigilance bulletin: {}", message);
                }
                Ok(Value::Object(Map::new()))
            }
            Err(e) => Err(e),
        }
    }

    /// Current vigilance map with risk levels per domain and phenomenon.
    pub fn get_carte_vigilance(&self) -> Result<Value> {
        self.client
            .get(&Self::url("cartevigilance/encours"), NO_PARAMS)?
            .json()
    }

    /// Risk per phenomenon and risk per domain, for echeances J and J1.
    pub fn get_phenomenon(&self) -> Result<(Table, Table)> {
        Ok(phenomenon_tables(&self.get_carte_vigilance()?))
    }

    /// Saves the national J/J1 thumbnail in `dir`, under the name the service
    /// announces.
    pub fn get_vignette(&self, dir: &Path) -> Result<PathBuf> {
        let resp = self
            .client
            .get(&Self::url("vignettenationale-J-et-J1/encours"), NO_PARAMS)?;
        let name = resp
            .attachment_name()
            .and_then(|n| Path::new(&n).file_name().map(|f| f.to_owned()))
            .unwrap_or_else(|| DEFAULT_VIGNETTE_NAME.into());
        let path = dir.join(name);
        fs::create_dir_all(dir)?;
        fs::write(&path, &resp.body)?;
        debug!("vignette saved to {}", path.display());
        Ok(path)
    }
}

/// Splits a vigilance map into its phenomenon and domain tables.
pub fn phenomenon_tables(carte: &Value) -> (Table, Table) {
    let periods = carte
        .pointer("/product/periods")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut phenomena = Vec::new();
    let mut timelaps = Vec::new();
    for echeance in ECHEANCES {
        let selected = periods
            .iter()
            .filter(|p| p.get("echeance").and_then(Value::as_str) == Some(echeance));
        for period in selected {
            let mut items = Table::from_records(array_at(period, &["per_phenomenon_items"]));
            items.insert_column("echeance", Value::from(echeance));
            phenomena.push(items);

            let domains = array_at(period, &["timelaps", "domain_ids"]);
            let domains = if domains.is_empty() {
                array_at(period, &["timelaps.domain_ids"])
            } else {
                domains
            };
            let mut domains = Table::from_records(domains);
            domains.insert_column("echeance", Value::from(echeance));
            timelaps.push(domains);
        }
    }

    let mut phenomena = Table::concat(phenomena);
    let labels: Vec<Value> = match phenomena.column("phenomenon_id") {
        Some(ids) => ids
            .into_iter()
            .map(|id| {
                let id = match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                phenomenon_label(&id).map_or(Value::Null, Value::from)
            })
            .collect(),
        None => Vec::new(),
    };
    phenomena.columns.push("phenomenon_libelle".to_string());
    for (row, label) in phenomena.rows.iter_mut().zip(labels) {
        row.push(label);
    }

    (phenomena, Table::concat(timelaps))
}

fn array_at<'a>(value: &'a Value, path: &[&str]) -> &'a [Value] {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
