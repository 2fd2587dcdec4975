//! A blocking Rust client for the Météo-France public API.
//!
//! The crate covers three services that share one authenticated [`Client`]:
//! - numerical weather forecasts (AROME, ARPEGE, PIAF) served as WCS
//!   coverages, through [`Forecast`];
//! - climatological station observations (DPClim), through [`Observation`];
//! - vigilance bulletins (DPVigilance), through [`Vigilance`].
//!
//! ## Quick start
//! - Configure authentication via environment variables
//!   (`METEOFRANCE_API_KEY`, `METEOFRANCE_TOKEN` or `METEOFRANCE_APPLICATION_ID`)
//!   or a `.meteofrancerc` file (current directory or home directory).
//! - Build a [`Forecast`] for a model and resolve a coverage id from an
//!   indicator.
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use anyhow::Result;
//! use meteofrance::{Client, CoverageQuery, Forecast, ForecastModel};
//!
//! fn main() -> Result<()> {
//!     let client = Arc::new(Client::from_env()?);
//!     let arome = Forecast::new(client, ForecastModel::Arome)?;
//!
//!     let coverage_id =
//!         arome.coverage_id("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND", None, None)?;
//!     let query = CoverageQuery::new(coverage_id).height(Some(2));
//!     arome.coverage_file(&query, Some(Path::new("t2m.grib")))?;
//!     Ok(())
//! }
//! ```
//!
//! GRIB/TIFF decoding is not built in: plug a [`RasterDecoder`] into
//! [`Forecast::with_decoder`] to get tables out of [`Forecast::get_coverage`].
//!
//! The library only logs through the `log` facade; install the logger of your
//! choice to see what it does.

#![forbid(unsafe_code)]

mod axis;
mod capabilities;
mod client;
mod config;
mod coverage;
mod error;
mod forecast;
mod models;
mod observation;
mod table;
mod token;
mod transport;
mod util;
mod vigilance;

pub use axis::{AxisDescription, parse_coverage_description, validate_or_default};
pub use capabilities::{
    Capabilities, CapabilityEntry, Catalogue, DEFAULT_INTERVAL, IndicatorCatalogue, RUN_FORMAT,
    compose_coverage_id, parse_capabilities, parse_coverage_id,
};
pub use client::{Client, TOKEN_URL};
pub use config::{ClientConfig, DEFAULT_BASE_URL};
pub use coverage::{
    CoverageQuery, FRANCE_METRO_LATITUDES, FRANCE_METRO_LONGITUDES, FileFormat, RasterDecoder,
};
pub use error::{Error, Result};
pub use forecast::{CoverageRequest, Forecast};
pub use models::{ForecastModel, PRO_BASE_URL, precision_code};
pub use observation::{
    DEPARTEMENTS, Frequency, Observation, Station, distance_km, format_departement,
    sort_stations_by_distance,
};
pub use table::Table;
pub use token::{TOKEN_VALIDITY, TokenStore};
pub use transport::{HttpRequest, HttpTransport, Method, RawResponse, ReqwestTransport, TransportOptions};
pub use vigilance::{Vigilance, phenomenon_label, phenomenon_tables};
