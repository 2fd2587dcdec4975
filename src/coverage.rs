//! One-shot coverage subset queries and the raster decoding boundary.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::table::Table;

pub const WCS_SERVICE: &str = "WCS";
pub const WCS_VERSION: &str = "2.0.1";

/// Metropolitan France, latitudes.
pub const FRANCE_METRO_LATITUDES: (f64, f64) = (41.33356, 51.0889);
/// Metropolitan France, longitudes.
pub const FRANCE_METRO_LONGITUDES: (f64, f64) = (-5.1413, 9.5602);

/// Decoded columns with no use downstream.
const DROPPED_COLUMNS: [&str; 2] = ["surface", "valid_time"];
const RENAMED_COLUMNS: [(&str, &str); 4] = [
    ("time", "run"),
    ("heightAboveGround", "height"),
    ("isobaricInhPa", "pressure"),
    ("step", "forecast_horizon"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileFormat {
    #[default]
    Grib,
    Tiff,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Grib => "grib",
            FileFormat::Tiff => "tiff",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            FileFormat::Grib => "application/wmo-grib",
            FileFormat::Tiff => "image/tiff",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Turns a downloaded GRIB/TIFF file into rows.
///
/// Decoding gridded binaries is left to the caller (eccodes, gdal...); the
/// decoder may leave `<file>.*.idx` index files next to its input, they are
/// cleaned up afterwards.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, path: &Path, format: FileFormat) -> anyhow::Result<Table>;
}

impl<F> RasterDecoder for F
where
    F: Fn(&Path, FileFormat) -> anyhow::Result<Table> + Send + Sync,
{
    fn decode(&self, path: &Path, format: FileFormat) -> anyhow::Result<Table> {
        self(path, format)
    }
}

/// A single subset of a coverage: one height/pressure level, one forecast
/// horizon, one bounding box.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageQuery {
    pub coverage_id: String,
    pub height: Option<i64>,
    pub pressure: Option<i64>,
    pub forecast_horizon_seconds: i64,
    pub lat: (f64, f64),
    pub long: (f64, f64),
    pub format: FileFormat,
}

impl CoverageQuery {
    pub fn new(coverage_id: impl Into<String>) -> Self {
        Self {
            coverage_id: coverage_id.into(),
            height: None,
            pressure: None,
            forecast_horizon_seconds: 0,
            lat: FRANCE_METRO_LATITUDES,
            long: FRANCE_METRO_LONGITUDES,
            format: FileFormat::Grib,
        }
    }

    pub fn height(mut self, height: Option<i64>) -> Self {
        self.height = height;
        self
    }

    pub fn pressure(mut self, pressure: Option<i64>) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn forecast_horizon_hours(mut self, hours: i64) -> Self {
        self.forecast_horizon_seconds = hours * 3600;
        self
    }

    pub fn bbox(mut self, lat: (f64, f64), long: (f64, f64)) -> Self {
        self.lat = lat;
        self.long = long;
        self
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = format;
        self
    }

    /// Values of the repeated `subset` parameter. Pressure and height only
    /// appear when set.
    pub fn subset_params(&self) -> Vec<String> {
        let mut subsets = Vec::with_capacity(5);
        if let Some(p) = self.pressure {
            subsets.push(format!("pressure({})", p));
        }
        if let Some(h) = self.height {
            subsets.push(format!("height({})", h));
        }
        subsets.push(format!("time({})", self.forecast_horizon_seconds));
        subsets.push(format!("lat({},{})", self.lat.0, self.lat.1));
        subsets.push(format!("long({},{})", self.long.0, self.long.1));
        subsets
    }

    /// Full `GetCoverage` query string parameters.
    pub fn request_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("service".to_string(), WCS_SERVICE.to_string()),
            ("version".to_string(), WCS_VERSION.to_string()),
            ("coverageid".to_string(), self.coverage_id.clone()),
            ("format".to_string(), self.format.mime_type().to_string()),
        ];
        params.extend(
            self.subset_params()
                .into_iter()
                .map(|s| ("subset".to_string(), s)),
        );
        params
    }

    /// `<height|_>m_<seconds>Z_<lat0>-<lat1>_<long0>-<long1>.<ext>`
    pub fn cache_file_name(&self) -> String {
        let height = match self.height {
            Some(h) if h != 0 => h.to_string(),
            _ => "_".to_string(),
        };
        format!(
            "{}m_{}Z_{}-{}_{}-{}.{}",
            height,
            self.forecast_horizon_seconds,
            self.lat.0,
            self.lat.1,
            self.long.0,
            self.long.1,
            self.format.extension()
        )
    }

    /// Where the payload lands under `cache_dir`, one directory per coverage.
    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir
            .join(&self.coverage_id)
            .join(self.cache_file_name())
    }
}

/// Decodes `path`, then removes it together with the decoder's index files.
pub(crate) fn decode_and_clean(
    decoder: &dyn RasterDecoder,
    path: &Path,
    format: FileFormat,
) -> Result<Table> {
    let decoded = decoder.decode(path, format);
    remove_artifacts(path);
    let mut table = decoded.map_err(Error::Decode)?;
    normalize_columns(&mut table);
    Ok(table)
}

pub(crate) fn normalize_columns(table: &mut Table) {
    table.normalize_rows();
    table.drop_columns(&DROPPED_COLUMNS);
    for (from, to) in RENAMED_COLUMNS {
        table.rename_column(from, to);
    }
}

fn remove_artifacts(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), e);
        }
    }

    let pattern = format!("{}.*.idx", glob::Pattern::escape(&path.to_string_lossy()));
    let entries = match glob::glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("bad index file pattern {}: {}", pattern, e);
            return;
        }
    };
    for entry in entries.flatten() {
        debug!("removing index file {}", entry.display());
        if let Err(e) = fs::remove_file(&entry) {
            warn!("failed to remove {}: {}", entry.display(), e);
        }
    }
}
