use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use log::{debug, info};

use crate::axis::{AxisDescription, parse_coverage_description, validate_or_default};
use crate::capabilities::Capabilities;
use crate::client::Client;
use crate::coverage::{
    CoverageQuery, FRANCE_METRO_LATITUDES, FRANCE_METRO_LONGITUDES, RasterDecoder, WCS_SERVICE,
    WCS_VERSION, decode_and_clean,
};
use crate::error::{Error, Result};
use crate::models::{ForecastModel, WCS_API_VERSION};
use crate::table::Table;
use crate::util::urljoin;

/// What to fetch with [`Forecast::get_coverage`].
///
/// Exactly one of `indicator` and `coverage_id` must be set. Axis lists left
/// to `None` (or empty) default to the first value the coverage offers.
#[derive(Debug, Clone)]
pub struct CoverageRequest {
    pub indicator: Option<String>,
    pub coverage_id: Option<String>,
    pub run: Option<String>,
    pub interval: Option<String>,
    pub lat: (f64, f64),
    pub long: (f64, f64),
    pub heights: Option<Vec<i64>>,
    pub pressures: Option<Vec<i64>>,
    pub forecast_horizons: Option<Vec<i64>>,
}

impl Default for CoverageRequest {
    fn default() -> Self {
        Self {
            indicator: None,
            coverage_id: None,
            run: None,
            interval: None,
            lat: FRANCE_METRO_LATITUDES,
            long: FRANCE_METRO_LONGITUDES,
            heights: None,
            pressures: None,
            forecast_horizons: None,
        }
    }
}

impl CoverageRequest {
    pub fn indicator(indicator: impl Into<String>) -> Self {
        Self {
            indicator: Some(indicator.into()),
            ..Self::default()
        }
    }

    pub fn coverage_id(coverage_id: impl Into<String>) -> Self {
        Self {
            coverage_id: Some(coverage_id.into()),
            ..Self::default()
        }
    }

    pub fn run(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into());
        self
    }

    pub fn interval(mut self, interval: impl Into<String>) -> Self {
        self.interval = Some(interval.into());
        self
    }

    pub fn bbox(mut self, lat: (f64, f64), long: (f64, f64)) -> Self {
        self.lat = lat;
        self.long = long;
        self
    }

    pub fn heights(mut self, heights: impl Into<Vec<i64>>) -> Self {
        self.heights = Some(heights.into());
        self
    }

    pub fn pressures(mut self, pressures: impl Into<Vec<i64>>) -> Self {
        self.pressures = Some(pressures.into());
        self
    }

    pub fn forecast_horizons(mut self, hours: impl Into<Vec<i64>>) -> Self {
        self.forecast_horizons = Some(hours.into());
        self
    }
}

/// WCS access to one model over one territory at one grid resolution.
///
/// The capability listing is fetched on first use and kept for the lifetime
/// of the value; coverage descriptions are fetched on every call.
pub struct Forecast {
    client: Arc<Client>,
    model: ForecastModel,
    territory: String,
    precision: f64,
    entry_point: String,
    base_url: Option<String>,
    cache_dir: PathBuf,
    decoder: Option<Arc<dyn RasterDecoder>>,
    capabilities: OnceLock<Capabilities>,
}

impl std::fmt::Debug for Forecast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forecast")
            .field("model", &self.model)
            .field("territory", &self.territory)
            .field("precision", &self.precision)
            .field("entry_point", &self.entry_point)
            .field("cache_dir", &self.cache_dir)
            .field("decoder", &self.decoder.is_some())
            .finish_non_exhaustive()
    }
}

impl Forecast {
    /// Default territory and precision of the model.
    pub fn new(client: Arc<Client>, model: ForecastModel) -> Result<Self> {
        let territory = model.default_territory();
        let precision = model.default_precision(territory).ok_or_else(|| {
            Error::Validation(format!("no default precision for {} {}", model, territory))
        })?;
        Self::for_territory(client, model, territory, precision)
    }

    pub fn for_territory(
        client: Arc<Client>,
        model: ForecastModel,
        territory: &str,
        precision: f64,
    ) -> Result<Self> {
        model.validate(territory, precision)?;
        let entry_point = model.entry_point(territory, precision)?;
        let cache_dir = client.cache_root().join("coverages");
        Ok(Self {
            client,
            model,
            territory: territory.to_string(),
            precision,
            entry_point,
            base_url: model.base_url_override().map(str::to_string),
            cache_dir,
            decoder: None,
            capabilities: OnceLock::new(),
        })
    }

    /// Directory receiving downloaded coverages, one subdirectory per id.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_decoder<D: RasterDecoder + 'static>(mut self, decoder: D) -> Self {
        self.decoder = Some(Arc::new(decoder));
        self
    }

    /// Sends requests to `base_url` instead of the client's (or the model's
    /// own gateway).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn model(&self) -> ForecastModel {
        self.model
    }

    pub fn territory(&self) -> &str {
        &self.territory
    }

    pub fn precision(&self) -> f64 {
        self.precision
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn indicators(&self) -> Vec<&'static str> {
        self.model.indicators()
    }

    fn operation_url(&self, operation: &str) -> String {
        let path = format!(
            "{}/{}/{}/{}",
            self.model.name(),
            WCS_API_VERSION,
            self.entry_point,
            operation
        );
        match &self.base_url {
            Some(base) => urljoin(base, &path),
            None => path,
        }
    }

    /// Capability listing, fetched once.
    pub fn capabilities(&self) -> Result<&Capabilities> {
        if let Some(caps) = self.capabilities.get() {
            return Ok(caps);
        }
        info!("Fetching all available coverages...");
        let resp = self.client.get(
            &self.operation_url("GetCapabilities"),
            [
                ("service", WCS_SERVICE),
                ("version", WCS_VERSION),
                ("language", "eng"),
            ],
        )?;
        let caps = Capabilities::parse(&resp.text())?;
        caps.log_summary(&format!("{} {}", self.model, self.territory));
        Ok(self.capabilities.get_or_init(|| caps))
    }

    /// Resolves `(indicator, run, interval)` to a published coverage id.
    pub fn coverage_id(
        &self,
        indicator: &str,
        run: Option<&str>,
        interval: Option<&str>,
    ) -> Result<String> {
        if !self.model.has_indicator(indicator) {
            return Err(Error::Validation(format!(
                "Unknown `indicator` {} for {}",
                indicator, self.model
            )));
        }
        self.capabilities()?
            .resolve(&self.model, indicator, run, interval)
    }

    /// Axes (forecast horizons, heights, pressures) of `coverage_id`.
    pub fn get_coverage_description(&self, coverage_id: &str) -> Result<AxisDescription> {
        let resp = self.client.get(
            &self.operation_url("DescribeCoverage"),
            [
                ("service", WCS_SERVICE),
                ("version", WCS_VERSION),
                ("coverageid", coverage_id),
            ],
        )?;
        parse_coverage_description(&resp.text())
    }

    /// Downloads the raster of `query` to `target`, or to the coverage cache
    /// when no target is given. A file already in place is reused.
    pub fn coverage_file(&self, query: &CoverageQuery, target: Option<&Path>) -> Result<PathBuf> {
        let path = match target {
            Some(p) => p.to_path_buf(),
            None => query.cache_path(&self.cache_dir),
        };
        if path.exists() {
            debug!("{} found in cache", path.display());
            return Ok(path);
        }

        debug!("{} not found in cache, fetching data", path.display());
        let resp = self
            .client
            .get(&self.operation_url("GetCoverage"), query.request_params())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, &resp.body)?;
        Ok(path)
    }

    /// Fetches and decodes one subset. The downloaded file does not outlive
    /// the call.
    pub fn fetch_point(&self, query: &CoverageQuery) -> Result<Table> {
        let decoder = self.decoder.as_deref().ok_or_else(|| {
            Error::Configuration("no raster decoder configured, see Forecast::with_decoder".to_string())
        })?;
        let path = self.coverage_file(query, None)?;
        decode_and_clean(decoder, &path, query.format)
    }

    /// Every combination of the requested forecast horizons, pressures and
    /// heights (in that nesting order), stacked in one table.
    pub fn get_coverage(&self, request: &CoverageRequest) -> Result<Table> {
        let coverage_id = match (&request.indicator, &request.coverage_id) {
            (Some(indicator), None) => self.coverage_id(
                indicator,
                request.run.as_deref(),
                request.interval.as_deref(),
            )?,
            (None, Some(id)) => id.clone(),
            _ => {
                return Err(Error::Validation(
                    "Argument `indicator` or `coverage_id` need to be set (only one of them)".to_string(),
                ));
            }
        };
        debug!("Using `coverage_id={}`", coverage_id);

        let axis = self.get_coverage_description(&coverage_id)?;
        let heights = validate_or_default("heights", request.heights.as_deref(), &axis.heights)?;
        let pressures =
            validate_or_default("pressures", request.pressures.as_deref(), &axis.pressures)?;
        let horizons = validate_or_default(
            "forecast_horizons",
            request.forecast_horizons.as_deref(),
            &axis.forecast_horizons,
        )?;

        let mut tables = Vec::with_capacity(horizons.len() * pressures.len() * heights.len());
        for horizon in &horizons {
            for pressure in &pressures {
                for height in &heights {
                    let query = CoverageQuery::new(coverage_id.as_str())
                        .forecast_horizon_hours(horizon.unwrap_or(0))
                        .pressure(*pressure)
                        .height(*height)
                        .bbox(request.lat, request.long);
                    tables.push(self.fetch_point(&query)?);
                }
            }
        }
        Ok(Table::concat(tables))
    }

    /// Default-axis fetch of several coverages over one bounding box.
    pub fn get_coverages(
        &self,
        coverage_ids: &[&str],
        lat: (f64, f64),
        long: (f64, f64),
    ) -> Result<Table> {
        let tables = coverage_ids
            .iter()
            .map(|id| self.get_coverage(&CoverageRequest::coverage_id(*id).bbox(lat, long)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Table::concat(tables))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::coverage::FileFormat;
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::{Method, RawResponse};

    const CAPS: &str = r#"<wcs:Capabilities xmlns:wcs="http://www.opengis.net/wcs/2.0" xmlns:ows="http://www.opengis.net/ows/2.0"><wcs:Contents>
<wcs:CoverageSummary><ows:Title>T 2m</ows:Title><wcs:CoverageId>TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND___2024-11-01T03.00.00Z</wcs:CoverageId></wcs:CoverageSummary>
<wcs:CoverageSummary><ows:Title>T 2m</ows:Title><wcs:CoverageId>TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND___2024-11-01T00.00.00Z</wcs:CoverageId></wcs:CoverageSummary>
<wcs:CoverageSummary><ows:Title>RR</ows:Title><wcs:CoverageId>TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE___2024-11-01T03.00.00Z_PT1H</wcs:CoverageId></wcs:CoverageSummary>
</wcs:Contents></wcs:Capabilities>"#;

    const DESCRIBE: &str = "<CoverageDescriptions>\
<GeneralGridAxis><coefficients>0 3600 7200</coefficients><gridAxesSpanned>time</gridAxesSpanned></GeneralGridAxis>\
<GeneralGridAxis><coefficients>2 10</coefficients><gridAxesSpanned>height</gridAxesSpanned></GeneralGridAxis>\
</CoverageDescriptions>";

    fn forecast(responses: Vec<RawResponse>, cache: &Path) -> (Forecast, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let client = Client::from_config(ClientConfig {
            cache_dir: Some(cache.to_path_buf()),
            ..ClientConfig::with_api_key("k")
        })
        .unwrap()
        .with_transport(Arc::clone(&transport))
        .with_backoff(Duration::ZERO);
        let forecast = Forecast::new(Arc::new(client), ForecastModel::Arome).unwrap();
        (forecast, transport)
    }

    fn grib_decoder(_: &Path, _: FileFormat) -> anyhow::Result<Table> {
        let mut t = Table::new(vec!["time".into(), "valid_time".into(), "t2m".into()]);
        t.push_row(vec![json!("2024-11-01T03:00:00"), json!("x"), json!(280.0)]);
        Ok(t)
    }

    #[test]
    fn capabilities_are_fetched_once() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, transport) = forecast(vec![RawResponse::new(200, CAPS)], dir.path());

        assert_eq!(forecast.capabilities().unwrap().len(), 3);
        assert_eq!(forecast.capabilities().unwrap().len(), 3);
        assert_eq!(transport.count(Method::Get), 1);

        let req = &transport.requests()[0];
        assert_eq!(
            req.url,
            "https://public-api.meteofrance.fr/public/arome/1.0/wcs/MF-NWP-HIGHRES-AROME-001-FRANCE-WCS/GetCapabilities"
        );
        assert!(req.query.contains(&("language".to_string(), "eng".to_string())));
    }

    #[test]
    fn coverage_id_uses_newest_run_and_model_catalogue() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, _) = forecast(vec![RawResponse::new(200, CAPS)], dir.path());

        assert_eq!(
            forecast
                .coverage_id("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND", None, None)
                .unwrap(),
            "TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND___2024-11-01T03.00.00Z"
        );
        assert_eq!(
            forecast
                .coverage_id("TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE", None, Some("PT1H"))
                .unwrap(),
            "TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE___2024-11-01T03.00.00Z_PT1H"
        );
        assert!(matches!(
            forecast.coverage_id("UNKNOWN", None, None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn get_coverage_walks_the_requested_axes() {
        let dir = tempfile::tempdir().unwrap();
        let mut responses = vec![RawResponse::new(200, CAPS), RawResponse::new(200, DESCRIBE)];
        responses.extend((0..4).map(|_| RawResponse::new(200, "GRIB")));
        let (forecast, transport) = forecast(responses, dir.path());
        let forecast = forecast.with_decoder(grib_decoder);

        let table = forecast
            .get_coverage(
                &CoverageRequest::indicator("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND")
                    .heights([2, 10])
                    .forecast_horizons([1, 2])
                    .bbox((45.0, 46.0), (2.0, 3.0)),
            )
            .unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.columns, ["run", "t2m"]);

        let subsets: Vec<Vec<String>> = transport.requests()[2..]
            .iter()
            .map(|r| {
                r.query
                    .iter()
                    .filter(|(k, _)| k == "subset")
                    .map(|(_, v)| v.clone())
                    .collect()
            })
            .collect();
        assert_eq!(subsets[0][..2], ["height(2)", "time(3600)"]);
        assert_eq!(subsets[1][..2], ["height(10)", "time(3600)"]);
        assert_eq!(subsets[2][..2], ["height(2)", "time(7200)"]);
        assert_eq!(subsets[3][..2], ["height(10)", "time(7200)"]);

        // downloaded files are gone
        let coverage_dir = forecast
            .cache_dir()
            .join("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND___2024-11-01T03.00.00Z");
        assert_eq!(fs::read_dir(coverage_dir).unwrap().count(), 0);
    }

    #[test]
    fn ragged_decoder_rows_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, _) = forecast(
            vec![RawResponse::new(200, DESCRIBE), RawResponse::new(200, "GRIB")],
            dir.path(),
        );
        let forecast = forecast.with_decoder(|_: &Path, _: FileFormat| -> anyhow::Result<Table> {
            Ok(Table {
                columns: vec!["time".into(), "valid_time".into(), "t2m".into()],
                rows: vec![vec![json!("2024-11-01T03:00:00")]],
            })
        });

        let table = forecast
            .get_coverage(&CoverageRequest::coverage_id(
                "TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND___2024-11-01T03.00.00Z",
            ))
            .unwrap();
        assert_eq!(table.columns, ["run", "t2m"]);
        assert_eq!(table.rows, vec![vec![json!("2024-11-01T03:00:00"), serde_json::Value::Null]]);
    }

    #[test]
    fn get_coverage_rejects_unknown_heights_before_downloading() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, transport) = forecast(vec![RawResponse::new(200, DESCRIBE)], dir.path());
        let forecast = forecast.with_decoder(grib_decoder);

        let err = forecast
            .get_coverage(&CoverageRequest::coverage_id("X___2024-11-01T03.00.00Z").heights([5]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(transport.count(Method::Get), 1);
    }

    #[test]
    fn exactly_one_of_indicator_and_coverage_id() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, transport) = forecast(vec![], dir.path());

        let both = CoverageRequest {
            indicator: Some("A".into()),
            coverage_id: Some("A___x".into()),
            ..CoverageRequest::default()
        };
        assert!(matches!(forecast.get_coverage(&both), Err(Error::Validation(_))));
        assert!(matches!(
            forecast.get_coverage(&CoverageRequest::default()),
            Err(Error::Validation(_))
        ));
        assert_eq!(transport.requests().len(), 0);
    }

    #[test]
    fn coverage_file_reuses_existing_download() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, transport) = forecast(vec![RawResponse::new(200, "GRIB")], dir.path());
        let query = CoverageQuery::new("X___2024-11-01T03.00.00Z").height(Some(2));

        let path = forecast.coverage_file(&query, None).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"GRIB");
        assert!(path.ends_with("X___2024-11-01T03.00.00Z/2m_0Z_41.33356-51.0889_-5.1413-9.5602.grib"));
        forecast.coverage_file(&query, None).unwrap();
        assert_eq!(transport.count(Method::Get), 1);
    }

    #[test]
    fn fetch_point_needs_a_decoder() {
        let dir = tempfile::tempdir().unwrap();
        let (forecast, transport) = forecast(vec![], dir.path());
        let err = forecast.fetch_point(&CoverageQuery::new("X")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert_eq!(transport.requests().len(), 0);
    }

    #[test]
    fn piaf_goes_to_the_pro_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(ScriptedTransport::new([RawResponse::new(200, CAPS)]));
        let client = Client::from_config(ClientConfig::with_api_key("k"))
            .unwrap()
            .with_transport(Arc::clone(&transport));
        let piaf = Forecast::new(Arc::new(client), ForecastModel::Piaf)
            .unwrap()
            .with_cache_dir(dir.path());

        piaf.capabilities().unwrap();
        assert!(transport.requests()[0].url.starts_with(
            "https://api.meteofrance.fr/pro/piaf/1.0/wcs/MF-NWP-HIGHRES-PIAF-001-FRANCE-WCS/"
        ));
    }
}
