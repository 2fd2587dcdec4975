use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use meteofrance::{Client, CoverageQuery, Forecast, ForecastModel};

const INDICATOR: &str = "TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND";

fn main() -> Result<()> {
    // RUST_LOG=info shows what the client does.
    pretty_env_logger::init();

    // Configure authentication via env vars or a `.meteofrancerc` file.
    let client = Arc::new(Client::from_env()?);
    let arome = Forecast::new(client, ForecastModel::Arome)?;

    let caps = arome.capabilities()?;
    println!(
        "{} coverages, runs for {}: {:?}",
        caps.len(),
        INDICATOR,
        caps.runs_for(INDICATOR)
    );

    let coverage_id = arome.coverage_id(INDICATOR, None, None)?;
    let axis = arome.get_coverage_description(&coverage_id)?;
    println!("heights {:?}, horizons {:?}", axis.heights, axis.forecast_horizons);

    let query = CoverageQuery::new(coverage_id)
        .height(axis.heights.first().copied())
        .forecast_horizon_hours(axis.forecast_horizons.first().copied().unwrap_or(0));
    let path = arome.coverage_file(&query, Some(Path::new("t2m.grib")))?;
    println!("saved {}", path.display());
    Ok(())
}
