//! Numerical weather prediction models served over WCS.

use std::fmt;

use crate::capabilities::IndicatorCatalogue;
use crate::error::{Error, Result};

/// Base URL of the subscription ("pro") gateway, used by PIAF.
pub const PRO_BASE_URL: &str = "https://api.meteofrance.fr/pro/";

/// Version segment of every WCS path.
pub const WCS_API_VERSION: &str = "1.0";

pub const AROME_TERRITORIES: &[&str] = &["FRANCE", "NCALED", "INDIEN", "POLYN", "GUYANE", "ANTIL"];

pub const AROME_INSTANT_INDICATORS: &[&str] = &[
    "GEOMETRIC_HEIGHT__GROUND_OR_WATER_SURFACE",
    "BRIGHTNESS_TEMPERATURE__GROUND_OR_WATER_SURFACE",
    "CONVECTIVE_AVAILABLE_POTENTIAL_ENERGY__GROUND_OR_WATER_SURFACE",
    "WIND_SPEED_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "WIND_SPEED__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "RELATIVE_HUMIDITY__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "LOW_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "HIGH_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "MEDIUM_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "PRESSURE__GROUND_OR_WATER_SURFACE",
    "TOTAL_PRECIPITATION_RATE__GROUND_OR_WATER_SURFACE",
    "TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "U_COMPONENT_OF_WIND_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "U_COMPONENT_OF_WIND__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "V_COMPONENT_OF_WIND_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "V_COMPONENT_OF_WIND__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
];

pub const AROME_OTHER_INDICATORS: &[&str] = &[
    "TOTAL_WATER_PRECIPITATION__GROUND_OR_WATER_SURFACE",
    "TOTAL_SNOW_PRECIPITATION__GROUND_OR_WATER_SURFACE",
    "TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE",
];

pub const ARPEGE_TERRITORIES: &[&str] = &["EUROPE", "GLOBE", "ATOURX", "EURAT"];

pub const ARPEGE_INSTANT_INDICATORS: &[&str] = &[
    "GEOMETRIC_HEIGHT__GROUND_OR_WATER_SURFACE",
    "BRIGHTNESS_TEMPERATURE__GROUND_OR_WATER_SURFACE",
    "CONVECTIVE_AVAILABLE_POTENTIAL_ENERGY__GROUND_OR_WATER_SURFACE",
    "SPECIFIC_CLOUD_ICE_WATER_CONTENT__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "SPECIFIC_CLOUD_ICE_WATER_CONTENT__ISOBARIC_SURFACE",
    "WIND_SPEED_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "WIND_SPEED__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "WIND_SPEED__ISOBARIC_SURFACE",
    "DOWNWARD_SHORT_WAVE_RADIATION_FLUX__GROUND_OR_WATER_SURFACE",
    "SHORT_WAVE_RADIATION_FLUX__GROUND_OR_WATER_SURFACE",
    "RELATIVE_HUMIDITY__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "RELATIVE_HUMIDITY__ISOBARIC_SURFACE",
    "PLANETARY_BOUNDARY_LAYER_HEIGHT__GROUND_OR_WATER_SURFACE",
    "LOW_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "HIGH_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "MEDIUM_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "PRESSURE__GROUND_OR_WATER_SURFACE",
    "PRESSURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "PRESSURE__MEAN_SEA_LEVEL",
    "ABSOLUTE_VORTICITY__ISOBARIC_SURFACE",
    "DEW_POINT_TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "DEW_POINT_TEMPERATURE__ISOBARIC_SURFACE",
    "TURBULENT_KINETIC_ENERGY__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "TURBULENT_KINETIC_ENERGY__ISOBARIC_SURFACE",
    "MAXIMUM_TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "MINIMUM_TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "PSEUDO_ADIABATIC_POTENTIAL_TEMPERATURE__ISOBARIC_SURFACE",
    "POTENTIAL_VORTICITY__ISOBARIC_SURFACE",
    "TEMPERATURE__GROUND_OR_WATER_SURFACE",
    "TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "TEMPERATURE__ISOBARIC_SURFACE",
    "U_COMPONENT_OF_WIND_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "U_COMPONENT_OF_WIND__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "U_COMPONENT_OF_WIND__ISOBARIC_SURFACE",
    "U_COMPONENT_OF_WIND__POTENTIAL_VORTICITY_SURFACE_1500",
    "U_COMPONENT_OF_WIND__POTENTIAL_VORTICITY_SURFACE_2000",
    "VERTICAL_VELOCITY_PRESSURE__ISOBARIC_SURFACE",
    "V_COMPONENT_OF_WIND_GUST__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "V_COMPONENT_OF_WIND__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND",
    "V_COMPONENT_OF_WIND__ISOBARIC_SURFACE",
    "V_COMPONENT_OF_WIND__POTENTIAL_VORTICITY_SURFACE_1500",
    "V_COMPONENT_OF_WIND__POTENTIAL_VORTICITY_SURFACE_2000",
    "GEOPOTENTIAL__ISOBARIC_SURFACE",
];

pub const ARPEGE_OTHER_INDICATORS: &[&str] = &[
    "TOTAL_WATER_PRECIPITATION__GROUND_OR_WATER_SURFACE",
    "TOTAL_CLOUD_COVER__GROUND_OR_WATER_SURFACE",
    "TOTAL_SNOW_PRECIPITATION__GROUND_OR_WATER_SURFACE",
    "TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE",
];

pub const PIAF_TERRITORIES: &[&str] = AROME_TERRITORIES;

pub const PIAF_OTHER_INDICATORS: &[&str] = &["TOTAL_PRECIPITATION_RATE__GROUND_OR_WATER_SURFACE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForecastModel {
    /// High resolution model over France and the overseas territories.
    Arome,
    /// Global model.
    Arpege,
    /// Precipitation nowcasting.
    Piaf,
}

impl ForecastModel {
    /// Lower case name used in URL paths.
    pub fn name(self) -> &'static str {
        match self {
            ForecastModel::Arome => "arome",
            ForecastModel::Arpege => "arpege",
            ForecastModel::Piaf => "piaf",
        }
    }

    /// Hours between two runs of the model.
    pub fn run_frequency(self) -> u32 {
        match self {
            ForecastModel::Arome => 3,
            ForecastModel::Arpege => 6,
            ForecastModel::Piaf => 0,
        }
    }

    pub fn territories(self) -> &'static [&'static str] {
        match self {
            ForecastModel::Arome => AROME_TERRITORIES,
            ForecastModel::Arpege => ARPEGE_TERRITORIES,
            ForecastModel::Piaf => PIAF_TERRITORIES,
        }
    }

    pub fn default_territory(self) -> &'static str {
        match self {
            ForecastModel::Arome | ForecastModel::Piaf => "FRANCE",
            ForecastModel::Arpege => "EUROPE",
        }
    }

    pub fn instant_indicators(self) -> &'static [&'static str] {
        match self {
            ForecastModel::Arome => AROME_INSTANT_INDICATORS,
            ForecastModel::Arpege => ARPEGE_INSTANT_INDICATORS,
            ForecastModel::Piaf => &[],
        }
    }

    pub fn other_indicators(self) -> &'static [&'static str] {
        match self {
            ForecastModel::Arome => AROME_OTHER_INDICATORS,
            ForecastModel::Arpege => ARPEGE_OTHER_INDICATORS,
            ForecastModel::Piaf => PIAF_OTHER_INDICATORS,
        }
    }

    /// Every indicator of the model, instant ones first.
    pub fn indicators(self) -> Vec<&'static str> {
        self.instant_indicators()
            .iter()
            .chain(self.other_indicators())
            .copied()
            .collect()
    }

    pub fn has_indicator(self, indicator: &str) -> bool {
        self.instant_indicators().contains(&indicator) || self.other_indicators().contains(&indicator)
    }

    pub fn is_instant(self, indicator: &str) -> bool {
        self.instant_indicators().contains(&indicator)
    }

    pub fn base_entry_point(self) -> &'static str {
        match self {
            ForecastModel::Arome => "wcs/MF-NWP-HIGHRES-AROME",
            ForecastModel::Arpege => "wcs/MF-NWP-GLOBAL-ARPEGE",
            ForecastModel::Piaf => "wcs/MF-NWP-HIGHRES-PIAF",
        }
    }

    /// Gateway the model is published on, when it differs from the client's.
    pub fn base_url_override(self) -> Option<&'static str> {
        match self {
            ForecastModel::Piaf => Some(PRO_BASE_URL),
            _ => None,
        }
    }

    /// Grid resolution used when none is given.
    ///
    /// ARPEGE ties the precision to the territory; the others default to 0.01°.
    pub fn default_precision(self, territory: &str) -> Option<f64> {
        match self {
            ForecastModel::Arome | ForecastModel::Piaf => Some(0.01),
            ForecastModel::Arpege => match territory {
                "EUROPE" | "ATOURX" => Some(0.1),
                "GLOBE" => Some(0.25),
                "EURAT" => Some(0.05),
                _ => None,
            },
        }
    }

    /// Checks that `territory` and `precision` are served by the model.
    pub fn validate(self, territory: &str, precision: f64) -> Result<()> {
        if !self.territories().contains(&territory) {
            return Err(Error::Validation(format!(
                "Parameter `territory` must be in {:?}",
                self.territories()
            )));
        }
        let allowed: Vec<f64> = match self {
            ForecastModel::Arome => vec![0.01, 0.025],
            ForecastModel::Piaf => vec![0.01],
            ForecastModel::Arpege => self.default_precision(territory).into_iter().collect(),
        };
        if !allowed.iter().any(|p| same_precision(*p, precision)) {
            return Err(Error::Validation(format!(
                "Parameter `precision` must be in {:?} for {} territory {}",
                allowed, self, territory
            )));
        }
        Ok(())
    }

    /// `wcs/<BASE>-<PRECISION>-<TERRITORY>-WCS`
    pub fn entry_point(self, territory: &str, precision: f64) -> Result<String> {
        let code = precision_code(precision).ok_or_else(|| {
            Error::Validation(format!("unsupported precision {}", precision))
        })?;
        Ok(format!("{}-{}-{}-WCS", self.base_entry_point(), code, territory))
    }
}

impl IndicatorCatalogue for ForecastModel {
    fn has_indicator(&self, indicator: &str) -> bool {
        ForecastModel::has_indicator(*self, indicator)
    }

    fn is_instant(&self, indicator: &str) -> bool {
        ForecastModel::is_instant(*self, indicator)
    }
}

impl fmt::Display for ForecastModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name().to_uppercase())
    }
}

fn same_precision(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// Grid resolution as it appears in entry point names (0.025 -> "0025").
pub fn precision_code(precision: f64) -> Option<&'static str> {
    [
        (0.25, "025"),
        (0.1, "01"),
        (0.05, "005"),
        (0.01, "001"),
        (0.025, "0025"),
    ]
    .into_iter()
    .find(|(p, _)| same_precision(*p, precision))
    .map(|(_, code)| code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalogue_sizes() {
        assert_eq!(ForecastModel::Arome.indicators().len(), 19);
        assert_eq!(ForecastModel::Arpege.indicators().len(), 47);
        assert_eq!(ForecastModel::Piaf.indicators().len(), 1);
    }

    #[test]
    fn instant_split() {
        let m = ForecastModel::Arome;
        assert!(m.is_instant("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND"));
        assert!(!m.is_instant("TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE"));
        assert!(m.has_indicator("TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE"));
        assert!(!m.has_indicator("UNKNOWN"));
    }

    #[test]
    fn entry_points() {
        assert_eq!(
            ForecastModel::Arome.entry_point("FRANCE", 0.01).unwrap(),
            "wcs/MF-NWP-HIGHRES-AROME-001-FRANCE-WCS"
        );
        assert_eq!(
            ForecastModel::Arpege.entry_point("EUROPE", 0.1).unwrap(),
            "wcs/MF-NWP-GLOBAL-ARPEGE-01-EUROPE-WCS"
        );
        assert_eq!(
            ForecastModel::Arome.entry_point("ANTIL", 0.025).unwrap(),
            "wcs/MF-NWP-HIGHRES-AROME-0025-ANTIL-WCS"
        );
        assert!(ForecastModel::Arome.entry_point("FRANCE", 0.3).is_err());
    }

    #[test]
    fn territory_and_precision_validation() {
        assert!(ForecastModel::Arome.validate("FRANCE", 0.025).is_ok());
        assert!(ForecastModel::Arome.validate("FRANCE", 0.1).is_err());
        assert!(ForecastModel::Arome.validate("INVALID", 0.01).is_err());
        assert!(ForecastModel::Arpege.validate("GLOBE", 0.25).is_ok());
        assert!(ForecastModel::Arpege.validate("GLOBE", 0.1).is_err());
        assert!(ForecastModel::Piaf.validate("FRANCE", 0.025).is_err());
        assert_eq!(ForecastModel::Arpege.default_precision("EURAT"), Some(0.05));
    }
}
