//! Axes of a coverage (forecast horizons, heights, pressures) and validation
//! of the subsets a caller asks for.

use log::info;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AxisDescription {
    /// Hours after the run.
    pub forecast_horizons: Vec<i64>,
    /// Meters above ground.
    pub heights: Vec<i64>,
    /// hPa.
    pub pressures: Vec<i64>,
}

/// Reads the `GeneralGridAxis` elements of a `DescribeCoverage` document.
///
/// Time coefficients come in seconds and are returned in whole hours. Axes the
/// coverage does not have are left empty.
pub fn parse_coverage_description(xml: &str) -> Result<AxisDescription> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut desc = AxisDescription::default();
    let mut buf = Vec::new();
    let mut current: Option<&'static str> = None;
    let mut spanned = String::new();
    let mut coefficients = String::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"GeneralGridAxis" => {
                    spanned.clear();
                    coefficients.clear();
                }
                b"gridAxesSpanned" => current = Some("spanned"),
                b"coefficients" => current = Some("coefficients"),
                _ => {}
            },
            Event::Text(t) => match current {
                Some("spanned") => spanned.push_str(&t.unescape()?),
                Some("coefficients") => coefficients.push_str(&t.unescape()?),
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"gridAxesSpanned" | b"coefficients" => current = None,
                b"GeneralGridAxis" => {
                    let target = match spanned.trim() {
                        "time" => Some(&mut desc.forecast_horizons),
                        "height" => Some(&mut desc.heights),
                        "pressure" => Some(&mut desc.pressures),
                        _ => None,
                    };
                    // first axis of a kind wins
                    if let Some(target) = target.filter(|t| t.is_empty()) {
                        *target = parse_coefficients(&spanned, &coefficients)?;
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    desc.forecast_horizons = desc.forecast_horizons.iter().map(|s| s / 3600).collect();
    Ok(desc)
}

fn parse_coefficients(axis: &str, text: &str) -> Result<Vec<i64>> {
    text.split_whitespace()
        .map(|c| {
            c.parse::<i64>().map_err(|_| {
                Error::Xml(format!("non integer coefficient {:?} on axis {}", c, axis.trim()))
            })
        })
        .collect()
}

/// Checks `requested` against `available`.
///
/// Without a request the first available value is used, or a single `None`
/// ("do not subset on this axis") when the axis does not exist.
pub fn validate_or_default(
    name: &str,
    requested: Option<&[i64]>,
    available: &[i64],
) -> Result<Vec<Option<i64>>> {
    match requested {
        Some(values) if !values.is_empty() => {
            let invalid: Vec<i64> = values
                .iter()
                .filter(|v| !available.contains(v))
                .copied()
                .collect();
            if !invalid.is_empty() {
                return Err(Error::Validation(format!(
                    "{} {:?} are not valid, available {} are {:?}",
                    name, invalid, name, available
                )));
            }
            Ok(values.iter().copied().map(Some).collect())
        }
        _ => {
            let default = available.first().copied();
            match default {
                Some(v) => info!("Using `{}={}`", name, v),
                None => info!("no {} axis, not subsetting on it", name),
            }
            Ok(vec![default])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<wcs:CoverageDescriptions xmlns:wcs="http://www.opengis.net/wcs/2.0" xmlns:gml="http://www.opengis.net/gml/3.2" xmlns:gmlrgrid="http://www.opengis.net/gml/3.3/rgrid">
  <wcs:CoverageDescription>
    <gml:domainSet>
      <gmlrgrid:ReferenceableGridByVectors dimension="4">
        <gmlrgrid:generalGridAxis>
          <gmlrgrid:GeneralGridAxis>
            <gmlrgrid:offsetVector>1 0 0 0</gmlrgrid:offsetVector>
            <gmlrgrid:coefficients>0 3600 7200 10800</gmlrgrid:coefficients>
            <gmlrgrid:gridAxesSpanned>time</gmlrgrid:gridAxesSpanned>
            <gmlrgrid:sequenceRule axisOrder="+1">Linear</gmlrgrid:sequenceRule>
          </gmlrgrid:GeneralGridAxis>
        </gmlrgrid:generalGridAxis>
        <gmlrgrid:generalGridAxis>
          <gmlrgrid:GeneralGridAxis>
            <gmlrgrid:coefficients>2 10 20 35 50 75 100</gmlrgrid:coefficients>
            <gmlrgrid:gridAxesSpanned>height</gmlrgrid:gridAxesSpanned>
          </gmlrgrid:GeneralGridAxis>
        </gmlrgrid:generalGridAxis>
        <gmlrgrid:generalGridAxis>
          <gmlrgrid:GeneralGridAxis>
            <gmlrgrid:coefficients>37.5 37.51</gmlrgrid:coefficients>
            <gmlrgrid:gridAxesSpanned>lat</gmlrgrid:gridAxesSpanned>
          </gmlrgrid:GeneralGridAxis>
        </gmlrgrid:generalGridAxis>
      </gmlrgrid:ReferenceableGridByVectors>
    </gml:domainSet>
  </wcs:CoverageDescription>
</wcs:CoverageDescriptions>"#;

    #[test]
    fn axes_are_read_and_time_is_in_hours() {
        let desc = parse_coverage_description(DESCRIPTION).unwrap();
        assert_eq!(desc.forecast_horizons, vec![0, 1, 2, 3]);
        assert_eq!(desc.heights, vec![2, 10, 20, 35, 50, 75, 100]);
        assert!(desc.pressures.is_empty());
    }

    #[test]
    fn garbage_coefficients_are_an_error() {
        let xml = "<GeneralGridAxis><coefficients>1 two</coefficients><gridAxesSpanned>height</gridAxesSpanned></GeneralGridAxis>";
        assert!(matches!(parse_coverage_description(xml), Err(Error::Xml(_))));
    }

    #[test]
    fn empty_request_takes_first_available() {
        assert_eq!(
            validate_or_default("heights", Some(&[]), &[2, 10, 100]).unwrap(),
            vec![Some(2)]
        );
        assert_eq!(
            validate_or_default("heights", None, &[2, 10, 100]).unwrap(),
            vec![Some(2)]
        );
        assert_eq!(validate_or_default("pressures", None, &[]).unwrap(), vec![None]);
    }

    #[test]
    fn unavailable_values_are_rejected() {
        let err = validate_or_default("heights", Some(&[5]), &[2, 10, 100]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("[2, 10, 100]"));

        assert_eq!(
            validate_or_default("heights", Some(&[10, 2]), &[2, 10, 100]).unwrap(),
            vec![Some(10), Some(2)]
        );
    }
}
