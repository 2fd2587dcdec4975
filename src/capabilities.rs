//! WCS capability listing: which coverages (indicator, run, interval) a
//! service currently publishes, and how a caller's query maps onto one.

use std::collections::BTreeSet;

use chrono::NaiveDateTime;
use log::{info, warn};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::error::{Error, Result};

/// Format of the run part of a coverage id, e.g. `2024-11-01T18.00.00Z`.
pub const RUN_FORMAT: &str = "%Y-%m-%dT%H.%M.%SZ";

/// Interval used for aggregated indicators when the caller gives none.
pub const DEFAULT_INTERVAL: &str = "P1D";

const INDICATOR_SEPARATOR: &str = "___";

/// Which indicators exist, and which of them are instantaneous.
pub trait IndicatorCatalogue {
    fn has_indicator(&self, indicator: &str) -> bool;
    fn is_instant(&self, indicator: &str) -> bool;
}

/// Ad-hoc catalogue from two lists.
#[derive(Debug, Clone, Copy)]
pub struct Catalogue<'a> {
    pub instant: &'a [&'a str],
    pub other: &'a [&'a str],
}

impl IndicatorCatalogue for Catalogue<'_> {
    fn has_indicator(&self, indicator: &str) -> bool {
        self.instant.contains(&indicator) || self.other.contains(&indicator)
    }

    fn is_instant(&self, indicator: &str) -> bool {
        self.instant.contains(&indicator)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    pub coverage_id: String,
    pub title: String,
    pub subtype: String,
    pub indicator: String,
    pub run: String,
    /// Aggregation period such as `PT1H` or `P1D`; empty for instant indicators.
    pub interval: String,
}

/// Splits `<INDICATOR>___<RUN>Z[_<INTERVAL>]` into its three parts.
pub fn parse_coverage_id(coverage_id: &str) -> Result<(String, String, String)> {
    let malformed = || Error::MalformedCoverageId(coverage_id.to_string());
    let (indicator, rest) = coverage_id
        .split_once(INDICATOR_SEPARATOR)
        .ok_or_else(malformed)?;
    let (run, interval) = rest.split_once('Z').ok_or_else(malformed)?;
    Ok((
        indicator.to_string(),
        format!("{}Z", run),
        interval.trim_start_matches('_').to_string(),
    ))
}

pub fn compose_coverage_id(indicator: &str, run: &str, interval: Option<&str>) -> String {
    match interval {
        Some(interval) if !interval.is_empty() => {
            format!("{}{}{}_{}", indicator, INDICATOR_SEPARATOR, run, interval)
        }
        _ => format!("{}{}{}", indicator, INDICATOR_SEPARATOR, run),
    }
}

/// Extracts every `CoverageSummary` of a `GetCapabilities` document.
///
/// Summaries whose id cannot be split are logged and skipped.
pub fn parse_capabilities(xml: &str) -> Result<Vec<CapabilityEntry>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        None,
        Id,
        Title,
        Subtype,
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut entries = Vec::new();
    let mut buf = Vec::new();
    let mut in_summary = false;
    let mut field = Field::None;
    let (mut id, mut title, mut subtype) = (String::new(), String::new(), String::new());

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"CoverageSummary" => {
                    in_summary = true;
                    id.clear();
                    title.clear();
                    subtype.clear();
                }
                b"CoverageId" if in_summary => field = Field::Id,
                b"Title" if in_summary => field = Field::Title,
                b"CoverageSubtype" if in_summary => field = Field::Subtype,
                _ => {}
            },
            Event::Text(t) if field != Field::None => {
                let text = t.unescape()?;
                match field {
                    Field::Id => id.push_str(&text),
                    Field::Title => title.push_str(&text),
                    Field::Subtype => subtype.push_str(&text),
                    Field::None => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"CoverageSummary" => {
                    in_summary = false;
                    match parse_coverage_id(&id) {
                        Ok((indicator, run, interval)) => entries.push(CapabilityEntry {
                            coverage_id: id.clone(),
                            title: title.clone(),
                            subtype: subtype.clone(),
                            indicator,
                            run,
                            interval,
                        }),
                        Err(_) => warn!("skipping malformed coverage id {:?}", id),
                    }
                }
                b"CoverageId" | b"Title" | b"CoverageSubtype" => field = Field::None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(entries)
}

/// Parsed capability listing of one WCS service, newest runs first.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    entries: Vec<CapabilityEntry>,
}

impl Capabilities {
    pub fn parse(xml: &str) -> Result<Self> {
        Ok(Self::from_entries(parse_capabilities(xml)?))
    }

    pub fn from_entries(entries: Vec<CapabilityEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn indicators(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.indicator.as_str()).collect()
    }

    /// Runs published for `indicator`, in listing order, without duplicates.
    pub fn runs_for(&self, indicator: &str) -> Vec<&str> {
        let mut runs: Vec<&str> = Vec::new();
        for e in self.entries.iter().filter(|e| e.indicator == indicator) {
            if !runs.contains(&e.run.as_str()) {
                runs.push(&e.run);
            }
        }
        runs
    }

    pub fn intervals_for(&self, indicator: &str, run: &str) -> Vec<&str> {
        let mut intervals: Vec<&str> = Vec::new();
        for e in self
            .entries
            .iter()
            .filter(|e| e.indicator == indicator && e.run == run)
        {
            if !intervals.contains(&e.interval.as_str()) {
                intervals.push(&e.interval);
            }
        }
        intervals
    }

    /// Most recent run across all indicators.
    pub fn latest_run(&self) -> Option<&str> {
        self.entries.iter().map(|e| e.run.as_str()).max()
    }

    pub(crate) fn log_summary(&self, service: &str) {
        info!(
            "{}: {} coverages, {} indicators, {} runs, latest run {}",
            service,
            self.len(),
            self.indicators().len(),
            self.entries
                .iter()
                .map(|e| e.run.as_str())
                .collect::<BTreeSet<_>>()
                .len(),
            self.latest_run().unwrap_or("-"),
        );
    }

    /// Maps `(indicator, run, interval)` onto a published coverage id.
    ///
    /// A missing run defaults to the newest one listed for the indicator. A
    /// missing interval defaults to `P1D` for aggregated indicators without
    /// checking the listing; a given one must be listed for the run. Instant
    /// indicators take none.
    pub fn resolve(
        &self,
        catalogue: &impl IndicatorCatalogue,
        indicator: &str,
        run: Option<&str>,
        interval: Option<&str>,
    ) -> Result<String> {
        if !catalogue.has_indicator(indicator) {
            return Err(Error::Validation(format!(
                "Unknown `indicator` {}: check the list of available indicators",
                indicator
            )));
        }

        let runs = self.runs_for(indicator);
        let run = match run {
            Some(run) => run,
            None => {
                let first = *runs.first().ok_or_else(|| {
                    Error::Validation(format!("no coverage published for indicator {}", indicator))
                })?;
                info!("Using `run={}`", first);
                first
            }
        };

        if NaiveDateTime::parse_from_str(run, RUN_FORMAT).is_err() {
            return Err(Error::Validation(format!(
                "Wrong format for `run` {:?}: expected YYYY-MM-DDTHH.MM.SSZ",
                run
            )));
        }
        if !runs.contains(&run) {
            return Err(Error::Validation(format!(
                "Unknown `run` {} for indicator {}: valid runs are {:?}",
                run, indicator, runs
            )));
        }

        let interval = if catalogue.is_instant(indicator) {
            if let Some(interval) = interval {
                return Err(Error::Validation(format!(
                    "indicator {} is instant and takes no `interval` (got {})",
                    indicator, interval
                )));
            }
            None
        } else {
            match interval {
                Some(interval) => {
                    let intervals = self.intervals_for(indicator, run);
                    if !intervals.contains(&interval) {
                        return Err(Error::Validation(format!(
                            "Unknown `interval` {} for indicator {} and run {}: valid intervals are {:?}",
                            interval, indicator, run, intervals
                        )));
                    }
                    Some(interval)
                }
                None => {
                    info!("`interval={}` is selected as default", DEFAULT_INTERVAL);
                    Some(DEFAULT_INTERVAL)
                }
            }
        };

        Ok(compose_coverage_id(indicator, run, interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wcs:Capabilities xmlns:wcs="http://www.opengis.net/wcs/2.0" xmlns:ows="http://www.opengis.net/ows/2.0" version="2.0.1">
  <wcs:Contents>
    <wcs:CoverageSummary>
      <ows:Title>A at ground</ows:Title>
      <wcs:CoverageId>A___2024-10-31T00.00.00Z</wcs:CoverageId>
      <wcs:CoverageSubtype>ReferenceableGridCoverage</wcs:CoverageSubtype>
    </wcs:CoverageSummary>
    <wcs:CoverageSummary>
      <ows:Title>B cumulated</ows:Title>
      <wcs:CoverageId>B___2024-11-01T18.00.00Z_P2D</wcs:CoverageId>
      <wcs:CoverageSubtype>ReferenceableGridCoverage</wcs:CoverageSubtype>
    </wcs:CoverageSummary>
  </wcs:Contents>
</wcs:Capabilities>"#;

    const CATALOGUE: Catalogue<'static> = Catalogue {
        instant: &["A"],
        other: &["B"],
    };

    #[test]
    fn resolves_listed_coverage() {
        let caps = Capabilities::parse(LISTING).unwrap();
        assert_eq!(caps.len(), 2);
        assert_eq!(caps.entries()[0].title, "A at ground");
        assert_eq!(
            caps.resolve(&CATALOGUE, "B", Some("2024-11-01T18.00.00Z"), Some("P2D"))
                .unwrap(),
            "B___2024-11-01T18.00.00Z_P2D"
        );
        assert_eq!(
            caps.resolve(&CATALOGUE, "A", None, None).unwrap(),
            "A___2024-10-31T00.00.00Z"
        );
    }

    #[test]
    fn unknown_indicator_is_rejected() {
        let caps = Capabilities::parse(LISTING).unwrap();
        for (run, interval) in [(None, None), (Some("2024-10-31T00.00.00Z"), Some("P1D"))] {
            let err = caps.resolve(&CATALOGUE, "UNKNOWN", run, interval).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
        }
    }

    #[test]
    fn instant_indicator_takes_no_interval() {
        let caps = Capabilities::parse(LISTING).unwrap();
        let err = caps.resolve(&CATALOGUE, "A", None, Some("P1D")).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn aggregated_indicator_defaults_to_one_day() {
        let caps = Capabilities::from_entries(vec![CapabilityEntry {
            coverage_id: "B___2024-11-01T18.00.00Z_P1D".into(),
            title: String::new(),
            subtype: String::new(),
            indicator: "B".into(),
            run: "2024-11-01T18.00.00Z".into(),
            interval: "P1D".into(),
        }]);
        let id = caps.resolve(&CATALOGUE, "B", None, None).unwrap();
        assert!(id.ends_with("_P1D"));

    }

    #[test]
    fn default_interval_is_not_checked_against_the_listing() {
        let caps = Capabilities::from_entries(vec![CapabilityEntry {
            coverage_id: "B___2024-11-01T18.00.00Z_PT1H".into(),
            title: String::new(),
            subtype: String::new(),
            indicator: "B".into(),
            run: "2024-11-01T18.00.00Z".into(),
            interval: "PT1H".into(),
        }]);
        assert_eq!(
            caps.resolve(&CATALOGUE, "B", None, None).unwrap(),
            "B___2024-11-01T18.00.00Z_P1D"
        );
        assert!(matches!(
            caps.resolve(&CATALOGUE, "B", None, Some("P1D")),
            Err(Error::Validation(_))
        ));
        assert_eq!(
            caps.resolve(&CATALOGUE, "B", None, Some("PT1H")).unwrap(),
            "B___2024-11-01T18.00.00Z_PT1H"
        );
    }

    #[test]
    fn run_is_checked_for_format_and_presence() {
        let caps = Capabilities::parse(LISTING).unwrap();
        let err = caps
            .resolve(&CATALOGUE, "A", Some("2024-10-31 00:00"), None)
            .unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DDTHH.MM.SSZ"));

        let err = caps
            .resolve(&CATALOGUE, "A", Some("2024-10-30T00.00.00Z"), None)
            .unwrap_err();
        assert!(err.to_string().contains("2024-10-31T00.00.00Z"));
    }

    #[test]
    fn coverage_id_round_trip() {
        let cases = [
            ("TEMPERATURE__SPECIFIC_HEIGHT_LEVEL_ABOVE_GROUND", "2024-10-31T00.00.00Z", ""),
            ("TOTAL_PRECIPITATION__GROUND_OR_WATER_SURFACE", "2024-11-01T18.00.00Z", "PT1H"),
            ("B", "2024-11-01T18.00.00Z", "P2D"),
        ];
        for (indicator, run, interval) in cases {
            let id = compose_coverage_id(indicator, run, Some(interval));
            let parsed = parse_coverage_id(&id).unwrap();
            assert_eq!(parsed, (indicator.into(), run.into(), interval.into()));
        }
        assert_eq!(compose_coverage_id("A", "r", None), "A___r");
    }

    #[test]
    fn malformed_ids_never_panic() {
        for id in ["", "A", "A__2024Z", "A___2024", "___", "Z___Z", "A___Z_", "é___ü", "A______Z"] {
            match parse_coverage_id(id) {
                Ok((_, run, _)) => assert!(run.ends_with('Z')),
                Err(e) => assert!(matches!(e, Error::MalformedCoverageId(_))),
            }
        }
        assert!(parse_coverage_id("A___2024").is_err());
        assert_eq!(
            parse_coverage_id("Z___Z").unwrap(),
            ("Z".to_string(), "Z".to_string(), String::new())
        );
    }

    #[test]
    fn malformed_summaries_are_skipped() {
        let xml = r#"<Capabilities><Contents>
            <CoverageSummary><CoverageId>garbage</CoverageId></CoverageSummary>
            <CoverageSummary><CoverageId>A___2024-10-31T00.00.00Z</CoverageId></CoverageSummary>
        </Contents></Capabilities>"#;
        let entries = parse_capabilities(xml).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].interval, "");
        assert!(parse_capabilities("<a><b></a>").is_err());
    }
}
