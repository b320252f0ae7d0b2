//! # Seismic Report
//!
//! Aggregate statistics over a period: totals, magnitude and depth ranges,
//! distributions and the strongest events. The events service computes them
//! for the fixed periods; [`SeismicReport::summarize`] computes the same
//! figures locally over any slice of events.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::quakes::event_record::EventRecord;
use crate::quakes::region::Region;

/// Number of entries in `strongest_events`.
pub const STRONGEST_LIMIT: usize = 10;
/// Number of regions kept in `by_region`.
pub const REGION_LIMIT: usize = 15;

/// The fixed reporting periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    /// Last three months.
    Quarterly,
    /// Last six months.
    Semiannual,
    /// Last twelve months.
    Annual,
}

impl ReportKind {
    /// All kinds, shortest period first.
    pub const ALL: [ReportKind; 3] = [ReportKind::Quarterly, ReportKind::Semiannual, ReportKind::Annual];

    /// Path segment under the reports endpoint.
    pub fn path_segment(&self) -> &'static str {
        match self {
            ReportKind::Quarterly => "quarterly",
            ReportKind::Semiannual => "semiannual",
            ReportKind::Annual => "annual",
        }
    }

    /// Length of the period in months.
    pub fn months(&self) -> u32 {
        match self {
            ReportKind::Quarterly => 3,
            ReportKind::Semiannual => 6,
            ReportKind::Annual => 12,
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// One line of the strongest-events table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    /// Local date, `YYYY-MM-DD`.
    pub date: String,
    /// Local time, `HH:MM:SS`.
    pub time: String,
    #[allow(missing_docs)]
    pub magnitude: f64,
    /// Place string as reported.
    pub location: String,
    /// Depth in km.
    pub depth: f64,
}

/// Aggregate report over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeismicReport {
    /// Report label (`QUARTERLY`, `CUSTOM`, ...).
    pub report_kind: String,
    /// Period start, local wall-clock.
    pub period_start: NaiveDateTime,
    /// Period end, local wall-clock.
    pub period_end: NaiveDateTime,
    /// When the report was computed, local wall-clock.
    pub generated_at: NaiveDateTime,
    /// Number of events in the period.
    pub total_events: u64,
    #[allow(missing_docs)]
    pub magnitude_avg: f64,
    #[allow(missing_docs)]
    pub magnitude_max: f64,
    #[allow(missing_docs)]
    pub magnitude_min: f64,
    #[allow(missing_docs)]
    pub depth_avg: f64,
    #[allow(missing_docs)]
    pub depth_max: f64,
    #[allow(missing_docs)]
    pub depth_min: f64,
    /// Counts per magnitude bucket (`"< 3.0"`, `"3.0 - 3.9"`, ... `">= 7.0"`).
    #[serde(default)]
    pub by_magnitude: BTreeMap<String, u64>,
    /// Counts per region abbreviation, busiest first on the server side.
    #[serde(default)]
    pub by_region: BTreeMap<String, u64>,
    /// Counts per `YYYY-MM`.
    #[serde(default)]
    pub by_month: BTreeMap<String, u64>,
    /// Counts per `YYYY-MM-DD`.
    #[serde(default)]
    pub by_day: BTreeMap<String, u64>,
    /// Strongest events, strongest first.
    #[serde(default)]
    pub strongest_events: Vec<EventSummary>,
}

fn magnitude_bucket(magnitude: f64) -> &'static str {
    match magnitude {
        m if m < 3.0 => "< 3.0",
        m if m < 4.0 => "3.0 - 3.9",
        m if m < 5.0 => "4.0 - 4.9",
        m if m < 6.0 => "5.0 - 5.9",
        m if m < 7.0 => "6.0 - 6.9",
        _ => ">= 7.0",
    }
}

#[derive(Default)]
struct Stats {
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl Stats {
    fn add(&mut self, v: f64) {
        self.sum += v;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn avg(&self, n: usize) -> f64 {
        if n == 0 { 0.0 } else { self.sum / n as f64 }
    }
}

impl SeismicReport {
    /// Computes a report over `events` that occurred between `start` and
    /// `end` (inclusive, both UTC). Dates are bucketed in `zone`.
    pub fn summarize<Z: TimeZone>(
        label: &str,
        events: &[EventRecord],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        zone: &Z,
        now: DateTime<Utc>,
    ) -> Self
    where
        Z::Offset: fmt::Display,
    {
        let in_period: Vec<&EventRecord> = events
            .iter()
            .filter(|e| {
                let at = e.occurred_at.with_timezone(&Utc);
                at >= start && at <= end
            })
            .collect();

        let mut magnitude = Stats::default();
        let mut depth = Stats::default();
        let mut by_magnitude = BTreeMap::new();
        let mut regions: HashMap<String, u64> = HashMap::new();
        let mut by_month = BTreeMap::new();
        let mut by_day = BTreeMap::new();

        for e in &in_period {
            magnitude.add(e.magnitude);
            depth.add(e.depth_km);
            *by_magnitude.entry(magnitude_bucket(e.magnitude).to_string()).or_insert(0) += 1;

            let region = Region::from_place(&e.place)
                .map(|r| r.abbreviation().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string());
            *regions.entry(region).or_insert(0) += 1;

            let local = e.occurred_at.with_timezone(zone);
            *by_month.entry(local.format("%Y-%m").to_string()).or_insert(0) += 1;
            *by_day.entry(local.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, u64)> = regions.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let by_region = ranked.into_iter().take(REGION_LIMIT).collect();

        let mut strongest = in_period.clone();
        strongest.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude).then_with(|| a.id.cmp(&b.id)));
        let strongest_events = strongest
            .into_iter()
            .take(STRONGEST_LIMIT)
            .map(|e| {
                let local = e.occurred_at.with_timezone(zone);
                EventSummary {
                    date: local.format("%Y-%m-%d").to_string(),
                    time: local.format("%H:%M:%S").to_string(),
                    magnitude: e.magnitude,
                    location: e.place.clone(),
                    depth: e.depth_km,
                }
            })
            .collect();

        let n = in_period.len();
        SeismicReport {
            report_kind: label.to_string(),
            period_start: start.with_timezone(zone).naive_local(),
            period_end: end.with_timezone(zone).naive_local(),
            generated_at: now.with_timezone(zone).naive_local(),
            total_events: n as u64,
            magnitude_avg: magnitude.avg(n),
            magnitude_max: magnitude.max.unwrap_or_default(),
            magnitude_min: magnitude.min.unwrap_or_default(),
            depth_avg: depth.avg(n),
            depth_max: depth.max.unwrap_or_default(),
            depth_min: depth.min.unwrap_or_default(),
            by_magnitude,
            by_region,
            by_month,
            by_day,
            strongest_events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Mexico_City;

    fn ev(id: &str, at: &str, magnitude: f64, depth: f64, place: &str) -> EventRecord {
        EventRecord {
            id: id.into(),
            occurred_at: DateTime::parse_from_rfc3339(at).unwrap(),
            latitude: 0.0,
            longitude: 0.0,
            magnitude,
            depth_km: depth,
            place: place.into(),
            source: "SSN".into(),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn summarizes_a_period() {
        let events = vec![
            ev("1", "2024-09-01T05:30:00Z", 4.1, 10.0, "20 km al SUR de TECPAN, GRO"),
            ev("2", "2024-09-02T12:00:00Z", 5.6, 30.0, "PINOTEPA NACIONAL, OAX"),
            ev("3", "2024-09-03T12:00:00Z", 2.9, 20.0, "ACAPULCO, GRO"),
            ev("4", "2024-10-05T12:00:00Z", 7.0, 40.0, "Golfo de California"),
        ];
        let report = SeismicReport::summarize(
            "CUSTOM",
            &events,
            utc("2024-09-01T06:00:00Z"),
            utc("2024-12-01T05:59:59Z"),
            &Mexico_City,
            utc("2024-12-01T12:00:00Z"),
        );

        // "1" is August 31st locally and outside the period.
        assert_eq!(report.total_events, 3);
        assert_eq!(report.magnitude_max, 7.0);
        assert_eq!(report.magnitude_min, 2.9);
        assert!((report.depth_avg - 30.0).abs() < 1e-9);
        assert_eq!(report.by_magnitude.get(">= 7.0"), Some(&1));
        assert_eq!(report.by_magnitude.get("< 3.0"), Some(&1));
        assert_eq!(report.by_region.get("GRO"), Some(&1));
        assert_eq!(report.by_region.get("UNKNOWN"), Some(&1));
        assert_eq!(report.by_month.get("2024-09"), Some(&2));
        assert_eq!(report.strongest_events[0].magnitude, 7.0);
        assert_eq!(report.strongest_events[0].date, "2024-10-05");
        assert_eq!(report.period_start.to_string(), "2024-09-01 00:00:00");
    }

    #[test]
    fn empty_period_is_all_zero() {
        let report = SeismicReport::summarize(
            "QUARTERLY",
            &[],
            utc("2024-09-01T00:00:00Z"),
            utc("2024-12-01T00:00:00Z"),
            &Utc,
            utc("2024-12-01T00:00:00Z"),
        );
        assert_eq!(report.total_events, 0);
        assert_eq!(report.magnitude_avg, 0.0);
        assert!(report.strongest_events.is_empty());
    }

    #[test]
    fn decodes_service_json() {
        let report: SeismicReport = serde_json::from_str(
            r#"{"reportKind":"QUARTERLY","periodStart":"2024-09-12T00:00:00","periodEnd":"2024-12-12T23:59:59",
                "generatedAt":"2024-12-12T21:30:00","totalEvents":2,"magnitudeAvg":4.0,"magnitudeMax":4.5,
                "magnitudeMin":3.5,"depthAvg":12.0,"depthMax":20.0,"depthMin":4.0,
                "byMagnitude":{"3.0 - 3.9":1,"4.0 - 4.9":1},
                "strongestEvents":[{"date":"2024-10-01","time":"08:00:00","magnitude":4.5,"location":"OAX","depth":20.0}]}"#,
        )
        .unwrap();
        assert_eq!(report.total_events, 2);
        assert!(report.by_day.is_empty());
        assert_eq!(report.strongest_events.len(), 1);
    }
}
