//! # Filter Engine
//!
//! Turns user-facing filter criteria into the query the events service
//! understands. Criteria are expressed in the user's timezone; the query is
//! always UTC.
//!
//! Local times that fall in a DST gap move forward to the first instant that
//! exists. Ambiguous local times (the repeated hour) resolve to the earliest
//! instant for a lower bound and the latest for an upper bound, so a range
//! never shrinks.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, SecondsFormat,
    TimeZone, Timelike, Utc,
};
use serde::{Deserialize, Serialize, Serializer};

/// Default page size for fetches.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One end of a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    /// A whole calendar day in the filter timezone.
    Day(NaiveDate),
    /// A wall-clock time in the filter timezone.
    Local(NaiveDateTime),
    /// An absolute instant.
    Instant(DateTime<FixedOffset>),
}

/// User filter criteria. Every criterion is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    /// Lowest magnitude, inclusive.
    pub magnitude_min: Option<f64>,
    /// Highest magnitude, inclusive.
    pub magnitude_max: Option<f64>,
    /// Shallowest depth in km, inclusive.
    pub depth_min: Option<f64>,
    /// Deepest depth in km, inclusive.
    pub depth_max: Option<f64>,
    /// Start of the date range.
    pub date_from: Option<DateBound>,
    /// End of the date range.
    pub date_to: Option<DateBound>,
    /// Region name as the events service knows it.
    pub region: Option<String>,
    /// Zero-based page.
    pub page: u32,
    /// Page size, always positive.
    pub page_size: u32,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self::empty()
    }
}

impl FilterSpec {
    /// No criteria, first page of the default size.
    pub fn empty() -> Self {
        Self {
            magnitude_min: None,
            magnitude_max: None,
            depth_min: None,
            depth_max: None,
            date_from: None,
            date_to: None,
            region: None,
            page: 0,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// True iff any criterion is set. A blank region does not count and
    /// pagination never does.
    pub fn is_active(&self) -> bool {
        self.magnitude_min.is_some()
            || self.magnitude_max.is_some()
            || self.depth_min.is_some()
            || self.depth_max.is_some()
            || self.date_from.is_some()
            || self.date_to.is_some()
            || self.region.as_deref().is_some_and(|r| !r.trim().is_empty())
    }

    /// From the first day of the current month through today, both in `zone`.
    pub fn current_month<Z: TimeZone>(zone: &Z, now: DateTime<Utc>) -> Self {
        let today = now.with_timezone(zone).date_naive();
        let first = today.with_day(1).unwrap_or(today);
        Self {
            date_from: Some(DateBound::Day(first)),
            date_to: Some(DateBound::Day(today)),
            ..Self::empty()
        }
    }
}

/// Server-ready form of a [`FilterSpec`]. Serialized as camelCase JSON with
/// absent criteria omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerQuery {
    /// Lowest magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude_min: Option<f64>,
    /// Highest magnitude.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude_max: Option<f64>,
    /// Shallowest depth in km.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_min: Option<f64>,
    /// Deepest depth in km.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_max: Option<f64>,
    /// UTC lower bound, millisecond precision.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "utc_millis")]
    pub date_from: Option<DateTime<Utc>>,
    /// UTC upper bound, millisecond precision.
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "utc_millis")]
    pub date_to: Option<DateTime<Utc>>,
    /// Trimmed, non-blank region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Zero-based page.
    pub page: u32,
    /// Page size.
    pub size: u32,
}

fn utc_millis<S: Serializer>(value: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(dt) => s.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        None => s.serialize_none(),
    }
}

impl ServerQuery {
    /// Whether any criterion beyond pagination is present.
    pub fn is_filtered(&self) -> bool {
        self.magnitude_min.is_some()
            || self.magnitude_max.is_some()
            || self.depth_min.is_some()
            || self.depth_max.is_some()
            || self.date_from.is_some()
            || self.date_to.is_some()
            || self.region.is_some()
    }
}

/// Which end of a range a bound sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    End,
}

/// # Normalize
///
/// Resolves every bound to a UTC instant in `zone`. Never fails.
pub fn normalize<Z: TimeZone>(spec: &FilterSpec, zone: &Z) -> ServerQuery {
    ServerQuery {
        magnitude_min: spec.magnitude_min,
        magnitude_max: spec.magnitude_max,
        depth_min: spec.depth_min,
        depth_max: spec.depth_max,
        date_from: spec.date_from.map(|b| resolve_bound(b, zone, Edge::Start)),
        date_to: spec.date_to.map(|b| resolve_bound(b, zone, Edge::End)),
        region: spec
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        page: spec.page,
        size: spec.page_size.max(1),
    }
}

fn resolve_bound<Z: TimeZone>(bound: DateBound, zone: &Z, edge: Edge) -> DateTime<Utc> {
    match bound {
        DateBound::Instant(dt) => dt.with_timezone(&Utc),
        DateBound::Local(naive) => resolve_local(naive, zone, edge),
        DateBound::Day(day) => {
            let naive = match edge {
                Edge::Start => day.and_hms_milli_opt(0, 0, 0, 0),
                Edge::End => day.and_hms_milli_opt(23, 59, 59, 999),
            };
            // Both literals are valid times of day.
            resolve_local(naive.unwrap_or_default(), zone, edge)
        }
    }
}

fn resolve_local<Z: TimeZone>(naive: NaiveDateTime, zone: &Z, edge: Edge) -> DateTime<Utc> {
    match zone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, latest) => match edge {
            Edge::Start => earliest.with_timezone(&Utc),
            Edge::End => latest.with_timezone(&Utc),
        },
        LocalResult::None => first_after_gap(naive, zone),
    }
}

/// Walks forward minute by minute to the end of a DST gap. Gaps are whole
/// minutes in every tz database zone.
fn first_after_gap<Z: TimeZone>(naive: NaiveDateTime, zone: &Z) -> DateTime<Utc> {
    let start = naive.with_second(0).and_then(|n| n.with_nanosecond(0)).unwrap_or(naive);
    for step in 1..=(24 * 60) {
        let candidate = start + Duration::minutes(step);
        if let Some(dt) = zone.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
    }
    log::warn!("No valid local time found after {}; reading it as UTC", naive);
    naive.and_utc()
}
