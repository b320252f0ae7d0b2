//! # Event Record
//!
//! One seismic event as reported upstream. Identity is the `id` alone: two
//! records with the same id are the same event, whatever their other fields
//! say. Ordering is newest-first by the physical occurrence time, with the
//! id as a deterministic tie-break.

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// An immutable seismic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawEventRecord")]
pub struct EventRecord {
    /// Upstream-assigned identifier, unique across the feed.
    pub id: String,
    /// When the earthquake happened (not when we heard about it).
    pub occurred_at: DateTime<FixedOffset>,
    /// Epicenter latitude in degrees.
    pub latitude: f64,
    /// Epicenter longitude in degrees.
    pub longitude: f64,
    /// Reported magnitude.
    pub magnitude: f64,
    /// Hypocenter depth in kilometres.
    pub depth_km: f64,
    /// Human readable location, e.g. "12 km al SUR de PINOTEPA NACIONAL, OAX".
    pub place: String,
    /// Which upstream feed reported the event.
    pub source: String,
}

/// Lenient wire shape. Everything is optional so that one bad record can be
/// rejected without failing the batch it arrived in.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEventRecord {
    id: Option<String>,
    occurred_at: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    magnitude: Option<f64>,
    depth_km: Option<f64>,
    place: Option<String>,
    source: Option<String>,
}

impl TryFrom<RawEventRecord> for EventRecord {
    type Error = DecodeError;

    fn try_from(raw: RawEventRecord) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingField("id"))?;
        let stamp = raw.occurred_at.ok_or(DecodeError::MissingField("occurredAt"))?;
        let occurred_at = parse_occurred_at(&stamp).ok_or_else(|| DecodeError::BadTimestamp {
            id: id.clone(),
            value: stamp.clone(),
        })?;

        Ok(EventRecord {
            id,
            occurred_at,
            latitude: raw.latitude.unwrap_or_default(),
            longitude: raw.longitude.unwrap_or_default(),
            magnitude: raw.magnitude.unwrap_or_default(),
            depth_km: raw.depth_km.unwrap_or_default().max(0.0),
            place: raw.place.unwrap_or_default(),
            source: raw.source.unwrap_or_default(),
        })
    }
}

/// RFC 3339 first; offset-less stamps are taken as UTC.
fn parse_occurred_at(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt);
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Decodes a JSON array of events.
///
/// A payload that is not a JSON array of objects fails as a whole. Inside a
/// well-formed array, records without an id or a usable `occurredAt` are
/// logged and skipped, the rest are returned in payload order.
pub fn decode_batch(payload: &str) -> Result<Vec<EventRecord>, DecodeError> {
    let raw: Vec<RawEventRecord> =
        serde_json::from_str(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    Ok(accept_records(raw))
}

/// Same as [`decode_batch`] for an already parsed JSON value.
pub fn decode_batch_value(payload: serde_json::Value) -> Result<Vec<EventRecord>, DecodeError> {
    let raw: Vec<RawEventRecord> =
        serde_json::from_value(payload).map_err(|e| DecodeError::Json(e.to_string()))?;
    Ok(accept_records(raw))
}

fn accept_records(raw: Vec<RawEventRecord>) -> Vec<EventRecord> {
    let total = raw.len();
    let accepted: Vec<EventRecord> = raw
        .into_iter()
        .filter_map(|r| match EventRecord::try_from(r) {
            Ok(record) => Some(record),
            Err(e) => {
                log::warn!("Dropping event record: {}", e);
                None
            }
        })
        .collect();
    if accepted.len() < total {
        log::debug!("Accepted {} of {} event records", accepted.len(), total);
    }
    accepted
}

/// Newest first, then `id` ascending. Total and deterministic.
pub fn newest_first(a: &EventRecord, b: &EventRecord) -> Ordering {
    b.occurred_at
        .cmp(&a.occurred_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Coarse magnitude scale used for colouring and alert wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MagnitudeCategory {
    /// Below 3.0.
    Minor,
    /// 3.0 to 3.9.
    Light,
    /// 4.0 to 4.9.
    Moderate,
    /// 5.0 to 5.9.
    Strong,
    /// 6.0 to 6.9.
    Major,
    /// 7.0 to 7.9.
    Great,
    /// 8.0 and above.
    Epic,
}

impl MagnitudeCategory {
    /// Buckets a magnitude value.
    pub fn from_magnitude(magnitude: f64) -> Self {
        match magnitude {
            m if m < 3.0 => MagnitudeCategory::Minor,
            m if m < 4.0 => MagnitudeCategory::Light,
            m if m < 5.0 => MagnitudeCategory::Moderate,
            m if m < 6.0 => MagnitudeCategory::Strong,
            m if m < 7.0 => MagnitudeCategory::Major,
            m if m < 8.0 => MagnitudeCategory::Great,
            _ => MagnitudeCategory::Epic,
        }
    }

    /// Short label for banners and notifications.
    pub fn label(&self) -> &'static str {
        match self {
            MagnitudeCategory::Minor => "minor",
            MagnitudeCategory::Light => "light",
            MagnitudeCategory::Moderate => "moderate",
            MagnitudeCategory::Strong => "strong",
            MagnitudeCategory::Major => "major",
            MagnitudeCategory::Great => "great",
            MagnitudeCategory::Epic => "epic",
        }
    }
}

impl EventRecord {
    /// The magnitude bucket this event falls into.
    pub fn category(&self) -> MagnitudeCategory {
        MagnitudeCategory::from_magnitude(self.magnitude)
    }

    /// Whether the event should raise an alert at the given threshold.
    pub fn is_alert(&self, threshold: f64) -> bool {
        self.magnitude >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_names_and_offsets() {
        let batch = decode_batch(
            r#"[{"id":"ssn-1","occurredAt":"2024-09-19T13:14:40-06:00","latitude":16.2,
                "longitude":-98.1,"magnitude":5.8,"depthKm":12.0,
                "place":"PINOTEPA NACIONAL, OAX","source":"SSN"}]"#,
        )
        .unwrap();

        assert_eq!(batch.len(), 1);
        let ev = &batch[0];
        assert_eq!(ev.id, "ssn-1");
        assert_eq!(ev.occurred_at.to_rfc3339(), "2024-09-19T13:14:40-06:00");
        assert_eq!(ev.depth_km, 12.0);
        assert_eq!(ev.category(), MagnitudeCategory::Strong);
        assert!(ev.is_alert(5.5));
    }

    #[test]
    fn records_without_identity_or_time_are_skipped() {
        let batch = decode_batch(
            r#"[{"occurredAt":"2024-01-01T00:00:00Z"},
                {"id":"  ","occurredAt":"2024-01-01T00:00:00Z"},
                {"id":"no-time"},
                {"id":"bad-time","occurredAt":"yesterday"},
                {"id":"ok","occurredAt":"2024-01-01T00:00:00"}]"#,
        )
        .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "ok");
        // Offset-less stamps are UTC.
        assert_eq!(batch[0].occurred_at.offset().local_minus_utc(), 0);
    }

    #[test]
    fn non_array_payload_fails_whole() {
        assert!(matches!(decode_batch(r#"{"id":"x"}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode_batch("not json"), Err(DecodeError::Json(_))));
    }

    #[test]
    fn strict_deserialize_reports_missing_field() {
        let err = serde_json::from_str::<EventRecord>(r#"{"occurredAt":"2024-01-01T00:00:00Z"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("missing required field `id`"));
    }

    #[test]
    fn ordering_is_newest_first_with_id_tie_break() {
        let mut batch = decode_batch(
            r#"[{"id":"b","occurredAt":"2024-01-01T00:00:00Z"},
                {"id":"a","occurredAt":"2024-01-01T00:00:00Z"},
                {"id":"c","occurredAt":"2024-01-01T01:00:00+02:00"},
                {"id":"d","occurredAt":"2024-01-02T00:00:00Z"}]"#,
        )
        .unwrap();
        batch.sort_by(newest_first);
        let ids: Vec<&str> = batch.iter().map(|e| e.id.as_str()).collect();
        // "c" is 2023-12-31T23:00Z once its offset is applied.
        assert_eq!(ids, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn magnitude_buckets() {
        assert_eq!(MagnitudeCategory::from_magnitude(2.9), MagnitudeCategory::Minor);
        assert_eq!(MagnitudeCategory::from_magnitude(3.0), MagnitudeCategory::Light);
        assert_eq!(MagnitudeCategory::from_magnitude(7.99), MagnitudeCategory::Great);
        assert_eq!(MagnitudeCategory::from_magnitude(8.2).label(), "epic");
    }
}
