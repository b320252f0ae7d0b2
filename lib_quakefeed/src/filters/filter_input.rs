//! # Filter Input
//!
//! Form-style text fields parsed into a [`FilterSpec`]. Blank fields mean
//! "no criterion". Dates accept `YYYY-MM-DD` and `DD/MM/YYYY` (a whole day),
//! `YYYY-MM-DDTHH:MM[:SS]` (a local wall-clock time) or a full RFC 3339
//! instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::filters::filter_engine::{DateBound, FilterSpec, DEFAULT_PAGE_SIZE};
use crate::quakes::region::Region;

/// Why a form could not be turned into a filter. `field` names the form
/// field in its camelCase wire spelling, or the range (`magnitude`, `depth`,
/// `date`) for inverted bounds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterInputError {
    /// A magnitude or depth field is not a finite number, or a page field is
    /// not a whole number.
    #[error("`{field}` is not a number: `{value}`")]
    BadNumber { field: &'static str, value: String },

    /// A date field matches none of the accepted formats: RFC 3339, local
    /// `YYYY-MM-DDTHH:MM[:SS]`, `YYYY-MM-DD` or `DD/MM/YYYY`.
    #[error("`{field}` is not a date: `{value}`")]
    BadDate { field: &'static str, value: String },

    /// Both bounds of a range are set and the minimum exceeds the maximum.
    /// Date ranges are only compared when both ends are whole days.
    #[error("`{field}` range is inverted: minimum is above maximum")]
    InvertedRange { field: &'static str },

    /// The region matches no catalog entry by full name or abbreviation.
    #[error("unknown region `{0}`")]
    UnknownRegion(String),

    /// A page size of zero was requested.
    #[error("page size must be positive")]
    ZeroPageSize,
}

/// Raw form fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterInput {
    /// Minimum magnitude.
    pub magnitude_min: String,
    /// Maximum magnitude.
    pub magnitude_max: String,
    /// Minimum depth (km).
    pub depth_min: String,
    /// Maximum depth (km).
    pub depth_max: String,
    /// Range start.
    pub date_from: String,
    /// Range end.
    pub date_to: String,
    /// Region abbreviation or name.
    pub region: String,
    /// Zero-based page, blank for the first.
    pub page: String,
    /// Page size, blank for the default.
    pub page_size: String,
}

impl FilterInput {
    /// Parses and validates the form.
    pub fn parse(&self) -> Result<FilterSpec, FilterInputError> {
        let magnitude_min = number("magnitudeMin", &self.magnitude_min)?;
        let magnitude_max = number("magnitudeMax", &self.magnitude_max)?;
        ordered("magnitude", magnitude_min, magnitude_max)?;

        let depth_min = number("depthMin", &self.depth_min)?;
        let depth_max = number("depthMax", &self.depth_max)?;
        ordered("depth", depth_min, depth_max)?;

        let date_from = date("dateFrom", &self.date_from)?;
        let date_to = date("dateTo", &self.date_to)?;
        if let (Some(DateBound::Day(from)), Some(DateBound::Day(to))) = (date_from, date_to) {
            if from > to {
                return Err(FilterInputError::InvertedRange { field: "date" });
            }
        }

        let region = match self.region.trim() {
            "" => None,
            text => Some(
                Region::lookup(text)
                    .ok_or_else(|| FilterInputError::UnknownRegion(text.to_string()))?
                    .full_name()
                    .to_string(),
            ),
        };

        let page = whole("page", &self.page)?.unwrap_or(0);
        let page_size = whole("pageSize", &self.page_size)?.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(FilterInputError::ZeroPageSize);
        }

        Ok(FilterSpec {
            magnitude_min,
            magnitude_max,
            depth_min,
            depth_max,
            date_from,
            date_to,
            region,
            page,
            page_size,
        })
    }
}

fn number(field: &'static str, value: &str) -> Result<Option<f64>, FilterInputError> {
    let text = value.trim();
    if text.is_empty() {
        return Ok(None);
    }
    // Comma decimals come from Spanish-locale keyboards.
    match text.replace(',', ".").parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(FilterInputError::BadNumber { field, value: value.to_string() }),
    }
}

fn whole(field: &'static str, value: &str) -> Result<Option<u32>, FilterInputError> {
    let text = value.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse()
        .map(Some)
        .map_err(|_| FilterInputError::BadNumber { field, value: value.to_string() })
}

fn ordered(field: &'static str, min: Option<f64>, max: Option<f64>) -> Result<(), FilterInputError> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => Err(FilterInputError::InvertedRange { field }),
        _ => Ok(()),
    }
}

fn date(field: &'static str, value: &str) -> Result<Option<DateBound>, FilterInputError> {
    let text = value.trim();
    if text.is_empty() {
        return Ok(None);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Ok(Some(DateBound::Instant(instant)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(local) = NaiveDateTime::parse_from_str(text, fmt) {
            return Ok(Some(DateBound::Local(local)));
        }
    }
    for fmt in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(day) = NaiveDate::parse_from_str(text, fmt) {
            return Ok(Some(DateBound::Day(day)));
        }
    }
    Err(FilterInputError::BadDate { field, value: value.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_form_is_the_empty_filter() {
        let spec = FilterInput::default().parse().unwrap();
        assert_eq!(spec, FilterSpec::empty());
        assert!(!spec.is_active());
    }

    #[test]
    fn fields_parse_into_bounds() {
        let input = FilterInput {
            magnitude_min: " 4,5 ".into(),
            depth_max: "70".into(),
            date_from: "01/09/2024".into(),
            date_to: "2024-09-19T13:14".into(),
            region: "gro".into(),
            page_size: "50".into(),
            ..FilterInput::default()
        };
        let spec = input.parse().unwrap();
        assert_eq!(spec.magnitude_min, Some(4.5));
        assert_eq!(spec.depth_max, Some(70.0));
        assert_eq!(spec.date_from, Some(DateBound::Day(NaiveDate::from_ymd_opt(2024, 9, 1).unwrap())));
        assert!(matches!(spec.date_to, Some(DateBound::Local(_))));
        assert_eq!(spec.region.as_deref(), Some("Guerrero"));
        assert_eq!(spec.page_size, 50);
    }

    #[test]
    fn rejects_bad_values() {
        let bad_number = FilterInput { magnitude_min: "strong".into(), ..FilterInput::default() };
        assert!(matches!(bad_number.parse(), Err(FilterInputError::BadNumber { field: "magnitudeMin", .. })));

        let inverted = FilterInput { depth_min: "100".into(), depth_max: "10".into(), ..FilterInput::default() };
        assert_eq!(inverted.parse(), Err(FilterInputError::InvertedRange { field: "depth" }));

        let dates = FilterInput { date_from: "2024-02-02".into(), date_to: "2024-02-01".into(), ..FilterInput::default() };
        assert_eq!(dates.parse(), Err(FilterInputError::InvertedRange { field: "date" }));

        let bad_date = FilterInput { date_to: "31/02/2024".into(), ..FilterInput::default() };
        assert!(matches!(bad_date.parse(), Err(FilterInputError::BadDate { .. })));

        let region = FilterInput { region: "Atlantis".into(), ..FilterInput::default() };
        assert_eq!(region.parse(), Err(FilterInputError::UnknownRegion("Atlantis".into())));

        let size = FilterInput { page_size: "0".into(), ..FilterInput::default() };
        assert_eq!(size.parse(), Err(FilterInputError::ZeroPageSize));
    }

    #[test]
    fn messages_name_the_field_and_value() {
        let bad_page = FilterInput { page: "2.5".into(), ..FilterInput::default() };
        let err = bad_page.parse().unwrap_err();
        assert_eq!(err, FilterInputError::BadNumber { field: "page", value: "2.5".into() });
        assert_eq!(err.to_string(), "`page` is not a number: `2.5`");

        let magnitude = FilterInput { magnitude_min: "6".into(), magnitude_max: "5".into(), ..FilterInput::default() };
        assert_eq!(
            magnitude.parse().unwrap_err().to_string(),
            "`magnitude` range is inverted: minimum is above maximum"
        );
    }
}
