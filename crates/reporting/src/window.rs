//! Date windows for rollups and funnel analysis.
//!
//! Daily stats reject malformed dates (`parse_strict`); funnel analysis falls
//! back to the default window (`parse_lenient`).

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use pulse_core::{EventFilter, PulseError, PulseResult};
use tracing::debug;

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DEFAULT_LOOKBACK_DAYS: i64 = 30;

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Last 30 days through `now`.
    pub fn default_window(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::days(DEFAULT_LOOKBACK_DAYS),
            end: now,
        }
    }

    /// Parse `YYYY-MM-DD` bounds; any malformed value is an input error.
    pub fn parse_strict(
        start: Option<&str>,
        end: Option<&str>,
        now: DateTime<Utc>,
    ) -> PulseResult<Self> {
        let mut range = Self::default_window(now);
        if let Some(raw) = present(start) {
            range.start = start_of_day(raw)
                .ok_or_else(|| PulseError::invalid("Invalid start_date format"))?;
        }
        if let Some(raw) = present(end) {
            range.end =
                end_of_day(raw).ok_or_else(|| PulseError::invalid("Invalid end_date format"))?;
        }
        Ok(range)
    }

    /// Parse `YYYY-MM-DD` bounds; a malformed value keeps that bound's default.
    pub fn parse_lenient(start: Option<&str>, end: Option<&str>, now: DateTime<Utc>) -> Self {
        let mut range = Self::default_window(now);
        if let Some(raw) = present(start) {
            match start_of_day(raw) {
                Some(ts) => range.start = ts,
                None => debug!(start_date = raw, "Ignoring malformed start_date"),
            }
        }
        if let Some(raw) = present(end) {
            match end_of_day(raw) {
                Some(ts) => range.end = ts,
                None => debug!(end_date = raw, "Ignoring malformed end_date"),
            }
        }
        range
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// `YYYY-MM-DD to YYYY-MM-DD`
    pub fn label(&self) -> String {
        format!(
            "{} to {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }

    pub fn filter(&self) -> EventFilter {
        EventFilter::between(self.start, self.end)
    }
}

fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

fn start_of_day(raw: &str) -> Option<DateTime<Utc>> {
    parse_date(raw).map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

/// An end date covers its whole calendar day.
fn end_of_day(raw: &str) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)?;
    parse_date(raw).map(|date| date.and_time(time).and_utc())
}
