//! Parses the duration/timestamp field of an SHDR line (§4.2).

use jiff::{Span, Timestamp};
use log::warn;

/// Per-source configuration and running state for timestamp extraction.
/// One instance is kept per adapter session: `relativeTime` captures its
/// base/offset on the first observation seen by that instance.
#[derive(Debug, Default)]
pub struct TimestampExtractor {
    ignore_timestamps: bool,
    relative_time: bool,
    base: Option<Timestamp>,
    first_offset: Option<f64>,
}

impl TimestampExtractor {
    pub fn new(ignore_timestamps: bool, relative_time: bool) -> Self {
        Self { ignore_timestamps, relative_time, base: None, first_offset: None }
    }

    /// Splits off an optional `@<duration>` suffix and returns the leftover
    /// timestamp field.
    fn split_duration(field: &str) -> (&str, Option<f64>) {
        match field.split_once('@') {
            Some((ts, duration)) => match duration.trim().parse::<f64>() {
                Ok(d) => (ts, Some(d)),
                Err(_) => (ts, None),
            },
            None => (field, None),
        }
    }

    /// Extracts `(timestamp, duration)` from the first SHDR field. Always
    /// succeeds: unparseable or empty input falls back to "now" and logs.
    pub fn extract(&mut self, field: &str) -> (Timestamp, Option<f64>) {
        let (ts_field, duration) = Self::split_duration(field.trim());

        if ts_field.is_empty() {
            if !self.ignore_timestamps {
                warn!("empty timestamp field, using current time");
            }
            return (Timestamp::now(), duration);
        }

        if self.ignore_timestamps {
            return (Timestamp::now(), duration);
        }

        if self.relative_time {
            return (self.extract_relative(ts_field), duration);
        }

        match parse_absolute(ts_field) {
            Some(ts) => (ts, duration),
            None => match ts_field.parse::<f64>() {
                Ok(offset) => (self.extract_relative_with_offset(offset), duration),
                Err(_) => {
                    warn!("could not parse timestamp '{ts_field}', using current time");
                    (Timestamp::now(), duration)
                }
            },
        }
    }

    fn extract_relative(&mut self, field: &str) -> Timestamp {
        if let Some(ts) = parse_absolute(field) {
            return self.rebase_absolute(ts);
        }
        match field.parse::<f64>() {
            Ok(offset) => self.extract_relative_with_offset(offset),
            Err(_) => {
                warn!("could not parse relative timestamp '{field}', using current time");
                Timestamp::now()
            }
        }
    }

    fn rebase_absolute(&mut self, ts: Timestamp) -> Timestamp {
        match self.base {
            None => {
                let now = Timestamp::now();
                self.base = Some(now);
                self.first_offset = Some(ts.as_microsecond() as f64);
                now
            }
            Some(base) => {
                let offset_micros = ts.as_microsecond();
                let first_micros = self.first_offset.unwrap_or(offset_micros as f64) as i64;
                base.checked_add(Span::new().microseconds(offset_micros - first_micros))
                    .unwrap_or(base)
            }
        }
    }

    fn extract_relative_with_offset(&mut self, offset: f64) -> Timestamp {
        match (self.base, self.first_offset) {
            (Some(base), Some(first)) => {
                let delta_micros = ((offset - first) * 1_000_000.0).round() as i64;
                base.checked_add(Span::new().microseconds(delta_micros)).unwrap_or(base)
            }
            _ => {
                let now = Timestamp::now();
                self.base = Some(now);
                self.first_offset = Some(offset);
                now
            }
        }
    }
}

fn parse_absolute(field: &str) -> Option<Timestamp> {
    if !field.contains('T') {
        return None;
    }
    field.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_iso8601() {
        let mut ext = TimestampExtractor::new(false, false);
        let (ts, duration) = ext.extract("2021-01-19T10:01:00Z");
        assert_eq!(ts.to_string(), "2021-01-19T10:01:00Z");
        assert_eq!(duration, None);
    }

    #[test]
    fn parses_duration_suffix() {
        let mut ext = TimestampExtractor::new(false, false);
        let (_, duration) = ext.extract("2021-01-19T10:01:00Z@1.5");
        assert_eq!(duration, Some(1.5));
    }

    #[test]
    fn malformed_duration_is_dropped_not_fatal() {
        let mut ext = TimestampExtractor::new(false, false);
        let (ts, duration) = ext.extract("2021-01-19T10:01:00Z@notanumber");
        assert_eq!(duration, None);
        assert_eq!(ts.to_string(), "2021-01-19T10:01:00Z");
    }

    #[test]
    fn ignore_timestamps_emits_now() {
        let mut ext = TimestampExtractor::new(true, false);
        let (ts, _) = ext.extract("2021-01-19T10:01:00Z");
        assert!(ts.as_second() > 0);
    }

    #[test]
    fn relative_time_rebases_subsequent_offsets() {
        let mut ext = TimestampExtractor::new(false, true);
        let (first, _) = ext.extract("100.0");
        let (second, _) = ext.extract("101.5");
        let delta = second.as_microsecond() - first.as_microsecond();
        assert_eq!(delta, 1_500_000);
    }

    #[test]
    fn relative_time_rebases_subsequent_absolute_timestamps() {
        let mut ext = TimestampExtractor::new(false, true);
        let (first, _) = ext.extract("2021-01-19T10:01:00Z");
        let (second, _) = ext.extract("2021-01-19T10:01:01.5Z");
        let delta = second.as_microsecond() - first.as_microsecond();
        assert_eq!(delta, 1_500_000);
    }
}
