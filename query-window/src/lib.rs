// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Time-windowed query templating.
//!
//! A template carries the literal tokens [`START_TOKEN`] and [`END_TOKEN`]. Each
//! run replaces them with the bounds of a [`QueryWindow`] that ends at the
//! current minute (minus a latency) and spans a fixed number of minutes.

use chrono::{DateTime, Local, TimeDelta, TimeZone, Timelike};
use std::fmt;

pub const START_TOKEN: &str = "START_TIMESTAMP";
pub const END_TOKEN: &str = "END_TIMESTAMP";

/// Format substituted into templates, in the zone of the supplied clock.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// `[start, end)` bounds of one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryWindow<Tz: TimeZone> {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl<Tz: TimeZone> QueryWindow<Tz>
where
    Tz::Offset: fmt::Display,
{
    /// Window ending `latency_minutes` before `now` truncated to the minute.
    pub fn ending_at(now: DateTime<Tz>, latency_minutes: u32, window_minutes: u32) -> Self {
        let end = truncate_to_minute(now) - TimeDelta::minutes(i64::from(latency_minutes));
        let start = end.clone() - TimeDelta::minutes(i64::from(window_minutes));
        Self { start, end }
    }

    pub fn start_label(&self) -> String {
        self.start.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn end_label(&self) -> String {
        self.end.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Replaces every occurrence of both tokens. Matching is exact and case-sensitive.
    pub fn apply(&self, template: &str) -> String {
        template
            .replace(START_TOKEN, &self.start_label())
            .replace(END_TOKEN, &self.end_label())
    }
}

impl<Tz: TimeZone> fmt::Display for QueryWindow<Tz>
where
    Tz::Offset: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(TIMESTAMP_FORMAT),
            self.end.format(TIMESTAMP_FORMAT)
        )
    }
}

/// Windows `template` against the local clock.
pub fn window(template: &str, latency_minutes: u32, window_minutes: u32) -> String {
    window_at(template, Local::now(), latency_minutes, window_minutes)
}

pub fn window_at<Tz: TimeZone>(
    template: &str,
    now: DateTime<Tz>,
    latency_minutes: u32,
    window_minutes: u32,
) -> String
where
    Tz::Offset: fmt::Display,
{
    QueryWindow::ending_at(now, latency_minutes, window_minutes).apply(template)
}

fn truncate_to_minute<Tz: TimeZone>(now: DateTime<Tz>) -> DateTime<Tz> {
    let seconds = TimeDelta::seconds(i64::from(now.second()));
    let nanos = TimeDelta::nanoseconds(i64::from(now.nanosecond()));
    now - seconds - nanos
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDateTime};

    fn clock() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 9, 17, 5, 42)
            .unwrap()
            + TimeDelta::milliseconds(731)
    }

    #[test]
    fn end_is_now_truncated_when_no_latency() {
        let window = QueryWindow::ending_at(clock(), 0, 15);
        assert_eq!(window.end_label(), "2024-03-09 17:05:00");
        assert_eq!(window.start_label(), "2024-03-09 16:50:00");
        assert_eq!(window.end.clone() - window.start.clone(), TimeDelta::minutes(15));
    }

    #[test]
    fn latency_shifts_both_bounds() {
        let got = window_at("START_TIMESTAMP|END_TIMESTAMP", clock(), 10, 15);
        assert_eq!(got, "2024-03-09 16:40:00|2024-03-09 16:55:00");
    }

    #[test]
    fn replaces_every_occurrence() {
        let template = "a >= 'START_TIMESTAMP' AND a < 'END_TIMESTAMP' OR b = 'START_TIMESTAMP'";
        let got = window_at(template, clock(), 0, 60);
        assert_eq!(
            got,
            "a >= '2024-03-09 16:05:00' AND a < '2024-03-09 17:05:00' OR b = '2024-03-09 16:05:00'"
        );
    }

    #[test]
    fn templates_without_exact_tokens_are_unchanged() {
        assert_eq!(window_at("START_DATE|END_DATE", clock(), 10, 15), "START_DATE|END_DATE");
        assert_eq!(
            window_at("start_timestamp|End_Timestamp", clock(), 10, 15),
            "start_timestamp|End_Timestamp"
        );
        assert_eq!(window_at("", clock(), 10, 15), "");
    }

    #[test]
    fn zero_width_window_collapses_bounds() {
        let window = QueryWindow::ending_at(clock(), 5, 0);
        assert_eq!(window.start, window.end);
        assert_eq!(window.to_string(), "[2024-03-09 17:00:00, 2024-03-09 17:00:00)");
    }

    #[test]
    fn local_clock_window_ends_on_current_minute() {
        let before = truncate_to_minute(Local::now()).naive_local();
        let got = window("START_TIMESTAMP|END_TIMESTAMP", 10, 15);
        let after = truncate_to_minute(Local::now()).naive_local();

        let (start, end) = got.split_once('|').unwrap();
        let start = NaiveDateTime::parse_from_str(start, TIMESTAMP_FORMAT).unwrap();
        let end = NaiveDateTime::parse_from_str(end, TIMESTAMP_FORMAT).unwrap();
        let latency = TimeDelta::minutes(10);
        assert!(end == before - latency || end == after - latency);
        assert_eq!(end - start, TimeDelta::minutes(15));
    }
}
