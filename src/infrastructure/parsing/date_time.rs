//! Date and time normalization for schedule text
//!
//! Accepted date shapes:
//! 1. `March 10` / `March 10, 2024` (named month, optional year)
//! 2. `Sunday, March 10, 2024` (fixed reference format `%A, %B %d, %Y`)
//! 3. `10.03.24` (dotted, two-digit year pivoted at 30)
//!
//! Times are 12-hour KST (`at 6 PM KST`, `6:30 pm`) and are shifted by a fixed
//! offset into local business time.

use chrono::{Datelike, Days, FixedOffset, NaiveDate, NaiveTime, Timelike};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::domain::bucket::month_number;
use crate::domain::{CANONICAL_DATE_FORMAT, ReleaseError, ReleaseResult};

/// Fixed reference format for shape 2
pub const WEEKDAY_DATE_FORMAT: &str = "%A, %B %d, %Y";

/// Two-digit years up to this value land in the 2000s
pub const PIVOT_YEAR: u32 = 30;

static NAMED_MONTH_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?(?:\s*,\s*(\d{4}))?$")
        .expect("named month regex")
});

static DATE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z]+\.?\s+\d{1,2}(?:st|nd|rd|th)?(?:\s*,\s*\d{4})?)\s*(?::\s*(.*))?$")
        .expect("date prefix regex")
});

static DOTTED_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})\.(\d{1,2})\.(\d{2}|\d{4})$").expect("dotted date regex")
});

static TWELVE_HOUR_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d{1,2})(?::(\d{2}))?\s*([ap])\.?\s*m\.?$").expect("12-hour time regex")
});

static KST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(?\s*\bkst\b\s*\)?").expect("kst marker regex"));

/// Local wall-clock time plus the calendar-day shift the offset caused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalTime {
    pub time: NaiveTime,
    /// 0 for the same day, -1 for the previous day, +1 for the next day
    pub day_offset: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizedDateTime {
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
}

#[derive(Debug, Clone)]
pub struct DateTimeNormalizer {
    fallback_year: i32,
    local_offset: FixedOffset,
}

impl DateTimeNormalizer {
    pub const fn new(fallback_year: i32, local_offset: FixedOffset) -> Self {
        Self {
            fallback_year,
            local_offset,
        }
    }

    /// Normalizer using the current year as fallback.
    pub fn current_year(local_offset: FixedOffset) -> Self {
        Self::new(chrono::Local::now().year(), local_offset)
    }

    #[must_use]
    pub const fn with_fallback_year(mut self, year: i32) -> Self {
        self.fallback_year = year;
        self
    }

    pub const fn fallback_year(&self) -> i32 {
        self.fallback_year
    }

    /// Parse any of the three accepted date shapes.
    ///
    /// `year` overrides the fallback for dates that omit one.
    pub fn parse_date(&self, text: &str, year: Option<i32>) -> ReleaseResult<NaiveDate> {
        let cleaned = clean(text);
        let cleaned = cleaned.trim_end_matches([':', ',', '.']).trim();

        if let Some(caps) = NAMED_MONTH_DATE.captures(cleaned) {
            let month = month_number(&caps[1]).ok_or_else(|| ReleaseError::invalid_date(text))?;
            let day: u32 = caps[2].parse().map_err(|_| ReleaseError::invalid_date(text))?;
            let year = match caps.get(3) {
                Some(y) => y.as_str().parse().map_err(|_| ReleaseError::invalid_date(text))?,
                None => year.unwrap_or(self.fallback_year),
            };
            return NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| ReleaseError::invalid_date(text));
        }

        if let Ok(date) = NaiveDate::parse_from_str(cleaned, WEEKDAY_DATE_FORMAT) {
            return Ok(date);
        }

        if let Some(caps) = DOTTED_DATE.captures(cleaned) {
            let day: u32 = caps[1].parse().map_err(|_| ReleaseError::invalid_date(text))?;
            let month: u32 = caps[2].parse().map_err(|_| ReleaseError::invalid_date(text))?;
            let raw_year = &caps[3];
            let year = if raw_year.len() == 2 {
                pivot_two_digit_year(raw_year.parse().map_err(|_| ReleaseError::invalid_date(text))?)
            } else {
                raw_year.parse().map_err(|_| ReleaseError::invalid_date(text))?
            };
            return NaiveDate::from_ymd_opt(year, month, day)
                .ok_or_else(|| ReleaseError::invalid_date(text));
        }

        Err(ReleaseError::invalid_date(text))
    }

    /// Split `"March 10: Title Track: 'X'"` into the date and the remainder.
    ///
    /// A bare `"March 10"` line yields an empty remainder. Lines whose prefix
    /// is not a valid date return `None`.
    pub fn split_date_prefix(&self, line: &str, year: Option<i32>) -> Option<(NaiveDate, String)> {
        let caps = DATE_PREFIX.captures(line)?;
        let date = self.parse_date(&caps[1], year).ok()?;
        let rest = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
        Some((date, rest))
    }

    /// Parse a 12-hour KST time such as `at 6 PM KST` or `6:30 pm`.
    pub fn parse_time(&self, text: &str) -> ReleaseResult<NaiveTime> {
        let stripped = KST_MARKER.replace_all(text, " ");
        let mut cleaned = clean(&stripped);
        if let Some(rest) = strip_prefix_ci(&cleaned, "at ") {
            cleaned = rest.trim().to_string();
        }

        let caps = TWELVE_HOUR_TIME
            .captures(&cleaned)
            .ok_or_else(|| ReleaseError::invalid_date(text))?;
        let hour: u32 = caps[1].parse().map_err(|_| ReleaseError::invalid_date(text))?;
        let minute: u32 = caps
            .get(2)
            .map_or(Ok(0), |m| m.as_str().parse())
            .map_err(|_| ReleaseError::invalid_date(text))?;
        if !(1..=12).contains(&hour) {
            return Err(ReleaseError::invalid_date(text));
        }
        let is_pm = caps[3].eq_ignore_ascii_case("p");
        let hour24 = match (hour, is_pm) {
            (12, false) => 0,
            (12, true) => 12,
            (h, false) => h,
            (h, true) => h + 12,
        };
        NaiveTime::from_hms_opt(hour24, minute, 0).ok_or_else(|| ReleaseError::invalid_date(text))
    }

    /// Shift a KST wall-clock time by the configured offset.
    pub fn to_local(&self, kst: NaiveTime) -> LocalTime {
        const SECONDS_PER_DAY: i64 = 24 * 60 * 60;
        let shifted = i64::from(kst.num_seconds_from_midnight())
            + i64::from(self.local_offset.local_minus_utc());
        let day_offset = shifted.div_euclid(SECONDS_PER_DAY);
        let seconds = u32::try_from(shifted.rem_euclid(SECONDS_PER_DAY)).unwrap_or(0);
        LocalTime {
            time: NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0).unwrap_or(NaiveTime::MIN),
            day_offset,
        }
    }

    /// Resolve a date plus an optional KST time into local business time.
    ///
    /// An unparseable time is dropped rather than failing the whole event.
    pub fn normalize(
        &self,
        date_text: &str,
        time_text: Option<&str>,
        year: Option<i32>,
    ) -> ReleaseResult<NormalizedDateTime> {
        let date = self.parse_date(date_text, year)?;
        Ok(self.localize(date, time_text))
    }

    /// Attach a KST time to an already parsed date.
    pub fn localize(&self, date: NaiveDate, time_text: Option<&str>) -> NormalizedDateTime {
        let Some(raw) = time_text.map(str::trim).filter(|t| !t.is_empty()) else {
            return NormalizedDateTime { date, time: None };
        };
        match self.parse_time(raw) {
            Ok(kst) => {
                let local = self.to_local(kst);
                let shifted = shift_days(date, local.day_offset).unwrap_or(date);
                NormalizedDateTime {
                    date: shifted,
                    time: Some(local.time),
                }
            }
            Err(e) => {
                debug!("Ignoring unparseable time '{}': {}", raw, e);
                NormalizedDateTime { date, time: None }
            }
        }
    }

    /// True when the line opens with one of the twelve month names.
    pub fn starts_with_month(line: &str) -> bool {
        line.trim_start()
            .split(|c: char| !c.is_ascii_alphabetic())
            .next()
            .and_then(month_number)
            .is_some()
    }
}

/// `00..=30` → `20xx`, `31..=99` → `19xx`.
pub const fn pivot_two_digit_year(yy: u32) -> i32 {
    if yy <= PIVOT_YEAR {
        2000 + yy as i32
    } else {
        1900 + yy as i32
    }
}

/// Render a date in the canonical `DD.MM.YY` form.
pub fn format_canonical(date: NaiveDate) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

fn shift_days(date: NaiveDate, offset: i64) -> Option<NaiveDate> {
    let days = Days::new(offset.unsigned_abs());
    if offset < 0 {
        date.checked_sub_days(days)
    } else {
        date.checked_add_days(days)
    }
}

fn clean(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &text[prefix.len()..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn normalizer() -> DateTimeNormalizer {
        DateTimeNormalizer::new(2024, FixedOffset::east_opt(-6 * 3600).unwrap())
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[rstest]
    #[case("March 10", ymd(2024, 3, 10))]
    #[case("march 10th", ymd(2024, 3, 10))]
    #[case("September 1, 2023", ymd(2023, 9, 1))]
    #[case("  April\u{a0}2 :", ymd(2024, 4, 2))]
    #[case("Sunday, March 10, 2024", ymd(2024, 3, 10))]
    #[case("10.03.24", ymd(2024, 3, 10))]
    #[case("01.12.99", ymd(1999, 12, 1))]
    #[case("05.06.2031", ymd(2031, 6, 5))]
    fn parses_accepted_shapes(#[case] input: &str, #[case] expected: NaiveDate) {
        assert_eq!(normalizer().parse_date(input, None).unwrap(), expected);
    }

    #[rstest]
    #[case("Marsch 10")]
    #[case("Mar 10")]
    #[case("10/03/2024")]
    #[case("February 30")]
    #[case("")]
    fn rejects_unknown_shapes(#[case] input: &str) {
        let err = normalizer().parse_date(input, None).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidDateFormat { .. }));
    }

    #[test]
    fn explicit_year_beats_fallback() {
        let date = normalizer().parse_date("January 5", Some(2025)).unwrap();
        assert_eq!(date, ymd(2025, 1, 5));
    }

    #[test]
    fn pivot_boundaries() {
        assert_eq!(pivot_two_digit_year(0), 2000);
        assert_eq!(pivot_two_digit_year(29), 2029);
        assert_eq!(pivot_two_digit_year(30), 2030);
        assert_eq!(pivot_two_digit_year(31), 1931);
        assert_eq!(pivot_two_digit_year(99), 1999);
    }

    #[rstest]
    #[case("6 PM KST", hm(18, 0))]
    #[case("at 6:30 pm KST", hm(18, 30))]
    #[case("At 12 AM", hm(0, 0))]
    #[case("12 PM (KST)", hm(12, 0))]
    #[case("11 a.m.", hm(11, 0))]
    fn parses_twelve_hour_times(#[case] input: &str, #[case] expected: NaiveTime) {
        assert_eq!(normalizer().parse_time(input).unwrap(), expected);
    }

    #[rstest]
    #[case("18:00")]
    #[case("13 PM")]
    #[case("TBA")]
    fn rejects_bad_times(#[case] input: &str) {
        assert!(normalizer().parse_time(input).is_err());
    }

    #[test]
    fn kst_to_local_same_day_and_previous_day() {
        let n = normalizer();
        assert_eq!(
            n.to_local(hm(18, 0)),
            LocalTime { time: hm(12, 0), day_offset: 0 }
        );
        assert_eq!(
            n.to_local(hm(2, 30)),
            LocalTime { time: hm(20, 30), day_offset: -1 }
        );
    }

    #[test]
    fn localize_moves_date_back_across_midnight() {
        let normalized = normalizer()
            .normalize("April 1", Some("1 AM KST"), None)
            .unwrap();
        assert_eq!(normalized.date, ymd(2024, 3, 31));
        assert_eq!(normalized.time, Some(hm(19, 0)));
    }

    #[test]
    fn unparseable_time_is_dropped() {
        let normalized = normalizer().normalize("April 1", Some("TBA"), None).unwrap();
        assert_eq!(normalized.date, ymd(2024, 4, 1));
        assert_eq!(normalized.time, None);
    }

    #[test]
    fn split_date_prefix_variants() {
        let n = normalizer();
        assert_eq!(
            n.split_date_prefix("March 10: Title Track: 'Whiplash'", None),
            Some((ymd(2024, 3, 10), "Title Track: 'Whiplash'".to_string()))
        );
        assert_eq!(
            n.split_date_prefix("March 3", None),
            Some((ymd(2024, 3, 3), String::new()))
        );
        assert_eq!(n.split_date_prefix("Album: Armageddon", None), None);
        assert_eq!(n.split_date_prefix("Title 5: something", None), None);
    }

    #[test]
    fn month_detection() {
        assert!(DateTimeNormalizer::starts_with_month("March 10: teaser"));
        assert!(DateTimeNormalizer::starts_with_month("  may 2"));
        assert!(!DateTimeNormalizer::starts_with_month("Mayday"));
        assert!(!DateTimeNormalizer::starts_with_month("Album: X"));
    }

    proptest! {
        #[test]
        fn dotted_pivot_is_stable(yy in 0u32..100, month in 1u32..=12, day in 1u32..=28) {
            let text = format!("{day:02}.{month:02}.{yy:02}");
            let date = normalizer().parse_date(&text, None).unwrap();
            let expected_year = if yy <= 30 { 2000 + yy as i32 } else { 1900 + yy as i32 };
            prop_assert_eq!(date.year(), expected_year);
        }

        #[test]
        fn canonical_round_trip(days in 0i64..36_500) {
            let date = ymd(1931, 1, 1) + chrono::Duration::days(days);
            prop_assume!(date.year() <= 2030);
            let reparsed = normalizer().parse_date(&format_canonical(date), None).unwrap();
            prop_assert_eq!(reparsed, date);
        }
    }
}
