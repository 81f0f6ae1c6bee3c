//! Time buckets and cache keys
//!
//! A bucket is a calendar month label such as `march` or `march-2024`.
//! Cache entries are keyed by bucket plus a fingerprint of the whitelist
//! that produced them.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// The twelve month names recognised on the schedule site, in calendar order.
pub const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Look up a full English month name (case-insensitive), returning 1..=12.
pub fn month_number(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| *m == lower)
        .and_then(|idx| u32::try_from(idx + 1).ok())
}

/// Month name for 1..=12.
pub fn month_name(month: u32) -> Option<&'static str> {
    let idx = usize::try_from(month).ok()?.checked_sub(1)?;
    MONTH_NAMES.get(idx).copied()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket(String);

impl TimeBucket {
    pub fn new(label: impl AsRef<str>) -> Self {
        Self(label.as_ref().trim().to_lowercase())
    }

    /// Bucket for a calendar month, labelled `<monthname>-<year>`.
    pub fn for_month(year: i32, month: u32) -> Option<Self> {
        month_name(month).map(|name| Self(format!("{name}-{year}")))
    }

    pub fn for_date(date: NaiveDate) -> Self {
        Self(format!("{}-{}", MONTH_NAMES[date.month0() as usize], date.year()))
    }

    pub fn label(&self) -> &str {
        &self.0
    }

    /// Target month (1..=12) named by the label's leading segment.
    pub fn month(&self) -> Option<u32> {
        self.0
            .split(['-', '_', ' '])
            .next()
            .and_then(month_number)
    }

    /// Four-digit year carried by the label, if any.
    pub fn year(&self) -> Option<i32> {
        self.0
            .split(['-', '_', ' '])
            .skip(1)
            .find(|part| part.len() == 4 && part.chars().all(|c| c.is_ascii_digit()))
            .and_then(|part| part.parse().ok())
    }

    pub fn year_or(&self, fallback: i32) -> i32 {
        self.year().unwrap_or(fallback)
    }

    /// First day of the bucket's month, resolving a missing year with `fallback_year`.
    pub fn first_day(&self, fallback_year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year_or(fallback_year), self.month()?, 1)
    }

    /// Whether a listing link belongs to this bucket.
    pub fn matches_link(&self, link: &str) -> bool {
        let link = link.to_lowercase();
        if link.contains(&self.0) {
            return true;
        }
        // Sites sometimes flip the order ("2024-march") or drop the separator.
        match (self.month().and_then(month_name), self.year()) {
            (Some(name), Some(year)) => link.contains(name) && link.contains(&year.to_string()),
            _ => false,
        }
    }

    /// Previous, current and next month relative to `today`.
    pub fn active_window(today: NaiveDate) -> Vec<Self> {
        let Some(first) = today.with_day(1) else {
            return Vec::new();
        };
        [
            first.checked_sub_months(Months::new(1)),
            Some(first),
            first.checked_add_months(Months::new(1)),
        ]
        .into_iter()
        .flatten()
        .map(Self::for_date)
        .collect()
    }

    /// True when the bucket is within one month of `today`.
    pub fn is_active(&self, today: NaiveDate) -> bool {
        let Some(first) = self.first_day(today.year()) else {
            return false;
        };
        let bucket_index = i64::from(first.year()) * 12 + i64::from(first.month0());
        let today_index = i64::from(today.year()) * 12 + i64::from(today.month0());
        (bucket_index - today_index).abs() <= 1
    }
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TimeBucket {
    fn from(label: &str) -> Self {
        Self::new(label)
    }
}

/// Stable 8-byte hash over the sorted, lowercased whitelist members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WhitelistFingerprint(String);

impl WhitelistFingerprint {
    pub fn of<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let normalized: BTreeSet<String> = members
            .into_iter()
            .map(|m| m.as_ref().trim().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();

        let mut hasher = blake3::Hasher::new();
        for member in &normalized {
            hasher.update(member.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let hex: String = digest.as_bytes()[..8]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WhitelistFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CacheBucketKey {
    pub bucket: TimeBucket,
    pub fingerprint: WhitelistFingerprint,
}

impl CacheBucketKey {
    pub const fn new(bucket: TimeBucket, fingerprint: WhitelistFingerprint) -> Self {
        Self { bucket, fingerprint }
    }
}

impl fmt::Display for CacheBucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.bucket, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn bucket_label_parsing() {
        let bucket = TimeBucket::new("  March-2024 ");
        assert_eq!(bucket.label(), "march-2024");
        assert_eq!(bucket.month(), Some(3));
        assert_eq!(bucket.year(), Some(2024));

        let bare = TimeBucket::new("april");
        assert_eq!(bare.month(), Some(4));
        assert_eq!(bare.year(), None);
        assert_eq!(bare.year_or(2025), 2025);

        assert_eq!(TimeBucket::new("spring").month(), None);
    }

    #[test]
    fn link_matching() {
        let bucket = TimeBucket::new("march-2024");
        assert!(bucket.matches_link("https://site.example/kpop-comeback-schedule-march-2024/"));
        assert!(bucket.matches_link("https://site.example/2024/March/schedule"));
        assert!(!bucket.matches_link("https://site.example/kpop-comeback-schedule-april-2024/"));

        let bare = TimeBucket::new("march");
        assert!(bare.matches_link("https://site.example/comeback-schedule-march-2025/"));
    }

    #[test]
    fn active_window_wraps_years() {
        let window = TimeBucket::active_window(date(2025, 1, 15));
        let labels: Vec<&str> = window.iter().map(TimeBucket::label).collect();
        assert_eq!(labels, vec!["december-2024", "january-2025", "february-2025"]);

        assert!(TimeBucket::new("december-2024").is_active(date(2025, 1, 15)));
        assert!(!TimeBucket::new("march-2025").is_active(date(2025, 1, 15)));
        assert!(TimeBucket::new("february").is_active(date(2025, 1, 15)));
    }

    #[test]
    fn fingerprint_ignores_order_and_case() {
        let a = WhitelistFingerprint::of(["aespa", "IVE", "NewJeans"]);
        let b = WhitelistFingerprint::of(["newjeans", "ive", "AESPA", "aespa"]);
        let c = WhitelistFingerprint::of(["aespa", "ive"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 16);
    }
}
