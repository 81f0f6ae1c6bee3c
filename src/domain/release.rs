//! # Release Event Value Object
//!
//! One announced release of a tracked entity, normalized from the schedule
//! page. Values are immutable once built; the builder methods consume `self`.

use std::fmt;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use url::Url;

/// Canonical date rendering used across the crate (`DD.MM.YY`)
pub const CANONICAL_DATE_FORMAT: &str = "%d.%m.%y";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReleaseEvent {
    entity_name: String,
    date: NaiveDate,
    time_of_day: Option<NaiveTime>,
    collection_title: Option<String>,
    lead_track_title: Option<String>,
    media_link: Option<Url>,
}

impl ReleaseEvent {
    #[must_use]
    pub fn new(entity_name: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            entity_name: entity_name.into().trim().to_string(),
            date,
            time_of_day: None,
            collection_title: None,
            lead_track_title: None,
            media_link: None,
        }
    }

    #[must_use]
    pub const fn with_time(mut self, time: Option<NaiveTime>) -> Self {
        self.time_of_day = time;
        self
    }

    #[must_use]
    pub fn with_collection_title(mut self, title: Option<String>) -> Self {
        self.collection_title = non_blank(title);
        self
    }

    #[must_use]
    pub fn with_lead_track_title(mut self, title: Option<String>) -> Self {
        self.lead_track_title = non_blank(title);
        self
    }

    #[must_use]
    pub fn with_media_link(mut self, link: Option<Url>) -> Self {
        self.media_link = link;
        self
    }

    pub fn entity_name(&self) -> &str {
        &self.entity_name
    }

    pub const fn date(&self) -> NaiveDate {
        self.date
    }

    pub const fn time_of_day(&self) -> Option<NaiveTime> {
        self.time_of_day
    }

    pub fn collection_title(&self) -> Option<&str> {
        self.collection_title.as_deref()
    }

    pub fn lead_track_title(&self) -> Option<&str> {
        self.lead_track_title.as_deref()
    }

    pub const fn media_link(&self) -> Option<&Url> {
        self.media_link.as_ref()
    }

    pub const fn has_lead_track(&self) -> bool {
        self.lead_track_title.is_some()
    }

    pub const fn has_media_link(&self) -> bool {
        self.media_link.is_some()
    }

    /// Lowercased entity name, the form used for whitelist matching.
    pub fn entity_key(&self) -> String {
        self.entity_name.to_lowercase()
    }

    /// Copy every field this event lacks from `other`, keeping what is set.
    #[must_use]
    pub fn fill_gaps_from(mut self, other: &Self) -> Self {
        if self.time_of_day.is_none() {
            self.time_of_day = other.time_of_day;
        }
        if self.collection_title.is_none() {
            self.collection_title.clone_from(&other.collection_title);
        }
        if self.lead_track_title.is_none() {
            self.lead_track_title.clone_from(&other.lead_track_title);
        }
        if self.media_link.is_none() {
            self.media_link.clone_from(&other.media_link);
        }
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Default "format for display" callback handed to front ends.
pub fn format_release(event: &ReleaseEvent) -> String {
    let mut out = event.date.format(CANONICAL_DATE_FORMAT).to_string();
    if let Some(time) = event.time_of_day {
        out.push(' ');
        out.push_str(&time.format("%H:%M").to_string());
    }
    out.push(' ');
    out.push_str(&event.entity_name);
    if let Some(track) = &event.lead_track_title {
        out.push_str(&format!(" - \"{track}\""));
    }
    if let Some(collection) = &event.collection_title {
        out.push_str(&format!(" ({collection})"));
    }
    if let Some(link) = &event.media_link {
        out.push_str(&format!(" <{link}>"));
    }
    out
}

impl fmt::Display for ReleaseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_release(self))
    }
}
