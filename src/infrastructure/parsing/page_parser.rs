//! Schedule page parser
//!
//! Walks the schedule table of one month page and turns every whitelisted
//! row into release records. Rows may announce several events; each one is
//! dated, filtered to the target month, then reduced to one record per
//! `(entity, date)`.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use super::config::{CompiledSelectors, ScheduleSelectors};
use super::date_time::DateTimeNormalizer;
use super::event_extractor::{EventExtractor, RowLine, flatten_cell};
use crate::domain::whitelist::is_member;
use crate::domain::{ReleaseEvent, ReleaseResult, TimeBucket, Whitelist};

const POSTPONED_MARKER: &str = "postponed";

#[derive(Debug)]
pub struct PageParser {
    selectors: CompiledSelectors,
    extractor: EventExtractor,
    normalizer: DateTimeNormalizer,
}

/// A row that passed the whitelist and postponement checks.
#[derive(Debug, Clone)]
struct ScheduleRow {
    subject: String,
    date_text: String,
    time_text: Option<String>,
    content: Vec<RowLine>,
}

impl PageParser {
    pub fn new(selectors: &ScheduleSelectors, normalizer: DateTimeNormalizer) -> ReleaseResult<Self> {
        Ok(Self {
            selectors: selectors.compile()?,
            extractor: EventExtractor::new(normalizer.clone()),
            normalizer,
        })
    }

    pub fn with_defaults(normalizer: DateTimeNormalizer) -> ReleaseResult<Self> {
        Self::new(&ScheduleSelectors::default(), normalizer)
    }

    /// Parse one month page into records for `target`.
    ///
    /// The result holds at most one record per `(entity, date)` and is
    /// ordered by date, then entity.
    pub fn parse_page(&self, html: &str, target: &TimeBucket, whitelist: &Whitelist) -> Vec<ReleaseEvent> {
        let document = Html::parse_document(html);
        let year = target.year_or(self.normalizer.fallback_year());
        let month = target.month();

        let mut candidates: BTreeMap<(NaiveDate, String), Vec<ReleaseEvent>> = BTreeMap::new();
        let mut row_count = 0usize;

        for row_element in self.rows(&document) {
            row_count += 1;
            let Some(row) = self.read_row(row_element, whitelist) else {
                continue;
            };

            for event in self.events_for_row(&row, year) {
                if month.is_some_and(|m| event.date().month() != m) || event.date().year() != year {
                    trace!(
                        "Dropping {} on {} outside bucket '{}'",
                        event.entity_name(),
                        event.date(),
                        target
                    );
                    continue;
                }
                candidates
                    .entry((event.date(), event.entity_key()))
                    .or_default()
                    .push(event);
            }
        }

        let records: Vec<ReleaseEvent> = candidates.into_values().filter_map(reduce_candidates).collect();
        debug!(
            "Parsed bucket '{}': {} rows, {} records",
            target,
            row_count,
            records.len()
        );
        records
    }

    fn rows<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.selectors.row {
            let rows: Vec<_> = document.select(selector).collect();
            if !rows.is_empty() {
                return rows;
            }
        }
        Vec::new()
    }

    fn read_row(&self, row: ElementRef<'_>, whitelist: &Whitelist) -> Option<ScheduleRow> {
        let details = first_match(row, &self.selectors.details)?;
        let lines = flatten_cell(details);

        let subject = first_match(details, &self.selectors.subject)
            .map(|el| collapse(&el.text().collect::<String>()))
            .filter(|s| !s.is_empty())
            .or_else(|| lines.first().map(|l| l.text.clone()))?;

        if !is_member(whitelist, &subject) {
            return None;
        }

        let row_text = row.text().collect::<String>().to_lowercase();
        if row_text.contains(POSTPONED_MARKER) {
            debug!("Skipping postponed row for {}", subject);
            return None;
        }

        let content = strip_subject_line(lines, &subject);
        let date_text = first_match(row, &self.selectors.date)
            .map(|el| collapse(&el.text().collect::<String>()))
            .unwrap_or_default();
        let time_text = first_match(row, &self.selectors.time)
            .map(|el| collapse(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        Some(ScheduleRow {
            subject,
            date_text,
            time_text,
            content,
        })
    }

    fn events_for_row(&self, row: &ScheduleRow, year: i32) -> Vec<ReleaseEvent> {
        let row_date = self.normalizer.parse_date(&row.date_text, Some(year)).ok();

        self.extractor
            .extract(&row.content, Some(year))
            .into_iter()
            .filter_map(|extracted| {
                let Some(date) = extracted.date.or(row_date) else {
                    debug!(
                        "No usable date for {} (row date '{}')",
                        row.subject, row.date_text
                    );
                    return None;
                };
                let time_text = extracted.time_text.as_deref().or(row.time_text.as_deref());
                let resolved = self.normalizer.localize(date, time_text);

                Some(
                    ReleaseEvent::new(row.subject.clone(), resolved.date)
                        .with_time(resolved.time)
                        .with_collection_title(extracted.collection_title)
                        .with_lead_track_title(extracted.lead_track_title)
                        .with_media_link(extracted.media_link),
                )
            })
            .collect()
    }
}

/// Reduce the candidates for one `(entity, date)` to a single record.
///
/// The richest candidate wins: a lead track outranks a media link, which
/// outranks neither. Ties go to the first seen. Fields the winner lacks are
/// then filled from the earliest candidate that has them.
pub fn reduce_candidates(candidates: Vec<ReleaseEvent>) -> Option<ReleaseEvent> {
    let rank = |e: &ReleaseEvent| (e.has_lead_track(), e.has_media_link());

    let best_index = candidates
        .iter()
        .enumerate()
        .fold(None::<(usize, (bool, bool))>, |best, (i, e)| match best {
            Some((_, best_rank)) if rank(e) <= best_rank => best,
            _ => Some((i, rank(e))),
        })?
        .0;

    let mut winner = candidates[best_index].clone();
    for (i, other) in candidates.iter().enumerate() {
        if i != best_index {
            winner = winner.fill_gaps_from(other);
        }
    }
    Some(winner)
}

fn first_match<'a>(scope: ElementRef<'a>, selectors: &[Selector]) -> Option<ElementRef<'a>> {
    selectors.iter().find_map(|s| scope.select(s).next())
}

fn strip_subject_line(lines: Vec<RowLine>, subject: &str) -> Vec<RowLine> {
    let mut lines = lines;
    let starts_with_subject = lines
        .first()
        .is_some_and(|l| l.text.to_lowercase().starts_with(&subject.to_lowercase()));
    if starts_with_subject {
        let first = lines.remove(0);
        // Links on the subject line belong to the first event
        if let Some(next) = lines.first_mut() {
            let mut links = first.links;
            links.append(&mut next.links);
            next.links = links;
        }
    }
    lines
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::whitelist_of;
    use chrono::{FixedOffset, NaiveTime};

    fn parser() -> PageParser {
        let offset = FixedOffset::east_opt(-6 * 3600).unwrap();
        PageParser::with_defaults(DateTimeNormalizer::new(2024, offset)).unwrap()
    }

    fn page(rows: &str) -> String {
        format!(
            "<html><body><table class=\"comeback-table\"><tbody>{rows}</tbody></table></body></html>"
        )
    }

    fn row(date: &str, time: &str, details: &str) -> String {
        format!(
            "<tr><td class=\"date\">{date}</td><td class=\"time\">{time}</td><td class=\"details\">{details}</td></tr>"
        )
    }

    #[test]
    fn whitelisted_rows_only() {
        let html = page(&[
            row("May 27", "6 PM KST", "<strong>aespa</strong><br>Album: Armageddon"),
            row("May 28", "6 PM KST", "<strong>Other Group</strong><br>Album: Something"),
        ]
        .concat());
        let records = parser().parse_page(&html, &TimeBucket::new("may-2024"), &whitelist_of(["aespa"]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity_name(), "aespa");
        assert_eq!(records[0].collection_title(), Some("Armageddon"));
    }

    #[test]
    fn postponed_rows_are_skipped() {
        let html = page(&row(
            "May 27",
            "",
            "<strong>aespa</strong><br>Album: Armageddon (POSTPONED)",
        ));
        let records = parser().parse_page(&html, &TimeBucket::new("may-2024"), &whitelist_of(["aespa"]));
        assert!(records.is_empty());
    }

    #[test]
    fn time_shift_moves_date_and_month_filter_applies() {
        let html = page(&row("May 27", "6 PM KST", "<strong>aespa</strong><br>Album: Armageddon"));
        let records = parser().parse_page(&html, &TimeBucket::new("may-2024"), &whitelist_of(["aespa"]));
        assert_eq!(records[0].time_of_day(), NaiveTime::from_hms_opt(12, 0, 0));
        assert_eq!(records[0].date(), NaiveDate::from_ymd_opt(2024, 5, 27).unwrap());

        // 1 AM KST on June 1 lands on May 31 local time, inside the May bucket
        let html = page(&row("June 1", "1 AM KST", "<strong>aespa</strong><br>Album: Armageddon"));
        let records = parser().parse_page(&html, &TimeBucket::new("may-2024"), &whitelist_of(["aespa"]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date(), NaiveDate::from_ymd_opt(2024, 5, 31).unwrap());
    }

    #[test]
    fn subject_falls_back_to_first_line() {
        let html = page(&row("May 27", "", "aespa<br>Album: Armageddon"));
        let records = parser().parse_page(&html, &TimeBucket::new("may-2024"), &whitelist_of(["AESPA"]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].collection_title(), Some("Armageddon"));
    }

    #[test]
    fn reduction_prefers_lead_track_then_fills_gaps() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 27).unwrap();
        let with_collection = ReleaseEvent::new("aespa", date).with_collection_title(Some("Armageddon".into()));
        let with_lead = ReleaseEvent::new("aespa", date).with_lead_track_title(Some("Whiplash".into()));

        let merged = reduce_candidates(vec![with_collection, with_lead]).unwrap();
        assert_eq!(merged.lead_track_title(), Some("Whiplash"));
        assert_eq!(merged.collection_title(), Some("Armageddon"));
    }

    #[test]
    fn reduction_ties_go_to_first_seen() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 27).unwrap();
        let first = ReleaseEvent::new("aespa", date).with_lead_track_title(Some("First".into()));
        let second = ReleaseEvent::new("aespa", date).with_lead_track_title(Some("Second".into()));
        let merged = reduce_candidates(vec![first, second]).unwrap();
        assert_eq!(merged.lead_track_title(), Some("First"));
        assert!(reduce_candidates(Vec::new()).is_none());
    }
}
