//! Event extraction from a row's detail cell
//!
//! The detail cell is flattened into logical lines, split into one group per
//! announced event, and each group is reduced to the fields the line
//! patterns recognise.

use chrono::NaiveDate;
use scraper::{ElementRef, Node};
use tracing::trace;
use url::Url;

use super::date_time::DateTimeNormalizer;
use super::line_patterns::{Field, LinePattern, default_patterns};

const BLOCK_ELEMENTS: [&str; 8] = ["p", "div", "li", "ul", "ol", "tr", "h3", "h4"];

/// One logical line of a detail cell, with the hrefs found on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowLine {
    pub text: String,
    pub links: Vec<String>,
}

impl RowLine {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            links: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_link(mut self, href: impl Into<String>) -> Self {
        self.links.push(href.into());
        self
    }
}

#[derive(Default)]
struct LineBuilder {
    fragments: Vec<String>,
    links: Vec<String>,
    lines: Vec<RowLine>,
}

impl LineBuilder {
    fn push_text(&mut self, text: &str) {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !collapsed.is_empty() {
            self.fragments.push(collapsed);
        }
    }

    fn push_link(&mut self, href: &str) {
        let href = href.trim();
        if !href.is_empty() {
            self.links.push(href.to_string());
        }
    }

    fn break_line(&mut self) {
        let text = self.fragments.join(" ");
        let links = std::mem::take(&mut self.links);
        self.fragments.clear();

        if !text.is_empty() {
            self.lines.push(RowLine { text, links });
        } else if !links.is_empty() {
            match self.lines.last_mut() {
                Some(last) => last.links.extend(links),
                None => self.lines.push(RowLine {
                    text: String::new(),
                    links,
                }),
            }
        }
    }

    fn finish(mut self) -> Vec<RowLine> {
        self.break_line();
        self.lines
    }
}

/// Flatten a cell into logical lines.
///
/// Adjacent inline text is joined with single spaces; `<br>` and block
/// elements end a line.
pub fn flatten_cell(cell: ElementRef<'_>) -> Vec<RowLine> {
    let mut builder = LineBuilder::default();
    walk(cell, &mut builder);
    builder.finish()
}

fn walk(element: ElementRef<'_>, builder: &mut LineBuilder) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => builder.push_text(text),
            Node::Element(el) => {
                let name = el.name();
                if name == "br" {
                    builder.break_line();
                    continue;
                }
                let is_block = BLOCK_ELEMENTS.contains(&name);
                if is_block {
                    builder.break_line();
                }
                if name == "a" {
                    if let Some(href) = el.attr("href") {
                        builder.push_link(href);
                    }
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    walk(child_element, builder);
                }
                if is_block {
                    builder.break_line();
                }
            }
            _ => {}
        }
    }
}

/// Lines belonging to one announced event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventGroup {
    /// Embedded sub-event date, `None` when the row date applies
    pub date: Option<NaiveDate>,
    /// Event lines with the date prefix removed
    pub lines: Vec<String>,
    /// Index of the group's first line in the row
    pub start: usize,
    /// One past the group's last line
    pub end: usize,
}

/// Fields recognised for one event group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedEvent {
    pub date: Option<NaiveDate>,
    pub time_text: Option<String>,
    pub collection_title: Option<String>,
    pub lead_track_title: Option<String>,
    pub media_link: Option<Url>,
}

pub struct EventExtractor {
    patterns: Vec<Box<dyn LinePattern>>,
    normalizer: DateTimeNormalizer,
}

impl std::fmt::Debug for EventExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventExtractor")
            .field(
                "patterns",
                &self.patterns.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("normalizer", &self.normalizer)
            .finish()
    }
}

impl EventExtractor {
    pub fn new(normalizer: DateTimeNormalizer) -> Self {
        Self::with_patterns(normalizer, default_patterns())
    }

    pub fn with_patterns(normalizer: DateTimeNormalizer, patterns: Vec<Box<dyn LinePattern>>) -> Self {
        Self {
            patterns,
            normalizer,
        }
    }

    /// Split content lines into event groups.
    ///
    /// When the first line opens with a parseable `<date>:` prefix every such
    /// line starts a new group. Otherwise the whole content is one group.
    pub fn group_lines(&self, lines: &[RowLine], year: Option<i32>) -> Vec<EventGroup> {
        let Some(first) = lines.first() else {
            return Vec::new();
        };

        let sub_event_mode = DateTimeNormalizer::starts_with_month(&first.text)
            && self.normalizer.split_date_prefix(&first.text, year).is_some();

        if !sub_event_mode {
            return vec![EventGroup {
                date: None,
                lines: lines.iter().map(|l| l.text.clone()).collect(),
                start: 0,
                end: lines.len(),
            }];
        }

        let mut groups: Vec<EventGroup> = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            match self.normalizer.split_date_prefix(&line.text, year) {
                Some((date, rest)) => {
                    if let Some(current) = groups.last_mut() {
                        current.end = index;
                    }
                    groups.push(EventGroup {
                        date: Some(date),
                        lines: if rest.is_empty() { Vec::new() } else { vec![rest] },
                        start: index,
                        end: index + 1,
                    });
                }
                None => {
                    if let Some(current) = groups.last_mut() {
                        current.lines.push(line.text.clone());
                        current.end = index + 1;
                    }
                }
            }
        }
        groups
    }

    /// Extract every release event from a row's content lines.
    ///
    /// Groups without a release marker are dropped.
    pub fn extract(&self, lines: &[RowLine], year: Option<i32>) -> Vec<ExtractedEvent> {
        self.group_lines(lines, year)
            .into_iter()
            .filter_map(|group| {
                let event = self.extract_group(&group, lines);
                if event.is_none() {
                    trace!("Dropping group without release marker: {:?}", group.lines);
                }
                event
            })
            .collect()
    }

    fn extract_group(&self, group: &EventGroup, lines: &[RowLine]) -> Option<ExtractedEvent> {
        let mut event = ExtractedEvent {
            date: group.date,
            ..ExtractedEvent::default()
        };
        let mut is_release = false;

        for line in &group.lines {
            for pattern in &self.patterns {
                let Some(field) = pattern.match_line(line) else {
                    continue;
                };
                is_release |= field.marks_release();
                match field {
                    Field::Collection(v) => {
                        event.collection_title.get_or_insert(v);
                    }
                    Field::LeadTrack(v) => {
                        event.lead_track_title.get_or_insert(v);
                    }
                    Field::Time(v) => {
                        event.time_text.get_or_insert(v);
                    }
                    Field::ReleaseMarker => {}
                }
            }
        }

        if !is_release {
            return None;
        }

        let span = lines.get(group.start..group.end.min(lines.len())).unwrap_or(&[]);
        event.media_link = select_media_link(span.iter().flat_map(|l| l.links.iter()));
        Some(event)
    }
}

/// The last video link among `hrefs`, skipping channel pages.
pub fn select_media_link<'a, I>(hrefs: I) -> Option<Url>
where
    I: IntoIterator<Item = &'a String>,
{
    hrefs
        .into_iter()
        .filter_map(|href| Url::parse(href).ok())
        .filter(is_video_link)
        .last()
}

/// True for any `youtu*` link that is not a channel root.
pub fn is_video_link(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    if !host.contains("youtu") {
        return false;
    }

    let path = url.path();
    if host.ends_with("youtu.be") {
        return path.len() > 1;
    }

    let is_channel = path.is_empty()
        || path == "/"
        || path.starts_with("/@")
        || path.starts_with("/channel/")
        || path.starts_with("/c/")
        || path.starts_with("/user/");
    !is_channel
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use scraper::{Html, Selector};

    fn extractor() -> EventExtractor {
        let offset = FixedOffset::east_opt(-6 * 3600).unwrap();
        EventExtractor::new(DateTimeNormalizer::new(2024, offset))
    }

    fn flatten(html: &str) -> Vec<RowLine> {
        let doc = Html::parse_fragment(html);
        let td = Selector::parse("td").unwrap();
        let cell = doc.select(&td).next().unwrap();
        flatten_cell(cell)
    }

    #[test]
    fn flatten_splits_on_br_and_joins_inline_text() {
        let lines = flatten(
            "<table><tr><td><strong>aespa</strong><br>Title Track: <em>'Whiplash'</em><br>\
             <a href=\"https://youtu.be/abc\">MV</a></td></tr></table>",
        );
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].text, "aespa");
        assert_eq!(lines[1].text, "Title Track: 'Whiplash'");
        assert_eq!(lines[2].text, "MV");
        assert_eq!(lines[2].links, vec!["https://youtu.be/abc".to_string()]);
    }

    #[test]
    fn flatten_treats_paragraphs_as_lines() {
        let lines = flatten("<table><tr><td><p>one</p><p>two <b>three</b></p></td></tr></table>");
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two three"]);
    }

    #[test]
    fn single_group_without_date_prefix() {
        let lines = vec![
            RowLine::text("Album: Armageddon"),
            RowLine::text("Title Track: 'Supernova'"),
        ];
        let groups = extractor().group_lines(&lines, Some(2024));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].date, None);
        assert_eq!(groups[0].lines.len(), 2);
    }

    #[test]
    fn sub_events_split_on_date_lines() {
        let lines = vec![
            RowLine::text("May 13: Pre-release 'Supernova' MV"),
            RowLine::text("May 27: Album: Armageddon"),
            RowLine::text("Title Track: 'Armageddon'"),
        ];
        let groups = extractor().group_lines(&lines, Some(2024));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].date, NaiveDate::from_ymd_opt(2024, 5, 13));
        assert_eq!((groups[0].start, groups[0].end), (0, 1));
        assert_eq!(groups[1].date, NaiveDate::from_ymd_opt(2024, 5, 27));
        assert_eq!(groups[1].lines, vec!["Album: Armageddon", "Title Track: 'Armageddon'"]);
        assert_eq!((groups[1].start, groups[1].end), (1, 3));
    }

    #[test]
    fn groups_without_marker_are_dropped() {
        let lines = vec![
            RowLine::text("May 10: Concept photo"),
            RowLine::text("May 27: Album: Armageddon"),
        ];
        let events = extractor().extract(&lines, Some(2024));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].collection_title.as_deref(), Some("Armageddon"));
    }

    #[test]
    fn media_link_is_scoped_to_the_group() {
        let lines = vec![
            RowLine::text("May 13: Pre-release 'Supernova' MV").with_link("https://youtu.be/first"),
            RowLine::text("May 27: Album: Armageddon"),
            RowLine::text("MV").with_link("https://www.youtube.com/watch?v=second"),
        ];
        let events = extractor().extract(&lines, Some(2024));
        assert_eq!(events[0].media_link.as_ref().map(Url::as_str), Some("https://youtu.be/first"));
        assert_eq!(
            events[1].media_link.as_ref().map(Url::as_str),
            Some("https://www.youtube.com/watch?v=second")
        );
    }

    #[test]
    fn channel_links_are_never_media() {
        let hrefs = vec![
            "https://www.youtube.com/watch?v=video".to_string(),
            "https://www.youtube.com/@aespa".to_string(),
            "https://www.youtube.com/channel/UC123".to_string(),
        ];
        let picked = select_media_link(&hrefs).unwrap();
        assert_eq!(picked.as_str(), "https://www.youtube.com/watch?v=video");

        let only_channels = vec![
            "https://www.youtube.com/c/SMTOWN".to_string(),
            "https://www.youtube.com/".to_string(),
            "https://m.youtube.com/user/ibighit".to_string(),
        ];
        assert!(select_media_link(&only_channels).is_none());
    }

    #[test]
    fn other_youtube_links_count_as_media() {
        for href in [
            "https://www.youtube.com/playlist?list=PL123",
            "https://www.youtube.com/v/abc123",
            "https://www.youtube.com/shorts/abc123",
            "https://youtu.be/abc123",
        ] {
            let url = Url::parse(href).unwrap();
            assert!(is_video_link(&url), "{href}");
        }
        assert!(!is_video_link(&Url::parse("https://youtu.be/").unwrap()));
        assert!(!is_video_link(&Url::parse("https://www.melon.com/album/123").unwrap()));
    }

    #[test]
    fn time_text_is_captured() {
        let lines = vec![RowLine::text("Album: Drama"), RowLine::text("Release at 6 PM KST")];
        let events = extractor().extract(&lines, Some(2024));
        assert_eq!(events[0].time_text.as_deref(), Some("6 PM"));
    }
}
