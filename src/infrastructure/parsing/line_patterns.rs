//! Line patterns for schedule detail text
//!
//! Each pattern looks at one logical line and yields at most one [`Field`].
//! The extractor runs the whole list over every line, so a new markup quirk
//! is a new pattern, not a new branch in the extractor.

use once_cell::sync::Lazy;
use regex::Regex;

/// A value recognised on one detail line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// Album / OST name
    Collection(String),
    /// Title-track name
    LeadTrack(String),
    /// The line announces a release but carries no extractable value
    ReleaseMarker,
    /// Raw KST time text (`6 PM`, `6:30 pm`)
    Time(String),
}

impl Field {
    pub const fn marks_release(&self) -> bool {
        !matches!(self, Self::Time(_))
    }
}

pub trait LinePattern: Send + Sync {
    fn name(&self) -> &'static str;

    fn match_line(&self, line: &str) -> Option<Field>;
}

static COLLECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:album|ost)\s*:\s*(.+)$").expect("collection regex"));

static TITLE_TRACK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\btitle\s+track\s*:\s*(.+)$").expect("title track regex"));

static RELEASE_WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:pre-)?release\b").expect("release regex"));

static MV_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bm/?v\b").expect("mv regex"));

/// An opening quote sits at the start or after a non-word character.
static OPEN_QUOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[^\p{L}\p{N}])(['"‘“])"#).expect("open quote regex")
});

static FILLER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:pre-release|release|m/?v)\b").expect("filler regex")
});

static TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bat\s+(\d{1,2}(?::\d{2})?\s*[ap]\.?\s*m\.?)").expect("time regex")
});

static SEPARATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+[/|•]\s+|\s+title\s+track\s*:").expect("separator regex")
});

/// `Album: X`, `Mini Album: X`, `OST: X`
#[derive(Debug, Default)]
pub struct CollectionPattern;

impl LinePattern for CollectionPattern {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn match_line(&self, line: &str) -> Option<Field> {
        let caps = COLLECTION.captures(line)?;
        let value = cut_at_separator(&caps[1]);
        let value = trim_decoration(value);
        (!value.is_empty()).then(|| Field::Collection(value))
    }
}

/// `Title Track: 'X'`
#[derive(Debug, Default)]
pub struct TitleTrackPattern;

impl LinePattern for TitleTrackPattern {
    fn name(&self) -> &'static str {
        "title_track"
    }

    fn match_line(&self, line: &str) -> Option<Field> {
        let caps = TITLE_TRACK.captures(line)?;
        let tail = &caps[1];
        let value = first_quoted(tail).unwrap_or_else(|| strip_filler(cut_at_separator(tail)));
        (!value.is_empty()).then(|| Field::LeadTrack(value))
    }
}

/// `Pre-release 'X' MV`, `'X' MV Release`
#[derive(Debug, Default)]
pub struct ReleaseTrackPattern;

impl LinePattern for ReleaseTrackPattern {
    fn name(&self) -> &'static str {
        "release_track"
    }

    fn match_line(&self, line: &str) -> Option<Field> {
        let marker = RELEASE_WORD.find(line)?;
        let after = first_quoted(&line[marker.end()..]);
        let value = match after {
            Some(v) => v,
            None if MV_WORD.is_match(line) => first_quoted(line)?,
            None => return None,
        };
        let value = strip_filler(&value);
        (!value.is_empty()).then(|| Field::LeadTrack(value))
    }
}

/// Keyword scan that tells a release apart from teasers and posters.
#[derive(Debug, Default)]
pub struct ReleaseMarkerPattern;

impl LinePattern for ReleaseMarkerPattern {
    fn name(&self) -> &'static str {
        "release_marker"
    }

    fn match_line(&self, line: &str) -> Option<Field> {
        is_release_marker(line).then_some(Field::ReleaseMarker)
    }
}

/// `... at 6 PM KST`
#[derive(Debug, Default)]
pub struct TimePattern;

impl LinePattern for TimePattern {
    fn name(&self) -> &'static str {
        "time"
    }

    fn match_line(&self, line: &str) -> Option<Field> {
        TIME.captures(line).map(|caps| Field::Time(caps[1].trim().to_string()))
    }
}

/// The ordered pattern list used by default.
pub fn default_patterns() -> Vec<Box<dyn LinePattern>> {
    vec![
        Box::new(TitleTrackPattern),
        Box::new(CollectionPattern),
        Box::new(ReleaseTrackPattern),
        Box::new(ReleaseMarkerPattern),
        Box::new(TimePattern),
    ]
}

/// `album:`, `ost:`, `title track:`, `pre-release`, `mini album`, or `release` with `mv`.
pub fn is_release_marker(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("album:")
        || lower.contains("ost:")
        || TITLE_TRACK.is_match(line)
        || lower.contains("pre-release")
        || lower.contains("mini album")
        || (RELEASE_WORD.is_match(line) && MV_WORD.is_match(line))
}

fn closing_quotes(open: char) -> &'static [char] {
    match open {
        '"' | '“' => &['"', '”'],
        _ => &['\'', '’'],
    }
}

/// First quoted value in `text`.
///
/// A closing quote only counts when no letter or digit follows it, so
/// apostrophes inside the title stay part of it.
fn first_quoted(text: &str) -> Option<String> {
    for caps in OPEN_QUOTE.captures_iter(text) {
        let Some(open) = caps.get(1) else { continue };
        let Some(open_char) = open.as_str().chars().next() else { continue };
        let closers = closing_quotes(open_char);
        let body = &text[open.end()..];

        let mut chars = body.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            let at_word_end = chars.peek().is_none_or(|(_, next)| !next.is_alphanumeric());
            if closers.contains(&c) && at_word_end {
                let value = body[..i].trim();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
                break;
            }
        }
    }
    None
}

fn strip_filler(text: &str) -> String {
    let stripped = FILLER.replace_all(text, " ");
    trim_decoration(&stripped)
}

fn cut_at_separator(text: &str) -> &str {
    SEPARATOR.find(text).map_or(text, |m| &text[..m.start()])
}

fn trim_decoration(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| matches!(c, '\'' | '"' | '‘' | '’' | '“' | '”' | ',' | ':' | '-' | '(' | ')'))
        .trim()
        .to_string()
}
