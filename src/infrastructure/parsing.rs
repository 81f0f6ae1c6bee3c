//! HTML parsing for the comeback schedule site
//!
//! Selector configuration, date/time normalization, per-line field patterns,
//! and the two page parsers (listing page and month page).

pub mod config;
pub mod date_time;
pub mod event_extractor;
pub mod line_patterns;
pub mod link_list_parser;
pub mod page_parser;

pub use config::{CompiledSelectors, ScheduleSelectors};
pub use date_time::{DateTimeNormalizer, LocalTime, NormalizedDateTime, format_canonical};
pub use event_extractor::{EventExtractor, EventGroup, ExtractedEvent, RowLine};
pub use line_patterns::{Field, LinePattern};
pub use link_list_parser::LinkListParser;
pub use page_parser::{PageParser, reduce_candidates};
