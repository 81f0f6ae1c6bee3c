//! Parsing configuration for schedule pages
//!
//! Centralized CSS selectors. Every field is a list of fallbacks tried in
//! order; the site has changed its table markup several times.

use scraper::Selector;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{ReleaseError, ReleaseResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSelectors {
    /// One table row per announced entity
    pub row: Vec<String>,

    /// Row-level date column
    pub date: Vec<String>,

    /// Row-level time column
    pub time: Vec<String>,

    /// Cell holding the subject name and the multi-line details
    pub details: Vec<String>,

    /// Subject name inside the details cell (primary, then fallbacks)
    pub subject: Vec<String>,

    /// Month links on the listing page
    pub listing_link: Vec<String>,
}

impl Default for ScheduleSelectors {
    fn default() -> Self {
        Self {
            row: vec![
                "table.comeback-table tbody tr".to_string(),
                "figure.wp-block-table tbody tr".to_string(),
                "table tbody tr".to_string(),
                "table tr".to_string(),
            ],
            date: vec![
                "td.date".to_string(),
                "td:nth-child(1)".to_string(),
            ],
            time: vec![
                "td.time".to_string(),
                "td:nth-child(2)".to_string(),
            ],
            details: vec![
                "td.details".to_string(),
                "td:nth-child(3)".to_string(),
            ],
            subject: vec![
                "strong".to_string(),
                "b".to_string(),
            ],
            listing_link: vec![
                "article h2 a[href]".to_string(),
                ".entry-title a[href]".to_string(),
                "a[href]".to_string(),
            ],
        }
    }
}

/// Selector lists compiled once per parser
#[derive(Debug, Clone)]
pub struct CompiledSelectors {
    pub row: Vec<Selector>,
    pub date: Vec<Selector>,
    pub time: Vec<Selector>,
    pub details: Vec<Selector>,
    pub subject: Vec<Selector>,
    pub listing_link: Vec<Selector>,
}

impl ScheduleSelectors {
    pub fn compile(&self) -> ReleaseResult<CompiledSelectors> {
        Ok(CompiledSelectors {
            row: compile_selectors(&self.row)?,
            date: compile_selectors(&self.date)?,
            time: compile_selectors(&self.time)?,
            details: compile_selectors(&self.details)?,
            subject: compile_selectors(&self.subject)?,
            listing_link: compile_selectors(&self.listing_link)?,
        })
    }
}

/// Compile a fallback list, skipping broken entries as long as one survives.
pub fn compile_selectors(selector_strings: &[String]) -> ReleaseResult<Vec<Selector>> {
    let mut selectors = Vec::new();
    let mut errors = Vec::new();

    for selector_str in selector_strings {
        match Selector::parse(selector_str) {
            Ok(selector) => selectors.push(selector),
            Err(e) => {
                warn!("Failed to compile selector '{}': {}", selector_str, e);
                errors.push(format!("'{selector_str}': {e}"));
            }
        }
    }

    if selectors.is_empty() {
        return Err(ReleaseError::InvalidSelector {
            selector: selector_strings.join(", "),
            reason: if errors.is_empty() {
                "no selectors configured".to_string()
            } else {
                errors.join(", ")
            },
        });
    }

    if !errors.is_empty() {
        debug!("Some selectors failed to compile: {}", errors.join(", "));
    }

    Ok(selectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selectors_compile() {
        let compiled = ScheduleSelectors::default().compile().unwrap();
        assert_eq!(compiled.row.len(), 4);
        assert_eq!(compiled.subject.len(), 2);
    }

    #[test]
    fn broken_entries_are_skipped() {
        let selectors = vec!["td[".to_string(), "td.date".to_string()];
        assert_eq!(compile_selectors(&selectors).unwrap().len(), 1);
    }

    #[test]
    fn all_broken_is_an_error() {
        let err = compile_selectors(&["td[".to_string()]).unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidSelector { .. }));
        assert!(compile_selectors(&[]).is_err());
    }
}
