//! Listing page parser: month links for the requested buckets

use std::collections::HashSet;

use scraper::Html;
use tracing::{debug, warn};
use url::Url;

use super::config::{ScheduleSelectors, compile_selectors};
use crate::domain::{ReleaseResult, TimeBucket};

#[derive(Debug, Clone)]
pub struct LinkListParser {
    selectors: Vec<scraper::Selector>,
    keyword: String,
}

impl LinkListParser {
    pub fn new(selectors: &ScheduleSelectors, keyword: impl Into<String>) -> ReleaseResult<Self> {
        Ok(Self {
            selectors: compile_selectors(&selectors.listing_link)?,
            keyword: keyword.into().to_lowercase(),
        })
    }

    /// Links on the listing page that carry the keyword and match one of `buckets`.
    ///
    /// Relative hrefs are resolved against `base_url`. Document order is kept
    /// and duplicates are dropped.
    pub fn parse(&self, html: &str, base_url: &Url, buckets: &[TimeBucket]) -> Vec<Url> {
        let document = Html::parse_document(html);
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for selector in &self.selectors {
            for element in document.select(selector) {
                let Some(href) = element.value().attr("href") else {
                    continue;
                };
                let url = match base_url.join(href.trim()) {
                    Ok(url) => url,
                    Err(e) => {
                        warn!("Skipping unresolvable link '{}': {}", href, e);
                        continue;
                    }
                };
                let lowered = url.as_str().to_lowercase();
                if !lowered.contains(&self.keyword) {
                    continue;
                }
                if !buckets.iter().any(|b| b.matches_link(&lowered)) {
                    continue;
                }
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
            if !links.is_empty() {
                break;
            }
        }

        debug!("Listing page yielded {} links for {} buckets", links.len(), buckets.len());
        links
    }
}
