//! Record extraction from item pages

use crate::config::ExtractionConfig;
use crate::crawler::parser::{first_text, image_sources};
use crate::crawler::session::FetchedPage;
use crate::storage::StructuredRecord;
use crate::CrawlError;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use url::Url;

/// Turns a fetched item page into a structured record
pub trait ExtractionService: Send + Sync {
    /// Returns None when the page does not hold a usable record
    ///
    /// `image_urls` is left for [`ExtractionService::extract_image_urls`].
    fn extract_record(&self, page: &FetchedPage, collection_key: &str) -> Option<StructuredRecord>;

    /// Absolute image URLs on the page
    fn extract_image_urls(&self, page: &FetchedPage) -> Vec<String>;
}

/// Extraction driven by CSS selectors from the configuration
pub struct SelectorExtractor {
    title: Selector,
    image: Option<Selector>,
    fields: Vec<(String, Selector)>,
}

impl SelectorExtractor {
    pub fn from_config(config: &ExtractionConfig) -> Result<Self, CrawlError> {
        let fields = config
            .fields
            .iter()
            .map(|(name, selector)| Ok((name.clone(), parse_selector(selector)?)))
            .collect::<Result<Vec<_>, CrawlError>>()?;

        Ok(Self {
            title: parse_selector(&config.title_selector)?,
            image: config.image_selector.as_deref().map(parse_selector).transpose()?,
            fields,
        })
    }
}

impl ExtractionService for SelectorExtractor {
    fn extract_record(&self, page: &FetchedPage, collection_key: &str) -> Option<StructuredRecord> {
        let id = record_id(&page.url)?;
        let document = Html::parse_document(&page.body);
        let title = first_text(&document, &self.title)?;

        let fields: BTreeMap<String, String> = self
            .fields
            .iter()
            .filter_map(|(name, selector)| {
                first_text(&document, selector).map(|value| (name.clone(), value))
            })
            .collect();

        Some(StructuredRecord {
            id,
            url: page.url.clone(),
            collection_key: collection_key.to_string(),
            title,
            fields,
            image_urls: Vec::new(),
        })
    }

    fn extract_image_urls(&self, page: &FetchedPage) -> Vec<String> {
        match (&self.image, page_base(page)) {
            (Some(selector), Some(base)) => {
                image_sources(&Html::parse_document(&page.body), selector, &base)
            }
            _ => Vec::new(),
        }
    }
}

/// Last non-empty path segment of an item URL
///
/// `https://site/rooms/12345/?adults=2` gives `12345`.
pub fn record_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

fn page_base(page: &FetchedPage) -> Option<Url> {
    Url::parse(&page.final_url)
        .or_else(|_| Url::parse(&page.url))
        .ok()
}

fn parse_selector(selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector).map_err(|e| CrawlError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}
