//! Blocking and challenge detection
//!
//! Classifies the body of a fetched page as clean, challenged or
//! rate-limited. The checks are plain substring and selector presence tests
//! against a site-specific marker set, applied in a fixed order: challenge
//! markers win over rate-limit phrases.

use crate::config::DetectionConfig;
use crate::CrawlError;
use scraper::{Html, Selector};

/// What a fetched page turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// Real content
    Clean,
    /// An anti-automation interstitial was served instead of content
    Challenged,
    /// The site asked us to slow down
    RateLimited,
}

/// Site-specific markers used by the detector
#[derive(Debug, Clone)]
pub struct MarkerSet {
    challenge_texts: Vec<String>,
    challenge_selectors: Vec<Selector>,
    rate_limit_texts: Vec<String>,
}

impl MarkerSet {
    /// Builds a marker set from text markers and CSS selectors
    ///
    /// Text markers are matched case-insensitively.
    pub fn new(
        challenge_texts: &[String],
        challenge_selectors: &[String],
        rate_limit_texts: &[String],
    ) -> Result<Self, CrawlError> {
        let selectors = challenge_selectors
            .iter()
            .map(|s| {
                Selector::parse(s).map_err(|e| CrawlError::Selector {
                    selector: s.clone(),
                    message: format!("{:?}", e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            challenge_texts: lowercase_all(challenge_texts),
            challenge_selectors: selectors,
            rate_limit_texts: lowercase_all(rate_limit_texts),
        })
    }

    pub fn from_config(config: &DetectionConfig) -> Result<Self, CrawlError> {
        Self::new(
            &config.challenge_markers,
            &config.challenge_selectors,
            &config.rate_limit_markers,
        )
    }

    /// Classifies a page body
    pub fn detect(&self, body: &str) -> PageVerdict {
        let lowered = body.to_lowercase();

        if self.challenge_texts.iter().any(|m| lowered.contains(m.as_str())) {
            return PageVerdict::Challenged;
        }

        if !self.challenge_selectors.is_empty() {
            let document = Html::parse_document(body);
            if self
                .challenge_selectors
                .iter()
                .any(|s| document.select(s).next().is_some())
            {
                return PageVerdict::Challenged;
            }
        }

        if self.rate_limit_texts.iter().any(|m| lowered.contains(m.as_str())) {
            return PageVerdict::RateLimited;
        }

        PageVerdict::Clean
    }
}

fn lowercase_all(markers: &[String]) -> Vec<String> {
    markers
        .iter()
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .collect()
}
