//! HTML parsing helpers for listing and item pages
//!
//! This module handles parsing HTML content to extract:
//! - Item links from a listing page (deduplicated, absolute)
//! - The presence of a "next page" control
//! - Normalized element text and attribute URLs for record extraction

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Links and pagination state read from one listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedListing {
    /// Absolute item URLs in document order, without duplicates
    pub item_urls: Vec<String>,

    /// Whether the configured "next page" control is present
    pub has_next_marker: bool,
}

/// Parses a listing page
///
/// # Arguments
///
/// * `html` - The listing page markup
/// * `base_url` - URL the page was served from, for resolving relative links
/// * `item_selector` - Selects the item links (`href` attribute)
/// * `next_selector` - Selects the "next page" control, if the site has one
///
/// # Returns
///
/// The parsed listing; `has_next_marker` is true when no next selector is
/// configured
pub fn parse_listing(
    html: &str,
    base_url: &Url,
    item_selector: &Selector,
    next_selector: Option<&Selector>,
) -> ParsedListing {
    let document = Html::parse_document(html);

    let mut seen = HashSet::new();
    let mut item_urls = Vec::new();
    for element in document.select(item_selector) {
        if let Some(href) = element.value().attr("href") {
            if let Some(absolute_url) = resolve_link(href, base_url) {
                if seen.insert(absolute_url.clone()) {
                    item_urls.push(absolute_url);
                }
            }
        }
    }

    let has_next_marker = match next_selector {
        Some(selector) => document.select(selector).next().is_some(),
        None => true,
    };

    ParsedListing {
        item_urls,
        has_next_marker,
    }
}

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - Fragment-only anchors
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
///
/// The fragment of the resolved URL is dropped.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut absolute_url = base_url.join(href).ok()?;
    if absolute_url.scheme() != "http" && absolute_url.scheme() != "https" {
        return None;
    }
    absolute_url.set_fragment(None);
    Some(absolute_url.to_string())
}

/// Text of the first element matching `selector`, whitespace-collapsed
///
/// Returns None when nothing matches or the text is empty.
pub fn first_text(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

/// Collapses all whitespace runs in an element's text to single spaces
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Absolute URLs of the elements matching `selector`
///
/// Reads `src`, falling back to `data-src` for lazily loaded images.
pub fn image_sources(document: &Html, selector: &Selector, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    document
        .select(selector)
        .filter_map(|element| {
            let value = element.value();
            value
                .attr("src")
                .filter(|s| !s.trim().is_empty() && !s.starts_with("data:"))
                .or_else(|| value.attr("data-src"))
        })
        .filter_map(|src| resolve_link(src, base_url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_url() -> Url {
        Url::parse("https://listings.example.com/search/lisbon?page=2").unwrap()
    }

    fn selector(s: &str) -> Selector {
        Selector::parse(s).unwrap()
    }

    #[test]
    fn test_listing_links_resolved_and_deduplicated() {
        let html = r##"
            <ul>
              <li><a class="item" href="/item/1">One</a></li>
              <li><a class="item" href="/item/1#photos">One again</a></li>
              <li><a class="item" href="https://listings.example.com/item/2">Two</a></li>
              <li><a class="other" href="/about">About</a></li>
              <li><a class="item" href="javascript:void(0)">Bad</a></li>
            </ul>
        "##;

        let parsed = parse_listing(html, &base_url(), &selector("a.item"), None);
        assert_eq!(
            parsed.item_urls,
            vec![
                "https://listings.example.com/item/1",
                "https://listings.example.com/item/2",
            ]
        );
        assert!(parsed.has_next_marker);
    }

    #[test]
    fn test_next_marker() {
        let next = selector("a.next");
        let with_next = r#"<a class="item" href="/item/1">1</a><a class="next" href="?page=3">Next</a>"#;
        let without_next = r#"<a class="item" href="/item/1">1</a>"#;

        assert!(parse_listing(with_next, &base_url(), &selector("a.item"), Some(&next)).has_next_marker);
        assert!(!parse_listing(without_next, &base_url(), &selector("a.item"), Some(&next)).has_next_marker);
    }

    #[test]
    fn test_resolve_link_rejects_special_schemes() {
        let base = base_url();
        assert_eq!(resolve_link("mailto:a@b.com", &base), None);
        assert_eq!(resolve_link("tel:123", &base), None);
        assert_eq!(resolve_link("#top", &base), None);
        assert_eq!(resolve_link("  ", &base), None);
        assert_eq!(resolve_link("ftp://files.example.com/x", &base), None);
        assert_eq!(
            resolve_link("item/9", &base),
            Some("https://listings.example.com/search/item/9".to_string())
        );
    }

    #[test]
    fn test_first_text_collapses_whitespace() {
        let document = Html::parse_document("<h1>\n  Bright   two-bedroom\n flat </h1>");
        assert_eq!(
            first_text(&document, &selector("h1")),
            Some("Bright two-bedroom flat".to_string())
        );
        assert_eq!(first_text(&document, &selector("h2")), None);
    }

    #[test]
    fn test_image_sources_fall_back_to_data_src() {
        let document = Html::parse_document(
            r#"
            <img class="photo" src="/img/1.jpg">
            <img class="photo" src="data:image/gif;base64,R0l" data-src="/img/2.jpg">
            <img class="photo" data-src="/img/3.webp">
            <img class="photo" src="/img/1.jpg">
            "#,
        );
        assert_eq!(
            image_sources(&document, &selector("img.photo"), &base_url()),
            vec![
                "https://listings.example.com/img/1.jpg",
                "https://listings.example.com/img/2.jpg",
                "https://listings.example.com/img/3.webp",
            ]
        );
    }
}
