//! Listing pages of the discovery phase

use crate::config::TargetConfig;
use crate::crawler::inspect::PageInspector;
use crate::crawler::parser::parse_listing;
use crate::crawler::retry::Attempt;
use crate::crawler::session::{BrowserSession, SessionFactory};
use crate::state::FetchStatus;
use crate::CrawlError;
use async_trait::async_trait;
use scraper::Selector;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::Url;

/// Item links found on one listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage {
    pub page_number: u32,
    pub item_urls: Vec<String>,
    /// False when this is the last page of the collection
    pub has_next: bool,
}

/// Source of paginated listing views
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetches and classifies one 1-based listing page
    async fn fetch_listing(&self, collection_key: &str, page: u32) -> Attempt<ListingPage>;

    /// Releases any session held by the source
    async fn close(&self) {}
}

/// Listing pages rendered from a URL template and read with CSS selectors
///
/// Discovery is sequential, so a single session is reused across pages.
pub struct HtmlListingSource {
    base_url: Url,
    path_template: String,
    item_selector: Selector,
    next_selector: Option<Selector>,
    factory: Arc<dyn SessionFactory>,
    inspector: Arc<PageInspector>,
    session: Mutex<Option<Box<dyn BrowserSession>>>,
}

impl HtmlListingSource {
    pub fn new(
        config: &TargetConfig,
        factory: Arc<dyn SessionFactory>,
        inspector: Arc<PageInspector>,
    ) -> Result<Self, CrawlError> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            path_template: config.listing_path.clone(),
            item_selector: parse_selector(&config.item_link_selector)?,
            next_selector: config
                .next_page_selector
                .as_deref()
                .map(parse_selector)
                .transpose()?,
            factory,
            inspector,
            session: Mutex::new(None),
        })
    }

    /// URL of a listing page
    pub fn listing_url(&self, collection_key: &str, page: u32) -> Result<Url, url::ParseError> {
        let collection: String =
            url::form_urlencoded::byte_serialize(collection_key.as_bytes()).collect();
        let path = self
            .path_template
            .replace("{collection}", &collection)
            .replace("{page}", &page.to_string());
        self.base_url.join(&path)
    }
}

#[async_trait]
impl ListingSource for HtmlListingSource {
    async fn fetch_listing(&self, collection_key: &str, page: u32) -> Attempt<ListingPage> {
        let url = match self.listing_url(collection_key, page) {
            Ok(url) => url,
            Err(e) => {
                return Attempt::terminal(
                    FetchStatus::TransportError,
                    format!("invalid listing url: {}", e),
                )
            }
        };

        let mut slot = self.session.lock().await;
        if slot.is_none() {
            match self.factory.open().await {
                Ok(session) => *slot = Some(session),
                Err(e) => return Attempt::transient(FetchStatus::TransportError, e.to_string()),
            }
        }
        let Some(session) = slot.as_mut() else {
            return Attempt::transient(FetchStatus::TransportError, "no listing session");
        };

        tracing::debug!("Fetching listing page {} of '{}': {}", page, collection_key, url);
        let navigation = session.navigate(url.as_str()).await;
        let transport_failed = navigation.is_err();
        let attempt = self.inspector.inspect(session.as_mut(), navigation).await;

        if transport_failed {
            if let Some(session) = slot.take() {
                session.close().await;
            }
        }
        drop(slot);

        attempt.map(|fetched| {
            let base = Url::parse(&fetched.final_url).unwrap_or_else(|_| url.clone());
            let parsed = parse_listing(
                &fetched.body,
                &base,
                &self.item_selector,
                self.next_selector.as_ref(),
            );
            ListingPage {
                page_number: page,
                has_next: !parsed.item_urls.is_empty() && parsed.has_next_marker,
                item_urls: parsed.item_urls,
            }
        })
    }

    async fn close(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector).map_err(|e| CrawlError::Selector {
        selector: selector.to_string(),
        message: format!("{:?}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChallengeConfig, FetchConfig};
    use crate::crawler::detector::MarkerSet;
    use crate::crawler::jitter::SequenceJitter;
    use crate::crawler::mitigation::ChallengeMitigator;
    use crate::crawler::session::{HttpSessionFactory, HumanProfile};
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(base_url: &str, next: Option<&str>) -> TargetConfig {
        TargetConfig {
            base_url: base_url.to_string(),
            listing_path: "/search/{collection}?page={page}".to_string(),
            item_link_selector: "a.listing".to_string(),
            next_page_selector: next.map(str::to_string),
            items_per_page: 2,
        }
    }

    fn source(config: &TargetConfig) -> HtmlListingSource {
        let markers = MarkerSet::new(&["captcha".to_string()], &[], &[]).unwrap();
        let challenge = ChallengeConfig {
            passive_backoff_min_ms: 0,
            passive_backoff_max_ms: 0,
            ..ChallengeConfig::default()
        };
        let inspector = Arc::new(PageInspector::new(
            markers,
            ChallengeMitigator::new(&challenge, HumanProfile::none(), None),
            Duration::ZERO,
            Arc::new(SequenceJitter::zero()),
        ));
        let factory = Arc::new(HttpSessionFactory::new(&FetchConfig::default()));
        HtmlListingSource::new(config, factory, inspector).unwrap()
    }

    #[test]
    fn test_listing_url_template() {
        let config = target("https://listings.example.com", None);
        let source = source(&config);

        assert_eq!(
            source.listing_url("são paulo", 3).unwrap().as_str(),
            "https://listings.example.com/search/s%C3%A3o+paulo?page=3"
        );
    }

    #[tokio::test]
    async fn test_fetch_listing_reads_items_and_next_marker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/lisbon"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<a class="listing" href="/item/1">1</a>
                   <a class="listing" href="/item/2">2</a>
                   <a class="next" href="?page=2">next</a>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search/lisbon"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<a class="listing" href="/item/3">3</a>"#),
            )
            .mount(&server)
            .await;

        let config = target(&server.uri(), Some("a.next"));
        let source = source(&config);

        let first = match source.fetch_listing("lisbon", 1).await {
            Attempt::Success(page) => page,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(first.item_urls.len(), 2);
        assert!(first.item_urls[0].ends_with("/item/1"));
        assert!(first.has_next);

        let second = match source.fetch_listing("lisbon", 2).await {
            Attempt::Success(page) => page,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(second.item_urls.len(), 1);
        assert!(!second.has_next);

        source.close().await;
    }

    #[tokio::test]
    async fn test_empty_listing_has_no_next_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>No results</p>"))
            .mount(&server)
            .await;

        let source = source(&target(&server.uri(), None));
        match source.fetch_listing("lisbon", 9).await {
            Attempt::Success(page) => {
                assert!(page.item_urls.is_empty());
                assert!(!page.has_next);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_listing_not_found_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = source(&target(&server.uri(), None));
        assert!(matches!(
            source.fetch_listing("lisbon", 1).await,
            Attempt::Terminal {
                status: FetchStatus::HttpError(404),
                ..
            }
        ));
    }
}
