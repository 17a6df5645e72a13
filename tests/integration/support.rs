//! Shared fixtures: a mock listing site and a zero-delay configuration

use listing_harvest::config::{parse_config, Config};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Builds a configuration pointed at the mock server
///
/// All pacing, backoff and dwell delays are zero so the crawl runs at the
/// speed of the mock server.
pub fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    let db_path = dir.path().join("crawl.db");
    let image_dir = dir.path().join("images");
    let toml = format!(
        r#"
[target]
base-url = "{base}"
listing-path = "/search/{{collection}}?page={{page}}"
item-link-selector = "a.listing"
next-page-selector = "a.next"
items-per-page = 3

[crawl]
collection-key = "lisbon"
max-pages = 2
persist-every = 2

[fetch]
strategy = "pooled"
user-agents = ["IntegrationBot/1.0"]

[fetch.pooled]
max-concurrent-sessions = 2
max-requests-per-minute = 10000

[fetch.isolated]
min-delay-ms = 0
max-delay-ms = 0
dwell-min-ms = 0
dwell-max-ms = 0
scroll-steps = 0
scroll-pause-min-ms = 0
scroll-pause-max-ms = 0

[retry]
max-retries = 2
base-delay-ms = 0
increment-ms = 0
jitter-ms = 0
rate-limit-backoff-ms = 0

[challenge]
passive-backoff-min-ms = 0
passive-backoff-max-ms = 0

[extraction]
title-selector = "h1"
image-selector = "img.photo"

[extraction.fields]
price = ".price"

[output]
database-path = "{db}"
image-dir = "{images}"
"#,
        base = server.uri(),
        db = db_path.display(),
        images = image_dir.display(),
    );
    parse_config(&toml).expect("test config parses")
}

/// Mounts one listing page linking to the given item numbers
pub async fn mount_listing(server: &MockServer, page: u32, items: &[u32], has_next: bool) {
    let links: String = items
        .iter()
        .map(|n| format!(r#"<a class="listing" href="/item/{}">Item {}</a>"#, n, n))
        .collect();
    let next = if has_next {
        format!(r#"<a class="next" href="?page={}">Next</a>"#, page + 1)
    } else {
        String::new()
    };

    Mock::given(method("GET"))
        .and(path("/search/lisbon"))
        .and(query_param("page", page.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!("<html><body>{}{}</body></html>", links, next))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

/// Markup of a regular item page
pub fn item_html(n: u32, with_image: bool) -> String {
    let image = if with_image {
        format!(r#"<img class="photo" src="/img/{}.png">"#, n)
    } else {
        String::new()
    };
    format!(
        r#"<html><body><h1>Flat {n}</h1><span class="price">{price} EUR</span>{image}</body></html>"#,
        n = n,
        price = 100 * n,
        image = image,
    )
}

/// Mounts a regular item page
pub async fn mount_item(server: &MockServer, n: u32) {
    Mock::given(method("GET"))
        .and(path(format!("/item/{}", n)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(item_html(n, false))
                .insert_header("content-type", "text/html"),
        )
        .mount(server)
        .await;
}

pub fn item_url(server: &MockServer, n: u32) -> String {
    format!("{}/item/{}", server.uri(), n)
}
