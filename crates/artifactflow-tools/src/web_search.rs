//! Web search tool -- DuckDuckGo HTML endpoint, no API key needed.
//!
//! The returned document is parsed as a DOM and results are pulled out
//! with CSS selectors. DuckDuckGo wraps result links in a redirect
//! (`//duckduckgo.com/l/?uddg=<target>`); those are unwrapped to the real
//! destination through `url::Url`, whose query decoding treats
//! percent-escapes as UTF-8, so non-ASCII targets survive intact.

use std::sync::OnceLock;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::base::{Tool, ToolParameter, ToolResult};

/// Default maximum number of search results to return.
const DEFAULT_MAX_RESULTS: usize = 10;

/// DuckDuckGo HTML search endpoint.
const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";

/// Browser-like User-Agent; the HTML endpoint rejects obvious bots.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0";

fn result_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("div.result").expect("static selector"))
}

fn link_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a.result__a").expect("static selector"))
}

fn snippet_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(".result__snippet").expect("static selector"))
}

/// One search hit handed back to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Web search over the DuckDuckGo HTML endpoint.
pub struct WebSearchTool {
    client: reqwest::Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, String> {
        // POST with form data is more reliable than GET for this endpoint.
        let response = self
            .client
            .post(DUCKDUCKGO_HTML_URL)
            .form(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("search request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("search returned status {}", response.status()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| format!("failed to read search response: {e}"))?;

        Ok(scrape_results(&html, max_results))
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return titles, URLs, and snippets. Returns up to \
         10 results by default."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("query", "string", "The search query"),
            ToolParameter::optional("max_results", "integer", "Maximum number of results (default: 10)"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let query = params["query"].as_str().unwrap_or_default();
        if query.trim().is_empty() {
            return ToolResult::err("query must not be empty");
        }
        let max_results = params["max_results"]
            .as_u64()
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS);

        debug!(query, max_results, "performing web search");

        match self.search(query, max_results).await {
            Ok(results) => {
                debug!(count = results.len(), "search completed");
                ToolResult::ok(json!({ "query": query, "results": results }))
            }
            Err(reason) => ToolResult::err(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Result page scraping
// ---------------------------------------------------------------------------

/// Pull search hits out of a result page.
///
/// Each hit lives in a `div.result` containing an `a.result__a` title link
/// and a `.result__snippet`. Layouts without the container divs degrade to
/// bare title anchors with empty snippets rather than nothing.
fn scrape_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let document = Html::parse_document(html);
    let mut hits = Vec::new();

    for container in document.select(result_selector()) {
        if hits.len() >= max_results {
            break;
        }
        // Ad blocks and spelling suggestions have no title link.
        let Some(link) = container.select(link_selector()).next() else {
            continue;
        };

        let snippet = container
            .select(snippet_selector())
            .next()
            .map(|s| element_text(&s))
            .unwrap_or_default();

        if let Some(hit) = hit_from_link(&link, snippet) {
            hits.push(hit);
        }
    }

    if hits.is_empty() {
        for link in document.select(link_selector()).take(max_results) {
            if let Some(hit) = hit_from_link(&link, String::new()) {
                hits.push(hit);
            }
        }
    }

    hits
}

fn hit_from_link(link: &ElementRef<'_>, snippet: String) -> Option<SearchHit> {
    let title = element_text(link);
    let url = resolve_result_url(link.value().attr("href").unwrap_or_default());

    if title.is_empty() && url.is_empty() {
        return None;
    }
    Some(SearchHit {
        title,
        url,
        snippet,
    })
}

/// Visible text of an element with whitespace collapsed.
fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Unwrap a result link to its real destination.
///
/// Scheme-relative hrefs get `https:`; DuckDuckGo redirect links
/// (`duckduckgo.com/l/?uddg=<target>`) yield the decoded `uddg` pair.
fn resolve_result_url(href: &str) -> String {
    let absolute = match href.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => href.to_string(),
    };

    let Ok(parsed) = Url::parse(&absolute) else {
        return absolute;
    };

    let is_redirect = parsed
        .host_str()
        .is_some_and(|host| host == "duckduckgo.com" || host.ends_with(".duckduckgo.com"))
        && parsed.path().starts_with("/l/");

    if is_redirect {
        if let Some((_, target)) = parsed.query_pairs().find(|(key, _)| key.as_ref() == "uddg") {
            return target.into_owned();
        }
    }

    absolute
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_PAGE: &str = r##"
    <div class="serp__results">
        <div class="result results_links results_links_deep web-result">
            <h2 class="result__title">
                <a rel="nofollow" class="result__a"
                   href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fdocs&amp;rut=abc">
                   Example
                   <b>Docs</b></a>
            </h2>
            <a class="result__snippet" href="#">Reference material about <b>examples</b>.</a>
        </div>
        <div class="result web-result">
            <a rel="nofollow" class="result__a" href="https://other.test/page">Other Result</a>
            <span class="result__snippet">Another snippet.</span>
        </div>
    </div>
    "##;

    #[tokio::test]
    async fn empty_query_rejected() {
        let tool = WebSearchTool::new();
        let result = tool.call(json!({"query": "  "})).await;
        assert!(!result.success);
    }

    #[test]
    fn scrape_extracts_title_url_and_snippet() {
        let hits = scrape_results(SAMPLE_PAGE, 10);
        assert_eq!(hits.len(), 2);

        assert_eq!(hits[0].title, "Example Docs");
        assert_eq!(hits[0].url, "https://example.com/docs");
        assert_eq!(hits[0].snippet, "Reference material about examples.");

        assert_eq!(hits[1].title, "Other Result");
        assert_eq!(hits[1].url, "https://other.test/page");
        assert_eq!(hits[1].snippet, "Another snippet.");
    }

    #[test]
    fn scrape_respects_max_results() {
        assert_eq!(scrape_results(SAMPLE_PAGE, 1).len(), 1);
    }

    #[test]
    fn scrape_handles_empty_document() {
        assert!(scrape_results("", 5).is_empty());
        assert!(scrape_results("<html><body>no results</body></html>", 5).is_empty());
    }

    #[test]
    fn scrape_falls_back_to_bare_anchors() {
        // A degraded layout without the result container divs.
        let html = r#"
            <a class="result__a" href="https://a.test/one">First</a>
            <a class="result__a" href="https://b.test/two">Second</a>
        "#;
        let hits = scrape_results(html, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First");
        assert_eq!(hits[0].url, "https://a.test/one");
        assert!(hits[0].snippet.is_empty());
    }

    #[test]
    fn redirect_unwrapping_decodes_utf8() {
        // Percent-escaped non-ASCII must come back as real UTF-8, not
        // byte-by-byte code points.
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fcaf%C3%A9&rut=x";
        assert_eq!(resolve_result_url(href), "https://example.com/café");
    }

    #[test]
    fn redirect_unwrapping_plain_target() {
        let href = "https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage%3Fa%3D1&rut=abc";
        assert_eq!(resolve_result_url(href), "https://example.com/page?a=1");
    }

    #[test]
    fn non_redirect_urls_pass_through() {
        assert_eq!(
            resolve_result_url("https://example.com/path"),
            "https://example.com/path"
        );
        // Scheme-relative links get https.
        assert_eq!(
            resolve_result_url("//example.com/p"),
            "https://example.com/p"
        );
        // Unparseable hrefs come back untouched.
        assert_eq!(resolve_result_url("not a url"), "not a url");
    }

    #[test]
    fn duckduckgo_pages_without_uddg_are_not_unwrapped() {
        let href = "https://duckduckgo.com/about";
        assert_eq!(resolve_result_url(href), href);
    }
}
