//! Web fetch tool -- retrieves pages and reduces them to readable text.
//!
//! Accepts a list of URLs, validates schemes up front, fetches each page,
//! walks the parsed DOM to extract visible text, and truncates oversized
//! bodies. Per-URL failures are reported inline so one bad link does not
//! sink the batch.

use async_trait::async_trait;
use scraper::{ElementRef, Html};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::base::{Tool, ToolParameter, ToolResult};

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum characters of extracted text kept per page.
const MAX_CONTENT_CHARS: usize = 8_000;

/// Maximum URLs accepted in one call.
const MAX_URLS: usize = 5;

/// Fetches web pages and converts them to plain text.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("ArtifactFlow/0.1 (+https://github.com/artifactflow/artifactflow)")
            .build()
            .unwrap_or_default();
        Self { client }
    }

    async fn fetch_one(&self, raw_url: &str, timeout: std::time::Duration) -> Value {
        let url = match Url::parse(raw_url) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => u,
            Ok(u) => {
                return json!({
                    "url": raw_url,
                    "success": false,
                    "error": format!("unsupported URL scheme: {}", u.scheme()),
                });
            }
            Err(e) => {
                return json!({
                    "url": raw_url,
                    "success": false,
                    "error": format!("invalid URL: {e}"),
                });
            }
        };

        let response = match self.client.get(url.clone()).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                return json!({
                    "url": raw_url,
                    "success": false,
                    "error": format!("request failed: {e}"),
                });
            }
        };

        let status = response.status();
        if !status.is_success() {
            return json!({
                "url": raw_url,
                "success": false,
                "status": status.as_u16(),
                "error": format!("upstream returned status {status}"),
            });
        }

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => {
                return json!({
                    "url": raw_url,
                    "success": false,
                    "error": format!("failed to read body: {e}"),
                });
            }
        };

        let text = extract_text(&body);
        let truncated = text.chars().count() > MAX_CONTENT_CHARS;
        let content: String = text.chars().take(MAX_CONTENT_CHARS).collect();

        json!({
            "url": raw_url,
            "success": true,
            "status": status.as_u16(),
            "truncated": truncated,
            "content": content,
        })
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch up to 5 web pages and return their readable text content. \
         Long pages are truncated; failed URLs are reported individually."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("url_list", "array", "URLs to fetch (http or https)"),
            ToolParameter::optional("timeout", "integer", "Per-request timeout in seconds (default: 30)"),
        ]
    }

    async fn execute(&self, params: Value) -> ToolResult {
        let urls: Vec<String> = match params["url_list"].as_array() {
            Some(list) => list
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            None => return ToolResult::err("url_list must be an array of URLs"),
        };

        if urls.is_empty() {
            return ToolResult::err("url_list must not be empty");
        }
        if urls.len() > MAX_URLS {
            return ToolResult::err(format!("url_list is limited to {MAX_URLS} URLs"));
        }

        let timeout = std::time::Duration::from_secs(
            params["timeout"].as_u64().unwrap_or(DEFAULT_TIMEOUT_SECS),
        );

        debug!(count = urls.len(), "fetching pages");

        let mut pages = Vec::with_capacity(urls.len());
        for url in &urls {
            pages.push(self.fetch_one(url, timeout).await);
        }

        let failures = pages
            .iter()
            .filter(|p| p["success"] == false)
            .count();
        if failures == pages.len() {
            return ToolResult::err(format!(
                "all {failures} fetch(es) failed: {}",
                pages
                    .iter()
                    .filter_map(|p| p["error"].as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
        }

        ToolResult::ok(json!({ "pages": pages }))
    }
}

/// Subtrees whose text is never user-visible.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg"];

/// Elements that end a line of text.
const BLOCK_ELEMENTS: &[&str] = &[
    "p", "div", "section", "article", "li", "tr", "br", "h1", "h2", "h3", "h4", "h5", "h6",
];

/// Reduce an HTML document to readable text.
///
/// Walks the DOM collecting text nodes, skipping script/style subtrees,
/// breaking lines at block elements, and collapsing blank runs.
fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();
    collect_text(document.root_element(), &mut raw);

    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}

fn collect_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            out.push_str(text);
        } else if let Some(child_element) = ElementRef::wrap(child) {
            let name = child_element.value().name();
            if SKIPPED_ELEMENTS.contains(&name) {
                continue;
            }
            collect_text(child_element, out);
            if BLOCK_ELEMENTS.contains(&name) {
                out.push('\n');
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_missing_url_list() {
        let tool = WebFetchTool::new();
        let result = tool.call(json!({"url_list": "not-a-list"})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_empty_url_list() {
        let tool = WebFetchTool::new();
        let result = tool.call(json!({"url_list": []})).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn rejects_too_many_urls() {
        let tool = WebFetchTool::new();
        let urls: Vec<String> = (0..6).map(|i| format!("https://example.com/{i}")).collect();
        let result = tool.call(json!({"url_list": urls})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("limited"));
    }

    #[tokio::test]
    async fn invalid_scheme_fails_the_batch_of_one() {
        let tool = WebFetchTool::new();
        let result = tool
            .call(json!({"url_list": ["ftp://example.com/file"]}))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("scheme"));
    }

    #[test]
    fn extract_text_drops_scripts_and_styles() {
        let html = r#"
        <html><head><style>body { color: red; }</style></head>
        <body>
            <script>var x = "evil";</script>
            <h1>Heading</h1>
            <p>Paragraph text.</p>
        </body></html>
        "#;
        let text = extract_text(html);
        assert!(text.contains("Heading"));
        assert!(text.contains("Paragraph text."));
        assert!(!text.contains("color: red"));
        assert!(!text.contains("evil"));
    }

    #[test]
    fn extract_text_breaks_lines_at_block_elements() {
        let text = extract_text("<p>one</p><p>two</p>");
        assert_eq!(text, "one\ntwo");
    }

    #[test]
    fn extract_text_keeps_inline_elements_on_one_line() {
        let text = extract_text("<p><b>hello</b> world</p>");
        assert_eq!(text, "hello world");
    }

    #[test]
    fn extract_text_drops_blank_runs() {
        let text = extract_text("<div>a</div>\n\n\n<div>   </div><div>b</div>");
        assert_eq!(text, "a\nb");
    }
}
