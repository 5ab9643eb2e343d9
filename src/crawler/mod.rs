//! Page source - bounded documentation-site crawler.
//!
//! Fetches up to `page_limit` pages breadth-first from a seed URL,
//! following same-host links that match the glob inclusion patterns, and
//! extracts main-content text. The crawl engine behind the trait is an
//! external collaborator; the pipeline only sees `(content, metadata)`
//! pairs.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::error::RagError;

// ============================================================================
// Types
// ============================================================================

/// Crawl constraints supplied by the caller.
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    /// Crawl entry point.
    pub seed_url: String,
    /// Glob patterns applied to the path of discovered links. Empty = all.
    pub include_patterns: Vec<String>,
    /// Upper bound on pages fetched. Must be >= 1.
    pub page_limit: usize,
    /// Strip navigation/boilerplate, keep only the main content region.
    pub main_content_only: bool,
}

/// Page metadata carried into every chunk derived from the page.
#[derive(Debug, Clone)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub source_url: String,
    pub lastmod: DateTime<Utc>,
}

/// A fetched page. Ephemeral: owned by the index builder until it is
/// converted into chunks.
#[derive(Debug, Clone)]
pub struct Document {
    pub content: String,
    pub metadata: PageMetadata,
}

// ============================================================================
// PageSource trait
// ============================================================================

/// Produces a bounded set of documents from a seed URL.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Crawl until done or `page_limit` pages were fetched. Never returns
    /// more documents than `request.page_limit`.
    async fn crawl(&self, request: &CrawlRequest) -> Result<Vec<Document>, RagError>;
}

// ============================================================================
// SiteCrawler
// ============================================================================

/// Breadth-first crawler over one documentation site.
pub struct SiteCrawler {
    client: reqwest::Client,
}

impl SiteCrawler {
    pub fn new() -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docqa/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(20))
            .build()
            .map_err(|e| RagError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Fetch one page: body text plus the Last-Modified header, if any.
    async fn fetch(&self, url: &Url) -> Result<(String, Option<DateTime<Utc>>), RagError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("{} returned {}", url, status);
            return Err(if status.is_server_error() {
                RagError::crawl_transient(message)
            } else {
                RagError::crawl_permanent(message)
            });
        }

        let lastmod = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|t| t.with_timezone(&Utc));

        let body = response
            .text()
            .await
            .map_err(|e| RagError::crawl_transient(format!("failed to read {}: {}", url, e)))?;

        Ok((body, lastmod))
    }
}

#[async_trait]
impl PageSource for SiteCrawler {
    async fn crawl(&self, request: &CrawlRequest) -> Result<Vec<Document>, RagError> {
        if request.page_limit == 0 {
            return Err(RagError::Configuration("page limit must be at least 1".into()));
        }

        let seed = Url::parse(&request.seed_url)
            .map_err(|e| RagError::crawl_permanent(format!("bad seed URL: {}", e)))?;
        let include = compile_globs(&request.include_patterns)?;

        let mut queue: VecDeque<Url> = VecDeque::from([seed.clone()]);
        let mut seen: HashSet<String> = HashSet::from([seed.as_str().to_string()]);
        let mut documents = Vec::new();

        while let Some(url) = queue.pop_front() {
            if documents.len() >= request.page_limit {
                break;
            }

            let is_seed = url == seed;
            let (body, lastmod) = match self.fetch(&url).await {
                Ok(page) => page,
                // A dead seed aborts the crawl; a dead discovered link is
                // logged and skipped so the crawl stays bounded but useful.
                Err(e) if is_seed => return Err(e),
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", url, e);
                    continue;
                }
            };

            let extracted = extract_page(&body, request.main_content_only);
            tracing::info!(
                "Fetched {} ({} chars, {} links)",
                url,
                extracted.content.len(),
                extracted.links.len()
            );

            for link in extracted.links {
                if let Some(next) = admit_link(&seed, &link, &include) {
                    if seen.insert(next.as_str().to_string()) {
                        queue.push_back(next);
                    }
                }
            }

            documents.push(Document {
                content: extracted.content,
                metadata: PageMetadata {
                    title: extracted.title,
                    source_url: url.as_str().to_string(),
                    lastmod: lastmod.unwrap_or_else(Utc::now),
                },
            });
        }

        Ok(documents)
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> RagError {
    if e.is_timeout() || e.is_connect() {
        RagError::crawl_transient(e.to_string())
    } else {
        RagError::crawl_permanent(e.to_string())
    }
}

// ============================================================================
// Link admission
// ============================================================================

/// Resolve `href` against the seed and keep it only if it is same-host
/// and matches an inclusion pattern.
fn admit_link(seed: &Url, href: &str, include: &[Regex]) -> Option<Url> {
    let mut resolved = seed.join(href).ok()?;
    resolved.set_fragment(None);

    if resolved.scheme() != "http" && resolved.scheme() != "https" {
        return None;
    }
    if resolved.host_str() != seed.host_str() {
        return None;
    }

    let path = resolved.path().trim_start_matches('/');
    if include.is_empty() || include.iter().any(|re| re.is_match(path)) {
        Some(resolved)
    } else {
        None
    }
}

/// Compile glob inclusion patterns to anchored regexes.
/// `*` stops at `/`, `**` spans segments, `?` matches one character.
fn compile_globs(patterns: &[String]) -> Result<Vec<Regex>, RagError> {
    patterns
        .iter()
        .map(|pattern| {
            let mut re = String::from("^");
            let mut chars = pattern.chars().peekable();
            while let Some(c) = chars.next() {
                match c {
                    '*' => {
                        if chars.peek() == Some(&'*') {
                            chars.next();
                            re.push_str(".*");
                        } else {
                            re.push_str("[^/]*");
                        }
                    }
                    '?' => re.push('.'),
                    c => re.push_str(&regex::escape(&c.to_string())),
                }
            }
            re.push('$');
            Regex::new(&re).map_err(|e| {
                RagError::Configuration(format!("invalid include pattern '{}': {}", pattern, e))
            })
        })
        .collect()
}

// ============================================================================
// HTML extraction
// ============================================================================

struct ExtractedPage {
    title: Option<String>,
    content: String,
    links: Vec<String>,
}

/// Parse a page in one pass. `scraper::Html` is not `Send`, so parsing is
/// kept out of the async crawl loop.
fn extract_page(html: &str, main_content_only: bool) -> ExtractedPage {
    let document = Html::parse_document(html);
    ExtractedPage {
        title: extract_title(&document),
        content: extract_content(&document, main_content_only),
        links: extract_links(&document),
    }
}

/// <title> first, then the first <h1>.
fn extract_title(document: &Html) -> Option<String> {
    for selector_str in ["title", "h1"] {
        if let Ok(selector) = Selector::parse(selector_str) {
            if let Some(element) = document.select(&selector).next() {
                let title = element.text().collect::<String>().trim().to_string();
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }
    None
}

/// Main-content extraction ladder: article > main > [role=main] >
/// .content > #content, falling back to body.
fn extract_content(document: &Html, main_content_only: bool) -> String {
    if main_content_only {
        let selectors = ["article", "main", "[role=main]", ".content", "#content"];
        for selector_str in selectors {
            if let Ok(selector) = Selector::parse(selector_str) {
                if let Some(element) = document.select(&selector).next() {
                    let text = element_text(&element);
                    if text.len() > 100 {
                        return text;
                    }
                }
            }
        }
    }

    if let Ok(selector) = Selector::parse("body") {
        if let Some(element) = document.select(&selector).next() {
            return element_text(&element);
        }
    }
    String::new()
}

fn extract_links(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return vec![];
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .map(str::to_string)
        .collect()
}

/// Text content with whitespace collapsed.
fn element_text(element: &scraper::ElementRef) -> String {
    let mut text = String::new();
    for node in element.text() {
        let trimmed = node.trim();
        if !trimmed.is_empty() {
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(trimmed);
        }
    }
    text
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns(globs: &[&str]) -> Vec<Regex> {
        compile_globs(&globs.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn test_glob_star_stops_at_slash() {
        let include = patterns(&["kdbai/*"]);
        assert!(include[0].is_match("kdbai/intro"));
        assert!(!include[0].is_match("kdbai/guide/deep"));
        assert!(!include[0].is_match("other/intro"));
    }

    #[test]
    fn test_glob_double_star_spans_segments() {
        let include = patterns(&["docs/**"]);
        assert!(include[0].is_match("docs/a"));
        assert!(include[0].is_match("docs/a/b/c"));
    }

    #[test]
    fn test_admit_link_same_host_only() {
        let seed = Url::parse("https://docs.example.com/kdbai/intro").unwrap();
        let include = patterns(&["kdbai/*"]);

        assert!(admit_link(&seed, "/kdbai/setup", &include).is_some());
        assert!(admit_link(&seed, "https://elsewhere.com/kdbai/setup", &include).is_none());
        assert!(admit_link(&seed, "/pricing", &include).is_none());
        assert!(admit_link(&seed, "mailto:a@b.c", &include).is_none());
    }

    #[test]
    fn test_admit_link_strips_fragment() {
        let seed = Url::parse("https://docs.example.com/kdbai/intro").unwrap();
        let link = admit_link(&seed, "/kdbai/setup#install", &patterns(&["kdbai/*"])).unwrap();
        assert_eq!(link.as_str(), "https://docs.example.com/kdbai/setup");
    }

    #[test]
    fn test_admit_link_empty_patterns_admits_all_same_host() {
        let seed = Url::parse("https://docs.example.com/").unwrap();
        assert!(admit_link(&seed, "/anything", &[]).is_some());
    }

    #[test]
    fn test_extract_title_prefers_title_tag() {
        let page = extract_page(
            "<html><head><title>Doc Title</title></head><body><h1>H1</h1></body></html>",
            true,
        );
        assert_eq!(page.title.as_deref(), Some("Doc Title"));
    }

    #[test]
    fn test_extract_main_content_skips_nav() {
        let html = r#"
            <html><body>
                <nav>Navigation menu that should not appear</nav>
                <article>
                    The main article content of this documentation page,
                    long enough to pass the minimum content threshold check.
                </article>
            </body></html>
        "#;
        let page = extract_page(html, true);
        assert!(page.content.contains("main article content"));
        assert!(!page.content.contains("Navigation menu"));
    }

    #[test]
    fn test_extract_full_body_when_not_main_only() {
        let html = r#"
            <html><body>
                <nav>Navigation menu</nav>
                <article>Article body text</article>
            </body></html>
        "#;
        let page = extract_page(html, false);
        assert!(page.content.contains("Navigation menu"));
        assert!(page.content.contains("Article body text"));
    }

    #[test]
    fn test_extract_links() {
        let page = extract_page(
            r#"<html><body><a href="/a">A</a><a href="https://x.y/b">B</a></body></html>"#,
            false,
        );
        assert_eq!(page.links, vec!["/a".to_string(), "https://x.y/b".to_string()]);
    }
}
