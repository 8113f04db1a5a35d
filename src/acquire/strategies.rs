//! Ordered PDF-link discovery strategies.
//!
//! Repository and mirror pages expose their PDF in wildly different markup.
//! Rather than a chain of nested fallbacks, discovery is an explicit ordered
//! list of strategies sharing one signature: given the page HTML and its
//! base URL, return a candidate PDF URL or nothing. Callers walk the list in
//! order until one strategy produces a link; the ordering is the contract,
//! the individual patterns are best-effort vendor glue.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use url::Url;

/// A discovery strategy: `(html, base_url) -> Option<pdf_url>`.
pub type LinkFinder = fn(&str, &str) -> Option<String>;

/// A named strategy, so attempt logs can say which one matched.
#[derive(Clone, Copy)]
pub struct NamedStrategy {
    /// Short label for logging and attempt records.
    pub name: &'static str,
    /// The finder function.
    pub find: LinkFinder,
}

impl std::fmt::Debug for NamedStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedStrategy")
            .field("name", &self.name)
            .finish()
    }
}

/// Headless page renderer, injected by the caller.
///
/// Used as the last-resort strategy when plain HTTP retrieval is defeated by
/// client-side rendering. No renderer ships with the crate; the pipeline
/// owns only the ordering that puts rendering last.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders a page and returns its final DOM as HTML.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when rendering fails.
    async fn render(&self, url: &str) -> Result<String, String>;
}

static CITATION_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<meta[^>]+name\s*=\s*["']citation_pdf_url["'][^>]+content\s*=\s*["']([^"']+)["']"#)
});
static PDF_PATH_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a[^>]+href\s*=\s*["']([^"']*/pdf/?)["']"#)
});
static ARIA_PDF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a[^>]+aria-label\s*=\s*["']PDF[^"']*["'][^>]*href\s*=\s*["']([^"']+)["']|<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*aria-label\s*=\s*["']PDF[^"']*["']"#)
});
static DOWNLOAD_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*>(?:[^<]|<[^/a][^>]*>)*download\s+pdf"#)
});
static KEYWORD_HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a[^>]+href\s*=\s*["']([^"']*pdf[^"']*)["']"#)
});
static EMBED_SRC_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<(?:embed|iframe)[^>]+src\s*=\s*["']([^"']+)["']"#)
});
static DOWNLOAD_ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(r#"(?is)<a[^>]+(?:id\s*=\s*["']download["']|class\s*=\s*["'][^"']*download[^"']*["'])[^>]*href\s*=\s*["']([^"']+)["']|<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*(?:id\s*=\s*["']download["']|class\s*=\s*["'][^"']*download[^"']*["'])"#)
});

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static scraping pattern must compile")
}

/// Hosts-anchored absolutization of a scraped href.
#[must_use]
pub fn absolutize(href: &str, base_url: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let base = Url::parse(base_url).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// True for links that point at supplementary material rather than the body.
fn is_supplementary(href: &str) -> bool {
    let lower = href.to_lowercase();
    ["supplementary", "supplement", "appendix"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Exact-selector match: the citation meta tag or an href ending in `/pdf`.
fn find_css_exact(html: &str, base_url: &str) -> Option<String> {
    if let Some(caps) = CITATION_PDF_RE.captures(html)
        && let Some(href) = caps.get(1)
    {
        return absolutize(href.as_str(), base_url);
    }
    let caps = PDF_PATH_HREF_RE.captures(html)?;
    absolutize(caps.get(1)?.as_str(), base_url)
}

/// ARIA match: an anchor whose label starts with "PDF".
fn find_aria_label(html: &str, base_url: &str) -> Option<String> {
    let caps = ARIA_PDF_RE.captures(html)?;
    let href = caps.get(1).or_else(|| caps.get(2))?;
    absolutize(href.as_str(), base_url)
}

/// Link-text match: an anchor whose visible text says "Download PDF".
fn find_link_text(html: &str, base_url: &str) -> Option<String> {
    let caps = DOWNLOAD_TEXT_RE.captures(html)?;
    absolutize(caps.get(1)?.as_str(), base_url)
}

/// Keyword match: any href containing "pdf", excluding supplementary files.
fn find_keyword_href(html: &str, base_url: &str) -> Option<String> {
    for caps in KEYWORD_HREF_RE.captures_iter(html) {
        let Some(href) = caps.get(1) else { continue };
        if is_supplementary(href.as_str()) {
            continue;
        }
        if let Some(url) = absolutize(href.as_str(), base_url) {
            return Some(url);
        }
    }
    None
}

/// The ordered scraping strategies for article pages.
///
/// Direct URL probing and headless rendering follow these in the stage
/// itself, since both need network access.
#[must_use]
pub fn scrape_strategies() -> &'static [NamedStrategy] {
    static STRATEGIES: [NamedStrategy; 4] = [
        NamedStrategy {
            name: "css-exact",
            find: find_css_exact,
        },
        NamedStrategy {
            name: "aria-label",
            find: find_aria_label,
        },
        NamedStrategy {
            name: "link-text",
            find: find_link_text,
        },
        NamedStrategy {
            name: "keyword-href",
            find: find_keyword_href,
        },
    ];
    &STRATEGIES
}

/// Walks the scraping strategies in order; first hit wins.
#[must_use]
pub fn discover_pdf_link(html: &str, base_url: &str) -> Option<(&'static str, String)> {
    for strategy in scrape_strategies() {
        if let Some(url) = (strategy.find)(html, base_url) {
            return Some((strategy.name, url));
        }
    }
    None
}

/// Finds the served PDF on a mirror landing page.
///
/// Mirror pages embed the document in an `embed`/`iframe` or link it from a
/// download anchor; both are tried before the generic keyword scan.
#[must_use]
pub fn find_embedded_pdf(html: &str, base_url: &str) -> Option<String> {
    if let Some(caps) = EMBED_SRC_RE.captures(html)
        && let Some(src) = caps.get(1)
    {
        return absolutize(src.as_str(), base_url);
    }
    if let Some(caps) = DOWNLOAD_ANCHOR_RE.captures(html) {
        let href = caps.get(1).or_else(|| caps.get(2))?;
        return absolutize(href.as_str(), base_url);
    }
    find_keyword_href(html, base_url)
}
