//! Link extraction from sitemap, RSS/Atom and HTML list pages.
//!
//! Parsing is deliberately regex-based: sitemaps in the wild are frequently
//! malformed, and only link locations matter here. Three shapes are picked
//! up, in this order:
//!
//! | Pattern | Seen in |
//! |---------|---------|
//! | `<loc>URL</loc>` | sitemap `urlset` and `sitemapindex` |
//! | `<link>URL</link>` | RSS 2.0 channels and items |
//! | `<link href="URL"/>` | Atom feeds |

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use url::Url;

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*([^<\s\]]+)\s*(?:\]\]>)?\s*</loc>").unwrap()
});

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<link>\s*(?:<!\[CDATA\[)?\s*([^<\s\]]+)\s*(?:\]\]>)?\s*</link>").unwrap()
});

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)<link[^>]+href=["']([^"']+)["'][^>]*/?>"#).unwrap());

static SITEMAP_INDEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<sitemapindex[\s>]").unwrap());

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s[^>]*?href\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Links found in one fetched feed, split by what the crawler does next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedLinks {
    /// Nested sitemaps to traverse.
    pub sitemaps: Vec<String>,
    /// Candidate document URLs.
    pub pages: Vec<String>,
}

/// Extracts every absolute link location, de-duplicated in first-seen order.
pub fn extract_locs(xml: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for re in [&*LOC_RE, &*LINK_RE, &*HREF_RE] {
        for cap in re.captures_iter(xml) {
            let value = decode_xml_entities(cap[1].trim());
            if !value.starts_with("http") {
                continue;
            }
            if seen.insert(value.clone()) {
                out.push(value);
            }
        }
    }

    out
}

/// Splits a feed's links into nested sitemaps and pages.
///
/// Inside a `<sitemapindex>` every location is a sitemap. Elsewhere a
/// location whose path ends in `.xml` is treated as a nested sitemap.
pub fn extract_feed_links(xml: &str) -> FeedLinks {
    let locs = extract_locs(xml);

    if SITEMAP_INDEX_RE.is_match(xml) {
        return FeedLinks {
            sitemaps: locs,
            pages: Vec::new(),
        };
    }

    let (sitemaps, pages) = locs.into_iter().partition(|u| looks_like_sitemap(u));
    FeedLinks { sitemaps, pages }
}

fn looks_like_sitemap(url: &str) -> bool {
    match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase().ends_with(".xml"),
        Err(_) => false,
    }
}

/// Extracts `<a href>` targets from an HTML list page.
///
/// Relative links are resolved against `base`; only links on the same host
/// are kept.
pub fn extract_anchor_links(html: &str, base: &str) -> Vec<String> {
    let base = match Url::parse(base) {
        Ok(b) => b,
        Err(_) => return Vec::new(),
    };

    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for cap in ANCHOR_RE.captures_iter(html) {
        let href = decode_xml_entities(cap[1].trim());
        if href.starts_with('#') || href.starts_with("mailto:") || href.starts_with("javascript:")
        {
            continue;
        }
        let Ok(resolved) = base.join(&href) else {
            continue;
        };
        if !matches!(resolved.scheme(), "http" | "https") {
            continue;
        }
        if resolved.host_str() != base.host_str() {
            continue;
        }
        let normalized = normalize_url(resolved.as_str());
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }

    out
}

/// Drops the fragment and keeps everything else, including the query.
/// Input that does not parse as a URL is returned trimmed but otherwise
/// unchanged.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match Url::parse(trimmed) {
        Ok(mut u) => {
            u.set_fragment(None);
            u.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

fn decode_xml_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
