//! Plain-text extraction from downloaded documents.
//!
//! The ingester hands over raw bytes plus the response content type; this
//! module decides what kind of document it is and returns whitespace-
//! normalized UTF-8 text.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

pub const MIME_PDF: &str = "application/pdf";

static SCRIPT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").unwrap());
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b.*?</style\s*>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// What kind of document a download is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    /// HTML, XML, JSON or plain text: anything decoded as UTF-8 and
    /// tag-stripped.
    Markup,
    Unsupported,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
}

/// Classifies by content type, falling back to the URL suffix for PDFs
/// served as `application/octet-stream` or without a type.
pub fn classify_content(content_type: Option<&str>, url: &str) -> ContentKind {
    let ct = content_type.unwrap_or("").to_ascii_lowercase();
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();

    if ct.contains("pdf") || path.ends_with(".pdf") {
        return ContentKind::Pdf;
    }
    if ct.is_empty()
        || ct.starts_with("text/")
        || ct.contains("html")
        || ct.contains("xml")
        || ct.contains("json")
    {
        return ContentKind::Markup;
    }
    ContentKind::Unsupported
}

/// Extracts text according to `kind`.
pub fn extract_text(bytes: &[u8], kind: ContentKind, content_type: &str) -> Result<String, ExtractError> {
    match kind {
        ContentKind::Pdf => extract_pdf_text(bytes),
        ContentKind::Markup => Ok(strip_html(&String::from_utf8_lossy(bytes))),
        ContentKind::Unsupported => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

pub fn extract_pdf_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let text =
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(collapse_whitespace(&text))
}

/// Baseline HTML to text: drops scripts, styles and comments, removes tags,
/// decodes common entities and collapses whitespace.
pub fn strip_html(html: &str) -> String {
    let text = SCRIPT_RE.replace_all(html, " ");
    let text = STYLE_RE.replace_all(&text, " ");
    let text = COMMENT_RE.replace_all(&text, " ");
    let text = TAG_RE.replace_all(&text, " ");
    collapse_whitespace(&decode_entities(&text))
}

pub fn collapse_whitespace(text: &str) -> String {
    WS_RE.replace_all(text, " ").trim().to_string()
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_styles_and_tags() {
        let html = r#"<html><head><title>Water report</title>
            <style>body { color: red }</style>
            <SCRIPT type="text/javascript">var x = "<b>";</SCRIPT></head>
            <body><!-- nav --><h1>Clean&nbsp;water</h1>
            <p>Rural   access &amp; maintenance.</p></body></html>"#;
        assert_eq!(
            strip_html(html),
            "Water report Clean water Rural access & maintenance."
        );
    }

    #[test]
    fn classifies_by_type_then_suffix() {
        assert_eq!(classify_content(Some("application/pdf"), "https://x/a"), ContentKind::Pdf);
        assert_eq!(
            classify_content(Some("application/octet-stream"), "https://x/a.PDF?dl=1"),
            ContentKind::Pdf
        );
        assert_eq!(
            classify_content(Some("text/html; charset=utf-8"), "https://x/a"),
            ContentKind::Markup
        );
        assert_eq!(classify_content(None, "https://x/a"), ContentKind::Markup);
        assert_eq!(
            classify_content(Some("image/png"), "https://x/a.png"),
            ContentKind::Unsupported
        );
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", ContentKind::Pdf, MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn unsupported_returns_error() {
        let err = extract_text(b"\x89PNG", ContentKind::Unsupported, "image/png").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }
}
