//! Path-based inclusion/exclusion of discovered URLs.
//!
//! Each endpoint may carry a JSON `parser_hint`:
//!
//! ```json
//! {
//!   "includePathPrefixes": ["/publications/"],
//!   "excludePathPrefixes": ["/publications/archive/"],
//!   "excludeGlobs": ["**/*.jpg"]
//! }
//! ```
//!
//! Prefixes and globs both match against the URL path only, never the host
//! or query.

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ParserHint {
    pub include_path_prefixes: Vec<String>,
    pub exclude_path_prefixes: Vec<String>,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
}

impl ParserHint {
    /// Parses a stored hint. Missing or malformed JSON yields the empty hint,
    /// which lets everything through.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(s) if !s.is_empty() => serde_json::from_str(s).unwrap_or_else(|e| {
                tracing::warn!(hint = s, error = %e, "ignoring malformed parser hint");
                Self::default()
            }),
            _ => Self::default(),
        }
    }
}

/// Compiled form of a [`ParserHint`].
pub struct PathFilter {
    include_prefixes: Vec<String>,
    exclude_prefixes: Vec<String>,
    include_globs: Option<GlobSet>,
    exclude_globs: Option<GlobSet>,
}

impl PathFilter {
    pub fn new(hint: &ParserHint) -> Result<Self> {
        Ok(Self {
            include_prefixes: hint.include_path_prefixes.clone(),
            exclude_prefixes: hint.exclude_path_prefixes.clone(),
            include_globs: build_globset(&hint.include_globs)?,
            exclude_globs: build_globset(&hint.exclude_globs)?,
        })
    }

    /// Whether `url` survives the filter. Unparseable URLs never do.
    pub fn passes(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = parsed.path();

        if !self.include_prefixes.is_empty()
            && !self.include_prefixes.iter().any(|p| path.starts_with(p.as_str()))
        {
            return false;
        }
        if self.exclude_prefixes.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        if let Some(ref include) = self.include_globs {
            if !include.is_match(path) {
                return false;
            }
        }
        if let Some(ref exclude) = self.exclude_globs {
            if exclude.is_match(path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}
