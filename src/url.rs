//! URL segment algebra.
//!
//! Routing, static resolution and CGI dispatch all operate on [`Url`] values:
//! a path decomposed into segments plus an optional raw query string.
//! The operations here are the prefix/tail arithmetic the router needs
//! (longest-prefix matching leaves a matched prefix and a remainder) and the
//! filesystem rendering the handlers need.

/// A parsed request path: ordered segments plus the raw query string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Url {
    segments: Vec<String>,
    query: Option<String>,
}

impl Url {
    pub fn new() -> Self {
        Url::default()
    }

    /// Parses a path string. Empty segments (doubled or trailing slashes)
    /// are dropped; everything after the first `?` becomes the query string.
    pub fn parse(text: &str) -> Option<Url> {
        let (path, query) = match text.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (text, None),
        };

        let segments: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect();

        Some(Url { segments, query })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// The extension of the last segment, without the dot.
    pub fn extension(&self) -> Option<&str> {
        let last = self.segments.last()?;
        let (stem, ext) = last.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext)
    }

    /// Renders the url. With `leading_slash` the empty url becomes `/`,
    /// without it the rendering is relative (empty url becomes `.`),
    /// suitable for filesystem use.
    pub fn render(&self, leading_slash: bool) -> String {
        if self.segments.is_empty() {
            return if leading_slash { "/".to_string() } else { ".".to_string() };
        }
        let joined = self.segments.join("/");
        if leading_slash {
            format!("/{}", joined)
        } else {
            joined
        }
    }

    /// Concatenates two urls; the query of `self` is kept.
    pub fn join(&self, other: &Url) -> Url {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Url {
            segments,
            query: self.query.clone(),
        }
    }

    /// The first segment as a single-segment url.
    pub fn head(&self) -> Option<Url> {
        self.segments.first().map(|s| Url {
            segments: vec![s.clone()],
            query: None,
        })
    }

    /// Everything but the first segment.
    pub fn tail(&self) -> Url {
        Url {
            segments: self.segments.iter().skip(1).cloned().collect(),
            query: self.query.clone(),
        }
    }

    /// Everything but the last segment.
    pub fn except_last(&self) -> Url {
        let mut segments = self.segments.clone();
        segments.pop();
        Url { segments, query: None }
    }

    /// True when `prefix`'s segments are the leading segments of `self`.
    pub fn matches_prefix(&self, prefix: &Url) -> bool {
        prefix.segments.len() <= self.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// The segments of `self` left over after removing `prefix`. An empty
    /// url when the prefix does not match.
    pub fn tail_diff(&self, prefix: &Url) -> Url {
        if !self.matches_prefix(prefix) {
            return Url::new();
        }
        Url {
            segments: self.segments[prefix.segments.len()..].to_vec(),
            query: self.query.clone(),
        }
    }

    /// True when no segment is a parent-directory reference. Request paths
    /// that fail this never reach the filesystem.
    pub fn is_traversal_safe(&self) -> bool {
        !self.segments.iter().any(|s| s == "..")
    }
}
