//! Location prefix trie.
//!
//! Locations are URL-prefix-scoped serving rules. They live in a tree keyed
//! by path segment; a lookup walks the query path and remembers the deepest
//! node carrying a location, which yields the longest configured prefix plus
//! the remainder of the path.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::config::LocationConfig;
use crate::url::Url;

/// Result of a longest-prefix lookup: the winning location, the prefix it
/// was configured under, and the path remainder past that prefix.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub location: Rc<LocationConfig>,
    pub prefix: Url,
    pub remainder: Url,
}

#[derive(Debug, Default)]
pub struct LocationTree {
    root: Node,
}

#[derive(Debug, Default)]
struct Node {
    location: Option<Rc<LocationConfig>>,
    children: BTreeMap<String, Node>,
}

impl LocationTree {
    pub fn new() -> Self {
        LocationTree::default()
    }

    /// Inserts a location under `prefix`, creating intermediate nodes as
    /// needed. A later insert under the same prefix replaces the earlier one.
    pub fn insert(&mut self, prefix: &Url, location: Rc<LocationConfig>) {
        let mut node = &mut self.root;
        for segment in prefix.segments() {
            node = node.children.entry(segment.clone()).or_default();
        }
        node.location = Some(location);
    }

    /// Longest-prefix lookup.
    pub fn find(&self, path: &Url) -> Option<RouteMatch> {
        let mut node = &self.root;
        let mut best: Option<(usize, &Rc<LocationConfig>)> = None;

        if let Some(location) = &node.location {
            best = Some((0, location));
        }

        for (depth, segment) in path.segments().iter().enumerate() {
            node = match node.children.get(segment) {
                Some(child) => child,
                None => break,
            };
            if let Some(location) = &node.location {
                best = Some((depth + 1, location));
            }
        }

        let (depth, location) = best?;
        let prefix = Url::parse(&path.segments()[..depth].join("/"))?;
        Some(RouteMatch {
            location: Rc::clone(location),
            remainder: path.tail_diff(&prefix),
            prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(prefixes: &[&str]) -> LocationTree {
        let mut tree = LocationTree::new();
        for prefix in prefixes {
            let mut location = LocationConfig::default();
            location.root = Some(prefix.to_string());
            tree.insert(&Url::parse(prefix).unwrap(), Rc::new(location));
        }
        tree
    }

    #[test]
    fn picks_longest_prefix() {
        let tree = tree_with(&["/", "/static", "/static/img"]);
        let hit = tree.find(&Url::parse("/static/img/logo.png").unwrap()).unwrap();
        assert_eq!(hit.location.root.as_deref(), Some("/static/img"));
        assert_eq!(hit.prefix.render(true), "/static/img");
        assert_eq!(hit.remainder.segments(), ["logo.png"]);
    }

    #[test]
    fn falls_back_to_root_location() {
        let tree = tree_with(&["/", "/static"]);
        let hit = tree.find(&Url::parse("/other/page.html").unwrap()).unwrap();
        assert_eq!(hit.location.root.as_deref(), Some("/"));
        assert!(hit.prefix.is_empty());
        assert_eq!(hit.remainder.segments(), ["other", "page.html"]);
    }

    #[test]
    fn no_match_without_any_prefix() {
        let tree = tree_with(&["/api"]);
        assert!(tree.find(&Url::parse("/web/index.html").unwrap()).is_none());
    }

    #[test]
    fn partial_descent_keeps_shorter_match() {
        let tree = tree_with(&["/a", "/a/b/c"]);
        let hit = tree.find(&Url::parse("/a/b/x").unwrap()).unwrap();
        assert_eq!(hit.prefix.render(true), "/a");
        assert_eq!(hit.remainder.segments(), ["b", "x"]);
    }

    #[test]
    fn exact_match_has_empty_remainder() {
        let tree = tree_with(&["/upload"]);
        let hit = tree.find(&Url::parse("/upload").unwrap()).unwrap();
        assert!(hit.remainder.is_empty());
    }

    #[test]
    fn query_survives_into_remainder() {
        let tree = tree_with(&["/cgi"]);
        let hit = tree.find(&Url::parse("/cgi/sum.py?a=1").unwrap()).unwrap();
        assert_eq!(hit.remainder.query(), Some("a=1"));
    }
}
