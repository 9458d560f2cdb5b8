//! Field and table naming
//!
//! Builds the flattened names used for columns and child tables, and keeps
//! them bounded under deep nesting by collapsing long paths into a
//! `[root, nested, current]` form.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Marker component that replaces the middle of an abbreviated path
pub const NESTED_MARKER: &str = "nested";

/// Placeholder for characters outside the identifier-safe set
pub const PLACEHOLDER: char = '_';

/// Name used when a component sanitizes down to nothing
const UNNAMED: &str = "unnamed";

static UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_]").unwrap());

static PLACEHOLDER_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_{2,}").unwrap());

/// Options governing how paths are joined and abbreviated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingOptions {
    /// Separator placed between path components
    pub separator: String,

    /// Depth at which paths collapse into `[root, nested, current]`
    pub nested_threshold: usize,
}

impl Default for NamingOptions {
    fn default() -> Self {
        NamingOptions {
            separator: String::from("_"),
            nested_threshold: 4,
        }
    }
}

impl NamingOptions {
    pub fn new(separator: impl Into<String>, nested_threshold: usize) -> Result<Self> {
        let options = NamingOptions {
            separator: separator.into(),
            nested_threshold,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<()> {
        if self.separator.is_empty() {
            return Err(Error::configuration("separator must not be empty"));
        }
        if self.nested_threshold < 2 {
            return Err(Error::configuration(format!(
                "nested_threshold must be at least 2, got {}",
                self.nested_threshold
            )));
        }
        Ok(())
    }
}

/// Join path components with a separator
pub fn join<S: AsRef<str>>(components: &[S], separator: &str) -> String {
    components
        .iter()
        .map(|c| c.as_ref())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Split a joined path back into components
pub fn split(path: &str, separator: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.split(separator).map(str::to_string).collect()
}

/// Replace unsafe characters with `_`, collapse runs of `_` and trim them
/// from both ends.
pub fn sanitize(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let collapsed = PLACEHOLDER_RUNS.replace_all(&replaced, "_");
    collapsed.trim_matches(PLACEHOLDER).to_string()
}

/// Sanitize a single path component, leaving already-safe names untouched
pub fn sanitize_component(name: &str) -> String {
    if !UNSAFE_CHARS.is_match(name) && !name.is_empty() {
        return name.to_string();
    }
    let cleaned = sanitize(name);
    if cleaned.is_empty() {
        UNNAMED.to_string()
    } else {
        cleaned
    }
}

/// Name of the table extracted at `path` below `entity_name`.
///
/// For arrays nested inside child records, `entity_name` is the child table's
/// own name, so grandchild names chain from their parent table.
pub fn table_name<S: AsRef<str>>(entity_name: &str, path: &[S], separator: &str) -> String {
    let mut name = entity_name.to_string();
    for component in path {
        if !name.is_empty() {
            name.push_str(separator);
        }
        name.push_str(component.as_ref());
    }
    name
}

/// Whether descending from a path of `len` components at `current_depth`
/// collapses it into `[root, nested, current]`
pub fn collapses(len: usize, current_depth: usize, nested_threshold: usize) -> bool {
    current_depth + 1 >= nested_threshold && len >= 2
}

/// Compute the path after descending into `next` from a path at `current_depth`
pub fn abbreviate(
    components: &[String],
    current_depth: usize,
    nested_threshold: usize,
    next: &str,
) -> Vec<String> {
    if components.is_empty() {
        return vec![next.to_string()];
    }
    if collapses(components.len(), current_depth, nested_threshold) {
        return vec![
            components[0].clone(),
            NESTED_MARKER.to_string(),
            next.to_string(),
        ];
    }
    let mut path = components.to_vec();
    path.push(next.to_string());
    path
}

/// `base`, or the first of `base_2`, `base_3`, ... that is not `taken`
pub fn disambiguate(base: &str, separator: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_string();
    }
    (2usize..)
        .map(|n| format!("{base}{separator}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// Mapping from abbreviated names to the full paths they stand for
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbbreviationCache {
    entries: BTreeMap<String, Vec<String>>,
}

impl AbbreviationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, abbreviated: impl Into<String>, full_path: Vec<String>) {
        self.entries.insert(abbreviated.into(), full_path);
    }

    pub fn get(&self, abbreviated: &str) -> Option<&[String]> {
        self.entries.get(abbreviated).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// Union with another cache. Only an exact key collision replaces an
    /// existing entry, in which case `other` wins.
    pub fn merge(&mut self, other: AbbreviationCache) {
        self.entries.extend(other.entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn path(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_join_and_split() {
        let parts = path(&["details", "type"]);
        let joined = join(&parts, "_");
        assert_eq!(joined, "details_type");
        assert_eq!(split(&joined, "_"), parts);
        assert_eq!(join(&path(&["a", "b"]), "."), "a.b");
        assert!(split("", "_").is_empty());
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("first name"), "first_name");
        assert_eq!(sanitize("  price ($)  "), "price");
        assert_eq!(sanitize("a--b..c"), "a_b_c");
        assert_eq!(sanitize("__id__"), "id");
        assert_eq!(sanitize("$$$"), "");
    }

    #[test]
    fn test_sanitize_component_keeps_safe_names() {
        assert_eq!(sanitize_component("_id"), "_id");
        assert_eq!(sanitize_component("user name"), "user_name");
        assert_eq!(sanitize_component("@@"), "unnamed");
        assert_eq!(sanitize_component(""), "unnamed");
    }

    #[test]
    fn test_table_name_chains() {
        let first = table_name("orders", &["items"], "_");
        assert_eq!(first, "orders_items");
        let second = table_name(&first, &["tags"], "_");
        assert_eq!(second, "orders_items_tags");
        assert_eq!(table_name("", &["x"], "_"), "x");
    }

    #[test]
    fn test_abbreviate_starts_fresh_path() {
        assert_eq!(abbreviate(&[], 0, 4, "details"), path(&["details"]));
    }

    #[test]
    fn test_abbreviate_appends_below_threshold() {
        let p = path(&["a", "b"]);
        assert_eq!(abbreviate(&p, 2, 4, "c"), path(&["a", "b", "c"]));
    }

    #[test]
    fn test_abbreviate_collapses_at_threshold() {
        let p = path(&["a", "b", "c"]);
        assert_eq!(abbreviate(&p, 3, 4, "d"), path(&["a", "nested", "d"]));

        let collapsed = path(&["a", "nested", "d"]);
        assert_eq!(abbreviate(&collapsed, 4, 4, "e"), path(&["a", "nested", "e"]));
    }

    #[test]
    fn test_abbreviate_needs_two_components() {
        let p = path(&["a"]);
        assert_eq!(abbreviate(&p, 5, 2, "b"), path(&["a", "b"]));
    }

    #[test]
    fn test_disambiguate() {
        let taken = ["a_b", "a_b_2"];
        assert_eq!(disambiguate("c", "_", |n| taken.contains(&n)), "c");
        assert_eq!(disambiguate("a_b", "_", |n| taken.contains(&n)), "a_b_3");
        assert_eq!(disambiguate("x", ".", |n| n == "x"), "x.2");
    }

    #[test]
    fn test_collapses() {
        assert!(!collapses(1, 5, 2));
        assert!(!collapses(2, 2, 4));
        assert!(collapses(2, 3, 4));
        assert!(collapses(3, 9, 4));
    }

    #[test]
    fn test_naming_options_validation() {
        assert!(NamingOptions::new("_", 4).is_ok());
        assert!(NamingOptions::new("", 4).unwrap_err().is_configuration());
        assert!(NamingOptions::new(".", 1).unwrap_err().is_configuration());
    }

    #[test]
    fn test_cache_merge_is_union() {
        let mut left = AbbreviationCache::new();
        left.record("a_nested_d", path(&["a", "b", "c", "d"]));
        left.record("x_nested_z", path(&["x", "y", "w", "z"]));

        let mut right = AbbreviationCache::new();
        right.record("m_nested_q", path(&["m", "n", "o", "q"]));
        right.record("a_nested_d", path(&["a", "k", "l", "d"]));

        left.merge(right);
        assert_eq!(left.len(), 3);
        assert_eq!(left.get("x_nested_z").unwrap(), path(&["x", "y", "w", "z"]).as_slice());
        assert_eq!(left.get("m_nested_q").unwrap(), path(&["m", "n", "o", "q"]).as_slice());
        assert_eq!(left.get("a_nested_d").unwrap(), path(&["a", "k", "l", "d"]).as_slice());
    }

    proptest! {
        #[test]
        fn sanitize_is_idempotent(name in ".{0,40}") {
            let once = sanitize(&name);
            prop_assert_eq!(sanitize(&once), once.clone());
        }

        #[test]
        fn split_inverts_join(parts in prop::collection::vec("[a-z0-9]{1,8}", 1..6)) {
            let joined = join(&parts, ".");
            prop_assert_eq!(split(&joined, "."), parts);
        }
    }
}
