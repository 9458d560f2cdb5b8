//! Per-document traversal state.

use crate::naming::{self, AbbreviationCache, NamingOptions};
use chrono::Utc;

/// Format of the run timestamp written to every record
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Traversal state threaded through recursive descent.
///
/// Every descent returns a new context, so sibling branches never share
/// mutable state and independent documents can be flattened on separate
/// threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingContext {
    /// Depth below the current record's root
    pub current_depth: usize,

    /// Path from the record root, abbreviated once it grows too deep
    pub path_components: Vec<String>,

    /// Fixed for one top-level document and all of its descendants
    pub run_timestamp: String,

    /// Position of the top-level document within the run
    pub record_index: usize,

    full_path: Vec<String>,
    nesting_level: usize,
    abbreviated: bool,
}

impl ProcessingContext {
    /// Context for a top-level document, stamped with the current time
    pub fn new(record_index: usize) -> Self {
        Self::with_timestamp(record_index, Utc::now().format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn with_timestamp(record_index: usize, run_timestamp: impl Into<String>) -> Self {
        ProcessingContext {
            current_depth: 0,
            path_components: Vec::new(),
            run_timestamp: run_timestamp.into(),
            record_index,
            full_path: Vec::new(),
            nesting_level: 0,
            abbreviated: false,
        }
    }

    /// The same position in the document, for the top-level record `index`
    pub fn at_record(&self, index: usize) -> Self {
        ProcessingContext {
            record_index: index,
            ..self.clone()
        }
    }

    /// Context for the field `key` one level below this one.
    ///
    /// The relative path holds the sanitized key; the full path keeps the key
    /// as it appears in the document.
    pub fn descend(&self, key: &str, naming: &NamingOptions) -> Self {
        let component = naming::sanitize_component(key);
        let mut full_path = self.full_path.clone();
        full_path.push(key.to_string());
        ProcessingContext {
            current_depth: self.current_depth + 1,
            path_components: naming::abbreviate(
                &self.path_components,
                self.current_depth,
                naming.nested_threshold,
                &component,
            ),
            run_timestamp: self.run_timestamp.clone(),
            record_index: self.record_index,
            full_path,
            nesting_level: self.nesting_level + 1,
            abbreviated: naming::collapses(
                self.path_components.len(),
                self.current_depth,
                naming.nested_threshold,
            ),
        }
    }

    /// Context for the root of a record in a child table.
    ///
    /// The relative path starts over, the timestamp and the absolute nesting
    /// level carry on.
    pub fn child_record(&self) -> Self {
        ProcessingContext {
            current_depth: 0,
            path_components: Vec::new(),
            run_timestamp: self.run_timestamp.clone(),
            record_index: self.record_index,
            full_path: self.full_path.clone(),
            nesting_level: self.nesting_level,
            abbreviated: false,
        }
    }

    /// Joined, abbreviated path
    pub fn path(&self, naming: &NamingOptions) -> String {
        naming::join(&self.path_components, &naming.separator)
    }

    /// Unabbreviated, unsanitized path from the top-level document
    pub fn full_path(&self) -> &[String] {
        &self.full_path
    }

    /// Total nesting below the top-level document, across child tables
    pub fn nesting_level(&self) -> usize {
        self.nesting_level
    }

    /// Whether the relative path was collapsed on the way down
    pub fn is_abbreviated(&self) -> bool {
        self.abbreviated
    }

    /// Remember the full path behind `name` when this context's path was
    /// collapsed.
    pub(crate) fn note_abbreviation(&self, name: &str, cache: &mut AbbreviationCache) {
        if self.abbreviated {
            cache.record(name, self.full_path.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descend_builds_path() {
        let naming = NamingOptions::default();
        let ctx = ProcessingContext::with_timestamp(0, "2024-01-01 00:00:00.000000");
        let child = ctx.descend("details", &naming).descend("type", &naming);

        assert_eq!(child.current_depth, 2);
        assert_eq!(child.path(&naming), "details_type");
        assert_eq!(child.run_timestamp, ctx.run_timestamp);
        assert_eq!(ctx.current_depth, 0);
        assert!(ctx.path_components.is_empty());
    }

    #[test]
    fn test_descend_abbreviates_deep_paths() {
        let naming = NamingOptions::default();
        let mut ctx = ProcessingContext::with_timestamp(0, "t");
        for field in ["a", "b", "c", "d", "e"] {
            ctx = ctx.descend(field, &naming);
        }

        assert_eq!(ctx.path_components, vec!["a", "nested", "e"]);
        assert_eq!(ctx.full_path(), ["a", "b", "c", "d", "e"]);
        assert!(ctx.is_abbreviated());

        let mut cache = AbbreviationCache::new();
        ctx.note_abbreviation(&ctx.path(&naming), &mut cache);
        assert_eq!(cache.get("a_nested_e").unwrap().len(), 5);
    }

    #[test]
    fn test_descend_sanitizes_relative_path_only() {
        let naming = NamingOptions::default();
        let ctx = ProcessingContext::with_timestamp(0, "t")
            .descend("first name", &naming)
            .descend("@@", &naming);

        assert_eq!(ctx.path(&naming), "first_name_unnamed");
        assert_eq!(ctx.full_path(), ["first name", "@@"]);
    }

    #[test]
    fn test_at_record_keeps_position() {
        let naming = NamingOptions::default();
        let ctx = ProcessingContext::with_timestamp(0, "t").descend("a", &naming);
        let moved = ctx.at_record(5);

        assert_eq!(moved.record_index, 5);
        assert_eq!(moved.full_path(), ctx.full_path());
        assert_eq!(moved.run_timestamp, "t");
    }

    #[test]
    fn test_collapse_at_depth_three() {
        let naming = NamingOptions::new("_", 3).unwrap();
        let ctx = ProcessingContext::with_timestamp(0, "t")
            .descend("a", &naming)
            .descend("b", &naming)
            .descend("c", &naming);

        assert_eq!(ctx.path_components, vec!["a", "nested", "c"]);
        assert!(ctx.is_abbreviated());
    }

    #[test]
    fn test_child_record_resets_relative_path() {
        let naming = NamingOptions::default();
        let ctx = ProcessingContext::with_timestamp(3, "t")
            .descend("orders", &naming)
            .descend("items", &naming);
        let child = ctx.child_record();

        assert_eq!(child.current_depth, 0);
        assert!(child.path_components.is_empty());
        assert_eq!(child.nesting_level(), 2);
        assert_eq!(child.record_index, 3);
        assert_eq!(child.full_path(), ["orders", "items"]);
    }

    #[test]
    fn test_field_named_nested_is_not_abbreviated() {
        let naming = NamingOptions::default();
        let ctx = ProcessingContext::with_timestamp(0, "t")
            .descend("a", &naming)
            .descend("nested", &naming)
            .descend("b", &naming);
        assert!(!ctx.is_abbreviated());
    }
}
