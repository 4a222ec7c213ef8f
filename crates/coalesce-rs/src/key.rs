//! Canonical cache keys for tool invocations.
//!
//! A [`CanonicalKey`] captures everything about a tool call that affects its
//! result: the tool name, the query text, and the options object. Two calls
//! that differ only in whitespace, letter case, option key order, array
//! order, or `null`-vs-absent option fields produce the same key, so the
//! [`SessionMemo`](crate::memo::SessionMemo) and the
//! [`InFlight`](crate::inflight::InFlight) registry treat them as one call.
//!
//! # Array ordering
//!
//! Arrays inside options are sorted by the serialized form of their
//! canonicalized elements. This is only correct for arrays that are sets of
//! independent filter tokens (included sources, registries, phases). Callers
//! must not pass order-significant arrays through the options value; encode
//! them into the query or a scalar option instead.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Deterministic identity of a tool invocation for caching and coalescing.
///
/// The inner string is the compact JSON array
/// `[tool_name, normalized_query, normalized_options]`. JSON framing keeps
/// the three components unambiguous no matter what characters they contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Build the canonical key for `(tool_name, query, options)`.
///
/// Pure and infallible: every input, including an empty query and absent
/// options, yields a key.
///
/// ```
/// use coalesce_rs::key::canonicalize;
/// use serde_json::json;
///
/// let a = canonicalize("search_patents", "  Foo  BAR ", Some(&json!({"a": 1, "b": 2})));
/// let b = canonicalize("search_patents", "foo bar", Some(&json!({"b": 2, "a": 1})));
/// assert_eq!(a, b);
/// ```
pub fn canonicalize(tool_name: &str, query: &str, options: Option<&Value>) -> CanonicalKey {
    let options = normalize_options(options);
    let framed = Value::Array(vec![
        Value::String(tool_name.to_string()),
        Value::String(normalize_query(query)),
        options,
    ]);
    CanonicalKey(framed.to_string())
}

/// Trim, collapse internal whitespace runs to a single space, and lowercase.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Canonicalize an options value.
///
/// Absent options, `null`, and `{}` are all the same empty object.
pub fn normalize_options(options: Option<&Value>) -> Value {
    match options {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(value) => canonical_value(value),
    }
}

/// Recursively canonicalize a JSON value.
///
/// Object keys are sorted and `null` entries dropped. Array elements are
/// canonicalized and then sorted by their serialized form. `null` array
/// elements are kept since they occupy a position in the set.
fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            // BTreeMap gives sorted order whether or not serde_json preserves
            // insertion order in `Map`.
            let sorted: BTreeMap<&String, Value> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonical_value(v)))
                .collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut keyed: Vec<(String, Value)> = items
                .iter()
                .map(|item| {
                    let canon = canonical_value(item);
                    (canon.to_string(), canon)
                })
                .collect();
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Array(keyed.into_iter().map(|(_, v)| v).collect())
        }
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whitespace_and_case_are_ignored() {
        let a = canonicalize("t", "  Foo  BAR ", Some(&json!({"a": 1, "b": 2})));
        let b = canonicalize("t", "foo bar", Some(&json!({"b": 2, "a": 1})));
        assert_eq!(a, b);
    }

    #[test]
    fn canonicalize_is_deterministic() {
        let opts = json!({"sources": ["pubmed", "arxiv"], "limit": 10});
        let a = canonicalize("search_literature", "CRISPR", Some(&opts));
        let b = canonicalize("search_literature", "CRISPR", Some(&opts));
        assert_eq!(a, b);
    }

    #[test]
    fn option_arrays_are_order_independent() {
        let a = canonicalize("t", "q", Some(&json!({"sources": ["pubmed", "arxiv", "biorxiv"]})));
        let b = canonicalize("t", "q", Some(&json!({"sources": ["biorxiv", "pubmed", "arxiv"]})));
        assert_eq!(a, b);
    }

    #[test]
    fn null_fields_match_absent_fields() {
        let a = canonicalize("t", "q", Some(&json!({"limit": 5, "phase": null})));
        let b = canonicalize("t", "q", Some(&json!({"limit": 5})));
        assert_eq!(a, b);
    }

    #[test]
    fn absent_null_and_empty_options_agree() {
        let none = canonicalize("t", "q", None);
        let null = canonicalize("t", "q", Some(&Value::Null));
        let empty = canonicalize("t", "q", Some(&json!({})));
        assert_eq!(none, null);
        assert_eq!(none, empty);
    }

    #[test]
    fn nested_objects_are_sorted() {
        let a = canonicalize("t", "q", Some(&json!({"filter": {"z": 1, "a": {"y": 2, "b": 3}}})));
        let b = canonicalize("t", "q", Some(&json!({"filter": {"a": {"b": 3, "y": 2}, "z": 1}})));
        assert_eq!(a, b);
        assert!(a.as_str().contains(r#"{"a":{"b":3,"y":2},"z":1}"#));
    }

    #[test]
    fn arrays_of_objects_are_canonicalized_before_sorting() {
        let a = canonicalize("t", "q", Some(&json!({"f": [{"b": 1, "a": 2}, {"c": 0}]})));
        let b = canonicalize("t", "q", Some(&json!({"f": [{"c": 0}, {"a": 2, "b": 1}]})));
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_produce_different_keys() {
        let base = canonicalize("t", "q", Some(&json!({"limit": 5})));
        assert_ne!(base, canonicalize("t2", "q", Some(&json!({"limit": 5}))));
        assert_ne!(base, canonicalize("t", "q2", Some(&json!({"limit": 5}))));
        assert_ne!(base, canonicalize("t", "q", Some(&json!({"limit": 6}))));
        assert_ne!(base, canonicalize("t", "q", Some(&json!({"limit": "5"}))));
    }

    #[test]
    fn separators_in_components_do_not_collide() {
        let a = canonicalize("t:x", "", None);
        let b = canonicalize("t", "x:", None);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_query_still_produces_key() {
        let key = canonicalize("run_code", "", None);
        assert_eq!(key.as_str(), r#"["run_code","",{}]"#);
    }

    #[test]
    fn normalize_query_collapses_tabs_and_newlines() {
        assert_eq!(normalize_query("\tHello\n\n  World  "), "hello world");
        assert_eq!(normalize_query("   "), "");
    }

    #[test]
    fn null_array_elements_are_kept() {
        let with_null = canonicalize("t", "q", Some(&json!({"f": [null, 1]})));
        let without = canonicalize("t", "q", Some(&json!({"f": [1]})));
        assert_ne!(with_null, without);
    }
}
