//! IR construction
//!
//! Two entry paths build the raw IR: a walk over an XML parse tree
//! ([`from_xml`]) and a walk over a nested JSON map ([`from_map`]). Both
//! converge on the same [`RawIr`] shape so the post-processor never needs to
//! know where a query came from.
//!
//! The XML path owns the grammar quirks: `<or>`/`<not>` blocks become
//! synthetic `EXPR__<n>` groups, a plural wrapper element folds into its
//! child name (`<instruments><instrument>..` lands under `instrument`), and
//! a self-closing `<null/>` reads as `<null>1</null>`. Those conventions
//! stop here; nothing downstream sees them.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{QueryError, Result};
use crate::ir::{DeltaUnit, Join, RawEntry, RawIr, EXPR_PREFIX};
use crate::xml::Element;

/// Maximum query nesting depth accepted by either path. Recursion is
/// bounded by input shape, so pathological nesting is rejected rather than
/// allowed to exhaust the stack.
pub const MAX_DEPTH: usize = 64;

/// Second keys that build toward a pairs entry instead of replacing the
/// primary key.
const PAIR_KEYS: &[&str] = &["min", "max", "null", "like"];

fn depth_check(depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(QueryError::MalformedQuery(format!(
            "query nesting exceeds {MAX_DEPTH} levels"
        )));
    }
    Ok(())
}

/// Build a raw IR from a parsed XML tree. Exactly one element named
/// `root_name` must exist anywhere in the tree.
pub fn from_xml(tree: &Element, root_name: &str) -> Result<RawIr> {
    let roots = tree.find_all(root_name);
    if roots.len() != 1 {
        return Err(QueryError::MalformedQuery(format!(
            "expected exactly one <{root_name}> element, found {}",
            roots.len()
        )));
    }
    let ir = walk_element(roots[0], 0)?;
    tracing::debug!(root = root_name, entries = ir.entries.len(), "built raw IR from XML tree");
    Ok(ir)
}

fn walk_element(elem: &Element, depth: usize) -> Result<RawIr> {
    depth_check(depth)?;

    let mut ir = RawIr::default();
    let mut expr_count = 0;

    for child in elem.children() {
        match child.name() {
            "or" | "not" => {
                let inner = walk_element(child, depth + 1)?;
                // An empty block contributes nothing
                if inner.is_empty() {
                    continue;
                }
                let (join, negate) = if child.name() == "or" {
                    (Join::Or, false)
                } else {
                    (Join::And, true)
                };
                expr_count += 1;
                ir.entries.insert(
                    format!("{EXPR_PREFIX}{expr_count}"),
                    RawEntry::Group {
                        join,
                        negate,
                        inner,
                    },
                );
            }
            _ => column_element(&mut ir, child)?,
        }
    }

    Ok(ir)
}

fn column_element(ir: &mut RawIr, elem: &Element) -> Result<()> {
    let primary = elem.name();

    if !elem.has_children() {
        capture_attrs(ir, primary, elem.attributes())?;
        add_value(ir, primary, None, elem.text_content())?;
        return Ok(());
    }

    for sub in elem.children() {
        let second = sub.name();
        // <null/> with no content is shorthand for <null>1</null>
        let text = sub.text_content();
        let value = if second == "null" && text.trim().is_empty() && !sub.has_children() {
            "1"
        } else {
            text
        };

        // Attributes follow the key the value actually lands under
        let landing = if PAIR_KEYS.contains(&second) {
            primary
        } else {
            second
        };
        capture_attrs(ir, landing, elem.attributes())?;
        capture_attrs(ir, landing, sub.attributes())?;

        add_value(ir, primary, Some(second), value)?;
    }

    Ok(())
}

/// Add-value rule shared by every XML column element. A second key in
/// `PAIR_KEYS` stores into a pairs entry under the primary key; any other
/// second key replaces the primary (plural wrapper elision) and appends to
/// that key's value list.
fn add_value(ir: &mut RawIr, primary: &str, second: Option<&str>, value: &str) -> Result<()> {
    let value = value.trim();

    match second {
        Some(key) if PAIR_KEYS.contains(&key) => {
            let entry = ir
                .entries
                .entry(primary.to_string())
                .or_insert_with(|| RawEntry::Pairs(BTreeMap::new()));
            match entry {
                RawEntry::Pairs(pairs) => {
                    pairs
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                    Ok(())
                }
                _ => Err(mixed_entry(primary)),
            }
        }
        Some(key) => push_list(ir, key, value),
        None => push_list(ir, primary, value),
    }
}

fn push_list(ir: &mut RawIr, key: &str, value: &str) -> Result<()> {
    let entry = ir
        .entries
        .entry(key.to_string())
        .or_insert_with(|| RawEntry::List(Vec::new()));
    match entry {
        RawEntry::List(values) => {
            values.push(value.to_string());
            Ok(())
        }
        _ => Err(mixed_entry(key)),
    }
}

fn mixed_entry(key: &str) -> QueryError {
    QueryError::MalformedQuery(format!("column '{key}' mixes incompatible value kinds"))
}

fn capture_attrs(ir: &mut RawIr, key: &str, pairs: &[(String, String)]) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let attrs = ir.attrs.entry(key.to_string()).or_default();
    for (name, value) in pairs {
        match name.as_str() {
            "delta" => {
                let delta = value.trim().parse::<i64>().map_err(|_| {
                    QueryError::MalformedQuery(format!(
                        "delta attribute on '{key}' is not an integer: '{value}'"
                    ))
                })?;
                attrs.delta = Some(delta);
            }
            "units" => attrs.units = Some(DeltaUnit::parse(value)?),
            "mode" => attrs.mode = Some(value.trim().to_string()),
            // Unrecognized attributes carry no query semantics
            _ => {}
        }
    }
    Ok(())
}

/// Build a raw IR from a nested map, bypassing XML. The top level must be a
/// JSON object.
pub fn from_map(value: &Value) -> Result<RawIr> {
    let map = value
        .as_object()
        .ok_or_else(|| QueryError::BadArgs("nested-map query must be a JSON object".into()))?;
    let ir = walk_map(map, 0)?;
    tracing::debug!(entries = ir.entries.len(), "built raw IR from nested map");
    Ok(ir)
}

fn walk_map(map: &serde_json::Map<String, Value>, depth: usize) -> Result<RawIr> {
    depth_check(depth)?;

    let mut ir = RawIr::default();
    let mut expr_count = 0;

    for (key, value) in map {
        match key.as_str() {
            "or" | "and" | "not" => {
                let inner_map = value.as_object().ok_or_else(|| {
                    QueryError::BadArgs(format!("'{key}' group must be a JSON object"))
                })?;
                let inner = walk_map(inner_map, depth + 1)?;
                if inner.is_empty() {
                    continue;
                }
                let (join, negate) = match key.as_str() {
                    "or" => (Join::Or, false),
                    "and" => (Join::And, false),
                    _ => (Join::And, true),
                };
                expr_count += 1;
                ir.entries.insert(
                    format!("{EXPR_PREFIX}{expr_count}"),
                    RawEntry::Group {
                        join,
                        negate,
                        inner,
                    },
                );
            }
            _ => map_entry(&mut ir, key, value)?,
        }
    }

    Ok(ir)
}

fn map_entry(ir: &mut RawIr, key: &str, value: &Value) -> Result<()> {
    // Every processed key gets an attrs slot, supplied or not
    ir.attrs.entry(key.to_string()).or_default();

    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => {
            push_list(ir, key, &scalar_string(value)?)
        }
        Value::Array(items) => {
            for item in items {
                push_list(ir, key, &scalar_string(item)?)?;
            }
            Ok(())
        }
        Value::Object(fields) => map_object_entry(ir, key, fields),
        Value::Null => Err(QueryError::BadArgs(format!("null value for key '{key}'"))),
    }
}

fn map_object_entry(
    ir: &mut RawIr,
    key: &str,
    fields: &serde_json::Map<String, Value>,
) -> Result<()> {
    // {value, delta} / {value, mode}: a plain value list plus attributes
    if fields.contains_key("value")
        && (fields.contains_key("delta") || fields.contains_key("mode"))
    {
        match &fields["value"] {
            Value::Array(items) => {
                for item in items {
                    push_list(ir, key, &scalar_string(item)?)?;
                }
            }
            other => push_list(ir, key, &scalar_string(other)?)?,
        }

        let attrs = ir.attrs.entry(key.to_string()).or_default();
        if let Some(delta) = fields.get("delta") {
            attrs.delta = Some(delta.as_i64().or_else(|| delta.as_str()?.trim().parse().ok())
                .ok_or_else(|| {
                    QueryError::BadArgs(format!("delta for '{key}' is not an integer"))
                })?);
        }
        if let Some(units) = fields.get("units") {
            let token = units
                .as_str()
                .ok_or_else(|| QueryError::BadArgs(format!("units for '{key}' is not a string")))?;
            attrs.units = Some(DeltaUnit::parse(token)?);
        }
        if let Some(mode) = fields.get("mode") {
            let token = mode
                .as_str()
                .ok_or_else(|| QueryError::BadArgs(format!("mode for '{key}' is not a string")))?;
            attrs.mode = Some(token.trim().to_string());
        }
        return Ok(());
    }

    // {boolean: 0|1}: the column itself or its negation
    if let Some(flag) = fields.get("boolean") {
        let truth = match flag {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Value::String(s) => !s.is_empty() && s != "0",
            _ => {
                return Err(QueryError::BadArgs(format!(
                    "boolean flag for '{key}' is not a scalar"
                )))
            }
        };
        ir.entries.insert(key.to_string(), RawEntry::True(truth));
        return Ok(());
    }

    // Anything else passes through as loose pairs for the post-processor
    // to recognize (min/max, null, any, like, in)
    let mut pairs = BTreeMap::new();
    for (second, value) in fields {
        let values = match value {
            Value::Array(items) => items
                .iter()
                .map(scalar_string)
                .collect::<Result<Vec<_>>>()?,
            other => vec![scalar_string(other)?],
        };
        pairs.insert(second.clone(), values);
    }
    if ir
        .entries
        .insert(key.to_string(), RawEntry::Pairs(pairs))
        .is_some()
    {
        return Err(mixed_entry(key));
    }
    Ok(())
}

fn scalar_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(if *b { "1" } else { "0" }.to_string()),
        other => Err(QueryError::BadArgs(format!(
            "expected a scalar value, found {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list(ir: &RawIr, key: &str) -> Vec<String> {
        match &ir.entries[key] {
            RawEntry::List(values) => values.clone(),
            other => panic!("expected list for '{key}', got {other:?}"),
        }
    }

    #[test]
    fn test_xml_root_must_be_unique() {
        let none = Element::new("doc");
        assert!(matches!(
            from_xml(&none, "Query"),
            Err(QueryError::MalformedQuery(_))
        ));

        let twice = Element::new("doc")
            .child(Element::new("Query"))
            .child(Element::new("Query"));
        assert!(from_xml(&twice, "Query").is_err());
    }

    #[test]
    fn test_xml_repeated_elements_form_list() {
        let tree = Element::new("Query")
            .child(Element::new("instrument").text("SCUBA"))
            .child(Element::new("instrument").text(" CGS4 "));
        let ir = from_xml(&tree, "Query").unwrap();
        assert_eq!(list(&ir, "instrument"), vec!["SCUBA", "CGS4"]);
    }

    #[test]
    fn test_xml_plural_wrapper_elision() {
        let tree = Element::new("Query").child(
            Element::new("instruments")
                .child(Element::new("instrument").text("SCUBA"))
                .child(Element::new("instrument").text("CGS4")),
        );
        let ir = from_xml(&tree, "Query").unwrap();
        assert!(!ir.entries.contains_key("instruments"));
        assert_eq!(list(&ir, "instrument"), vec!["SCUBA", "CGS4"]);
    }

    #[test]
    fn test_xml_min_max_build_pairs() {
        let tree = Element::new("Query").child(
            Element::new("elevation")
                .child(Element::new("min").text("30"))
                .child(Element::new("max").text("80")),
        );
        let ir = from_xml(&tree, "Query").unwrap();
        match &ir.entries["elevation"] {
            RawEntry::Pairs(pairs) => {
                assert_eq!(pairs["min"], vec!["30"]);
                assert_eq!(pairs["max"], vec!["80"]);
            }
            other => panic!("expected pairs, got {other:?}"),
        }
    }

    #[test]
    fn test_xml_self_closing_null() {
        let tree = Element::new("Query")
            .child(Element::new("completion").child(Element::new("null")));
        let ir = from_xml(&tree, "Query").unwrap();
        match &ir.entries["completion"] {
            RawEntry::Pairs(pairs) => assert_eq!(pairs["null"], vec!["1"]),
            other => panic!("expected pairs, got {other:?}"),
        }
    }

    #[test]
    fn test_xml_or_and_not_groups() {
        let tree = Element::new("Query")
            .child(
                Element::new("or")
                    .child(Element::new("semester").text("06A"))
                    .child(Element::new("semester").text("06B")),
            )
            .child(Element::new("not").child(Element::new("status").text("done")));
        let ir = from_xml(&tree, "Query").unwrap();

        match &ir.entries["EXPR__1"] {
            RawEntry::Group { join, negate, .. } => {
                assert_eq!(*join, Join::Or);
                assert!(!*negate);
            }
            other => panic!("expected group, got {other:?}"),
        }
        match &ir.entries["EXPR__2"] {
            RawEntry::Group { join, negate, .. } => {
                assert_eq!(*join, Join::And);
                assert!(*negate);
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_xml_empty_group_dropped() {
        let tree = Element::new("Query").child(Element::new("or"));
        let ir = from_xml(&tree, "Query").unwrap();
        assert!(ir.is_empty());
    }

    #[test]
    fn test_xml_attribute_capture() {
        let tree = Element::new("Query")
            .child(Element::new("date").attr("delta", "60").attr("units", "minutes").text("2020-01-01"));
        let ir = from_xml(&tree, "Query").unwrap();
        let attrs = &ir.attrs["date"];
        assert_eq!(attrs.delta, Some(60));
        assert_eq!(attrs.units, Some(DeltaUnit::Minutes));
    }

    #[test]
    fn test_xml_bad_delta_rejected() {
        let tree = Element::new("Query")
            .child(Element::new("date").attr("delta", "soon").text("2020-01-01"));
        assert!(matches!(
            from_xml(&tree, "Query"),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_xml_depth_cap() {
        let mut elem = Element::new("semester").text("06A");
        for _ in 0..(MAX_DEPTH + 2) {
            elem = Element::new("or").child(elem);
        }
        let tree = Element::new("Query").child(elem);
        assert!(matches!(
            from_xml(&tree, "Query"),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_map_scalar_promotion() {
        let ir = from_map(&json!({"telescope": "JCMT", "priority": 3})).unwrap();
        assert_eq!(list(&ir, "telescope"), vec!["JCMT"]);
        assert_eq!(list(&ir, "priority"), vec!["3"]);
        // Attrs slot exists even when the input supplied none
        assert!(ir.attrs.contains_key("telescope"));
    }

    #[test]
    fn test_map_list_passthrough() {
        let ir = from_map(&json!({"instrument": ["SCUBA", "CGS4"]})).unwrap();
        assert_eq!(list(&ir, "instrument"), vec!["SCUBA", "CGS4"]);
    }

    #[test]
    fn test_map_value_delta() {
        let ir = from_map(&json!({"date": {"value": "2020-01-01", "delta": 1}})).unwrap();
        assert_eq!(list(&ir, "date"), vec!["2020-01-01"]);
        assert_eq!(ir.attrs["date"].delta, Some(1));
    }

    #[test]
    fn test_map_value_mode() {
        let ir = from_map(&json!({"TEXTFIELD__title": {"value": "galaxy", "mode": "boolean"}}))
            .unwrap();
        assert_eq!(list(&ir, "TEXTFIELD__title"), vec!["galaxy"]);
        assert_eq!(ir.attrs["TEXTFIELD__title"].mode.as_deref(), Some("boolean"));
    }

    #[test]
    fn test_map_boolean_flag() {
        let ir = from_map(&json!({"active": {"boolean": 1}, "retired": {"boolean": 0}})).unwrap();
        assert_eq!(ir.entries["active"], RawEntry::True(true));
        assert_eq!(ir.entries["retired"], RawEntry::True(false));
    }

    #[test]
    fn test_map_groups() {
        let ir = from_map(&json!({"not": {"status": "done"}})).unwrap();
        match &ir.entries["EXPR__1"] {
            RawEntry::Group { join, negate, inner } => {
                assert_eq!(*join, Join::And);
                assert!(*negate);
                assert!(inner.entries.contains_key("status"));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_map_pairs_passthrough() {
        let ir = from_map(&json!({"elevation": {"min": 30}})).unwrap();
        match &ir.entries["elevation"] {
            RawEntry::Pairs(pairs) => assert_eq!(pairs["min"], vec!["30"]),
            other => panic!("expected pairs, got {other:?}"),
        }
    }

    #[test]
    fn test_map_rejects_non_object() {
        assert!(matches!(
            from_map(&json!(["a", "b"])),
            Err(QueryError::BadArgs(_))
        ));
        assert!(from_map(&json!("q")).is_err());
    }

    #[test]
    fn test_map_rejects_null_value() {
        assert!(matches!(
            from_map(&json!({"telescope": null})),
            Err(QueryError::BadArgs(_))
        ));
    }
}
