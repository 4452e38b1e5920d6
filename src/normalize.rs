//! IR normalization
//!
//! A single pass over the raw IR produces the closed [`Entry`] form the
//! generator consumes. Per key, date handling runs first: values under a
//! date-named column are parsed, and a single value with a `delta`
//! attribute expands into an inclusive date window. Only then are the loose
//! pairs recognized as Null/Any/Like/In/Range markers, because date-window
//! synthesis competes with the generic `{min,max}` path.
//!
//! `normalize` consumes the raw IR by value and returns the normalized map,
//! so a normalized query cannot be run through the post-processor again.

use std::collections::BTreeMap;

use crate::dates;
use crate::error::{QueryError, Result};
use crate::ir::{Attrs, DeltaUnit, Entry, Group, Ir, Range, RawEntry, RawIr, Scalar};
use crate::sql::{BOOLEAN_PREFIX, TEXTFIELD_PREFIX};

/// Perl-style truthiness used by the null and boolean markers.
fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "0"
}

fn is_date_key(key: &str) -> bool {
    key.to_ascii_lowercase().contains("date")
}

/// Normalize a raw IR into the generator-ready form.
pub fn normalize(raw: RawIr) -> Result<Ir> {
    let RawIr {
        entries,
        mut attrs,
    } = raw;

    let mut out = Ir::new();
    for (key, entry) in entries {
        let attr = attrs.remove(&key).unwrap_or_default();
        let normalized = match entry {
            RawEntry::Group {
                join,
                negate,
                inner,
            } => Entry::Group(Group {
                join,
                negate,
                entries: normalize(inner)?,
            }),
            RawEntry::True(flag) => Entry::True(flag),
            RawEntry::List(values) => normalize_list(&key, values, &attr)?,
            RawEntry::Pairs(pairs) => normalize_pairs(&key, pairs)?,
        };
        out.insert(effective_key(key, &attr), normalized);
    }
    Ok(out)
}

/// A full-text key whose attributes request boolean mode gains the
/// `BOOLEAN__` comparator prefix here, so the generator only ever looks at
/// the key.
fn effective_key(key: String, attr: &Attrs) -> String {
    if attr.mode.as_deref() == Some("boolean")
        && key.starts_with(TEXTFIELD_PREFIX)
        && !key[TEXTFIELD_PREFIX.len()..].starts_with(BOOLEAN_PREFIX)
    {
        let column = &key[TEXTFIELD_PREFIX.len()..];
        return format!("{TEXTFIELD_PREFIX}{BOOLEAN_PREFIX}{column}");
    }
    key
}

fn normalize_list(key: &str, values: Vec<String>, attr: &Attrs) -> Result<Entry> {
    if !is_date_key(key) {
        return Ok(Entry::Values(
            values.into_iter().map(Scalar::Text).collect(),
        ));
    }

    let parsed = values
        .iter()
        .map(|v| dates::parse_date(v))
        .collect::<Result<Vec<_>>>()?;

    // A lone dated value with a delta attribute becomes an inclusive
    // window; a negative delta extends backwards, so the bounds swap to
    // keep min <= max.
    if let (Some(delta), [date]) = (attr.delta, parsed.as_slice()) {
        let units = attr.units.unwrap_or(DeltaUnit::Days);
        let offset = dates::apply_delta(*date, delta, units)?;
        let (min, max) = if delta < 0 {
            (offset, *date)
        } else {
            (*date, offset)
        };
        return Ok(Entry::Range(Range::new(
            Some(Scalar::Date(min)),
            Some(Scalar::Date(max)),
        )));
    }

    Ok(Entry::Values(parsed.into_iter().map(Scalar::Date).collect()))
}

fn normalize_pairs(key: &str, mut pairs: BTreeMap<String, Vec<String>>) -> Result<Entry> {
    if let Some(values) = pairs.remove("null") {
        return Ok(Entry::Null(values.first().is_some_and(|v| truthy(v))));
    }
    if pairs.remove("any").is_some() {
        return Ok(Entry::Any);
    }
    if let Some(values) = pairs.remove("like") {
        let pattern = values.into_iter().next().ok_or_else(|| {
            QueryError::MalformedQuery(format!("empty like marker for '{key}'"))
        })?;
        return Ok(Entry::Like(pattern));
    }
    if let Some(values) = pairs.remove("in") {
        return Ok(Entry::In(values));
    }

    if pairs.contains_key("min") || pairs.contains_key("max") {
        let min = bound(key, pairs.remove("min"))?;
        let max = bound(key, pairs.remove("max"))?;
        return Ok(Entry::Range(Range::new(min, max)));
    }

    Err(QueryError::MalformedQuery(format!(
        "entry for '{key}' is none of the recognized kinds"
    )))
}

fn bound(key: &str, values: Option<Vec<String>>) -> Result<Option<Scalar>> {
    let Some(values) = values else {
        return Ok(None);
    };
    let Some(value) = values.into_iter().next() else {
        return Ok(None);
    };
    if is_date_key(key) {
        return Ok(Some(Scalar::Date(dates::parse_date(&value)?)));
    }
    Ok(Some(Scalar::Text(value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{from_map, from_xml};
    use crate::xml::Element;
    use chrono::NaiveDate;
    use serde_json::json;

    fn norm(value: serde_json::Value) -> Ir {
        normalize(from_map(&value).unwrap()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> Scalar {
        Scalar::Date(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    #[test]
    fn test_min_max_pairs_become_range() {
        let ir = norm(json!({"elevation": {"min": 30, "max": 80}}));
        assert_eq!(
            ir["elevation"],
            Entry::Range(Range::new(Some(Scalar::text("30")), Some(Scalar::text("80"))))
        );
    }

    #[test]
    fn test_one_sided_range() {
        let ir = norm(json!({"elevation": {"min": 30}}));
        assert_eq!(
            ir["elevation"],
            Entry::Range(Range::new(Some(Scalar::text("30")), None))
        );
    }

    #[test]
    fn test_null_marker() {
        let ir = norm(json!({"completion": {"null": 1}, "fault": {"null": 0}}));
        assert_eq!(ir["completion"], Entry::Null(true));
        assert_eq!(ir["fault"], Entry::Null(false));
    }

    #[test]
    fn test_any_marker() {
        let ir = norm(json!({"telescope": {"any": 1}}));
        assert_eq!(ir["telescope"], Entry::Any);
    }

    #[test]
    fn test_like_and_in_markers() {
        let ir = norm(json!({"pi": {"like": "jo%"}, "status": {"in": ["open", "closed"]}}));
        assert_eq!(ir["pi"], Entry::Like("jo%".into()));
        assert_eq!(
            ir["status"],
            Entry::In(vec!["open".into(), "closed".into()])
        );
    }

    #[test]
    fn test_unrecognized_pairs_rejected() {
        let raw = from_map(&json!({"telescope": {"most": "JCMT"}})).unwrap();
        assert!(matches!(
            normalize(raw),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_date_values_parsed() {
        let ir = norm(json!({"date": "2020-01-01"}));
        assert_eq!(ir["date"], Entry::Values(vec![date(2020, 1, 1)]));
    }

    #[test]
    fn test_date_range_bounds_parsed() {
        let ir = norm(json!({"faultdate": {"min": "2020-01-01", "max": "2020-02-01"}}));
        assert_eq!(
            ir["faultdate"],
            Entry::Range(Range::new(Some(date(2020, 1, 1)), Some(date(2020, 2, 1))))
        );
    }

    #[test]
    fn test_bad_date_rejected() {
        let raw = from_map(&json!({"date": "yesterday"})).unwrap();
        assert!(matches!(
            normalize(raw),
            Err(QueryError::MalformedQuery(_))
        ));
    }

    #[test]
    fn test_delta_expands_to_range() {
        let ir = norm(json!({"date": {"value": "2020-01-01", "delta": 1}}));
        assert_eq!(
            ir["date"],
            Entry::Range(Range::new(Some(date(2020, 1, 1)), Some(date(2020, 1, 2))))
        );
    }

    #[test]
    fn test_negative_delta_swaps_bounds() {
        let ir = norm(json!({"date": {"value": "2020-01-01", "delta": -1}}));
        assert_eq!(
            ir["date"],
            Entry::Range(Range::new(Some(date(2019, 12, 31)), Some(date(2020, 1, 1))))
        );
    }

    #[test]
    fn test_delta_units_override() {
        let tree = Element::new("Query").child(
            Element::new("date")
                .attr("delta", "60")
                .attr("units", "minutes")
                .text("2020-01-01"),
        );
        let ir = normalize(from_xml(&tree, "Query").unwrap()).unwrap();
        let end = Scalar::Date(
            NaiveDate::from_ymd_opt(2020, 1, 1)
                .unwrap()
                .and_hms_opt(1, 0, 0)
                .unwrap(),
        );
        assert_eq!(
            ir["date"],
            Entry::Range(Range::new(Some(date(2020, 1, 1)), Some(end)))
        );
    }

    #[test]
    fn test_delta_ignored_for_multiple_values() {
        // The window only applies to exactly one value
        let ir = norm(json!({"date": {"value": ["2020-01-01", "2020-01-05"], "delta": 1}}));
        assert_eq!(
            ir["date"],
            Entry::Values(vec![date(2020, 1, 1), date(2020, 1, 5)])
        );
    }

    #[test]
    fn test_boolean_mode_rewrites_key() {
        let ir = norm(json!({"TEXTFIELD__title": {"value": "galaxy", "mode": "boolean"}}));
        assert!(ir.contains_key("TEXTFIELD__BOOLEAN__title"));
        assert!(!ir.contains_key("TEXTFIELD__title"));
    }

    #[test]
    fn test_groups_recurse() {
        let ir = norm(json!({"or": {"date": {"min": "2020-01-01"}}}));
        match &ir["EXPR__1"] {
            Entry::Group(group) => {
                assert_eq!(
                    group.entries["date"],
                    Entry::Range(Range::new(Some(date(2020, 1, 1)), None))
                );
            }
            other => panic!("expected group, got {other:?}"),
        }
    }
}
