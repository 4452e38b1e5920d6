//! SQL generation
//!
//! Compiles the normalized IR into a parenthesized SQL boolean expression
//! (no leading `WHERE`) and extracts full-text relevance expressions for
//! ranking. Dispatch over [`Entry`] is exhaustive; every kind has exactly
//! one compilation rule.
//!
//! Two quoting behaviors are preserved verbatim for compatibility with the
//! queries this translator replaces, and are known hardening targets (see
//! DESIGN.md): values matching a SQL date-function call pass through
//! unquoted so they stay live expressions, and `IN` list values are
//! double-quoted without further escaping.

use crate::error::{QueryError, Result};
use crate::ir::{Entry, Group, Ir, Range, Scalar, SubQuery};

/// Key prefix selecting the full-text comparator.
pub const TEXTFIELD_PREFIX: &str = "TEXTFIELD__";
/// Further prefix selecting boolean-mode full-text matching.
pub const BOOLEAN_PREFIX: &str = "BOOLEAN__";

/// Column names that collide with SQL reserved words and must be
/// backtick-quoted.
pub const RESERVED_COLUMNS: &[&str] = &["group", "order", "key", "desc"];

/// The `name` column matches a person in either role: principal
/// investigator, or co-investigator through the joined user table.
pub const PI_COLUMN: &str = "pi";
pub const COI_COLUMN: &str = "coi.userid";

/// Compile the IR into a WHERE-clause fragment, ANDing every top-level
/// entry not named in `skip`. Returns `None` when nothing compiles.
pub fn compile(ir: &Ir, skip: &[&str]) -> Result<Option<String>> {
    let mut clauses = Vec::new();
    for (key, entry) in ir {
        if skip.contains(&key.as_str()) {
            continue;
        }
        if let Some(sql) = compile_entry(key, entry)? {
            clauses.push(sql);
        }
    }
    if clauses.is_empty() {
        return Ok(None);
    }
    let fragment = clauses.join(" AND ");
    tracing::trace!(%fragment, "compiled query fragment");
    Ok(Some(fragment))
}

/// Compile one column entry. `Any` (and anything that reduces to nothing)
/// yields `None` and is absent from the clause chain it would have joined.
fn compile_entry(key: &str, entry: &Entry) -> Result<Option<String>> {
    match entry {
        Entry::Values(values) => Ok(compile_values(key, values)),
        Entry::Range(range) => Ok(compile_range(key, range)),
        Entry::Null(is_null) => Ok(Some(if *is_null {
            format!("({} IS NULL)", quote_column(key))
        } else {
            format!("({} IS NOT NULL)", quote_column(key))
        })),
        Entry::Any => Ok(None),
        Entry::True(truth) => Ok(Some(if *truth {
            format!("({})", quote_column(key))
        } else {
            format!("(NOT {})", quote_column(key))
        })),
        Entry::In(items) => Ok(compile_in(key, items)),
        Entry::Like(pattern) => Ok(Some(format!(
            "({} LIKE '{pattern}')",
            quote_column(key)
        ))),
        Entry::SubQuery(sub) => compile_subquery(key, sub).map(Some),
        Entry::Group(group) => compile_group(group),
    }
}

fn compile_values(key: &str, values: &[Scalar]) -> Option<String> {
    if values.is_empty() {
        return None;
    }

    let comparisons: Vec<String> = if let Some(column) = key.strip_prefix(TEXTFIELD_PREFIX) {
        let (column, boolean) = match column.strip_prefix(BOOLEAN_PREFIX) {
            Some(rest) => (rest, true),
            None => (column, false),
        };
        values
            .iter()
            .map(|v| fulltext_match(column, v, boolean))
            .collect()
    } else if key == "name" {
        // Person appears in either role: OR across both columns per value
        values
            .iter()
            .flat_map(|v| {
                let quoted = quote_value(v);
                [
                    format!("{PI_COLUMN} = {quoted}"),
                    format!("{COI_COLUMN} = {quoted}"),
                ]
            })
            .collect()
    } else {
        let column = quote_column(key);
        values
            .iter()
            .map(|v| format!("{column} = {}", quote_value(v)))
            .collect()
    };

    Some(format!("({})", comparisons.join(" OR ")))
}

fn compile_range(key: &str, range: &Range) -> Option<String> {
    let column = quote_column(key);
    let mut parts = Vec::new();
    if let Some(min) = &range.min {
        parts.push(format!("{column} >= {}", quote_value(min)));
    }
    if let Some(max) = &range.max {
        parts.push(format!("{column} <= {}", quote_value(max)));
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("({})", parts.join(" AND ")))
}

fn compile_in(key: &str, items: &[String]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let list: Vec<String> = items.iter().map(|v| format!("\"{v}\"")).collect();
    Some(format!("({} IN ({}))", quote_column(key), list.join(", ")))
}

fn compile_subquery(key: &str, sub: &SubQuery) -> Result<String> {
    let table = sub.table.as_deref().ok_or_else(|| {
        QueryError::MalformedQuery(format!("subquery for '{key}' has no table bound"))
    })?;
    let select = match compile(&sub.query, &[])? {
        Some(inner) => format!("SELECT {} FROM {table} WHERE {inner}", sub.expression),
        None => format!("SELECT {} FROM {table}", sub.expression),
    };
    Ok(format!("({} IN ({select}))", quote_column(key)))
}

fn compile_group(group: &Group) -> Result<Option<String>> {
    let mut children = Vec::new();
    for (key, entry) in &group.entries {
        if let Some(sql) = compile_entry(key, entry)? {
            children.push(sql);
        }
    }
    if children.is_empty() {
        return Ok(None);
    }

    let many = children.len() > 1;
    let mut joined = children.join(&format!(" {} ", group.join.word()));
    if group.negate {
        if many {
            joined = format!("({joined})");
        }
        joined = format!("NOT {joined}");
    }
    Ok(Some(format!("({joined})")))
}

/// The full-text comparator expression, shared with relevance extraction.
fn fulltext_match(column: &str, value: &Scalar, boolean: bool) -> String {
    if boolean {
        format!("MATCH ({column}) AGAINST ('{value}' IN BOOLEAN MODE)")
    } else {
        format!("MATCH ({column}) AGAINST ('{value}')")
    }
}

/// Backtick-wrap column names that collide with reserved words.
fn quote_column(column: &str) -> String {
    if RESERVED_COLUMNS.contains(&column) {
        format!("`{column}`")
    } else {
        column.to_string()
    }
}

/// Quote a comparison value. Text is single-quoted when it contains
/// alphabetic characters or a colon; purely numeric text passes through
/// bare. A `dateadd`/`datediff` function call is never quoted so it stays a
/// live SQL expression. Parsed dates always render quoted.
fn quote_value(value: &Scalar) -> String {
    match value {
        Scalar::Date(_) => format!("'{value}'"),
        Scalar::Text(text) => {
            if is_date_function(text) {
                text.clone()
            } else if text.chars().any(|c| c.is_alphabetic()) || text.contains(':') {
                format!("'{text}'")
            } else {
                text.clone()
            }
        }
    }
}

fn is_date_function(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.starts_with("dateadd") || lower.starts_with("datediff")
}

/// Collect every full-text relevance expression in the IR, at any depth.
/// Skip sets do not apply here: a key omitted from the WHERE fragment still
/// contributes to ranking.
pub fn relevance(ir: &Ir) -> Vec<String> {
    let mut expressions = Vec::new();
    collect_relevance(ir, &mut expressions);
    expressions
}

fn collect_relevance(ir: &Ir, out: &mut Vec<String>) {
    for (key, entry) in ir {
        match entry {
            Entry::Values(values) => {
                if let Some(column) = key.strip_prefix(TEXTFIELD_PREFIX) {
                    let (column, boolean) = match column.strip_prefix(BOOLEAN_PREFIX) {
                        Some(rest) => (rest, true),
                        None => (column, false),
                    };
                    for value in values {
                        out.push(fulltext_match(column, value, boolean));
                    }
                }
            }
            Entry::Group(group) => collect_relevance(&group.entries, out),
            Entry::SubQuery(sub) => collect_relevance(&sub.query, out),
            _ => {}
        }
    }
}
