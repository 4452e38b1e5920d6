//! Query intermediate representation
//!
//! The IR is a mapping from column name to an [`Entry`]: a closed tagged
//! union over every match semantic the translator understands. The SQL
//! generator dispatches on it with an exhaustive match, so an entry that is
//! none of the recognized kinds cannot survive construction.
//!
//! Two shapes exist:
//!
//! - [`RawIr`]: what the builders produce before normalization. Values are
//!   untyped strings, ranges and markers are still loose key/value pairs,
//!   and per-column attributes (`delta`, `units`, `mode`) sit in a side
//!   table.
//! - [`Ir`]: the normalized form consumed by the generator. Normalization
//!   takes the raw IR by value, so an already-normalized query can never be
//!   fed back through the post-processor.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;

use crate::error::{QueryError, Result};

/// Normalized IR: column name to entry. Group children live under synthetic
/// `EXPR__<n>` keys, unique within their level.
pub type Ir = BTreeMap<String, Entry>;

/// Prefix selecting a synthetic expression-group key.
pub const EXPR_PREFIX: &str = "EXPR__";

/// A scalar comparison value: free text, or a parsed date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scalar {
    Text(String),
    Date(NaiveDateTime),
}

impl Scalar {
    pub fn text(value: impl Into<String>) -> Self {
        Scalar::Text(value.into())
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Scalar::Date(d) => Some(*d),
            Scalar::Text(_) => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Date(d) => write!(f, "{}", d.format(crate::dates::DATE_FORMAT)),
        }
    }
}

/// Inclusive bound pair; an absent side is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Range {
    pub min: Option<Scalar>,
    pub max: Option<Scalar>,
}

impl Range {
    pub fn new(min: Option<Scalar>, max: Option<Scalar>) -> Self {
        Self { min, max }
    }
}

/// Correlated subquery: compiles to `col IN (SELECT expression FROM table
/// [WHERE ...])`. The table is late-bound by the caller before compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubQuery {
    pub expression: String,
    pub table: Option<String>,
    pub query: Ir,
}

impl SubQuery {
    pub fn new(expression: impl Into<String>, query: Ir) -> Self {
        Self {
            expression: expression.into(),
            table: None,
            query,
        }
    }

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = Some(table.into());
    }
}

/// How an expression group combines its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    And,
    Or,
}

impl Join {
    pub fn word(self) -> &'static str {
        match self {
            Join::And => "AND",
            Join::Or => "OR",
        }
    }
}

impl Default for Join {
    fn default() -> Self {
        Join::Or
    }
}

/// AND/OR/NOT composition of child constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub join: Join,
    pub negate: bool,
    pub entries: Ir,
}

/// One column's constraint in the normalized IR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Column equals any of these values (OR of equalities); full-text
    /// match when the key carries the `TEXTFIELD__` prefix.
    Values(Vec<Scalar>),
    /// Inclusive min/max window.
    Range(Range),
    /// `IS NULL` (true) or `IS NOT NULL` (false).
    Null(bool),
    /// Always true; compiles to nothing at any depth.
    Any,
    /// The boolean column itself (true) or its negation (false).
    True(bool),
    /// `IN (...)` list, values kept in input order.
    In(Vec<String>),
    /// `LIKE` pattern, always quoted.
    Like(String),
    /// Nested `SELECT` used with `IN`.
    SubQuery(SubQuery),
    /// Nested expression group.
    Group(Group),
}

/// Units for a date-window `delta` attribute. Years are fixed 365-day
/// spans, matching second-based epoch arithmetic rather than the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaUnit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Years,
}

impl DeltaUnit {
    pub fn parse(token: &str) -> Result<Self> {
        match token.to_ascii_lowercase().as_str() {
            "days" => Ok(DeltaUnit::Days),
            "hours" => Ok(DeltaUnit::Hours),
            "minutes" => Ok(DeltaUnit::Minutes),
            "seconds" => Ok(DeltaUnit::Seconds),
            "years" => Ok(DeltaUnit::Years),
            other => Err(QueryError::MalformedQuery(format!(
                "unknown delta units '{other}'"
            ))),
        }
    }
}

impl Default for DeltaUnit {
    fn default() -> Self {
        DeltaUnit::Days
    }
}

/// Per-column metadata captured from element attributes or map entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attrs {
    pub delta: Option<i64>,
    pub units: Option<DeltaUnit>,
    pub mode: Option<String>,
}

impl Attrs {
    pub fn is_empty(&self) -> bool {
        self.delta.is_none() && self.units.is_none() && self.mode.is_none()
    }
}

/// Pre-normalization entry produced by either builder path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEntry {
    /// Ordered scalar values for the column.
    List(Vec<String>),
    /// Loose second-key pairs (`min`/`max`/`null`/`like`/`in`/`any`),
    /// recognized during normalization.
    Pairs(BTreeMap<String, Vec<String>>),
    /// Boolean-column test, produced directly by the nested-map path.
    True(bool),
    /// Nested group under a synthetic key.
    Group {
        join: Join,
        negate: bool,
        inner: RawIr,
    },
}

/// Raw IR: entries plus the per-column attribute side table for this level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawIr {
    pub entries: BTreeMap<String, RawEntry>,
    pub attrs: BTreeMap<String, Attrs>,
}

impl RawIr {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Apply a rewrite to every scalar comparison value in the IR, in one pass:
/// list values, range bounds, IN items, and LIKE patterns, recursing through
/// groups and subqueries. This is the only sanctioned mutation after
/// normalization.
pub fn rewrite_values<F>(ir: &mut Ir, f: &mut F)
where
    F: FnMut(&mut Scalar),
{
    for entry in ir.values_mut() {
        match entry {
            Entry::Values(values) => {
                for value in values.iter_mut() {
                    f(value);
                }
            }
            Entry::Range(range) => {
                if let Some(min) = range.min.as_mut() {
                    f(min);
                }
                if let Some(max) = range.max.as_mut() {
                    f(max);
                }
            }
            Entry::In(items) => {
                for item in items.iter_mut() {
                    let mut scalar = Scalar::Text(std::mem::take(item));
                    f(&mut scalar);
                    *item = scalar.to_string();
                }
            }
            Entry::Like(pattern) => {
                let mut scalar = Scalar::Text(std::mem::take(pattern));
                f(&mut scalar);
                *pattern = scalar.to_string();
            }
            Entry::Group(group) => rewrite_values(&mut group.entries, f),
            Entry::SubQuery(sub) => rewrite_values(&mut sub.query, f),
            Entry::Null(_) | Entry::Any | Entry::True(_) => {}
        }
    }
}
