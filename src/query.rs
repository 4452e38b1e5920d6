//! Query object
//!
//! [`Query`] owns a normalized IR for its whole lifetime. Construction does
//! all the fallible work (building and normalizing the IR) up front, so a
//! query shared across threads after construction only ever reads; the
//! default compiled fragment is memoized under a `OnceLock`.

use std::sync::OnceLock;

use serde_json::Value;

use crate::builder;
use crate::error::{QueryError, Result};
use crate::ir::{self, Entry, Ir, Scalar};
use crate::normalize::normalize;
use crate::sql;
use crate::xml::Element;

/// Construction-time configuration, replacing what used to be a
/// process-wide default constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Result-set cap applied when the query does not carry its own.
    pub default_result_count: u64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            default_result_count: 500,
        }
    }
}

/// A fully normalized query, ready to compile to SQL.
#[derive(Debug)]
pub struct Query {
    ir: Ir,
    options: QueryOptions,
    result_count: Option<i64>,
    compiled: OnceLock<Result<Option<String>>>,
}

impl Query {
    /// Build from an XML parse tree; exactly one `root_name` element must
    /// exist in the tree.
    pub fn from_xml(tree: &Element, root_name: &str) -> Result<Self> {
        Self::from_xml_with(tree, root_name, QueryOptions::default())
    }

    pub fn from_xml_with(tree: &Element, root_name: &str, options: QueryOptions) -> Result<Self> {
        let raw = builder::from_xml(tree, root_name)?;
        Ok(Self::with_ir(normalize(raw)?, options))
    }

    /// Build from a nested map (a JSON object), bypassing XML.
    pub fn from_map(value: &Value) -> Result<Self> {
        Self::from_map_with(value, QueryOptions::default())
    }

    pub fn from_map_with(value: &Value, options: QueryOptions) -> Result<Self> {
        let raw = builder::from_map(value)?;
        Ok(Self::with_ir(normalize(raw)?, options))
    }

    /// Wrap an already-normalized IR, for callers that construct entries
    /// programmatically (the only way subqueries enter a query).
    pub fn from_ir(ir: Ir) -> Self {
        Self::with_ir(ir, QueryOptions::default())
    }

    pub fn from_ir_with(ir: Ir, options: QueryOptions) -> Self {
        Self::with_ir(ir, options)
    }

    fn with_ir(ir: Ir, options: QueryOptions) -> Self {
        Self {
            ir,
            options,
            result_count: None,
            compiled: OnceLock::new(),
        }
    }

    pub fn ir(&self) -> &Ir {
        &self.ir
    }

    /// The compiled WHERE fragment, memoized on first call. `None` means
    /// the query carries no constraint at all.
    pub fn sql(&self) -> Result<Option<String>> {
        self.compiled
            .get_or_init(|| sql::compile(&self.ir, &[]))
            .clone()
    }

    /// Compile with some top-level keys omitted. Not memoized.
    pub fn sql_with_skips(&self, skip: &[&str]) -> Result<Option<String>> {
        sql::compile(&self.ir, skip)
    }

    /// Full-text relevance expressions for ranking, independent of any
    /// skip set.
    pub fn relevance(&self) -> Vec<String> {
        sql::relevance(&self.ir)
    }

    /// Late-bind the table for a subquery entry. Rejected once the default
    /// fragment has been compiled, since the cached SQL would go stale.
    pub fn bind_table(&mut self, column: &str, table: &str) -> Result<()> {
        self.ensure_uncompiled()?;
        match self.ir.get_mut(column) {
            Some(Entry::SubQuery(sub)) => {
                sub.set_table(table);
                Ok(())
            }
            Some(_) => Err(QueryError::BadArgs(format!(
                "'{column}' is not a subquery entry"
            ))),
            None => Err(QueryError::BadArgs(format!(
                "no entry named '{column}' to bind a table to"
            ))),
        }
    }

    /// Rewrite every scalar comparison value in one pass (list values,
    /// range bounds, IN items, LIKE patterns, at any depth). Rejected once
    /// the default fragment has been compiled.
    pub fn rewrite_values<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&mut Scalar),
    {
        self.ensure_uncompiled()?;
        ir::rewrite_values(&mut self.ir, &mut f);
        Ok(())
    }

    fn ensure_uncompiled(&self) -> Result<()> {
        if self.compiled.get().is_some() {
            return Err(QueryError::BadArgs(
                "query already compiled; rewrites would leave the cached SQL stale".into(),
            ));
        }
        Ok(())
    }

    /// Set the raw result-count request carried by the query: zero means
    /// "use the default", negative means unlimited.
    pub fn set_result_count(&mut self, count: i64) {
        self.result_count = Some(count);
    }

    /// Effective result-set cap: the configured default when the query
    /// carries no request (or zero), `None` (unlimited) for a negative
    /// request, otherwise the requested count.
    pub fn max_result_count(&self) -> Option<u64> {
        match self.result_count {
            None | Some(0) => Some(self.options.default_result_count),
            Some(n) if n < 0 => None,
            Some(n) => Some(n as u64),
        }
    }
}
