use thiserror::Error;

/// Errors raised while building or compiling a query.
///
/// The translation is pure and deterministic, so both variants are
/// unrecoverable for the current query: there are no partial results and
/// nothing to retry. Errors are `Clone` so a memoized compile result can be
/// cached on the query object.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// Structurally invalid input: bad or missing root element, an
    /// unparseable date string, an entry that is none of the recognized
    /// kinds, or nesting beyond the depth cap.
    #[error("malformed query: {0}")]
    MalformedQuery(String),

    /// Internal contract violation: an argument of the wrong shape reached
    /// an internal helper (e.g. a non-object nested-map input).
    #[error("bad arguments: {0}")]
    BadArgs(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;
