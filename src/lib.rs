//! obsquery - declarative observatory-query translator
//!
//! Compiles domain queries expressed as a constrained XML dialect or an
//! equivalent nested map into SQL boolean-expression fragments, plus
//! full-text relevance expressions for ranking. It is a translator only:
//! it never connects to a database, executes anything, or renders output.
//!
//! # Example
//!
//! ```
//! use obsquery::Query;
//! use serde_json::json;
//!
//! let query = Query::from_map(&json!({
//!     "instrument": ["SCUBA", "CGS4"],
//!     "elevation": {"min": 30},
//! })).unwrap();
//!
//! assert_eq!(
//!     query.sql().unwrap().unwrap(),
//!     "(elevation >= 30) AND (instrument = 'SCUBA' OR instrument = 'CGS4')"
//! );
//! ```

pub mod builder;
pub mod dates;
pub mod error;
pub mod ir;
pub mod normalize;
pub mod query;
pub mod sql;
pub mod xml;

pub use error::{QueryError, Result};
pub use ir::{Attrs, DeltaUnit, Entry, Group, Ir, Join, Range, Scalar, SubQuery};
pub use query::{Query, QueryOptions};
pub use xml::Element;
