//! Structured and textual queries over the Strata data model.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Reserved property holding the Store-maintained scatter ordering used for
/// query splitting.
pub const SCATTER_PROPERTY: &str = "__scatter__";

/// Reserved property addressing the entity key itself in filters.
pub const KEY_PROPERTY: &str = "__key__";

/// Comparison operator of a property filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOp {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl FilterOp {
    /// True for every operator other than equality. Queries carrying an
    /// inequality filter cannot be split.
    pub fn is_inequality(&self) -> bool {
        !matches!(self, FilterOp::Equal)
    }
}

/// Single property comparison; a query's filters are AND-combined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub property: String,
    pub op: FilterOp,
    pub value: Value,
}

impl PropertyFilter {
    pub fn new(property: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            property: property.into(),
            op,
            value,
        }
    }
}

/// Sort direction of a property order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One ordering clause of a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyOrder {
    pub property: String,
    pub direction: Direction,
}

/// Structured query over exactly one kind.
///
/// `limit` is a user-set positive bound on the total result count; the
/// pagination limit applied per RPC is a planner concern and never stored
/// here. Cursors are opaque server tokens.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub kind: String,
    pub filters: Vec<PropertyFilter>,
    pub orders: Vec<PropertyOrder>,
    pub limit: Option<i32>,
    pub start_cursor: Option<Vec<u8>>,
    pub end_cursor: Option<Vec<u8>>,
}

impl Query {
    /// Query matching every entity of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Add an AND-combined property filter.
    pub fn with_filter(mut self, filter: PropertyFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add an ordering clause.
    pub fn with_order(mut self, property: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(PropertyOrder {
            property: property.into(),
            direction,
        });
        self
    }

    /// Set the user result limit. Validity (positivity) is enforced by the
    /// read configuration, not here.
    pub fn with_limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// A query is splittable unless it carries a user limit or an inequality
    /// filter.
    pub fn is_splittable(&self) -> bool {
        self.limit.is_none() && !self.filters.iter().any(|f| f.op.is_inequality())
    }
}

/// Textual query, translated to a structured `Query` by the Store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GqlQuery {
    pub query_string: String,
    pub allow_literals: bool,
}

impl GqlQuery {
    pub fn new(query_string: impl Into<String>) -> Self {
        Self {
            query_string: query_string.into(),
            allow_literals: true,
        }
    }
}

impl fmt::Display for GqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query_string)
    }
}

/// Server verdict on whether a result batch exhausted the query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoreResults {
    NotFinished,
    MoreResultsAfterLimit,
    MoreResultsAfterEndCursor,
    NoMoreResults,
}
