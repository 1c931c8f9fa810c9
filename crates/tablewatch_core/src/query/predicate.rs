//! Fluent predicate builder for parameterized SQL filters.
//!
//! # Responsibility
//! - Accumulate a `WHERE` fragment and its positional bind values in one pass.
//! - Carry optional pagination rendered as a `LIMIT`/`OFFSET` suffix.
//!
//! # Invariants
//! - Bind values are stored in exactly the order their `?` placeholders are
//!   emitted, for every helper including `in_values` and `between`.
//! - Structural mistakes (empty `IN`, unbalanced groups, dangling `AND`/`OR`,
//!   placeholder/value count drift) are recorded at the offending call and
//!   reported by [`Predicate::validate`].
//!
//! # Usage contract
//! - A predicate is built by one thread through chained calls and treated as
//!   frozen once handed to the store. Nothing prevents further appends, but
//!   they are not supported. The builder is not meant for concurrent chained
//!   calls from multiple threads.

use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Structural error detected while building or finalizing a predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateError {
    /// `in_values` was called with no values.
    EmptyInList { column: String },
    /// `end_group` without a matching `begin_group`, or groups left open.
    UnbalancedGroups { depth: i64 },
    /// `and()`/`or()` placed first, last, or next to another connector.
    DanglingConnector,
    /// Raw fragment placeholders do not line up with bound values.
    PlaceholderMismatch { placeholders: usize, values: usize },
}

impl Display for PredicateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyInList { column } => {
                write!(f, "IN list for column `{column}` requires at least one value")
            }
            Self::UnbalancedGroups { depth } => {
                write!(f, "predicate groups are unbalanced (depth {depth})")
            }
            Self::DanglingConnector => {
                write!(f, "AND/OR must join two predicate fragments")
            }
            Self::PlaceholderMismatch {
                placeholders,
                values,
            } => write!(
                f,
                "predicate has {placeholders} placeholders but {values} bound values"
            ),
        }
    }
}

impl Error for PredicateError {}

/// One positional bind value.
///
/// Values keep the semantic type they were passed as. They are bound to the
/// engine natively and reported as text by [`Predicate::bound_values`].
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl Display for BindValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Real(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<i64> for BindValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for BindValue {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for BindValue {
    fn from(value: bool) -> Self {
        Self::Integer(if value { 1 } else { 0 })
    }
}

impl From<f64> for BindValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for BindValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&BindValue> for Value {
    fn from(value: &BindValue) -> Self {
        match value {
            BindValue::Integer(value) => Value::Integer(*value),
            BindValue::Real(value) => Value::Real(*value),
            BindValue::Text(value) => Value::Text(value.clone()),
        }
    }
}

/// What the clause ends with, used to reject misplaced connectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Empty,
    Operand,
    Connector,
    GroupOpen,
}

/// Filter expression, ordered bind values and optional pagination.
#[derive(Debug, Clone)]
pub struct Predicate {
    clause: String,
    values: Vec<BindValue>,
    limit: Option<u64>,
    offset: Option<u64>,
    group_depth: i64,
    tail: Tail,
    error: Option<PredicateError>,
}

impl Default for Predicate {
    fn default() -> Self {
        Self::create()
    }
}

impl Predicate {
    /// Returns an empty predicate that matches every row.
    pub fn create() -> Self {
        Self {
            clause: String::new(),
            values: Vec::new(),
            limit: None,
            offset: None,
            group_depth: 0,
            tail: Tail::Empty,
            error: None,
        }
    }

    /// Appends a raw SQL fragment and its positional values, in order.
    ///
    /// SQL syntax is not checked; only the placeholder count is. A `?` inside a
    /// quoted literal or identifier (`'?'`, `"a?"`) is not a placeholder.
    pub fn where_sql<I, V>(mut self, fragment: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<BindValue>,
    {
        let before = self.values.len();
        self.values.extend(values.into_iter().map(Into::into));
        let added = self.values.len() - before;
        let placeholders = count_placeholders(fragment);
        if placeholders != added {
            self.record(PredicateError::PlaceholderMismatch {
                placeholders,
                values: added,
            });
        }
        self.clause.push_str(fragment);
        self.tail = Tail::Operand;
        self
    }

    pub fn equal_to(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "=", value.into())
    }

    pub fn not_equal_to(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "<>", value.into())
    }

    pub fn less_than(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "<", value.into())
    }

    pub fn less_than_or_equal_to(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, "<=", value.into())
    }

    pub fn greater_than(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, ">", value.into())
    }

    pub fn greater_than_or_equal_to(self, column: &str, value: impl Into<BindValue>) -> Self {
        self.compare(column, ">=", value.into())
    }

    pub fn like(self, column: &str, pattern: impl Into<BindValue>) -> Self {
        self.compare(column, "LIKE", pattern.into())
    }

    /// Appends `column BETWEEN ? AND ?` binding `low` then `high`.
    pub fn between(
        mut self,
        column: &str,
        low: impl Into<BindValue>,
        high: impl Into<BindValue>,
    ) -> Self {
        self.clause.push_str(column);
        self.clause.push_str(" BETWEEN ? AND ?");
        self.values.push(low.into());
        self.values.push(high.into());
        self.tail = Tail::Operand;
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.clause.push_str(column);
        self.clause.push_str(" IS NULL");
        self.tail = Tail::Operand;
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.clause.push_str(column);
        self.clause.push_str(" NOT NULL");
        self.tail = Tail::Operand;
        self
    }

    /// Appends `column IN(?, ..., ?)` with one placeholder per value.
    ///
    /// An empty value list records [`PredicateError::EmptyInList`] and leaves
    /// the clause untouched.
    pub fn in_values<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<BindValue>,
    {
        let values: Vec<BindValue> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            self.record(PredicateError::EmptyInList {
                column: column.to_string(),
            });
            return self;
        }

        let placeholders = vec!["?"; values.len()].join(", ");
        self.clause.push_str(column);
        self.clause.push_str(" IN(");
        self.clause.push_str(&placeholders);
        self.clause.push(')');
        self.values.extend(values);
        self.tail = Tail::Operand;
        self
    }

    /// Opens a parenthesized group. A group following a condition needs an
    /// `and`/`or` in between.
    pub fn begin_group(mut self) -> Self {
        if self.tail == Tail::Operand {
            self.record(PredicateError::DanglingConnector);
        }
        self.clause.push('(');
        self.group_depth += 1;
        self.tail = Tail::GroupOpen;
        self
    }

    pub fn end_group(mut self) -> Self {
        if self.tail == Tail::Connector {
            self.record(PredicateError::DanglingConnector);
        }
        self.clause.push(')');
        self.group_depth -= 1;
        if self.group_depth < 0 {
            self.record(PredicateError::UnbalancedGroups {
                depth: self.group_depth,
            });
        }
        self.tail = Tail::Operand;
        self
    }

    pub fn and(self) -> Self {
        self.connector(" AND ")
    }

    pub fn or(self) -> Self {
        self.connector(" OR ")
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns the accumulated filter text, or `None` when nothing was appended.
    pub fn where_clause(&self) -> Option<&str> {
        if self.clause.is_empty() {
            None
        } else {
            Some(self.clause.as_str())
        }
    }

    /// Returns bound values in textual form, or `None` when nothing was bound.
    pub fn bound_values(&self) -> Option<Vec<String>> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().map(ToString::to_string).collect())
    }

    /// Returns the `" LIMIT n OFFSET m"` suffix, or `None` when unpaginated.
    ///
    /// `LIMIT` always precedes `OFFSET`, independent of call order.
    pub fn limit_clause(&self) -> Option<String> {
        let mut suffix = String::new();
        if let Some(limit) = self.limit {
            suffix.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            suffix.push_str(&format!(" OFFSET {offset}"));
        }
        if suffix.is_empty() {
            None
        } else {
            Some(suffix)
        }
    }

    pub fn row_limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn row_offset(&self) -> Option<u64> {
        self.offset
    }

    /// Typed bind values in placeholder order.
    pub fn values(&self) -> &[BindValue] {
        &self.values
    }

    /// Checks every structural invariant of a finished predicate.
    ///
    /// # Errors
    /// - Returns the first error recorded while building, if any.
    /// - Returns `UnbalancedGroups` when groups were left open.
    /// - Returns `DanglingConnector` when the clause ends with `AND`/`OR`.
    /// - Returns `PlaceholderMismatch` when `?` count and value count differ.
    pub fn validate(&self) -> Result<(), PredicateError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.group_depth != 0 {
            return Err(PredicateError::UnbalancedGroups {
                depth: self.group_depth,
            });
        }
        if self.tail == Tail::Connector {
            return Err(PredicateError::DanglingConnector);
        }
        let placeholders = count_placeholders(&self.clause);
        if placeholders != self.values.len() {
            return Err(PredicateError::PlaceholderMismatch {
                placeholders,
                values: self.values.len(),
            });
        }
        Ok(())
    }

    /// Returns a copy limited to one row unless a limit is already set.
    pub(crate) fn single_row(&self) -> Self {
        let mut single = self.clone();
        if single.limit.is_none() {
            single.limit = Some(1);
        }
        single
    }

    fn compare(mut self, column: &str, operator: &str, value: BindValue) -> Self {
        self.clause.push_str(column);
        self.clause.push(' ');
        self.clause.push_str(operator);
        self.clause.push_str(" ?");
        self.values.push(value);
        self.tail = Tail::Operand;
        self
    }

    fn connector(mut self, text: &str) -> Self {
        if self.tail != Tail::Operand {
            self.record(PredicateError::DanglingConnector);
        }
        self.clause.push_str(text);
        self.tail = Tail::Connector;
        self
    }

    // Keeps the first error; later ones are usually fallout from it.
    fn record(&mut self, error: PredicateError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

// Counts `?` outside quoted spans. A doubled quote inside a span is an escape
// and keeps the span open.
fn count_placeholders(text: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(open) if c == open => {
                if chars.peek() == Some(&open) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '?' => count += 1,
            None => {}
        }
    }
    count
}
