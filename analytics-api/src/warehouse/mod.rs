//! Data store gateway for the analytics warehouse.
//!
//! Handlers never talk SQL drivers directly. They describe what they need as a [`QueryPlan`]
//! (an optional count statement plus the row statement, both with positional parameters) and
//! hand it to a [`Warehouse`]. The gateway runs the whole plan on one connection, releases the
//! connection on every exit path, and returns untyped [`RawRow`]s that the caller shapes.
//!
//! There is no pooling and no retry: each plan opens its own connection, and any failure is
//! returned as a classified [`WarehouseError`].

use async_trait::async_trait;

pub mod errors;
pub mod postgres;

pub use errors::{Result, WarehouseError};
pub use postgres::PgWarehouse;

/// A positional statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Int(i64),
}

/// SQL text with `$n` placeholders and the values bound to them, in order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

/// Incrementally builds a [`Statement`], numbering placeholders as values are bound.
#[derive(Debug, Default)]
pub struct StatementBuilder {
    sql: String,
    params: Vec<Param>,
}

impl StatementBuilder {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append raw SQL text
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Bind a value and append its placeholder
    pub fn push_bind(&mut self, param: Param) -> &mut Self {
        self.params.push(param);
        self.sql.push_str(&format!("${}", self.params.len()));
        self
    }

    pub fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Everything one request needs from the warehouse, executed on a single connection.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Statement returning a single `COUNT(*)` over the same predicate, when paginating
    pub count: Option<Statement>,
    /// Statement returning the result rows
    pub rows: Statement,
}

/// Result of executing a [`QueryPlan`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Present iff the plan had a count statement
    pub total_records: Option<i64>,
    pub rows: Vec<RawRow>,
}

/// A single column value as read from the warehouse, before shaping
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

/// One result row, columns in select-list order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow(pub Vec<Cell>);

impl RawRow {
    pub fn new(cells: Vec<Cell>) -> Self {
        Self(cells)
    }

    fn cell(&self, index: usize, column: &str) -> Result<&Cell> {
        self.0
            .get(index)
            .ok_or_else(|| WarehouseError::Decode(format!("column {index} ({column}) missing from result row")))
    }

    /// Read a column as `f64`, coercing integers and numeric text
    pub fn float(&self, index: usize, column: &str) -> Result<f64> {
        match self.cell(index, column)? {
            Cell::Float(f) => Ok(*f),
            Cell::Int(i) => Ok(*i as f64),
            Cell::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| WarehouseError::Decode(format!("column {column}: '{s}' is not a number"))),
            Cell::Null => Err(WarehouseError::Decode(format!("column {column}: unexpected NULL"))),
        }
    }

    /// Read a column as `i64`, coercing floats (truncated) and numeric text
    pub fn integer(&self, index: usize, column: &str) -> Result<i64> {
        match self.cell(index, column)? {
            Cell::Int(i) => Ok(*i),
            Cell::Float(f) if f.is_finite() => Ok(f.trunc() as i64),
            Cell::Float(f) => Err(WarehouseError::Decode(format!("column {column}: {f} is not an integer"))),
            Cell::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .or_else(|_| s.parse::<f64>().map(|f| f.trunc() as i64))
                    .map_err(|_| WarehouseError::Decode(format!("column {column}: '{s}' is not an integer")))
            }
            Cell::Null => Err(WarehouseError::Decode(format!("column {column}: unexpected NULL"))),
        }
    }

    /// Read a column as text; NULL is passed through as `None`
    pub fn optional_text(&self, index: usize, column: &str) -> Result<Option<String>> {
        Ok(match self.cell(index, column)? {
            Cell::Null => None,
            Cell::Text(s) => Some(s.clone()),
            Cell::Int(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
        })
    }

    /// Read a column as text, rejecting NULL
    pub fn text(&self, index: usize, column: &str) -> Result<String> {
        self.optional_text(index, column)?
            .ok_or_else(|| WarehouseError::Decode(format!("column {column}: unexpected NULL")))
    }
}

/// The analytics warehouse, as seen by the query handlers.
///
/// Implementations must be safe to share across concurrent requests; they are constructed once
/// at startup and injected into the application state.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run the count statement (if any) and then the row statement on one connection.
    async fn execute(&self, plan: &QueryPlan) -> Result<QueryOutput>;
}
