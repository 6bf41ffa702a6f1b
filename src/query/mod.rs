//! Report slicing - SQL subset for interactive filtering and sorting
//!
//! Parses a small SELECT dialect into a [`SlicePlan`] executed against the
//! materialized report batch. This drives the presentation surface's
//! filter/sort/slice controls; it is not a general query engine.
//!
//! ## Supported subset
//!
//! - SELECT with column list or *
//! - FROM a single table (conventionally `report`)
//! - WHERE with one simple predicate (`>`, `<`, `=`, `>=`, `<=`, `!=`)
//! - ORDER BY a single column (ASC/DESC)
//! - LIMIT
//!
//! Aggregations, GROUP BY, JOINs and subqueries are rejected with
//! [`Error::Parse`]: aggregate scores are computed by the evaluation engine,
//! not the slicer.
//!
//! References:
//! - sqlparser-rs: <https://docs.rs/sqlparser>

mod executor;

pub use executor::SliceExecutor;

use crate::{Error, Result};
use sqlparser::ast::{Expr, Query, Select, SelectItem, SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parsed slice query with extracted components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicePlan {
    /// Selected columns (or * for all)
    pub columns: Vec<String>,
    /// Table name
    pub table: String,
    /// WHERE clause expression (optional)
    pub filter: Option<String>,
    /// ORDER BY clause (optional, single column)
    pub order_by: Option<(String, OrderDirection)>,
    /// LIMIT count (optional)
    pub limit: Option<usize>,
}

/// Sort order direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (smallest first)
    Asc,
    /// Descending order (largest first)
    Desc,
}

/// Slice query parser
pub struct SliceEngine {
    dialect: GenericDialect,
}

impl Default for SliceEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SliceEngine {
    /// Create a new slice engine
    #[must_use]
    pub const fn new() -> Self {
        Self {
            dialect: GenericDialect {},
        }
    }

    /// Parse a slice query into a plan
    ///
    /// # Errors
    /// Returns [`Error::Parse`] if:
    /// - SQL syntax is invalid
    /// - The query uses unsupported features (JOINs, GROUP BY, aggregations,
    ///   subqueries)
    /// - Multiple statements are provided
    ///
    /// # Example
    /// ```
    /// use cotejo::query::SliceEngine;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let engine = SliceEngine::new();
    /// let plan = engine.parse("SELECT run, score FROM report WHERE score < 1 LIMIT 10")?;
    /// assert_eq!(plan.table, "report");
    /// assert_eq!(plan.limit, Some(10));
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&self, sql: &str) -> Result<SlicePlan> {
        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| Error::Parse(format!("SQL parse error: {e}")))?;

        if statements.len() != 1 {
            return Err(Error::Parse("Only single statements supported".to_string()));
        }

        let Statement::Query(query) = &statements[0] else {
            return Err(Error::Parse("Only SELECT queries supported".to_string()));
        };

        Self::parse_select_query(query)
    }

    fn parse_select_query(query: &Query) -> Result<SlicePlan> {
        let SetExpr::Select(select) = query.body.as_ref() else {
            return Err(Error::Parse("Only SELECT queries supported".to_string()));
        };

        if let sqlparser::ast::GroupByExpr::Expressions(exprs, _) = &select.group_by {
            if !exprs.is_empty() {
                return Err(Error::Parse(
                    "GROUP BY not supported; aggregate scores are computed by the evaluation engine"
                        .to_string(),
                ));
            }
        }

        let table = Self::extract_table_name(select)?;
        let columns = Self::extract_columns(&select.projection)?;
        let filter = select.selection.as_ref().map(ToString::to_string);
        let order_by = Self::extract_order_by(query.order_by.as_ref())?;
        let limit = Self::extract_limit(query.limit.as_ref());

        Ok(SlicePlan {
            columns,
            table,
            filter,
            order_by,
            limit,
        })
    }

    fn extract_table_name(select: &Select) -> Result<String> {
        if select.from.is_empty() {
            return Ok(String::new());
        }
        if select.from.len() > 1 {
            return Err(Error::Parse("Multiple tables not supported".to_string()));
        }

        let table_with_joins = &select.from[0];
        if !table_with_joins.joins.is_empty() {
            return Err(Error::Parse("JOINs not supported".to_string()));
        }

        Ok(table_with_joins.relation.to_string())
    }

    fn extract_columns(projection: &[SelectItem]) -> Result<Vec<String>> {
        let mut columns = Vec::new();

        for item in projection {
            match item {
                SelectItem::Wildcard(_) => columns.push("*".to_string()),
                SelectItem::UnnamedExpr(expr) => {
                    if matches!(expr, Expr::Function(_)) {
                        return Err(Error::Parse(format!(
                            "Aggregation '{expr}' not supported; aggregate scores are computed by the evaluation engine"
                        )));
                    }
                    columns.push(expr.to_string());
                }
                SelectItem::ExprWithAlias { expr, .. } if matches!(expr, Expr::Function(_)) => {
                    return Err(Error::Parse(format!(
                        "Aggregation '{expr}' not supported; aggregate scores are computed by the evaluation engine"
                    )));
                }
                SelectItem::ExprWithAlias { alias, .. } => columns.push(alias.value.clone()),
                SelectItem::QualifiedWildcard(..) => {
                    return Err(Error::Parse("Qualified wildcards not supported".to_string()))
                }
            }
        }

        Ok(columns)
    }

    fn extract_order_by(
        order_by: Option<&sqlparser::ast::OrderBy>,
    ) -> Result<Option<(String, OrderDirection)>> {
        let Some(ob) = order_by else {
            return Ok(None);
        };
        if ob.exprs.len() > 1 {
            return Err(Error::Parse(
                "ORDER BY supports a single column".to_string(),
            ));
        }
        Ok(ob.exprs.first().map(|o| {
            let col = o.expr.to_string();
            let dir = if o.asc.unwrap_or(true) {
                OrderDirection::Asc
            } else {
                OrderDirection::Desc
            };
            (col, dir)
        }))
    }

    fn extract_limit(limit: Option<&Expr>) -> Option<usize> {
        limit.and_then(|expr| {
            if let Expr::Value(sqlparser::ast::Value::Number(n, _)) = expr {
                n.parse().ok()
            } else {
                None
            }
        })
    }
}
