//! Query Builder WHERE clause operations
//!
//! Terms are kept in call order with their connector. When the filter is
//! assembled, AND binds tighter than OR: `a AND b OR c` becomes
//! `{ $or: [ { $and: [a, b] }, { $and: [c] } ] }`.

use serde_json::{json, Map, Value};

use super::builder::QueryBuilder;
use super::types::*;
use crate::error::{ModelError, ModelResult};

impl<M> QueryBuilder<M> {
    fn push_term(mut self, connector: Connector, condition: WhereCondition) -> Self {
        self.conditions.push(WhereTerm {
            connector,
            condition,
        });
        self
    }

    fn single(column: &str, operator: QueryOperator, value: Value) -> WhereCondition {
        WhereCondition {
            column: column.to_string(),
            operator,
            value: Some(value),
            values: Vec::new(),
        }
    }

    fn list(column: &str, operator: QueryOperator, values: Vec<Value>) -> WhereCondition {
        WhereCondition {
            column: column.to_string(),
            operator,
            value: None,
            values,
        }
    }

    /// Add WHERE condition with equality
    pub fn where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        let condition = Self::single(column, QueryOperator::Equal, value.into());
        self.push_term(Connector::And, condition)
    }

    /// Add OR condition with equality
    pub fn or_where_eq<T: Into<Value>>(self, column: &str, value: T) -> Self {
        let condition = Self::single(column, QueryOperator::Equal, value.into());
        self.push_term(Connector::Or, condition)
    }

    /// Add WHERE condition with an operator such as `">="` or `"like"`
    pub fn where_op<T: Into<Value>>(self, column: &str, operator: &str, value: T) -> Self {
        self.op_term(Connector::And, column, operator, value.into())
    }

    /// Add OR condition with an operator
    pub fn or_where_op<T: Into<Value>>(self, column: &str, operator: &str, value: T) -> Self {
        self.op_term(Connector::Or, column, operator, value.into())
    }

    fn op_term(mut self, connector: Connector, column: &str, operator: &str, value: Value) -> Self {
        match QueryOperator::parse(operator) {
            Ok(op) => {
                let condition = Self::single(column, op, value);
                self.push_term(connector, condition)
            }
            Err(err) => {
                self.deferred_error.get_or_insert(err.to_string());
                self
            }
        }
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<T: Into<Value>>(self, column: &str, value: T) -> Self {
        let condition = Self::single(column, QueryOperator::NotEqual, value.into());
        self.push_term(Connector::And, condition)
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        let condition = Self::single(column, QueryOperator::GreaterThan, value.into());
        self.push_term(Connector::And, condition)
    }

    /// Add WHERE condition with less than
    pub fn where_lt<T: Into<Value>>(self, column: &str, value: T) -> Self {
        let condition = Self::single(column, QueryOperator::LessThan, value.into());
        self.push_term(Connector::And, condition)
    }

    /// Add WHERE condition with LIKE (`%` and `_` wildcards, case-insensitive)
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        let condition = Self::single(column, QueryOperator::Like, Value::String(pattern.to_string()));
        self.push_term(Connector::And, condition)
    }

    /// Add WHERE condition with IN
    pub fn where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let condition = Self::list(column, QueryOperator::In, values);
        self.push_term(Connector::And, condition)
    }

    /// Add OR condition with IN
    pub fn or_where_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let condition = Self::list(column, QueryOperator::In, values);
        self.push_term(Connector::Or, condition)
    }

    /// Add WHERE condition with NOT IN
    pub fn where_not_in<T: Into<Value>>(self, column: &str, values: Vec<T>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        let condition = Self::list(column, QueryOperator::NotIn, values);
        self.push_term(Connector::And, condition)
    }

    /// Add WHERE condition with BETWEEN (inclusive)
    pub fn where_between<T: Into<Value>>(self, column: &str, start: T, end: T) -> Self {
        let condition = Self::list(column, QueryOperator::Between, vec![start.into(), end.into()]);
        self.push_term(Connector::And, condition)
    }

    /// Add OR condition with BETWEEN
    pub fn or_where_between<T: Into<Value>>(self, column: &str, start: T, end: T) -> Self {
        let condition = Self::list(column, QueryOperator::Between, vec![start.into(), end.into()]);
        self.push_term(Connector::Or, condition)
    }

    /// Add WHERE condition with IS NULL; a missing field counts as null
    pub fn where_null(self, column: &str) -> Self {
        let condition = Self::list(column, QueryOperator::IsNull, Vec::new());
        self.push_term(Connector::And, condition)
    }

    /// Add OR condition with IS NULL
    pub fn or_where_null(self, column: &str) -> Self {
        let condition = Self::list(column, QueryOperator::IsNull, Vec::new());
        self.push_term(Connector::Or, condition)
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        let condition = Self::list(column, QueryOperator::IsNotNull, Vec::new());
        self.push_term(Connector::And, condition)
    }

    /// Columns referenced by predicates
    pub(crate) fn predicate_columns(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().map(|t| t.condition.column.as_str())
    }
}

/// Translate a LIKE pattern into an anchored regular expression
pub(crate) fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::from("^");
    let mut literal = String::new();
    for ch in pattern.chars() {
        match ch {
            '%' | '_' => {
                regex.push_str(&regex::escape(&literal));
                literal.clear();
                regex.push_str(if ch == '%' { ".*" } else { "." });
            }
            other => literal.push(other),
        }
    }
    regex.push_str(&regex::escape(&literal));
    regex.push('$');
    regex
}

/// Filter document for a single condition
pub(crate) fn condition_filter(condition: &WhereCondition) -> ModelResult<Value> {
    let value = || condition.value.clone().unwrap_or(Value::Null);
    let test = match condition.operator {
        QueryOperator::Equal => json!({ "$eq": value() }),
        QueryOperator::NotEqual => json!({ "$ne": value() }),
        QueryOperator::GreaterThan => json!({ "$gt": value() }),
        QueryOperator::GreaterThanOrEqual => json!({ "$gte": value() }),
        QueryOperator::LessThan => json!({ "$lt": value() }),
        QueryOperator::LessThanOrEqual => json!({ "$lte": value() }),
        QueryOperator::Like => {
            let pattern = value();
            let pattern = pattern.as_str().ok_or_else(|| {
                ModelError::Query(format!("LIKE pattern for '{}' must be a string", condition.column))
            })?;
            json!({ "$regex": like_to_regex(pattern), "$options": "i" })
        }
        QueryOperator::In => json!({ "$in": condition.values }),
        QueryOperator::NotIn => json!({ "$nin": condition.values }),
        QueryOperator::IsNull => json!({ "$eq": null }),
        QueryOperator::IsNotNull => json!({ "$ne": null }),
        QueryOperator::Between => match condition.values.as_slice() {
            [start, end] => json!({ "$gte": start, "$lte": end }),
            _ => {
                return Err(ModelError::Query(format!(
                    "BETWEEN on '{}' needs exactly two bounds",
                    condition.column
                )))
            }
        },
    };
    let mut filter = Map::new();
    filter.insert(condition.column.clone(), test);
    Ok(Value::Object(filter))
}

/// Assemble the filter document for a list of terms; `None` when empty
pub(crate) fn filter_document(terms: &[WhereTerm]) -> ModelResult<Option<Value>> {
    let mut groups: Vec<Vec<Value>> = Vec::new();
    for term in terms {
        let filter = condition_filter(&term.condition)?;
        match (term.connector, groups.last_mut()) {
            (Connector::And, Some(group)) => group.push(filter),
            _ => groups.push(vec![filter]),
        }
    }

    Ok(match groups.len() {
        0 => None,
        1 => groups.pop().map(|group| json!({ "$and": group })),
        _ => {
            let branches: Vec<Value> = groups
                .into_iter()
                .map(|group| json!({ "$and": group }))
                .collect();
            Some(json!({ "$or": branches }))
        }
    })
}
