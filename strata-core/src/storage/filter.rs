//! Filter expressions for the full-text capability.
//!
//! Grammar (clauses joined by `&&`):
//! - `field:=value` equality
//! - `field:=[v1,v2]` membership
//! - `field:>n`, `field:>=n`, `field:<n`, `field:<=n` numeric comparison

use serde_json::Value;

use crate::error::{Error, Result};

/// Comparison operator of a single clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// One parsed clause.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    pub field: String,
    pub op: FilterOp,
    pub values: Vec<Value>,
}

/// A conjunction of clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    pub clauses: Vec<FilterClause>,
}

impl FilterExpr {
    /// Parse a filter expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Query`] on malformed clauses.
    pub fn parse(input: &str) -> Result<Self> {
        let mut clauses = Vec::new();
        for raw in input.split("&&") {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            clauses.push(parse_clause(raw)?);
        }
        Ok(Self { clauses })
    }

    /// Whether a document satisfies every clause.
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(document))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

impl FilterClause {
    #[must_use]
    pub fn matches(&self, document: &Value) -> bool {
        let Some(actual) = document.get(&self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => self.values.first().is_some_and(|v| loose_eq(actual, v)),
            FilterOp::In => match actual {
                // An array field matches when any element is in the set
                Value::Array(items) => items
                    .iter()
                    .any(|item| self.values.iter().any(|v| loose_eq(item, v))),
                other => self.values.iter().any(|v| loose_eq(other, v)),
            },
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                let (Some(actual), Some(expected)) = (
                    actual.as_f64(),
                    self.values.first().and_then(Value::as_f64),
                ) else {
                    return false;
                };
                match self.op {
                    FilterOp::Gt => actual > expected,
                    FilterOp::Gte => actual >= expected,
                    FilterOp::Lt => actual < expected,
                    FilterOp::Lte => actual <= expected,
                    _ => false,
                }
            }
        }
    }
}

/// Equality that tolerates int/float representation differences.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

fn parse_clause(raw: &str) -> Result<FilterClause> {
    // Longest operators first so ":>=" is not read as ":>"
    const OPS: [(&str, FilterOp); 6] = [
        (":>=", FilterOp::Gte),
        (":<=", FilterOp::Lte),
        (":=", FilterOp::Eq),
        (":>", FilterOp::Gt),
        (":<", FilterOp::Lt),
        (":", FilterOp::Eq),
    ];

    for (token, op) in OPS {
        if let Some(idx) = raw.find(token) {
            let field = raw[..idx].trim().to_string();
            let value_str = raw[idx + token.len()..].trim();
            if field.is_empty() || value_str.is_empty() {
                break;
            }
            let (op, values) = if value_str.starts_with('[') && value_str.ends_with(']') {
                let inner = &value_str[1..value_str.len() - 1];
                (
                    FilterOp::In,
                    inner.split(',').map(|v| parse_value(v.trim())).collect(),
                )
            } else {
                (op, vec![parse_value(value_str)])
            };
            return Ok(FilterClause { field, op, values });
        }
    }

    Err(Error::Query(format!("malformed filter clause: {raw}")))
}

fn parse_value(raw: &str) -> Value {
    let unquoted = raw
        .trim()
        .trim_matches('`')
        .trim_matches('\'')
        .trim_matches('"');
    if let Ok(int) = unquoted.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = unquoted.parse::<f64>() {
        return Value::from(float);
    }
    match unquoted {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        other => Value::String(other.to_string()),
    }
}

/// Render an equality clause for a string value.
#[must_use]
pub fn eq_clause(field: &str, value: &str) -> String {
    format!("{field}:='{value}'")
}

/// Render a membership clause.
#[must_use]
pub fn in_clause(field: &str, values: &[String]) -> String {
    format!("{field}:=[{}]", values.join(","))
}

/// Render a numeric lower-bound clause.
#[must_use]
pub fn gte_clause(field: &str, value: f64) -> String {
    format!("{field}:>={value}")
}

/// Join clauses into a conjunction.
#[must_use]
pub fn join_clauses(clauses: &[String]) -> String {
    clauses.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_equality_and_membership() {
        let expr = FilterExpr::parse("knowledge_type:='recommendation' && tags:=[freight,rail]")
            .unwrap();
        assert_eq!(expr.clauses.len(), 2);
        assert_eq!(expr.clauses[0].op, FilterOp::Eq);
        assert_eq!(expr.clauses[1].op, FilterOp::In);

        let doc = json!({"knowledge_type": "recommendation", "tags": ["rail", "ocean"]});
        assert!(expr.matches(&doc));

        let miss = json!({"knowledge_type": "rule", "tags": ["rail"]});
        assert!(!expr.matches(&miss));
    }

    #[test]
    fn parses_numeric_comparisons() {
        let expr = FilterExpr::parse("confidence_score:>=0.7").unwrap();
        assert!(expr.matches(&json!({"confidence_score": 0.8})));
        assert!(!expr.matches(&json!({"confidence_score": 0.5})));
    }

    #[test]
    fn numeric_equality_tolerates_int_float() {
        let expr = FilterExpr::parse("episode_count:=3").unwrap();
        assert!(expr.matches(&json!({"episode_count": 3})));
        assert!(expr.matches(&json!({"episode_count": 3.0})));
    }

    #[test]
    fn rejects_malformed_clauses() {
        assert!(FilterExpr::parse("no-operator-here").is_err());
    }

    #[test]
    fn builders_render_round_trippable_expressions() {
        let rendered = join_clauses(&[
            eq_clause("category", "ops"),
            gte_clause("confidence_score", 0.6),
        ]);
        let expr = FilterExpr::parse(&rendered).unwrap();
        assert!(expr.matches(&json!({"category": "ops", "confidence_score": 0.9})));
    }
}
