//! Collection queries: equality filters plus a single ordering

use chrono::DateTime;
use serde_json::Value;
use std::cmp::Ordering;

use super::Document;

/// A single `field = value` condition
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

/// Result ordering
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

/// A collection query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<Order>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter documents where field equals a value; `Value::Null` matches
    /// documents without the field
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    /// Order the results by a field
    pub fn order(mut self, field: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            field: field.to_string(),
            ascending,
        });
        self
    }

    /// Limit the number of documents returned
    pub fn limit(mut self, count: usize) -> Self {
        self.limit = Some(count);
        self
    }

    /// Render as PostgREST query parameters
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| {
                let rendered = match &f.value {
                    Value::Null => "is.null".to_string(),
                    Value::String(s) => format!("eq.{}", s),
                    other => format!("eq.{}", other),
                };
                (f.field.clone(), rendered)
            })
            .collect();

        if let Some(order) = &self.order {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.field, direction)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// Whether a document satisfies every filter
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| {
            let actual = field_value(doc, &f.field);
            compare_values(&actual, &f.value) == Some(Ordering::Equal)
        })
    }

    /// Filter, order and limit a set of documents in memory
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let (a, b) = (field_value(a, &order.field), field_value(b, &order.field));
                // Documents without the field go last in either direction
                let ordering = match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => return Ordering::Greater,
                    (false, true) => return Ordering::Less,
                    (false, false) => compare_values(&a, &b).unwrap_or(Ordering::Equal),
                };
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }
        selected
    }
}

fn field_value(doc: &Document, field: &str) -> Value {
    if field == "id" {
        return Value::String(doc.id.clone());
    }
    doc.fields.get(field).cloned().unwrap_or(Value::Null)
}

/// Compare two JSON values of the same kind
///
/// Strings that both parse as RFC 3339 timestamps compare chronologically;
/// values of different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (a, b) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}
