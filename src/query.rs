//! Query-string parsing: `where`, `attributes`, `limit`, `offset`, `orderBy`, `order`, `page`,
//! and the filter type every model implementation evaluates.

use crate::config::{ResolvedScope, TableRef};
use crate::error::AppError;
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Comparison operator of one filter condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Like,
    Is,
}

impl Op {
    /// Accepts `$gt` as well as `gt`.
    fn parse(key: &str) -> Option<Self> {
        Some(match key.trim_start_matches('$') {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "in" => Op::In,
            "notIn" | "not_in" | "nin" => Op::NotIn,
            "like" => Op::Like,
            "is" => Op::Is,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: Op,
    pub value: Value,
}

/// Conjunction of conditions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Where(pub Vec<Condition>);

impl Where {
    /// Parse a filter object: `{"col": v}` is equality, `null` IS NULL, an array IN,
    /// and `{"col": {"$gt": v, ...}}` applies operators.
    pub fn parse(value: &Value) -> Result<Self, AppError> {
        let obj = match value {
            Value::Null => return Ok(Where::default()),
            Value::Object(obj) => obj,
            _ => return Err(AppError::BadRequest("where must be a JSON object".into())),
        };
        let mut conditions = Vec::new();
        for (column, v) in obj {
            match v {
                Value::Array(_) => conditions.push(Condition { column: column.clone(), op: Op::In, value: v.clone() }),
                Value::Object(ops) => {
                    for (key, operand) in ops {
                        let op = Op::parse(key)
                            .ok_or_else(|| AppError::BadRequest(format!("unknown operator '{}' on '{}'", key, column)))?;
                        if matches!(op, Op::In | Op::NotIn) && !operand.is_array() {
                            return Err(AppError::BadRequest(format!("operator '{}' on '{}' needs an array", key, column)));
                        }
                        conditions.push(Condition { column: column.clone(), op, value: operand.clone() });
                    }
                }
                _ => conditions.push(Condition { column: column.clone(), op: Op::Eq, value: v.clone() }),
            }
        }
        Ok(Where(conditions))
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Where(vec![Condition { column: column.into(), op: Op::Eq, value }])
    }

    pub fn and(mut self, other: Where) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    /// Reject filters on columns the table does not have.
    pub fn check_columns(&self, table: &TableRef) -> Result<(), AppError> {
        for c in &self.0 {
            if !table.has_column(&c.column) {
                return Err(AppError::BadRequest(format!("unknown column '{}' on '{}'", c.column, table.model_name)));
            }
        }
        Ok(())
    }

    /// Evaluate against an in-memory row. SQL NULL semantics: comparisons with null never match.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        self.0.iter().all(|c| {
            let field = row.get(&c.column).unwrap_or(&Value::Null);
            c.matches(field)
        })
    }
}

impl Condition {
    fn matches(&self, field: &Value) -> bool {
        match self.op {
            Op::Is => match &self.value {
                Value::Null => field.is_null(),
                v => field == v,
            },
            Op::Eq if self.value.is_null() => field.is_null(),
            Op::Ne if self.value.is_null() => !field.is_null(),
            _ if field.is_null() => false,
            Op::Eq => values_equal(field, &self.value),
            Op::Ne => !values_equal(field, &self.value),
            Op::Gt => compare_values(field, &self.value) == Some(Ordering::Greater),
            Op::Gte => matches!(compare_values(field, &self.value), Some(Ordering::Greater | Ordering::Equal)),
            Op::Lt => compare_values(field, &self.value) == Some(Ordering::Less),
            Op::Lte => matches!(compare_values(field, &self.value), Some(Ordering::Less | Ordering::Equal)),
            Op::In => self.value.as_array().is_some_and(|a| a.iter().any(|v| values_equal(field, v))),
            Op::NotIn => self.value.as_array().is_some_and(|a| !a.iter().any(|v| values_equal(field, v))),
            Op::Like => match (field, self.value.as_str()) {
                (Value::String(s), Some(pattern)) => like_matches(s, pattern),
                (other, Some(pattern)) => like_matches(&other.to_string(), pattern),
                _ => false,
            },
        }
    }
}

/// Equality across JSON values: numbers compare numerically, numeric strings match numbers.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::String(y)) => x.as_f64()?.partial_cmp(&y.parse::<f64>().ok()?),
        (Value::String(x), Value::Number(y)) => x.parse::<f64>().ok()?.partial_cmp(&y.as_f64()?),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn like_matches(s: &str, pattern: &str) -> bool {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map(|r| r.is_match(s)).unwrap_or(false)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s.to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            _ => Err(AppError::BadRequest(format!("invalid order '{}': expected ASC or DESC", s))),
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Options for one find call: filter, projection, window, order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub filter: Where,
    pub attributes: Option<Vec<String>>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order: Option<OrderBy>,
}

impl FindOptions {
    pub fn filter(filter: Where) -> Self {
        FindOptions { filter, ..Default::default() }
    }

    /// Apply a named scope: filters are ANDed, request options win over the scope's.
    pub fn with_scope(self, scope: &ResolvedScope) -> Self {
        FindOptions {
            filter: scope.filter.clone().and(self.filter),
            attributes: self.attributes.or_else(|| scope.attributes.clone()),
            limit: self.limit.or(scope.limit),
            offset: self.offset,
            order: self.order.or_else(|| scope.order.clone()),
        }
    }
}

/// `parseInt`-style parse: optional sign and leading digits, anything after is ignored.
/// Values past the i64 range clamp to `i64::MAX` or `i64::MIN`.
pub fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (sign, rest) = match s.as_bytes().first() {
        Some(b'-') => (-1, &s[1..]),
        Some(b'+') => (1, &s[1..]),
        _ => (1, s),
    };
    let digits: Vec<i64> = rest
        .chars()
        .map_while(|c| c.to_digit(10))
        .map(|d| sign * i64::from(d))
        .collect();
    if digits.is_empty() {
        return None;
    }
    // Saturates at the i64 bounds instead of failing on long digit runs.
    Some(digits.into_iter().fold(0i64, |n, d| n.saturating_mul(10).saturating_add(d)))
}

/// Positive integer or nothing: zero, negatives and garbage are treated as absent.
fn positive(s: Option<&str>) -> Option<u64> {
    s.and_then(parse_int_prefix).filter(|n| *n > 0).map(|n| n as u64)
}

/// Raw list parameters from the query string. `attributes` may repeat and/or be comma-separated.
#[derive(Clone, Debug, Default)]
pub struct ListParams {
    pub where_json: Option<Value>,
    pub attributes: Option<Vec<String>>,
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub order_by: Option<String>,
    pub order: Option<String>,
    pub page: Option<String>,
}

impl ListParams {
    pub fn from_pairs(pairs: &[(String, String)]) -> Self {
        let mut p = ListParams::default();
        for (k, v) in pairs {
            match k.as_str() {
                "where" => {
                    // Only a JSON object counts; anything else falls back to the body.
                    p.where_json = serde_json::from_str::<Value>(v).ok().filter(Value::is_object);
                }
                "attributes" | "attributes[]" => {
                    let attrs = p.attributes.get_or_insert_with(Vec::new);
                    attrs.extend(v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));
                }
                "limit" => p.limit = Some(v.clone()),
                "offset" => p.offset = Some(v.clone()),
                "orderBy" | "order_by" => p.order_by = Some(v.clone()).filter(|s| !s.is_empty()),
                "order" => p.order = Some(v.clone()),
                "page" => p.page = Some(v.clone()),
                _ => {}
            }
        }
        p
    }

    /// Filter source: the `where` query parameter when it is a JSON object, else the body.
    pub fn filter(&self, body: Option<&Value>) -> Result<Where, AppError> {
        match (&self.where_json, body_filter(body)) {
            (Some(w), _) => Where::parse(w),
            (None, Some(b)) => Where::parse(b),
            (None, None) => Ok(Where::default()),
        }
    }

    pub fn limit(&self) -> Option<u64> {
        positive(self.limit.as_deref())
    }

    pub fn offset(&self) -> Option<u64> {
        positive(self.offset.as_deref())
    }

    pub fn order(&self) -> Result<Option<OrderBy>, AppError> {
        let Some(column) = &self.order_by else { return Ok(None) };
        let direction = match &self.order {
            Some(o) if !o.is_empty() => Direction::parse(o)?,
            _ => Direction::Asc,
        };
        Ok(Some(OrderBy { column: column.clone(), direction }))
    }

    pub fn find_options(&self, body: Option<&Value>) -> Result<FindOptions, AppError> {
        Ok(FindOptions {
            filter: self.filter(body)?,
            attributes: self.attributes.clone().filter(|a| !a.is_empty()),
            limit: self.limit(),
            offset: self.offset(),
            order: self.order()?,
        })
    }
}

/// A search body is either the filter itself or `{"where": filter}`.
pub fn body_filter(body: Option<&Value>) -> Option<&Value> {
    let body = body?;
    match body {
        Value::Null => None,
        Value::Object(obj) if obj.is_empty() => None,
        Value::Object(obj) => Some(obj.get("where").unwrap_or(body)),
        other => Some(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parse_int_prefix_follows_parse_int() {
        assert_eq!(parse_int_prefix("42"), Some(42));
        assert_eq!(parse_int_prefix("  7abc"), Some(7));
        assert_eq!(parse_int_prefix("-3"), Some(-3));
        assert_eq!(parse_int_prefix("abc"), None);
        assert_eq!(parse_int_prefix(""), None);
        assert_eq!(parse_int_prefix("99999999999999999999"), Some(i64::MAX));
        assert_eq!(parse_int_prefix("-99999999999999999999x"), Some(i64::MIN));
        assert_eq!(parse_int_prefix("9223372036854775807"), Some(i64::MAX));
    }

    #[test]
    fn limit_and_offset_ignore_zero_and_garbage() {
        let p = ListParams::from_pairs(&pairs(&[("limit", "0"), ("offset", "x")]));
        assert_eq!(p.limit(), None);
        assert_eq!(p.offset(), None);
        let p = ListParams::from_pairs(&pairs(&[("limit", "10"), ("offset", "20")]));
        assert_eq!(p.limit(), Some(10));
        assert_eq!(p.offset(), Some(20));
        let p = ListParams::from_pairs(&pairs(&[("limit", "99999999999999999999")]));
        assert_eq!(p.limit(), Some(i64::MAX as u64));
    }

    #[test]
    fn attributes_repeat_and_split() {
        let p = ListParams::from_pairs(&pairs(&[("attributes", "id,first_name"), ("attributes", "last_name")]));
        assert_eq!(p.attributes.unwrap(), vec!["id", "first_name", "last_name"]);
    }

    #[test]
    fn where_query_wins_over_body() {
        let p = ListParams::from_pairs(&pairs(&[("where", r#"{"color":"red"}"#)]));
        let body = json!({"color": "blue"});
        assert_eq!(p.filter(Some(&body)).unwrap(), Where::eq("color", json!("red")));
    }

    #[test]
    fn invalid_where_query_falls_back_to_body() {
        let p = ListParams::from_pairs(&pairs(&[("where", "not json")]));
        let body = json!({"where": {"color": "blue"}});
        assert_eq!(p.filter(Some(&body)).unwrap(), Where::eq("color", json!("blue")));
        assert!(p.filter(None).unwrap().is_empty());
        assert!(p.filter(Some(&json!({}))).unwrap().is_empty());
    }

    #[test]
    fn order_defaults_to_ascending() {
        let p = ListParams::from_pairs(&pairs(&[("orderBy", "last_name")]));
        assert_eq!(p.order().unwrap().unwrap().direction, Direction::Asc);
        let p = ListParams::from_pairs(&pairs(&[("orderBy", "last_name"), ("order", "desc")]));
        assert_eq!(p.order().unwrap().unwrap().direction, Direction::Desc);
        let p = ListParams::from_pairs(&pairs(&[("orderBy", "last_name"), ("order", "sideways")]));
        assert!(p.order().is_err());
        let p = ListParams::from_pairs(&pairs(&[("order", "desc")]));
        assert_eq!(p.order().unwrap(), None);
    }

    #[test]
    fn where_operators() {
        let w = Where::parse(&json!({"age": {"$gte": 18, "lt": 65}, "tag": ["a", "b"], "deleted_at": null})).unwrap();
        let row = |age: i64, tag: &str| {
            json!({"age": age, "tag": tag, "deleted_at": null}).as_object().unwrap().clone()
        };
        assert!(w.matches(&row(30, "a")));
        assert!(!w.matches(&row(17, "a")));
        assert!(!w.matches(&row(30, "c")));
        assert!(Where::parse(&json!({"age": {"$between": [1, 2]}})).is_err());
        assert!(Where::parse(&json!({"age": {"$in": 3}})).is_err());
        assert!(Where::parse(&json!([1, 2])).is_err());
    }

    #[test]
    fn like_uses_sql_wildcards() {
        let w = Where::parse(&json!({"name": {"$like": "Jo_n%"}})).unwrap();
        assert!(w.matches(json!({"name": "John Smith"}).as_object().unwrap()));
        assert!(!w.matches(json!({"name": "Jane"}).as_object().unwrap()));
    }

    #[test]
    fn scope_merges_under_request_options() {
        let scope = ResolvedScope {
            name: "red".into(),
            filter: Where::eq("color", json!("red")),
            limit: Some(5),
            order: Some(OrderBy { column: "id".into(), direction: Direction::Desc }),
            ..Default::default()
        };
        let opts = FindOptions { filter: Where::eq("type", json!("sedan")), limit: Some(2), ..Default::default() };
        let merged = opts.with_scope(&scope);
        assert_eq!(merged.filter.conditions().len(), 2);
        assert_eq!(merged.limit, Some(2));
        assert_eq!(merged.order.unwrap().direction, Direction::Desc);
    }
}
