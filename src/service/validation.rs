//! Per-column validation rules from the model definition, applied before create and update.

use crate::config::ValidationRule;
use crate::error::AppError;
use crate::model::Row;
use crate::query::values_equal;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

pub struct RequestValidator;

impl RequestValidator {
    /// Validate a full body (create): required fields must be present and non-null.
    pub fn validate(body: &Row, rules: &HashMap<String, ValidationRule>) -> Result<(), AppError> {
        let mut problems = Vec::new();
        for (col, rule) in sorted(rules) {
            match body.get(col) {
                None | Some(Value::Null) if rule.required == Some(true) => problems.push(format!("{} is required", col)),
                Some(v) => problems.extend(rule.check(col, v)),
                None => {}
            }
        }
        finish(problems)
    }

    /// Validate only the fields present in body (update/patch).
    pub fn validate_partial(body: &Row, rules: &HashMap<String, ValidationRule>) -> Result<(), AppError> {
        let mut problems = Vec::new();
        for (col, rule) in sorted(rules) {
            match body.get(col) {
                Some(Value::Null) if rule.required == Some(true) => problems.push(format!("{} is required", col)),
                Some(v) => problems.extend(rule.check(col, v)),
                None => {}
            }
        }
        finish(problems)
    }
}

fn sorted(rules: &HashMap<String, ValidationRule>) -> Vec<(&String, &ValidationRule)> {
    let mut v: Vec<_> = rules.iter().collect();
    v.sort_by(|a, b| a.0.cmp(b.0));
    v
}

fn finish(problems: Vec<String>) -> Result<(), AppError> {
    if problems.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(problems.join("; ")))
    }
}

impl ValidationRule {
    /// First rule this value breaks, if any. Null passes everything but `required`.
    pub fn check(&self, col: &str, v: &Value) -> Option<String> {
        if v.is_null() {
            return None;
        }
        if let Some(format) = &self.format {
            if let Some(msg) = check_format(col, v, format) {
                return Some(msg);
            }
        }
        if let Some(s) = v.as_str() {
            let len = s.chars().count();
            if let Some(max) = self.max_length.filter(|m| len > *m as usize) {
                return Some(format!("{} must be at most {} characters", col, max));
            }
            if let Some(min) = self.min_length.filter(|m| len < *m as usize) {
                return Some(format!("{} must be at least {} characters", col, min));
            }
            if let Some(pattern) = &self.pattern {
                match Regex::new(pattern) {
                    Ok(re) if !re.is_match(s) => return Some(format!("{} does not match required pattern", col)),
                    Err(_) => return Some(format!("invalid pattern for {}", col)),
                    _ => {}
                }
            }
        }
        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| values_equal(v, a)) {
                return Some(format!(
                    "{} must be one of: {:?}",
                    col,
                    allowed.iter().take(5).collect::<Vec<_>>()
                ));
            }
        }
        if let Some(n) = v.as_f64() {
            if let Some(min) = self.minimum.filter(|m| n < *m) {
                return Some(format!("{} must be at least {}", col, min));
            }
            if let Some(max) = self.maximum.filter(|m| n > *m) {
                return Some(format!("{} must be at most {}", col, max));
            }
        }
        None
    }
}

fn check_format(col: &str, v: &Value, format: &str) -> Option<String> {
    let s = v.as_str()?;
    match format.to_lowercase().as_str() {
        "email" if !s.contains('@') || s.len() < 3 => Some(format!("{} must be a valid email", col)),
        "uuid" if uuid::Uuid::parse_str(s).is_err() => Some(format!("{} must be a valid UUID", col)),
        _ => None,
    }
}
