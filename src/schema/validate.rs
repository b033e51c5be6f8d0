//! The field validation rule DSL.
//!
//! A rule expression is a comma-separated list of terms: `gte=N`, `gt=N`,
//! `lte=N`, `lt=N`, `div=K`, `oneof=A B C`, `arn`. Rule names are the stable
//! surface; message prose is advisory.

use std::str::FromStr;

use bigdecimal::BigDecimal;
use thiserror::Error;

use crate::value::convert::render_number;
use crate::value::Value;

/// A value failed a validation rule.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("validation {rule} failed for {value}: {message}")]
pub struct ValidationError {
    pub rule: String,
    pub value: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, value: &Value, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Applies validation rules to decoded input values.
pub trait Validator: Send + Sync {
    fn validate(&self, value: &Value, rule: &str) -> Result<(), ValidationError>;
}

/// The built-in rule interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleValidator;

impl Validator for RuleValidator {
    fn validate(&self, value: &Value, rule: &str) -> Result<(), ValidationError> {
        // Unknowns and nulls cannot be checked; requiredness is the
        // decoder's concern.
        if !value.is_wholly_known() || value.is_null() {
            return Ok(());
        }
        for term in rule.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            apply_term(value, term)?;
        }
        Ok(())
    }
}

fn apply_term(value: &Value, term: &str) -> Result<(), ValidationError> {
    let (name, arg) = match term.split_once('=') {
        Some((n, a)) => (n, Some(a)),
        None => (term, None),
    };
    match name {
        "gte" | "gt" | "lte" | "lt" => {
            let bound = numeric_arg(value, term, arg)?;
            let n = value.as_number().ok_or_else(|| {
                ValidationError::new(name, value, "ordering rules apply to numbers")
            })?;
            let ok = match name {
                "gte" => n >= &bound,
                "gt" => n > &bound,
                "lte" => n <= &bound,
                _ => n < &bound,
            };
            if !ok {
                let relation = match name {
                    "gte" => "at least",
                    "gt" => "greater than",
                    "lte" => "at most",
                    _ => "less than",
                };
                return Err(ValidationError::new(
                    name,
                    value,
                    format!("must be {} {}", relation, render_number(&bound)),
                ));
            }
            Ok(())
        }
        "div" => {
            let divisor = numeric_arg(value, term, arg)?;
            let n = value.as_number().ok_or_else(|| {
                ValidationError::new(name, value, "divisibility applies to numbers")
            })?;
            let quotient = n / &divisor;
            if !quotient.is_integer() {
                return Err(ValidationError::new(
                    name,
                    value,
                    format!("must be divisible by {}", render_number(&divisor)),
                ));
            }
            Ok(())
        }
        "oneof" => {
            let allowed = arg.unwrap_or_default();
            let s = value.as_str().ok_or_else(|| {
                ValidationError::new(name, value, "oneof applies to strings")
            })?;
            if !allowed.split_whitespace().any(|candidate| candidate == s) {
                return Err(ValidationError::new(
                    name,
                    value,
                    format!("must be one of: {}", allowed),
                ));
            }
            Ok(())
        }
        "arn" => {
            let s = value
                .as_str()
                .ok_or_else(|| ValidationError::new(name, value, "arn applies to strings"))?;
            let parts: Vec<&str> = s.splitn(6, ':').collect();
            if parts.len() != 6 || parts[0] != "arn" {
                return Err(ValidationError::new(
                    name,
                    value,
                    "must be an ARN with six colon-separated sections",
                ));
            }
            Ok(())
        }
        other => Err(ValidationError::new(
            other,
            value,
            format!("unrecognized validation rule {:?}", other),
        )),
    }
}

fn numeric_arg(
    value: &Value,
    term: &str,
    arg: Option<&str>,
) -> Result<BigDecimal, ValidationError> {
    let raw = arg.ok_or_else(|| {
        ValidationError::new(term, value, format!("rule {:?} needs an argument", term))
    })?;
    BigDecimal::from_str(raw).map_err(|_| {
        ValidationError::new(
            term,
            value,
            format!("rule argument {:?} is not a number", raw),
        )
    })
}
