//! Expressions: ordered sequences of literal and reference parts.
//!
//! An expression of one part evaluates to that part's value; a longer one
//! coerces every part to string and concatenates. References are paths whose
//! first step names a resource; they resolve against an environment of
//! resource outputs (at reconcile time) or decoded inputs (during static
//! resolution).

use std::fmt;

use thiserror::Error;

use crate::value::convert::{convert, ConversionError};
use crate::value::{Path, PathError, Type, Value};

/// One part of an [`Expression`].
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Lit(Value),
    Ref(Path),
}

/// A finite ordered sequence of literal and reference parts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    pub parts: Vec<Part>,
}

/// Error evaluating an expression.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("reference to unknown resource {0:?}")]
    UnknownReference(String),
    #[error("reference {0} does not begin with a resource name")]
    FirstStepNotAttribute(Path),
    #[error(transparent)]
    BadPath(#[from] PathError),
    #[error(transparent)]
    NotStringable(#[from] ConversionError),
}

impl Expression {
    pub fn new(parts: Vec<Part>) -> Expression {
        Expression { parts }
    }

    pub fn literal(value: Value) -> Expression {
        Expression {
            parts: vec![Part::Lit(value)],
        }
    }

    pub fn reference(path: Path) -> Expression {
        Expression {
            parts: vec![Part::Ref(path)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// All reference paths, in order of appearance.
    pub fn references(&self) -> Vec<&Path> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Ref(path) => Some(path),
                Part::Lit(_) => None,
            })
            .collect()
    }

    pub fn has_references(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Ref(_)))
    }

    /// Collapses every run of two or more consecutive literals into a single
    /// string literal holding their concatenation. A lone literal is left
    /// untouched, which makes the operation idempotent.
    pub fn merge_literals(self) -> Expression {
        let mut parts: Vec<Part> = Vec::with_capacity(self.parts.len());
        let mut run: Vec<Value> = Vec::new();

        let flush = |run: &mut Vec<Value>, parts: &mut Vec<Part>| {
            match run.len() {
                0 => {}
                1 => parts.push(Part::Lit(run.pop().unwrap())),
                _ => {
                    let mut s = String::new();
                    for v in run.drain(..) {
                        // Literals in a mergeable run are stringable by
                        // construction; anything else stays a lone literal.
                        if let Ok((sv, _)) = convert(&v, &Type::String) {
                            if let Some(text) = sv.as_str() {
                                s.push_str(text);
                            }
                        }
                    }
                    parts.push(Part::Lit(Value::string(s)));
                }
            }
        };

        for part in self.parts {
            match part {
                Part::Lit(v) => run.push(v),
                Part::Ref(path) => {
                    flush(&mut run, &mut parts);
                    parts.push(Part::Ref(path));
                }
            }
        }
        flush(&mut run, &mut parts);
        Expression { parts }
    }

    /// Evaluates the expression. `lookup` maps a resource name to the value
    /// its references resolve against (the resource's output object at
    /// reconcile time).
    ///
    /// A single-part expression keeps its part's type; longer expressions
    /// coerce every part to string and concatenate. Any unknown part makes
    /// the whole result unknown (of the part's own type when the expression
    /// has length one, of string otherwise).
    pub fn eval<F>(&self, lookup: F) -> Result<Value, EvalError>
    where
        F: Fn(&str) -> Option<Value>,
    {
        let resolve = |path: &Path| -> Result<Value, EvalError> {
            let name = path
                .leading_attr()
                .ok_or_else(|| EvalError::FirstStepNotAttribute(path.clone()))?;
            let base = lookup(name)
                .ok_or_else(|| EvalError::UnknownReference(name.to_string()))?;
            Ok(path.rest().apply(&base)?)
        };

        if self.parts.len() == 1 {
            return match &self.parts[0] {
                Part::Lit(v) => Ok(v.clone()),
                Part::Ref(path) => resolve(path),
            };
        }

        let mut out = String::new();
        for part in &self.parts {
            let v = match part {
                Part::Lit(v) => v.clone(),
                Part::Ref(path) => resolve(path)?,
            };
            if !v.is_wholly_known() {
                return Ok(Value::unknown(Type::String));
            }
            let (s, _) = convert(&v, &Type::String)?;
            out.push_str(s.as_str().unwrap_or_default());
        }
        Ok(Value::string(out))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            match part {
                Part::Lit(v) => write!(f, "{}", v)?,
                Part::Ref(path) => write!(f, "${{{}}}", path)?,
            }
        }
        Ok(())
    }
}
