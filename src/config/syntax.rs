//! The parsed-configuration tree the decoder consumes.
//!
//! Any front-end can produce this; the crate ships an HCL lowering in
//! [`super::hcl`]. Expressions here are constructor trees over constants,
//! references, and string templates — the decoder collapses them into values
//! and expression capsules.

use std::fmt;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::value::Path;

/// Where a piece of configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SrcRange {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SrcRange {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for SrcRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        } else {
            write!(f, "{}", self.file)
        }
    }
}

/// A block body: attributes plus nested blocks.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub attributes: Vec<Attribute>,
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn blocks_of(&self, kind: &str) -> Vec<&Block> {
        self.blocks.iter().filter(|b| b.kind == kind).collect()
    }
}

/// A labeled block, e.g. `resource "db" { … }`.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: String,
    pub labels: Vec<String>,
    pub body: Body,
    pub range: SrcRange,
}

/// A single `name = expression` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub expr: Expr,
    pub range: SrcRange,
}

/// One part of a string template.
#[derive(Debug, Clone, PartialEq)]
pub enum TplPart {
    Lit(String),
    Ref(Path),
}

/// A configuration expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(BigDecimal),
    /// A string template; a plain string is a single literal part.
    String(Vec<TplPart>),
    Tuple(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// A bare traversal, e.g. `foo.output`.
    Ref(Path),
}

impl Expr {
    /// A template-free string constant.
    pub fn str(s: impl Into<String>) -> Expr {
        Expr::String(vec![TplPart::Lit(s.into())])
    }

    pub fn has_references(&self) -> bool {
        match self {
            Expr::Ref(_) => true,
            Expr::String(parts) => parts.iter().any(|p| matches!(p, TplPart::Ref(_))),
            Expr::Tuple(items) => items.iter().any(Expr::has_references),
            Expr::Object(entries) => entries.iter().any(|(_, e)| e.has_references()),
            _ => false,
        }
    }
}
