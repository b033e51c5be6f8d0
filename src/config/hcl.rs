//! Lowers `hcl-rs` bodies into the decoder's syntax tree.
//!
//! Interpolated strings become template parts, bare traversals become
//! references, and everything else becomes a constant constructor. HCL
//! features this engine has no use for (functions, conditionals, for
//! expressions) lower to an error via the returned diagnostics rather than
//! panicking mid-parse.

use std::str::FromStr;

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use regex::Regex;

use crate::value::Path;

use super::diag::Diagnostics;
use super::syntax::{Attribute, Block, Body, Expr, SrcRange, TplPart};

/// Parses HCL source text and lowers it. The filename only labels ranges.
pub fn parse(content: &str, filename: &str) -> Result<(Body, Diagnostics)> {
    let body: hcl::Body = hcl::from_str(content)
        .with_context(|| format!("failed to parse HCL in {}", filename))?;
    let mut diags = Diagnostics::new();
    let range = SrcRange::file(filename);
    Ok((lower_body(&body, &range, &mut diags), diags))
}

fn lower_body(body: &hcl::Body, range: &SrcRange, diags: &mut Diagnostics) -> Body {
    let mut out = Body::default();
    for structure in body.iter() {
        match structure {
            hcl::Structure::Attribute(attr) => {
                let expr = lower_expr(&attr.expr, range, diags);
                out.attributes.push(Attribute {
                    name: attr.key.to_string(),
                    expr,
                    range: range.clone(),
                });
            }
            hcl::Structure::Block(block) => {
                out.blocks.push(Block {
                    kind: block.identifier().to_string(),
                    labels: block
                        .labels()
                        .iter()
                        .map(|l| l.as_str().to_string())
                        .collect(),
                    body: lower_body(block.body(), range, diags),
                    range: range.clone(),
                });
            }
        }
    }
    out
}

fn lower_expr(expr: &hcl::Expression, range: &SrcRange, diags: &mut Diagnostics) -> Expr {
    match expr {
        hcl::Expression::Null => Expr::Null,
        hcl::Expression::Bool(b) => Expr::Bool(*b),
        hcl::Expression::Number(n) => match BigDecimal::from_str(&n.to_string()) {
            Ok(d) => Expr::Number(d),
            Err(_) => {
                diags.error(
                    format!("unreadable number literal {}", n),
                    Some(range.clone()),
                );
                Expr::Null
            }
        },
        hcl::Expression::String(s) => lower_template(s, range, diags),
        hcl::Expression::TemplateExpr(template) => {
            lower_template(&template.to_string(), range, diags)
        }
        hcl::Expression::Array(items) => Expr::Tuple(
            items
                .iter()
                .map(|e| lower_expr(e, range, diags))
                .collect(),
        ),
        hcl::Expression::Object(entries) => Expr::Object(
            entries
                .iter()
                .map(|(k, v)| (object_key(k), lower_expr(v, range, diags)))
                .collect(),
        ),
        hcl::Expression::Variable(var) => Expr::Ref(Path::root().attr(var.to_string())),
        hcl::Expression::Traversal(traversal) => match lower_traversal(traversal) {
            Some(path) => Expr::Ref(path),
            None => {
                diags.error(
                    "unsupported traversal (splats are not references)".to_string(),
                    Some(range.clone()),
                );
                Expr::Null
            }
        },
        hcl::Expression::Parenthesis(inner) => lower_expr(inner, range, diags),
        other => {
            diags.error(
                format!("unsupported expression: {:?}", other),
                Some(range.clone()),
            );
            Expr::Null
        }
    }
}

fn lower_traversal(traversal: &hcl::expr::Traversal) -> Option<Path> {
    let mut path = match &traversal.expr {
        hcl::Expression::Variable(var) => Path::root().attr(var.to_string()),
        _ => return None,
    };
    for operator in &traversal.operators {
        path = match operator {
            hcl::expr::TraversalOperator::GetAttr(ident) => path.attr(ident.to_string()),
            hcl::expr::TraversalOperator::Index(hcl::Expression::Number(n)) => {
                path.index_num(n.as_u64()? as usize)
            }
            hcl::expr::TraversalOperator::Index(hcl::Expression::String(s)) => {
                path.index_str(s.clone())
            }
            hcl::expr::TraversalOperator::LegacyIndex(n) => path.index_num(*n as usize),
            _ => return None,
        };
    }
    Some(path)
}

/// Splits a string on `${…}` interpolations. A single bare interpolation is
/// a reference; anything else is a template (or a plain string constant).
fn lower_template(s: &str, range: &SrcRange, diags: &mut Diagnostics) -> Expr {
    let re = Regex::new(r"\$\{([^}]+)\}").unwrap();
    let mut parts: Vec<TplPart> = Vec::new();
    let mut last = 0;
    for caps in re.captures_iter(s) {
        let whole = caps.get(0).unwrap();
        if whole.start() > last {
            parts.push(TplPart::Lit(s[last..whole.start()].to_string()));
        }
        let ref_text = caps.get(1).unwrap().as_str().trim();
        match Path::from_str(ref_text) {
            Ok(path) => parts.push(TplPart::Ref(path)),
            Err(e) => {
                diags.error(
                    format!("malformed reference ${{{}}}: {}", ref_text, e),
                    Some(range.clone()),
                );
                parts.push(TplPart::Lit(String::new()));
            }
        }
        last = whole.end();
    }
    if last < s.len() {
        parts.push(TplPart::Lit(s[last..].to_string()));
    }

    match parts.as_slice() {
        [] => Expr::str(""),
        [TplPart::Ref(path)] => Expr::Ref(path.clone()),
        _ => Expr::String(parts),
    }
}

fn object_key(key: &hcl::expr::ObjectKey) -> String {
    match key {
        hcl::expr::ObjectKey::Identifier(id) => id.to_string(),
        hcl::expr::ObjectKey::Expression(hcl::Expression::String(s)) => s.clone(),
        other => format!("{:?}", other),
    }
}
