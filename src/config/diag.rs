//! Decode-time diagnostics.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::syntax::SrcRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One decode-time finding, tied to a source range when one is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: Option<String>,
    pub range: Option<SrcRange>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sev = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: {}", sev, self.summary)?;
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        if let Some(range) = &self.range {
            write!(f, " [{}]", range)?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics across a decode. Warnings are advisory; a single
/// error blocks graph construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    diags: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, summary: impl Into<String>, range: Option<SrcRange>) {
        self.push(Severity::Error, summary, None, range);
    }

    pub fn error_with(
        &mut self,
        summary: impl Into<String>,
        detail: impl Into<String>,
        range: Option<SrcRange>,
    ) {
        self.push(Severity::Error, summary, Some(detail.into()), range);
    }

    pub fn warning(&mut self, summary: impl Into<String>, range: Option<SrcRange>) {
        self.push(Severity::Warning, summary, None, range);
    }

    fn push(
        &mut self,
        severity: Severity,
        summary: impl Into<String>,
        detail: Option<String>,
        range: Option<SrcRange>,
    ) {
        self.diags.push(Diagnostic {
            severity,
            summary: summary.into(),
            detail,
            range,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diags.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.diags.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diags.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diags
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diags.extend(other.diags);
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, d) in self.diags.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}
