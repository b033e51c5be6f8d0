//! Configuration decoding: parsed tree → resource graph.

pub mod decoder;
pub mod diag;
pub mod hcl;
pub mod syntax;

pub use self::decoder::{decode, DecodeResult, ProjectMeta, SourceSpec};
pub use self::diag::{Diagnostic, Diagnostics, Severity};
pub use self::syntax::SrcRange;
