use std::fmt;
use std::str::FromStr;

use super::{Kind, PathError, Type, Value};

// ─── Path ───────────────────────────────────────────────────────────────────

/// Index key of an [`Step::Index`] step: strings address maps, numbers
/// address lists and tuples.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Index {
    String(String),
    Number(usize),
}

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Attr(String),
    Index(Index),
}

/// An ordered sequence of steps projecting a sub-value out of a value, or a
/// sub-type out of a type.
///
/// The string grammar joins attributes with `.`, renders numeric indices as
/// `[N]` and string indices as `["quoted"]`; [`Path::from_str`] is the
/// inverse on well-formed input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path(Vec<Step>);

impl Path {
    /// The empty path, projecting the value itself.
    pub fn root() -> Path {
        Path(Vec::new())
    }

    pub fn new(steps: Vec<Step>) -> Path {
        Path(steps)
    }

    pub fn attr(mut self, name: impl Into<String>) -> Path {
        self.0.push(Step::Attr(name.into()));
        self
    }

    pub fn index_str(mut self, key: impl Into<String>) -> Path {
        self.0.push(Step::Index(Index::String(key.into())));
        self
    }

    pub fn index_num(mut self, key: usize) -> Path {
        self.0.push(Step::Index(Index::Number(key)));
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Step> {
        self.0.first()
    }

    /// The path without its first step.
    pub fn rest(&self) -> Path {
        Path(self.0.iter().skip(1).cloned().collect())
    }

    /// The prefix of the first `n` steps.
    pub fn prefix(&self, n: usize) -> Path {
        Path(self.0.iter().take(n).cloned().collect())
    }

    /// Name of the leading attribute step, if the path starts with one.
    pub fn leading_attr(&self) -> Option<&str> {
        match self.first() {
            Some(Step::Attr(name)) => Some(name),
            _ => None,
        }
    }

    // ─── Application ────────────────────────────────────────────────────────

    /// Projects the sub-value addressed by this path. A step that does not
    /// match the shape of the value it lands on fails with the path prefix up
    /// to the failing step.
    ///
    /// Descending into an unknown composite yields an unknown of the
    /// projected type. Attribute steps address objects, and also maps (the
    /// wire form cannot distinguish the two; see the graph codec).
    pub fn apply(&self, value: &Value) -> Result<Value, PathError> {
        let mut current = value.clone();
        for (i, step) in self.0.iter().enumerate() {
            let fail = |reason: String| PathError::new(self.prefix(i + 1), reason);
            if !current.is_known() {
                let sub = self.suffix(i).apply_type(current.ty())?;
                return Ok(Value::unknown(sub));
            }
            if current.is_null() {
                return Err(fail("cannot descend into null".to_string()));
            }
            current = match (step, &current.kind) {
                (Step::Attr(name), Kind::Object(attrs)) => attrs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| fail(format!("no attribute {:?} in object", name)))?,
                (Step::Attr(name), Kind::Map(entries)) => entries
                    .get(name)
                    .cloned()
                    .ok_or_else(|| fail(format!("no key {:?} in map", name)))?,
                (Step::Index(Index::String(key)), Kind::Map(entries)) => entries
                    .get(key)
                    .cloned()
                    .ok_or_else(|| fail(format!("no key {:?} in map", key)))?,
                (Step::Index(Index::String(key)), Kind::Object(attrs)) => attrs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| fail(format!("no attribute {:?} in object", key)))?,
                (Step::Index(Index::Number(n)), Kind::List(items))
                | (Step::Index(Index::Number(n)), Kind::Set(items))
                | (Step::Index(Index::Number(n)), Kind::Tuple(items)) => items
                    .get(*n)
                    .cloned()
                    .ok_or_else(|| fail(format!("index {} out of range", n)))?,
                (step, _) => {
                    return Err(fail(format!(
                        "step {} does not match {}",
                        Path::new(vec![step.clone()]),
                        current.ty()
                    )))
                }
            };
        }
        Ok(current)
    }

    /// Projects the sub-type addressed by this path. Missing object
    /// attributes fail; the error carries the path prefix locating the
    /// offending step.
    pub fn apply_type(&self, ty: &Type) -> Result<Type, PathError> {
        let mut current = ty.clone();
        for (i, step) in self.0.iter().enumerate() {
            let fail = |reason: String| PathError::new(self.prefix(i + 1), reason);
            current = match (step, &current) {
                (Step::Attr(name), Type::Object(attrs)) => attrs
                    .get(name)
                    .cloned()
                    .ok_or_else(|| fail(format!("no attribute {:?} in {}", name, current)))?,
                (Step::Attr(_), Type::Map(elem)) => (**elem).clone(),
                (Step::Index(Index::String(key)), Type::Object(attrs)) => attrs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| fail(format!("no attribute {:?} in {}", key, current)))?,
                (Step::Index(Index::String(_)), Type::Map(elem)) => (**elem).clone(),
                (Step::Index(Index::Number(_)), Type::List(elem))
                | (Step::Index(Index::Number(_)), Type::Set(elem)) => (**elem).clone(),
                (Step::Index(Index::Number(n)), Type::Tuple(elems)) => elems
                    .get(*n)
                    .cloned()
                    .ok_or_else(|| fail(format!("index {} out of range in {}", n, current)))?,
                (step, _) => {
                    return Err(fail(format!(
                        "step {} does not match {}",
                        Path::new(vec![step.clone()]),
                        current
                    )))
                }
            };
        }
        Ok(current)
    }

    fn suffix(&self, from: usize) -> Path {
        Path(self.0.iter().skip(from).cloned().collect())
    }
}

// ─── String form ────────────────────────────────────────────────────────────

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            match step {
                Step::Attr(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{}", name)?;
                }
                Step::Index(Index::Number(n)) => write!(f, "[{}]", n)?,
                Step::Index(Index::String(s)) => {
                    write!(f, "[{}]", serde_json::to_string(s).unwrap_or_default())?
                }
            }
        }
        Ok(())
    }
}

/// Error parsing a path string.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid path {input:?} at byte {at}: {reason}")]
pub struct ParsePathError {
    pub input: String,
    pub at: usize,
    pub reason: String,
}

impl FromStr for Path {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |at: usize, reason: &str| ParsePathError {
            input: s.to_string(),
            at,
            reason: reason.to_string(),
        };

        let bytes = s.as_bytes();
        let mut steps = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'.' => {
                    if steps.is_empty() {
                        return Err(err(i, "leading dot"));
                    }
                    i += 1;
                    if i >= bytes.len() {
                        return Err(err(i, "trailing dot"));
                    }
                }
                b'[' => {
                    if bytes.get(i + 1) == Some(&b'"') {
                        // Quoted key: scan to the closing quote, honoring
                        // backslash escapes, before expecting the bracket.
                        let mut j = i + 2;
                        while j < bytes.len() && bytes[j] != b'"' {
                            if bytes[j] == b'\\' {
                                j += 1;
                            }
                            j += 1;
                        }
                        if j >= bytes.len() || bytes.get(j + 1) != Some(&b']') {
                            return Err(err(i, "unterminated quoted index"));
                        }
                        let key: String = serde_json::from_str(&s[i + 1..=j])
                            .map_err(|_| err(i, "malformed quoted index"))?;
                        steps.push(Step::Index(Index::String(key)));
                        i = j + 2;
                    } else {
                        let close = s[i..]
                            .find(']')
                            .map(|off| i + off)
                            .ok_or_else(|| err(i, "unterminated index"))?;
                        let n: usize = s[i + 1..close]
                            .parse()
                            .map_err(|_| err(i, "malformed numeric index"))?;
                        steps.push(Step::Index(Index::Number(n)));
                        i = close + 1;
                    }
                }
                _ => {
                    let end = s[i..]
                        .find(|c| c == '.' || c == '[')
                        .map(|off| i + off)
                        .unwrap_or(s.len());
                    let name = &s[i..end];
                    if name.is_empty() {
                        return Err(err(i, "empty attribute name"));
                    }
                    steps.push(Step::Attr(name.to_string()));
                    i = end;
                }
            }
        }
        if steps.is_empty() {
            return Err(err(0, "empty path"));
        }
        Ok(Path(steps))
    }
}
