//! Spelling suggestions for diagnostics.

use strsim::levenshtein;

/// Returns the candidate closest to `query` by Levenshtein distance, bounded
/// by `max(1, query.len() / 5)`. Exact matches short-circuit; `None` when no
/// candidate is within the bound.
pub fn suggest<'a, I>(candidates: I, query: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let bound = (query.chars().count() / 5).max(1);
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        if candidate == query {
            return Some(candidate.to_string());
        }
        let distance = levenshtein(candidate, query);
        if distance <= bound && best.map(|(d, _)| distance < d).unwrap_or(true) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, c)| c.to_string())
}

/// Formats a suggestion as diagnostic detail, if one is close enough.
pub fn did_you_mean<'a, I>(candidates: I, query: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    suggest(candidates, query).map(|c| format!("Did you mean {:?}?", c))
}
