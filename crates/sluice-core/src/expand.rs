//! Regex-driven template expansion.

use std::collections::BTreeMap;

use regex::{Captures, Regex};

/// Expands every template against every non-overlapping match of `pattern`
/// in `content`, concatenating the expansions per template name in match
/// order. Templates reference the whole match as `$0` and capture groups as
/// `$1` / `$name`; unresolved references expand to empty text.
///
/// Repeated matches concatenating into one value is the point: it lets a
/// list-like value be scraped out of several pattern occurrences. A single
/// top-level replace would only see the first match.
pub fn expand(
    templates: &BTreeMap<String, String>,
    pattern: &Regex,
    content: &str,
) -> BTreeMap<String, String> {
    let matches: Vec<Captures<'_>> = pattern.captures_iter(content).collect();

    let mut expanded = BTreeMap::new();
    for (name, template) in templates {
        let mut value = String::new();
        for captures in &matches {
            captures.expand(template, &mut value);
        }
        expanded.insert(name.clone(), value);
    }
    expanded
}
