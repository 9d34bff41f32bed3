//! Autocomplete suggestions drawn from titles, tags and url path segments.

use std::collections::HashSet;

use crate::model::types::IndexGeneration;

pub const DEFAULT_SUGGESTIONS: usize = 8;
pub const MAX_SUGGESTIONS: usize = 50;

/// Suggestions for a partial query, duplicate-free (case-insensitively).
///
/// Candidates are collected in passes (every title, then every tag, then
/// every url segment) so that titles always come first. Matching and
/// de-duplication use the lowercase keys computed when the record was built.
pub fn suggest(generation: &IndexGeneration, partial: &str, limit: Option<usize>) -> Vec<String> {
    let needle = partial.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let limit = limit
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_SUGGESTIONS)
        .min(MAX_SUGGESTIONS);

    let mut picked = Picked {
        needle: &needle,
        seen: HashSet::new(),
        out: Vec::new(),
    };
    for record in generation.published() {
        picked.offer(&record.title, &record.keys().title);
    }
    for record in generation.published() {
        for (tag, key) in record.tags.iter().zip(&record.keys().tags) {
            picked.offer(tag, key);
        }
    }
    for record in generation.published() {
        for (segment, key) in &record.keys().url_segments {
            picked.offer(segment, key);
        }
    }

    let mut out = picked.out;
    out.truncate(limit);
    out
}

struct Picked<'n, 'g> {
    needle: &'n str,
    seen: HashSet<&'g str>,
    out: Vec<String>,
}

impl<'g> Picked<'_, 'g> {
    fn offer(&mut self, display: &str, key: &'g str) {
        let key = key.trim();
        if key.contains(self.needle) && self.seen.insert(key) {
            self.out.push(display.trim().to_string());
        }
    }
}
