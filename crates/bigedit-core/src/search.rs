//! Text search.
//!
//! Search runs over the materialized document as UTF-8, using **byte
//! offsets** for all inputs and outputs. Literal queries are escaped and
//! compiled into the same regex engine as regex queries; case-insensitive
//! matching is a compile flag. Whole-word matching treats ASCII
//! alphanumerics, `_`, and any byte ≥ 0x80 as word bytes.

use regex::{Regex, RegexBuilder};

/// Options that control how search is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    /// If `true`, matching is case-sensitive.
    pub match_case: bool,
    /// If `true`, only whole-word occurrences match.
    pub whole_word: bool,
    /// If `true`, the query is a regex pattern rather than a literal.
    pub regex: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            match_case: true,
            whole_word: false,
            regex: false,
        }
    }
}

/// A match as a half-open byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    /// Inclusive start byte offset.
    pub start: usize,
    /// Exclusive end byte offset.
    pub end: usize,
}

impl SearchMatch {
    /// Match length in bytes.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Whether the match is empty.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// A planned replacement: the matched range and the exact text to put there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    /// The matched range being replaced.
    pub range: SearchMatch,
    /// The expanded replacement text.
    pub text: String,
}

/// Search errors.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    /// The query failed to compile as a regex.
    #[error("invalid regex: {0}")]
    InvalidRegex(#[from] regex::Error),
}

/// Word-class test used by whole-word matching and word selection: ASCII
/// alphanumerics, underscore, and any non-ASCII byte.
pub fn is_word_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte >= 0x80
}

fn compile_query(query: &str, options: SearchOptions) -> Result<Regex, SearchError> {
    let pattern = if options.regex {
        query.to_string()
    } else {
        regex::escape(query)
    };

    RegexBuilder::new(&pattern)
        .case_insensitive(!options.match_case)
        .multi_line(true)
        .build()
        .map_err(SearchError::InvalidRegex)
}

fn is_whole_word(text: &str, m: SearchMatch) -> bool {
    if m.is_empty() {
        return false;
    }
    let bytes = text.as_bytes();
    let before_ok = m.start == 0 || !is_word_byte(bytes[m.start - 1]);
    let after_ok = m.end >= bytes.len() || !is_word_byte(bytes[m.end]);
    before_ok && after_ok
}

/// Floor `pos` to a UTF-8 character boundary of `text`.
fn floor_char_boundary(text: &str, mut pos: usize) -> usize {
    pos = pos.min(text.len());
    while pos > 0 && !text.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

fn matches_in<'t>(
    re: &'t Regex,
    text: &'t str,
    options: SearchOptions,
) -> impl Iterator<Item = SearchMatch> + 't {
    let whole_word = options.whole_word;
    re.find_iter(text)
        .map(|m| SearchMatch {
            start: m.start(),
            end: m.end(),
        })
        .filter(move |m| !m.is_empty() && (!whole_word || is_whole_word(text, *m)))
}

/// Find the next occurrence of `query` starting at byte offset `from`,
/// wrapping around the document exactly once.
///
/// Backward search returns the nearest occurrence before `from`, wrapping to
/// the document tail when none precedes it. Returns `Ok(None)` for an empty
/// query or when no occurrence exists anywhere.
pub fn find(
    text: &str,
    query: &str,
    options: SearchOptions,
    from: usize,
    forward: bool,
) -> Result<Option<SearchMatch>, SearchError> {
    if query.is_empty() {
        return Ok(None);
    }
    let re = compile_query(query, options)?;
    let from = floor_char_boundary(text, from);

    if forward {
        // First occurrence at or after `from`, else wrap to the head.
        let after = matches_in(&re, text, options).find(|m| m.start >= from);
        if after.is_some() {
            return Ok(after);
        }
        Ok(matches_in(&re, text, options).find(|m| m.start < from))
    } else {
        // Last occurrence strictly before `from`, else wrap to the tail.
        let before = matches_in(&re, text, options)
            .filter(|m| m.start < from)
            .last();
        if before.is_some() {
            return Ok(before);
        }
        Ok(matches_in(&re, text, options)
            .filter(|m| m.start >= from)
            .last())
    }
}

/// Every occurrence of `query` in `text`, in document order.
pub fn find_all(
    text: &str,
    query: &str,
    options: SearchOptions,
) -> Result<Vec<SearchMatch>, SearchError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let re = compile_query(query, options)?;
    Ok(matches_in(&re, text, options).collect())
}

/// Plan a replace-all in a single pass: every match paired with its expanded
/// replacement text. In regex mode `$1`-style capture references expand; in
/// literal mode the replacement is used verbatim. Replaced text is never
/// re-searched.
pub fn replace_plan(
    text: &str,
    query: &str,
    replacement: &str,
    options: SearchOptions,
) -> Result<Vec<Replacement>, SearchError> {
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let re = compile_query(query, options)?;

    let mut plan = Vec::new();
    if options.regex {
        for caps in re.captures_iter(text) {
            let m = caps.get(0).map(|m| SearchMatch {
                start: m.start(),
                end: m.end(),
            });
            let Some(m) = m else { continue };
            if m.is_empty() || (options.whole_word && !is_whole_word(text, m)) {
                continue;
            }
            let mut expanded = String::new();
            caps.expand(replacement, &mut expanded);
            plan.push(Replacement {
                range: m,
                text: expanded,
            });
        }
    } else {
        for m in matches_in(&re, text, options) {
            plan.push(Replacement {
                range: m,
                text: replacement.to_string(),
            });
        }
    }
    Ok(plan)
}
