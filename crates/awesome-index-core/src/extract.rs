//! Heuristic markdown extractor for curated lists.
//!
//! Extraction happens in two layers:
//!
//! 1. [`events`] tokenizes raw text into a flat stream of
//!    [`MarkdownEvent`]s: heading enter/exit pairs derived from ATX heading
//!    levels, list items that look like `[name](url) - description`, and
//!    skipped lines. All pattern matching lives here.
//! 2. [`extract_entries`] folds those events into [`CandidateEntry`]s,
//!    tracking the heading stack as the category path, rejecting targets
//!    that are not absolute URLs, and collapsing repeated targets to their
//!    first occurrence.
//!
//! Neither layer fails on malformed input. Lines that cannot be understood
//! are counted in [`ExtractStats`] and skipped.
//!
//! # Example
//!
//! ```rust
//! use awesome_index_core::extract::extract_entries;
//!
//! let doc = "## Tools\n- [Foo](https://a.com) - desc\n";
//! let entries: Vec<_> = extract_entries(doc).collect();
//! assert_eq!(entries[0].name, "Foo");
//! assert_eq!(entries[0].category_path, vec!["Tools"]);
//! ```

use std::collections::{HashSet, VecDeque};
use std::str::Lines;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::CandidateEntry;

/// Deepest heading level markdown defines.
const MAX_HEADING_LEVEL: usize = 6;

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(#+)[ \t]*(.*?)(?:[ \t]+#+)?[ \t]*$").unwrap());

static LIST_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:[-*+]|\d{1,9}[.)])\s+").unwrap());

// Targets may contain one level of balanced parentheses, e.g. `/wiki/Rust_(language)`
static LIST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:[-*+]|\d{1,9}[.)])\s+(?:\*\*|__)?\[([^\[\]]+)\]\(\s*<?((?:[^()\s<>]|\([^()\s]*\))+)>?(?:\s+"[^"]*")?\s*\)(?:\*\*|__)?(.*)$"#,
    )
    .unwrap()
});

static INLINE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap());

static EMOJI_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":[\w+-]+:").unwrap());

/// Why a line was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `#` run deeper than six levels, or a title that cleans to nothing.
    MalformedHeading,
    /// A list item that does not match the link-entry shape.
    MalformedListItem,
}

/// One structural event in a markdown document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkdownEvent<'a> {
    HeadingEnter {
        level: usize,
        title: String,
        line: usize,
    },
    HeadingExit {
        level: usize,
    },
    ListItem {
        name: &'a str,
        target: &'a str,
        description: Option<String>,
        line: usize,
    },
    Skipped {
        reason: SkipReason,
        line: usize,
    },
}

/// Lazy tokenizer over a document. See [`events`].
pub struct Events<'a> {
    lines: Lines<'a>,
    line_no: usize,
    levels: Vec<usize>,
    in_fence: bool,
    pending: VecDeque<MarkdownEvent<'a>>,
}

/// Tokenize a document into [`MarkdownEvent`]s.
///
/// A heading of level `L` first closes every open heading of level `>= L`
/// (one `HeadingExit` each), then opens itself. Open headings are not
/// closed at end of input. Content inside fenced code blocks is ignored.
pub fn events(text: &str) -> Events<'_> {
    Events {
        lines: text.lines(),
        line_no: 0,
        levels: Vec::new(),
        in_fence: false,
        pending: VecDeque::new(),
    }
}

impl<'a> Events<'a> {
    fn scan_line(&mut self, line: &'a str) {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            self.in_fence = !self.in_fence;
            return;
        }
        if self.in_fence {
            return;
        }

        if let Some(caps) = HEADING.captures(line) {
            let level = caps[1].len();
            let title = clean_heading(caps.get(2).map_or("", |m| m.as_str()));
            if level > MAX_HEADING_LEVEL || title.is_empty() {
                self.pending.push_back(MarkdownEvent::Skipped {
                    reason: SkipReason::MalformedHeading,
                    line: self.line_no,
                });
                return;
            }
            while self.levels.last().is_some_and(|&open| open >= level) {
                let closed = self.levels.pop().unwrap_or(level);
                self.pending
                    .push_back(MarkdownEvent::HeadingExit { level: closed });
            }
            self.levels.push(level);
            self.pending.push_back(MarkdownEvent::HeadingEnter {
                level,
                title,
                line: self.line_no,
            });
            return;
        }

        if !LIST_MARKER.is_match(line) {
            return;
        }

        match LIST_ENTRY.captures(line) {
            Some(caps) => {
                let (Some(name), Some(target)) = (caps.get(1), caps.get(2)) else {
                    return;
                };
                let rest = caps.get(3).map_or("", |m| m.as_str());
                self.pending.push_back(MarkdownEvent::ListItem {
                    name: name.as_str().trim(),
                    target: target.as_str().trim(),
                    description: parse_description(rest),
                    line: self.line_no,
                });
            }
            None => self.pending.push_back(MarkdownEvent::Skipped {
                reason: SkipReason::MalformedListItem,
                line: self.line_no,
            }),
        }
    }
}

impl<'a> Iterator for Events<'a> {
    type Item = MarkdownEvent<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            let line = self.lines.next()?;
            self.line_no += 1;
            self.scan_line(line);
        }
    }
}

/// Strip emphasis markers, emoji shortcodes, and link syntax from a heading.
fn clean_heading(raw: &str) -> String {
    let unlinked = INLINE_LINK.replace_all(raw, "$1");
    let no_emoji = EMOJI_CODE.replace_all(&unlinked, "");
    let stripped: String = no_emoji
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '~'))
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text after the link: drop a leading separator, keep the rest.
fn parse_description(rest: &str) -> Option<String> {
    let body = rest
        .trim_start()
        .trim_start_matches(['-', '–', '—', ':'])
        .trim();
    if body.chars().all(|c| c.is_ascii_punctuation() || c.is_whitespace()) {
        None
    } else {
        Some(body.to_string())
    }
}

/// Whether `target` is an absolute http(s) URL with a host.
pub fn is_absolute_url(target: &str) -> bool {
    match url::Url::parse(target) {
        Ok(u) => {
            matches!(u.scheme(), "http" | "https") && u.host_str().is_some_and(|h| !h.is_empty())
        }
        Err(_) => false,
    }
}

/// Counters describing what one extraction pass discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub lines: usize,
    pub candidates: usize,
    pub malformed_headings: usize,
    pub malformed_items: usize,
    pub invalid_targets: usize,
    pub duplicates: usize,
}

impl ExtractStats {
    /// Every line or candidate that did not become an entry.
    pub fn skipped(&self) -> usize {
        self.malformed_headings + self.malformed_items + self.invalid_targets + self.duplicates
    }
}

/// Lazy candidate-entry iterator. See [`extract_entries`].
pub struct Entries<'a> {
    events: Events<'a>,
    path: Vec<String>,
    seen: HashSet<&'a str>,
    position: usize,
    stats: ExtractStats,
}

/// Extract candidate entries from a document, in document order.
///
/// The iterator borrows `text`; calling this again restarts from the top
/// and yields the identical sequence. Category comes from headings only:
/// nested list items share their parent heading's path.
pub fn extract_entries(text: &str) -> Entries<'_> {
    Entries {
        events: events(text),
        path: Vec::new(),
        seen: HashSet::new(),
        position: 0,
        stats: ExtractStats::default(),
    }
}

impl Entries<'_> {
    /// Counters so far. Complete once the iterator is exhausted.
    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    /// Drain the iterator, returning every entry and the final counters.
    pub fn collect_with_stats(mut self) -> (Vec<CandidateEntry>, ExtractStats) {
        let entries: Vec<CandidateEntry> = self.by_ref().collect();
        (entries, self.stats)
    }
}

impl Iterator for Entries<'_> {
    type Item = CandidateEntry;

    fn next(&mut self) -> Option<CandidateEntry> {
        loop {
            let event = self.events.next();
            self.stats.lines = self.events.line_no;
            match event? {
                MarkdownEvent::HeadingEnter { title, .. } => self.path.push(title),
                MarkdownEvent::HeadingExit { .. } => {
                    self.path.pop();
                }
                MarkdownEvent::Skipped { reason, .. } => match reason {
                    SkipReason::MalformedHeading => self.stats.malformed_headings += 1,
                    SkipReason::MalformedListItem => self.stats.malformed_items += 1,
                },
                MarkdownEvent::ListItem {
                    name,
                    target,
                    description,
                    line,
                } => {
                    if !is_absolute_url(target) {
                        self.stats.invalid_targets += 1;
                        continue;
                    }
                    if !self.seen.insert(target) {
                        self.stats.duplicates += 1;
                        continue;
                    }
                    let entry = CandidateEntry {
                        name: name.to_string(),
                        target: target.to_string(),
                        description,
                        category_path: self.path.clone(),
                        position: self.position,
                        line,
                    };
                    self.position += 1;
                    self.stats.candidates += 1;
                    return Some(entry);
                }
            }
        }
    }
}
