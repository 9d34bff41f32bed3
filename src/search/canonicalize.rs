//! Text normalization for matchable plain text.
//!
//! Raw content (markdown, MDX, HTML fragments) is reduced to plain text that
//! substring matching and word counting can run against. The transform is a
//! fixed, ordered table of named passes; each pass is a pure function and can
//! be exercised on its own.
//!
//! # Processing Pipeline
//!
//! 1. **Unicode NFC normalization** - "café" (decomposed) → "café" (composed)
//! 2. **Front matter** - leading `---` YAML block
//! 3. **Fenced code** - ```` ``` ```` and `~~~` blocks are dropped entirely
//! 4. **Inline code** - `` `spans` ``
//! 5. **HTML comments and tags** - tag bodies are kept
//! 6. **Template braces** - `{expr}` and `{{expr}}`
//! 7. **Declarations** - `import`/`export`/`require` lines
//! 8. **Comments** - `/* block */` and line-leading `//`
//! 9. **Images, then links** - images vanish, links keep their visible text
//! 10. **Emphasis and headings** - `#`, `**`, `_`, `~~`, `>`, list markers
//! 11. **Whitespace** - indentation and runs collapsed, paragraphs kept
//!
//! No pass can fail. A pattern that does not match leaves the text unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// A single named transformation in the normalizer pipeline.
#[derive(Clone, Copy)]
pub struct Pass {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass").field("name", &self.name).finish()
    }
}

/// The pipeline, in application order. Image stripping must precede link
/// stripping or `![alt](src)` degrades into `!alt`.
pub const PASSES: &[Pass] = &[
    Pass {
        name: "unicode_nfc",
        apply: unicode_nfc,
    },
    Pass {
        name: "strip_front_matter",
        apply: strip_front_matter,
    },
    Pass {
        name: "strip_fenced_code",
        apply: strip_fenced_code,
    },
    Pass {
        name: "strip_inline_code",
        apply: strip_inline_code,
    },
    Pass {
        name: "strip_html_comments",
        apply: strip_html_comments,
    },
    Pass {
        name: "strip_tags",
        apply: strip_tags,
    },
    Pass {
        name: "strip_template_braces",
        apply: strip_template_braces,
    },
    Pass {
        name: "strip_import_lines",
        apply: strip_import_lines,
    },
    Pass {
        name: "strip_comments",
        apply: strip_comments,
    },
    Pass {
        name: "strip_images",
        apply: strip_images,
    },
    Pass {
        name: "strip_links",
        apply: strip_links,
    },
    Pass {
        name: "strip_emphasis_and_headings",
        apply: strip_emphasis_and_headings,
    },
    Pass {
        name: "collapse_whitespace",
        apply: collapse_whitespace,
    },
];

static FRONT_MATTER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A\u{FEFF}?---[ \t]*\r?\n.*?\r?\n---[ \t]*(?:\r?\n|\z)")
        .expect("front matter regex")
});
static INLINE_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"`[^`\n]*`").expect("inline code regex"));
static HTML_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("html comment regex"));
static TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"</?(?:[A-Za-z][A-Za-z0-9_.:-]*(?:\s[^<>]*)?)?/?>").expect("tag regex")
});
static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{[^{}]*\}\}|\{[^{}]*\}").expect("template regex"));
static IMPORT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?m)^[ \t]*(?:import\s+(?:.*\bfrom\s+|['"]).*|export\s+(?:default|const|let|var|function|class|async|\{).*|(?:const|let|var)\s+.*=\s*require\s*\(.*)$"#,
    )
    .expect("import regex")
});
static BLOCK_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("block comment regex"));
static LINE_COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*//.*$").expect("line comment regex"));
static IMAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]\n]*\]\([^)\n]*\)").expect("image regex"));
static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]{0,3}#{1,6}(?:[ \t]+|$)").expect("heading regex"));
static RULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:-{3,}|\*{3,}|_{3,})[ \t]*$").expect("rule regex"));
static STAR_EMPHASIS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*([^*\n]+)\*").expect("star emphasis regex"));
static UNDERSCORE_EMPHASIS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(^|[^\w])_([^_\n]+)_([^\w]|$)").expect("underscore emphasis regex")
});
static SPACE_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("space run regex"));

/// Run the full pipeline over raw marked-up text.
pub fn normalize(raw: &str) -> String {
    PASSES
        .iter()
        .fold(raw.to_string(), |text, pass| (pass.apply)(&text))
}

/// Reduce a single line (a heading, a title) to plain text.
///
/// Skips the block-level passes so a lone line is never mistaken for a code
/// fence or declaration.
pub fn plain_text_line(line: &str) -> String {
    let text = unicode_nfc(line);
    let text = strip_inline_code(&text);
    let text = strip_tags(&text);
    let text = strip_template_braces(&text);
    let text = strip_images(&text);
    let text = strip_links(&text);
    let text = strip_emphasis_and_headings(&text);
    collapse_whitespace(&text).replace('\n', " ")
}

/// Whitespace-delimited word count.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Truncate to at most `max_chars` characters, appending `...` when cut.
/// Prefers the last word boundary inside the window.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let window: String = text.chars().take(keep).collect();
    let cut = match window.rfind(char::is_whitespace) {
        Some(idx) if idx > keep / 2 => &window[..idx],
        _ => window.as_str(),
    };
    format!("{}...", cut.trim_end())
}

// -------------------------------------------------------------------------
// Passes
// -------------------------------------------------------------------------

pub fn unicode_nfc(text: &str) -> String {
    text.nfc().collect()
}

pub fn strip_front_matter(text: &str) -> String {
    FRONT_MATTER_RE.replace(text, "").into_owned()
}

/// Drop fenced code blocks. An unclosed fence swallows the rest of the text.
pub fn strip_fenced_code(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut open_fence: Option<&str> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        let marker = if trimmed.starts_with("```") {
            Some("```")
        } else if trimmed.starts_with("~~~") {
            Some("~~~")
        } else {
            None
        };

        match (open_fence, marker) {
            (None, Some(m)) => open_fence = Some(m),
            (Some(open), Some(m)) if open == m => open_fence = None,
            (Some(_), _) => {}
            (None, None) => {
                result.push_str(line);
                result.push('\n');
            }
        }
    }

    result
}

pub fn strip_inline_code(text: &str) -> String {
    INLINE_CODE_RE.replace_all(text, "").into_owned()
}

pub fn strip_html_comments(text: &str) -> String {
    HTML_COMMENT_RE.replace_all(text, "").into_owned()
}

pub fn strip_tags(text: &str) -> String {
    TAG_RE.replace_all(text, "").into_owned()
}

/// Remove `{expr}` and `{{expr}}`, innermost first, until nothing changes.
pub fn strip_template_braces(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..8 {
        let next = TEMPLATE_RE.replace_all(&current, "").into_owned();
        if next == current {
            break;
        }
        current = next;
    }
    current
}

pub fn strip_import_lines(text: &str) -> String {
    IMPORT_RE.replace_all(text, "").into_owned()
}

pub fn strip_comments(text: &str) -> String {
    let without_blocks = BLOCK_COMMENT_RE.replace_all(text, "");
    LINE_COMMENT_RE.replace_all(&without_blocks, "").into_owned()
}

pub fn strip_images(text: &str) -> String {
    IMAGE_RE.replace_all(text, "").into_owned()
}

/// `[text](url)` becomes `text`. Balanced parentheses inside the url are
/// consumed; a bracket pair without a url is left alone.
pub fn strip_links(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '[' {
            result.push(c);
            continue;
        }

        let mut link_text = String::new();
        let mut found_close = false;
        for inner in chars.by_ref() {
            if inner == ']' {
                found_close = true;
                break;
            }
            link_text.push(inner);
        }

        if found_close && chars.peek() == Some(&'(') {
            chars.next();
            let mut depth = 1;
            for inner in chars.by_ref() {
                match inner {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
            }
            result.push_str(&link_text);
        } else {
            result.push('[');
            result.push_str(&link_text);
            if found_close {
                result.push(']');
            }
        }
    }

    result
}

pub fn strip_emphasis_and_headings(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for line in text.lines() {
        if RULE_RE.is_match(line) {
            result.push('\n');
            continue;
        }
        let line = HEADING_RE.replace(line, "");
        let line = strip_blockquote(&line);
        let line = strip_list_marker(line);
        let line = line.replace("**", "").replace("__", "").replace("~~", "");
        let line = STAR_EMPHASIS_RE.replace_all(&line, "$1");
        let line = UNDERSCORE_EMPHASIS_RE.replace_all(&line, "${1}${2}${3}");
        result.push_str(&line);
        result.push('\n');
    }

    result
}

/// Trim indentation, collapse space runs, keep at most one blank line
/// between paragraphs.
pub fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut blank_run = 0usize;

    for line in text.lines() {
        let collapsed = SPACE_RUN_RE.replace_all(line.trim(), " ");
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !result.is_empty() {
            result.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        result.push_str(&collapsed);
        blank_run = 0;
    }

    result
}

fn strip_blockquote(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('>') {
        trimmed.trim_start_matches('>').trim_start()
    } else {
        line
    }
}

/// Strip `- `, `+ `, `* ` and `12. ` list markers. Leading digits that are
/// not a marker (`3.14159`) stay intact.
fn strip_list_marker(line: &str) -> &str {
    let trimmed = line.trim_start();

    for marker in ["- ", "+ ", "* "] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return rest;
        }
    }

    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0
        && let Some(rest) = trimmed[digits..].strip_prefix(". ")
    {
        return rest;
    }

    line
}
