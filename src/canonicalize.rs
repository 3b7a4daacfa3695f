//! Text canonicalization shared by the lexical tokenizer and both embedders.
//!
//! Canonicalization is the single source of truth both scorers read from:
//! the same visual text must always reduce to the same canonical string, or
//! the fused ranking stops being deterministic. Pipeline, applied in order:
//!
//! 1. Unicode NFC normalization
//! 2. ATX/Setext heading markers stripped (inner text kept)
//! 3. Bold/italic/strikethrough markers stripped (content kept)
//! 4. Fenced or indented code blocks collapsed to a single sentinel token
//! 5. Contiguous runs of >= 3 import-like lines dropped
//! 6. Whitespace collapsed to single spaces, ends trimmed
//!
//! The function is idempotent: `canonicalize(canonicalize(s)) == canonicalize(s)`.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Sentinel that replaces any fenced or indented code block.
pub const CODE_SENTINEL: &str = "\u{27ea}code\u{27eb}";

static SETEXT_UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(=+|-+)\s*$").unwrap());
static ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*?)\s*#*\s*$").unwrap());
static IMPORT_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(import\s+\S|from\s+\S+\s+import\s|#include\s*[<\x22]|use\s+[A-Za-z_][\w:]*(::\{.*\})?\s*;?\s*)$",
    )
    .unwrap()
});

/// Canonicalize a query or document string into the form fed to the
/// tokenizer and both embedders.
pub fn canonicalize(text: &str) -> String {
    let normalized: String = text.nfc().collect();
    let code_collapsed = collapse_code_blocks(&normalized);
    let lines: Vec<String> = code_collapsed
        .lines()
        .map(strip_heading_and_emphasis)
        .collect();
    let import_filtered = drop_import_runs(lines);
    let joined = import_filtered.join("\n");
    collapse_whitespace(&joined)
}

/// Replace fenced (``` or ~~~) and indented (>= 4 space) code blocks with
/// [`CODE_SENTINEL`]. Operates before heading/emphasis stripping so fence
/// markers and indentation are never mistaken for markdown elsewhere.
fn collapse_code_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.lines().peekable();
    let mut in_fence = false;
    let mut fence_char = ' ';
    let mut fence_len = 0usize;
    let mut in_indented = false;

    while let Some(line) = lines.next() {
        let trimmed_start = line.trim_start();
        let indent = line.len() - trimmed_start.len();

        if in_fence {
            let closes = trimmed_start.chars().next() == Some(fence_char)
                && trimmed_start.chars().take_while(|&c| c == fence_char).count() >= fence_len
                && trimmed_start
                    .trim_start_matches(fence_char)
                    .trim()
                    .is_empty();
            if closes {
                in_fence = false;
                out.push_str(CODE_SENTINEL);
                out.push('\n');
            }
            continue;
        }

        if let Some(marker) = fence_marker(trimmed_start) {
            in_fence = true;
            fence_char = marker.0;
            fence_len = marker.1;
            continue;
        }

        if indent >= 4 && !trimmed_start.is_empty() {
            in_indented = true;
            continue;
        }
        if in_indented {
            in_indented = false;
            out.push_str(CODE_SENTINEL);
            out.push('\n');
        }

        out.push_str(line);
        out.push('\n');
    }

    if in_fence || in_indented {
        out.push_str(CODE_SENTINEL);
        out.push('\n');
    }

    out
}

/// Detect a fence opener (` ``` ` or `~~~`, at least 3 repeats); returns the
/// fence character and its run length.
fn fence_marker(trimmed: &str) -> Option<(char, usize)> {
    for marker in ['`', '~'] {
        let run = trimmed.chars().take_while(|&c| c == marker).count();
        if run >= 3 {
            return Some((marker, run));
        }
    }
    None
}

/// Strip ATX/Setext heading markers and bold/italic/strikethrough markers
/// from a single line, keeping their inner text.
fn strip_heading_and_emphasis(line: &str) -> String {
    if SETEXT_UNDERLINE.is_match(line) {
        return String::new();
    }
    let de_headed = if let Some(caps) = ATX_HEADING.captures(line) {
        caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()
    } else {
        line.to_string()
    };
    strip_emphasis(&de_headed)
}

/// Remove `**bold**`, `__bold__`, `*italic*`, `_italic_`, and `~~strike~~`
/// markers while keeping their content. A lone underscore becomes a space
/// rather than vanishing, since it's as often part of an identifier
/// (`user_id`) as it is an emphasis marker, and deleting it outright would
/// fuse the identifier's pieces together.
fn strip_emphasis(line: &str) -> String {
    line.replace("***", "")
        .replace("~~", "")
        .replace("**", "")
        .replace("__", "")
        .replace('*', "")
        .replace('_', " ")
}

/// Drop any contiguous run of >= 3 lines that each look like an import
/// declaration (`import …`, `from … import …`, `#include …`, `use …`).
fn drop_import_runs(lines: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(lines.len());
    let mut run_start = 0usize;
    let mut i = 0usize;
    while i <= lines.len() {
        let is_import = i < lines.len() && IMPORT_LIKE.is_match(&lines[i]);
        if is_import {
            i += 1;
            continue;
        }
        if i - run_start >= 3 {
            // drop lines[run_start..i]
        } else {
            out.extend_from_slice(&lines[run_start..i]);
        }
        if i < lines.len() {
            out.push(lines[i].clone());
        }
        i += 1;
        run_start = i;
    }
    out
}

/// Collapse all whitespace runs (including newlines) to single spaces and
/// trim the ends.
fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev_ws = true;
    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_ws {
                result.push(' ');
                prev_ws = true;
            }
        } else {
            result.push(c);
            prev_ws = false;
        }
    }
    result.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nfc_normalizes() {
        let composed = "caf\u{00e9}";
        let decomposed = "cafe\u{0301}";
        assert_eq!(canonicalize(composed), canonicalize(decomposed));
    }

    #[test]
    fn atx_heading_stripped() {
        let out = canonicalize("# Title\n\nBody text");
        assert!(!out.contains('#'));
        assert!(out.contains("Title"));
        assert!(out.contains("Body text"));
    }

    #[test]
    fn setext_heading_stripped() {
        let out = canonicalize("Title\n=====\n\nBody");
        assert!(!out.contains('='));
        assert!(out.contains("Title"));
    }

    #[test]
    fn emphasis_stripped() {
        let out = canonicalize("**bold** and *italic* and ~~gone~~");
        assert!(!out.contains('*'));
        assert!(!out.contains('~'));
        assert!(out.contains("bold"));
        assert!(out.contains("italic"));
    }

    #[test]
    fn underscores_in_identifiers_are_not_deleted() {
        let out = canonicalize("call parse_json on the user_id field");
        assert!(!out.contains("parsejson"));
        assert!(!out.contains("userid"));
        assert!(out.contains("parse json"));
        assert!(out.contains("user id"));
    }

    #[test]
    fn fenced_code_collapsed() {
        let out = canonicalize("before\n```rust\nfn main() {}\n```\nafter");
        assert!(out.contains(CODE_SENTINEL));
        assert!(!out.contains("fn main"));
        assert!(out.contains("before"));
        assert!(out.contains("after"));
    }

    #[test]
    fn indented_code_collapsed() {
        let out = canonicalize("before\n\n    fn main() {}\n    let x = 1;\n\nafter");
        assert!(out.contains(CODE_SENTINEL));
        assert!(!out.contains("fn main"));
    }

    #[test]
    fn import_run_dropped_at_three() {
        let out = canonicalize("import os\nimport sys\nimport re\nreal content here");
        assert!(!out.contains("import"));
        assert!(out.contains("real content here"));
    }

    #[test]
    fn import_run_kept_below_three() {
        let out = canonicalize("import os\nimport sys\nreal content here");
        assert!(out.contains("import os"));
        assert!(out.contains("import sys"));
    }

    #[test]
    fn use_and_include_runs_dropped() {
        let out = canonicalize("use std::io;\nuse std::fs;\nuse std::env;\nactual code");
        assert!(!out.contains("use std"));
        let out2 = canonicalize("#include <a>\n#include <b>\n#include <c>\nint main(){}");
        assert!(!out2.contains("#include"));
    }

    #[test]
    fn whitespace_collapsed_and_trimmed() {
        let out = canonicalize("  hello    world  \n\n  again  ");
        assert_eq!(out, "hello world again");
    }

    #[test]
    fn idempotent_on_fixtures() {
        let fixtures = [
            "",
            "plain text",
            "# Heading\n**bold** text",
            "```py\nimport os\n```",
            "import a\nimport b\nimport c\nimport d\nkeep me",
            "Title\n-----\nBody *text* here",
        ];
        for s in fixtures {
            let once = canonicalize(s);
            let twice = canonicalize(&once);
            assert_eq!(once, twice, "not idempotent for input {s:?}");
        }
    }
}
