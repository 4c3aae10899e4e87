//! Obsidian-style callouts.
//!
//! A blockquote whose first line is `[!kind]` (optionally followed by a fold
//! marker and a title) becomes a styled box:
//!
//! ```text
//! > [!warning] Check this
//! > Body text, **Markdown** allowed.
//! ```
//!
//! Python-Markdown admonitions map onto the same boxes:
//!
//! ```text
//! !!! tip "Optional title"
//!     Indented body.
//! ```
//!
//! Callouts are recognised on the source lines before the Markdown parser
//! runs and rewritten into an HTML `<div>` wrapper whose body stays Markdown,
//! so the parser still handles everything inside (nested callouts included).
//! A callout indented under a list item keeps that indentation, so it stays
//! inside the item.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::escape_html;

/// Style class of a callout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalloutKind {
    Note,
    Info,
    Todo,
    Tip,
    Success,
    Question,
    Warning,
    Failure,
    Danger,
    Bug,
    Example,
    Quote,
    Abstract,
}

impl CalloutKind {
    /// Map a declared kind (any case, aliases allowed) to its style.
    ///
    /// Unknown kinds render as [`CalloutKind::Note`].
    pub fn from_declared(declared: &str) -> Self {
        match declared.to_ascii_lowercase().as_str() {
            "info" => Self::Info,
            "todo" => Self::Todo,
            "tip" | "hint" | "important" => Self::Tip,
            "success" | "check" | "done" => Self::Success,
            "question" | "help" | "faq" => Self::Question,
            "warning" | "caution" | "attention" => Self::Warning,
            "failure" | "fail" | "missing" => Self::Failure,
            "danger" | "error" => Self::Danger,
            "bug" => Self::Bug,
            "example" => Self::Example,
            "quote" | "cite" => Self::Quote,
            "abstract" | "summary" | "tldr" => Self::Abstract,
            _ => Self::Note,
        }
    }

    pub fn as_class(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Info => "info",
            Self::Todo => "todo",
            Self::Tip => "tip",
            Self::Success => "success",
            Self::Question => "question",
            Self::Warning => "warning",
            Self::Failure => "failure",
            Self::Danger => "danger",
            Self::Bug => "bug",
            Self::Example => "example",
            Self::Quote => "quote",
            Self::Abstract => "abstract",
        }
    }
}

/// One recognised callout, with its quote markers removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalloutBlock {
    pub kind: CalloutKind,
    /// Kind as written, lowercased (`"caution"` for `[!CAUTION]`).
    pub declared_kind: String,
    /// Title text after the kind, if any.
    pub title: Option<String>,
    /// Body Markdown, one level of `>` stripped.
    pub body: String,
}

impl CalloutBlock {
    /// Explicit title, or the declared kind capitalised.
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let mut chars = self.declared_kind.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    fn to_html(&self) -> String {
        let class = self.kind.as_class();
        let body = expand_callouts(&self.body);
        format!(
            "<div class=\"callout callout-{class}\" data-callout=\"{class}\">\n\
<p class=\"callout-title\">{}</p>\n\n{}\n\n</div>\n",
            escape_html(&self.display_title()),
            body.trim_end_matches('\n'),
        )
    }
}

// ── Line patterns ────────────────────────────────────────────────────────

static QUOTE_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}>[ \t]?").unwrap());

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[!([A-Za-z][\w-]*)\]([+-])?[ \t]*(.*)$").unwrap());

static ADMONITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^!!![ \t]+([A-Za-z][\w-]*)(?:[ \t]+[A-Za-z][\w-]*)*(?:[ \t]+"([^"]*)")?[ \t]*$"#).unwrap()
});

static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})").unwrap());

/// Lines that end a blockquote's lazy continuation.
static INTERRUPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^ {0,3}(?:#{1,6}(?:[ \t]|$)|`{3,}|~{3,}|[-+*][ \t]|(?:-[ \t]*){3,}$|(?:\*[ \t]*){3,}$|(?:_[ \t]*){3,}$)",
    )
    .unwrap()
});

fn strip_quote_marker(line: &str) -> Option<&str> {
    QUOTE_MARKER.find(line).map(|m| &line[m.end()..])
}

/// Opening fence character and run length.
fn fence_open(line: &str) -> Option<(char, usize)> {
    let run = FENCE.captures(line)?.get(1)?.as_str();
    let ch = run.chars().next()?;
    Some((ch, run.len()))
}

fn fence_closes(line: &str, (ch, len): (char, usize)) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let run = trimmed.chars().take_while(|&c| c == ch).count();
    run >= len && trimmed[run..].trim().is_empty()
}

fn track_fence(state: &mut Option<(char, usize)>, line: &str) {
    match *state {
        Some(open) if fence_closes(line, open) => *state = None,
        Some(_) => {}
        None => *state = fence_open(line),
    }
}

/// Join body lines, closing a fence left open at the end of the block.
///
/// Inside a blockquote an open fence ends with the quote; once the body is
/// lifted out of the quote it would otherwise run to the end of the file.
fn finish_body(lines: &[&str]) -> String {
    let mut fence = None;
    for line in lines {
        track_fence(&mut fence, line);
    }
    let mut body = lines.join("\n");
    if let Some((ch, len)) = fence {
        body.push('\n');
        body.extend(std::iter::repeat(ch).take(len));
    }
    body
}

fn leading_spaces(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

// ── Scanner ──────────────────────────────────────────────────────────────

enum Piece<'a> {
    Line(&'a str),
    Callout { block: CalloutBlock, indent: usize },
}

/// `!!! kind "title"` plus its indented body, ending at the first
/// non-blank line indented less than four spaces.
fn scan_admonition<'a>(lines: &[&'a str], start: usize, caps: &regex::Captures<'_>) -> (CalloutBlock, usize) {
    let declared_kind = caps[1].to_ascii_lowercase();
    let title = caps
        .get(2)
        .map(|t| t.as_str().trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut body: Vec<&'a str> = Vec::new();
    let mut end = start + 1;
    let mut j = start + 1;
    while j < lines.len() {
        let next = lines[j];
        if let Some(content) = next.strip_prefix("    ").or_else(|| next.strip_prefix('\t')) {
            body.push(content);
            j += 1;
            end = j;
        } else if next.trim().is_empty() {
            body.push("");
            j += 1;
        } else {
            break;
        }
    }
    // trailing blank lines belong to the surrounding document
    body.truncate(end - (start + 1));

    let block = CalloutBlock {
        kind: CalloutKind::from_declared(&declared_kind),
        declared_kind,
        title,
        body: finish_body(&body),
    };
    (block, end)
}

fn scan(text: &str) -> Vec<Piece<'_>> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut pieces = Vec::with_capacity(lines.len());
    let mut fence: Option<(char, usize)> = None;
    let mut in_quote = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];

        if let Some(open) = fence {
            if fence_closes(line, open) {
                fence = None;
            }
            pieces.push(Piece::Line(line));
            i += 1;
            continue;
        }
        if let Some(open) = fence_open(line) {
            fence = Some(open);
            in_quote = false;
            pieces.push(Piece::Line(line));
            i += 1;
            continue;
        }

        if !in_quote {
            if let Some(caps) = ADMONITION.captures(line) {
                let (block, next) = scan_admonition(&lines, i, &caps);
                pieces.push(Piece::Callout { block, indent: 0 });
                i = next;
                continue;
            }
        }

        let quoted = strip_quote_marker(line);
        let header = if in_quote {
            None
        } else {
            quoted.and_then(|content| HEADER.captures(content))
        };

        let Some(caps) = header else {
            in_quote = match quoted {
                Some(_) => true,
                None => in_quote && !line.trim().is_empty() && !INTERRUPT.is_match(line),
            };
            pieces.push(Piece::Line(line));
            i += 1;
            continue;
        };

        let declared_kind = caps[1].to_ascii_lowercase();
        let title = Some(caps[3].trim())
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        let mut body: Vec<&str> = Vec::new();
        let mut body_fence = None;
        let mut j = i + 1;
        while j < lines.len() {
            let next = lines[j];
            if let Some(content) = strip_quote_marker(next) {
                track_fence(&mut body_fence, content);
                body.push(content);
            } else if body_fence.is_some() || next.trim().is_empty() || INTERRUPT.is_match(next) {
                // no lazy continuation inside fenced code
                break;
            } else if body.last().is_some_and(|b| b.trim().is_empty()) {
                // a lazy line cannot follow a blank `>` line
                break;
            } else {
                body.push(next);
            }
            j += 1;
        }

        pieces.push(Piece::Callout {
            block: CalloutBlock {
                kind: CalloutKind::from_declared(&declared_kind),
                declared_kind,
                title,
                body: finish_body(&body),
            },
            indent: leading_spaces(line),
        });
        in_quote = false;
        i = j;
    }

    pieces
}

/// Top-level callouts in `text`, in document order.
///
/// Nested callouts stay inside their parent's `body`.
pub fn find_callouts(text: &str) -> Vec<CalloutBlock> {
    scan(text)
        .into_iter()
        .filter_map(|p| match p {
            Piece::Callout { block, .. } => Some(block),
            Piece::Line(_) => None,
        })
        .collect()
}

/// Rewrite every callout in `text` as an HTML wrapper around Markdown.
///
/// Text without callouts is returned unchanged.
pub fn expand_callouts(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 128);
    let mut first = true;
    for piece in scan(text) {
        match piece {
            Piece::Line(line) => {
                if !first {
                    out.push('\n');
                }
                out.push_str(line);
            }
            Piece::Callout { block, indent } => {
                if !first {
                    out.push('\n');
                    if !out.ends_with("\n\n") {
                        out.push('\n');
                    }
                }
                let prefix = " ".repeat(indent);
                for (n, line) in block.to_html().trim_end_matches('\n').split('\n').enumerate() {
                    if n > 0 {
                        out.push('\n');
                    }
                    if !line.is_empty() {
                        out.push_str(&prefix);
                    }
                    out.push_str(line);
                }
                out.push('\n');
            }
        }
        first = false;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_with_title_and_lazy_body() {
        let blocks = find_callouts("> [!warning] Title\nBody");
        assert_eq!(blocks.len(), 1);
        let b = &blocks[0];
        assert_eq!(b.kind, CalloutKind::Warning);
        assert_eq!(b.title.as_deref(), Some("Title"));
        assert_eq!(b.body, "Body");
    }

    #[test]
    fn unknown_kind_falls_back_to_note() {
        let blocks = find_callouts("> [!bogus] x");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, CalloutKind::Note);
        assert_eq!(blocks[0].declared_kind, "bogus");
    }

    #[test]
    fn aliases_and_case_are_normalised() {
        assert_eq!(CalloutKind::from_declared("CAUTION"), CalloutKind::Warning);
        assert_eq!(CalloutKind::from_declared("tldr"), CalloutKind::Abstract);
        assert_eq!(CalloutKind::from_declared("Error"), CalloutKind::Danger);
        assert_eq!(CalloutKind::from_declared("hint"), CalloutKind::Tip);
    }

    #[test]
    fn default_title_is_capitalised_kind() {
        let blocks = find_callouts("> [!TIP]\n> do this");
        assert_eq!(blocks[0].title, None);
        assert_eq!(blocks[0].display_title(), "Tip");
    }

    #[test]
    fn fold_marker_is_accepted() {
        let blocks = find_callouts("> [!faq]- Why?\n> Because.");
        assert_eq!(blocks[0].kind, CalloutKind::Question);
        assert_eq!(blocks[0].title.as_deref(), Some("Why?"));
    }

    #[test]
    fn plain_blockquote_is_untouched() {
        let text = "> just a quote\n> [!note] not a header";
        assert!(find_callouts(text).is_empty());
        assert_eq!(expand_callouts(text), text);
    }

    #[test]
    fn callout_inside_fence_is_ignored() {
        let text = "```md\n> [!note] sample\n```\n";
        assert!(find_callouts(text).is_empty());
        assert_eq!(expand_callouts(text), text);
    }

    #[test]
    fn blank_line_ends_the_callout() {
        let text = "> [!info] A\n> one\n\nafter";
        let blocks = find_callouts(text);
        assert_eq!(blocks[0].body, "one");
        assert!(expand_callouts(text).ends_with("\nafter"));
    }

    #[test]
    fn heading_interrupts_lazy_continuation() {
        let blocks = find_callouts("> [!note]\n> a\n# Heading");
        assert_eq!(blocks[0].body, "a");
    }

    #[test]
    fn nested_callouts_expand_recursively() {
        let html = expand_callouts("> [!note] Outer\n> > [!tip] Inner\n> > deep");
        assert_eq!(html.matches("class=\"callout ").count(), 2);
        assert!(html.contains("callout-tip"));
        assert!(html.contains("deep"));
    }

    #[test]
    fn expansion_wraps_body_in_div() {
        let html = expand_callouts("intro\n\n> [!danger] <Stop>\n> Body **bold**\n");
        assert!(html.starts_with("intro\n\n<div class=\"callout callout-danger\" data-callout=\"danger\">"));
        assert!(html.contains("<p class=\"callout-title\">&lt;Stop&gt;</p>"));
        assert!(html.contains("\n\nBody **bold**\n\n</div>"));
    }

    #[test]
    fn unclosed_fence_is_closed_at_callout_end() {
        let blocks = find_callouts("> [!note] N\n> ```\n> code\n\n# After");
        assert_eq!(blocks[0].body, "```\ncode\n```");

        let blocks = find_callouts("> [!note]\n> ~~~~py\n> x = 1\nlazy?");
        assert_eq!(blocks[0].body, "~~~~py\nx = 1\n~~~~", "no lazy line inside code");
    }

    #[test]
    fn closed_fence_is_left_alone() {
        let blocks = find_callouts("> [!tip]\n> ```\n> a\n> ```\n> after");
        assert_eq!(blocks[0].body, "```\na\n```\nafter");
    }

    #[test]
    fn callout_in_list_item_keeps_indentation() {
        let html = expand_callouts("- item one\n  > [!tip] T\n  > inside\n- item two\n");
        assert!(html.contains("\n  <div class=\"callout callout-tip\""), "{html}");
        assert!(html.contains("\n  inside\n"), "{html}");
        assert!(html.contains("\n  </div>\n"), "{html}");
        assert!(html.contains("\n- item two"));
    }

    #[test]
    fn admonition_maps_to_callout() {
        let text = "intro\n\n!!! warning \"Mind the gap\"\n    Body line\n\n    second para\n\nafter\n";
        let blocks = find_callouts(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind, CalloutKind::Warning);
        assert_eq!(blocks[0].title.as_deref(), Some("Mind the gap"));
        assert_eq!(blocks[0].body, "Body line\n\nsecond para");

        let html = expand_callouts(text);
        assert!(html.contains("<p class=\"callout-title\">Mind the gap</p>"));
        assert!(html.ends_with("</div>\n\nafter\n"), "{html}");
    }

    #[test]
    fn admonition_without_title_uses_kind() {
        let blocks = find_callouts("!!! note\n    text");
        assert_eq!(blocks[0].display_title(), "Note");
        assert!(find_callouts("    !!! note\n").is_empty());
    }
}
