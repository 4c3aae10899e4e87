//! Markdown → themed HTML document.
//!
//! ## Steps
//!
//! 1. Normalise line endings and drop a leading BOM.
//! 2. Rewrite callouts into HTML wrappers ([`super::callout`]).
//! 3. Parse with comrak (CommonMark + GFM extensions, front matter stripped).
//! 4. Replace every code block node with pre-highlighted HTML
//!    ([`super::highlight`]).
//! 5. Wrap `==text==` in `<mark>` and replace a `[TOC]` paragraph with a
//!    table of contents linking to the heading anchors.
//! 6. Render the tree and wrap it in a document carrying the theme style
//!    sheet, the font override and an optional title heading.
//!
//! The transform is pure: same input, same output.

use std::cell::RefCell;
use std::path::PathBuf;

use comrak::arena_tree::Node;
use comrak::nodes::{Ast, AstNode, NodeHtmlBlock, NodeValue};
use comrak::{format_html, parse_document, Anchorizer, Arena, Options};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{callout, escape_html, highlight};
use crate::config::FontConfig;
use crate::error::TransformError;
use crate::theme::Theme;

/// Per-document inputs that are not part of the theme.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Shown as `<title>` and, when `Some`, as `<h1 class="doc-title">`.
    pub title: Option<String>,
    /// Directory that relative links and images resolve against.
    pub base_url: Option<PathBuf>,
}

/// The transformer's output, ready for a rendering engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredMarkup {
    pub title: Option<String>,
    /// Rendered body only, without the document wrapper.
    pub body_html: String,
    /// Complete HTML document.
    pub html: String,
    pub base_url: Option<PathBuf>,
}

/// Parser settings mirroring what Obsidian-flavoured notes expect.
fn configure(options: &mut Options) {
    options.extension.table = true;
    options.extension.strikethrough = true;
    options.extension.tasklist = true;
    options.extension.autolink = true;
    options.extension.footnotes = true;
    options.extension.description_lists = true;
    options.extension.superscript = true;
    options.extension.header_ids = Some(String::new());
    options.extension.front_matter_delimiter = Some("---".to_string());
    options.extension.shortcodes = true;
    options.parse.smart = true;
    options.render.hardbreaks = true;
    options.render.unsafe_ = true;
}

/// Line endings to LF, leading BOM removed.
pub fn normalize_source(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Render Markdown to an HTML fragment (no document wrapper, no styles).
pub fn render_body(source_text: &str) -> Result<String, TransformError> {
    let text = callout::expand_callouts(&normalize_source(source_text));

    let mut options = Options::default();
    configure(&mut options);

    let arena = Arena::new();
    let root = parse_document(&arena, &text, &options);

    let mut code_blocks = 0usize;
    for node in root.descendants() {
        let mut data = node.data.borrow_mut();
        let NodeValue::CodeBlock(ref block) = data.value else {
            continue;
        };
        let lang = Some(block.info.as_str()).filter(|info| !info.trim().is_empty());
        let literal = highlight::highlight_block(&block.literal, lang)?;
        data.value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 0,
            literal,
        });
        code_blocks += 1;
    }

    let marks = apply_marks(&arena, root);
    let toc = insert_toc(root);
    if marks > 0 || toc {
        debug!("Marked {} spans, table of contents: {}", marks, toc);
    }

    let mut out = Vec::with_capacity(text.len() * 2);
    format_html(root, &options, &mut out)
        .map_err(|e| TransformError::new(format!("HTML rendering failed: {e}")))?;
    debug!("Rendered {} bytes of HTML ({} code blocks)", out.len(), code_blocks);

    String::from_utf8(out).map_err(|e| TransformError::new(format!("output is not UTF-8: {e}")))
}

// ── Inline marks and table of contents ──────────────────────────────────

static MARK: Lazy<Regex> = Lazy::new(|| Regex::new(r"==([^\s=](?:[^=]*[^\s=])?)==").unwrap());

fn new_node<'a>(arena: &'a Arena<AstNode<'a>>, like: &AstNode<'a>, value: NodeValue) -> &'a AstNode<'a> {
    let start = like.data.borrow().sourcepos.start;
    arena.alloc(Node::new(RefCell::new(Ast::new(value, start))))
}

/// Split text nodes around `==text==` into text and `<mark>` tags.
///
/// Marked text stays a text node so heading anchors still see it. Code
/// spans are separate nodes and never touched.
fn apply_marks<'a>(arena: &'a Arena<AstNode<'a>>, root: &'a AstNode<'a>) -> usize {
    let candidates: Vec<_> = root
        .descendants()
        .filter(|n| matches!(n.data.borrow().value, NodeValue::Text(ref t) if t.contains("==")))
        .collect();

    let mut marked = 0;
    for node in candidates {
        let literal = match node.data.borrow().value {
            NodeValue::Text(ref t) => t.clone(),
            _ => continue,
        };
        let mut last = 0;
        for caps in MARK.captures_iter(&literal) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            if whole.start() > last {
                let before = NodeValue::Text(literal[last..whole.start()].to_string());
                node.insert_before(new_node(arena, node, before));
            }
            node.insert_before(new_node(arena, node, NodeValue::HtmlInline("<mark>".into())));
            node.insert_before(new_node(arena, node, NodeValue::Text(inner.as_str().to_string())));
            node.insert_before(new_node(arena, node, NodeValue::HtmlInline("</mark>".into())));
            last = whole.end();
            marked += 1;
        }
        if last == 0 {
            continue;
        }
        if last == literal.len() {
            node.detach();
        } else {
            node.data.borrow_mut().value = NodeValue::Text(literal[last..].to_string());
        }
    }
    marked
}

/// Plain text of a node, the way heading anchors are derived.
fn collect_text<'a>(node: &'a AstNode<'a>, out: &mut String) {
    match node.data.borrow().value {
        NodeValue::Text(ref t) => out.push_str(t),
        NodeValue::Code(ref c) => out.push_str(&c.literal),
        NodeValue::LineBreak | NodeValue::SoftBreak => out.push(' '),
        _ => {
            for child in node.children() {
                collect_text(child, out);
            }
        }
    }
}

fn is_toc_marker<'a>(node: &'a AstNode<'a>) -> bool {
    if !matches!(node.data.borrow().value, NodeValue::Paragraph) {
        return false;
    }
    if !node.children().all(|c| matches!(c.data.borrow().value, NodeValue::Text(_))) {
        return false;
    }
    let mut text = String::new();
    collect_text(node, &mut text);
    text.trim() == "[TOC]"
}

/// Replace every `[TOC]` paragraph with links to the document's headings.
///
/// Anchors are computed in document order with the same rules the HTML
/// renderer uses for heading ids, so the links resolve.
fn insert_toc<'a>(root: &'a AstNode<'a>) -> bool {
    let markers: Vec<_> = root.descendants().filter(|n| is_toc_marker(n)).collect();
    if markers.is_empty() {
        return false;
    }

    let mut anchorizer = Anchorizer::new();
    let mut items = String::new();
    for node in root.descendants() {
        let level = match node.data.borrow().value {
            NodeValue::Heading(ref h) => h.level,
            _ => continue,
        };
        let mut text = String::new();
        collect_text(node, &mut text);
        let id = anchorizer.anchorize(text.clone());
        items.push_str(&format!(
            "<li class=\"toc-h{level}\"><a href=\"#{}\">{}</a></li>\n",
            escape_html(&id),
            escape_html(&text)
        ));
    }

    let literal = format!("<nav class=\"toc\">\n<ul>\n{items}</ul>\n</nav>\n");
    for marker in markers {
        marker.data.borrow_mut().value = NodeValue::HtmlBlock(NodeHtmlBlock {
            block_type: 6,
            literal: literal.clone(),
        });
        let children: Vec<_> = marker.children().collect();
        for child in children {
            child.detach();
        }
    }
    true
}

/// Convert Markdown into a complete, styled HTML document.
pub fn transform(
    source_text: &str,
    theme: &Theme,
    font: &FontConfig,
    options: &TransformOptions,
) -> Result<StructuredMarkup, TransformError> {
    let body_html = render_body(source_text)?;
    let html = assemble_document(&body_html, theme, font, options.title.as_deref());

    Ok(StructuredMarkup {
        title: options.title.clone(),
        body_html,
        html,
        base_url: options.base_url.clone(),
    })
}

fn assemble_document(body_html: &str, theme: &Theme, font: &FontConfig, title: Option<&str>) -> String {
    let title_text = escape_html(title.unwrap_or_default());
    let heading = match title {
        Some(_) => format!("<h1 class=\"doc-title\">{title_text}</h1>\n"),
        None => String::new(),
    };

    format!(
        "<!DOCTYPE html>\n\
<html lang=\"en\">\n\
<head>\n\
<meta charset=\"utf-8\">\n\
<title>{title_text}</title>\n\
<style>\n{style}\n{font_css}</style>\n\
</head>\n\
<body class=\"theme-{id}\">\n\
{heading}{body_html}</body>\n\
</html>\n",
        style = theme.style_sheet,
        font_css = font.to_css(),
        id = theme.id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme::get_theme;

    fn markup(src: &str, title: Option<&str>) -> StructuredMarkup {
        let theme = get_theme("light").unwrap();
        let options = TransformOptions {
            title: title.map(str::to_string),
            base_url: None,
        };
        transform(src, &theme, &FontConfig::default(), &options).unwrap()
    }

    #[test]
    fn plain_text_survives_with_only_tags_added() {
        let src = "First paragraph here\n\nSecond one with words";
        let m = markup(src, None);
        assert!(m.body_html.contains("First paragraph here"));
        assert!(m.body_html.contains("Second one with words"));
        assert_eq!(m.body_html.matches("<p>").count(), 2);
    }

    #[test]
    fn document_carries_theme_font_and_title() {
        let m = markup("# Heading\n", Some("notes & todo"));
        assert!(m.html.contains("md2pdf-theme: light"));
        assert!(m.html.contains("font-size: 11pt"));
        assert!(m.html.contains("<h1 class=\"doc-title\">notes &amp; todo</h1>"));
        assert!(m.html.contains("<title>notes &amp; todo</title>"));
        assert!(m.html.contains("id=\"heading\""));
    }

    #[test]
    fn no_title_heading_when_disabled() {
        let m = markup("text\n", None);
        assert!(!m.html.contains("doc-title\">"));
    }

    #[test]
    fn fenced_code_is_highlighted() {
        let m = markup("```rust\nlet x = 1;\n```\n", None);
        assert!(m.body_html.contains("<pre class=\"code-block\" data-lang=\"rust\">"));
        assert!(m.body_html.contains("hl-"));
        assert!(!m.body_html.contains("language-rust"));
    }

    #[test]
    fn indented_code_is_plain_text() {
        let m = markup("para\n\n    indented <code>\n", None);
        assert!(m.body_html.contains("data-lang=\"text\""));
        assert!(m.body_html.contains("indented &lt;code&gt;"));
    }

    #[test]
    fn callout_renders_inside_div_with_markdown_body() {
        let m = markup("> [!warning] Careful\n> **bold** body\n", None);
        assert!(m.body_html.contains("<div class=\"callout callout-warning\" data-callout=\"warning\">"));
        assert!(m.body_html.contains("<p class=\"callout-title\">Careful</p>"));
        assert!(m.body_html.contains("<strong>bold</strong>"));
        assert!(!m.body_html.contains("<blockquote>"));
    }

    #[test]
    fn gfm_extensions_are_enabled() {
        let m = markup("- [x] done\n\n| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~\n", None);
        assert!(m.body_html.contains("type=\"checkbox\""));
        assert!(m.body_html.contains("<table>"));
        assert!(m.body_html.contains("<del>gone</del>"));
    }

    #[test]
    fn front_matter_and_bom_are_stripped() {
        let m = markup("\u{feff}---\ntags: [a]\n---\r\nBody\r\n", None);
        assert!(!m.body_html.contains("tags"));
        assert!(m.body_html.contains("Body"));
    }

    #[test]
    fn unclosed_fence_in_callout_does_not_swallow_document() {
        let m = markup("> [!note] N\n> ```\n> code\n\n# After heading\n\nParagraph after.\n", None);
        assert!(m.body_html.contains("id=\"after-heading\""), "{}", m.body_html);
        assert!(m.body_html.contains("<p>Paragraph after.</p>"));
        assert!(!m.body_html.contains("&lt;/div&gt;"));
        assert_eq!(m.body_html.matches("<pre class=\"code-block\"").count(), 1);
    }

    #[test]
    fn callout_stays_inside_its_list_item() {
        let m = markup("- item one\n  > [!tip] T\n  > inside\n- item two\n", None);
        let html = &m.body_html;
        assert_eq!(html.matches("<ul>").count(), 1, "{html}");
        let callout = html.find("callout-tip").unwrap();
        let first_item_end = html.find("</li>").unwrap();
        assert!(callout < first_item_end, "{html}");
        assert!(html.contains("item two"));
    }

    #[test]
    fn highlight_marks_and_emoji_shortcodes() {
        let m = markup("This is ==highlighted== text :smile:\n\n`==code==`\n", None);
        assert!(m.body_html.contains("This is <mark>highlighted</mark> text"), "{}", m.body_html);
        assert!(m.body_html.contains('\u{1F604}'));
        assert!(m.body_html.contains("<code>==code==</code>"));
    }

    #[test]
    fn admonition_renders_as_callout() {
        let m = markup("!!! danger \"Stop\"\n    Do **not** run this.\n", None);
        assert!(m.body_html.contains("callout-danger"));
        assert!(m.body_html.contains("<p class=\"callout-title\">Stop</p>"));
        assert!(m.body_html.contains("<strong>not</strong>"));
    }

    #[test]
    fn toc_marker_lists_headings_with_anchors() {
        let m = markup("[TOC]\n\n# Intro\n\n## Setup ==now==\n\n## Setup now\n", None);
        let html = &m.body_html;
        assert!(html.contains("<nav class=\"toc\">"), "{html}");
        assert!(html.contains("<li class=\"toc-h1\"><a href=\"#intro\">Intro</a></li>"));
        assert!(html.contains("<a href=\"#setup-now\">Setup now</a>"));
        assert!(html.contains("<a href=\"#setup-now-1\">Setup now</a>"));
        assert!(html.contains("id=\"setup-now-1\""));
        assert!(!html.contains("[TOC]"));
    }

    #[test]
    fn output_is_deterministic() {
        let src = "# T\n\n> [!tip]\n> x\n\n```py\nprint(1)\n```\n";
        assert_eq!(markup(src, Some("a")), markup(src, Some("a")));
    }
}
