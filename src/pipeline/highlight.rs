//! Code-block syntax highlighting.
//!
//! Token spans carry CSS classes (`hl-keyword`, `hl-string`, …) rather than
//! inline colours, so one highlighted document can be coloured by whichever
//! theme's [`palette_css`] is embedded next to it.

use once_cell::sync::Lazy;
use syntect::highlighting::ThemeSet;
use syntect::html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;

use super::escape_html;
use crate::error::TransformError;

/// Class prefix for every token span.
pub const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

static SYNTAXES: Lazy<SyntaxSet> = Lazy::new(SyntaxSet::load_defaults_newlines);
static PALETTES: Lazy<ThemeSet> = Lazy::new(ThemeSet::load_defaults);

/// Look up a syntax by the first word of a fence info string.
///
/// Returns `None` for absent or unrecognised languages.
pub fn find_syntax(lang: Option<&str>) -> Option<&'static SyntaxReference> {
    let token = lang?.split_whitespace().next()?;
    let token = token.trim_start_matches('{').trim_start_matches('.');
    if token.is_empty() {
        return None;
    }
    SYNTAXES
        .find_syntax_by_token(token)
        .or_else(|| SYNTAXES.find_syntax_by_token(&token.to_ascii_lowercase()))
}

/// Highlight `code` and wrap it as `<pre class="code-block">`.
///
/// Unknown languages are highlighted as plain text; `data-lang` still
/// records what was declared.
pub fn highlight_block(code: &str, lang: Option<&str>) -> Result<String, TransformError> {
    let declared = lang
        .and_then(|l| l.split_whitespace().next())
        .filter(|l| !l.is_empty());
    let syntax = find_syntax(declared).unwrap_or_else(|| SYNTAXES.find_syntax_plain_text());

    let mut generator =
        ClassedHTMLGenerator::new_with_class_style(syntax, &SYNTAXES, CLASS_STYLE);
    for line in LinesWithEndings::from(code) {
        generator
            .parse_html_for_line_which_includes_newline(line)
            .map_err(|e| TransformError::new(format!("highlighting failed: {e}")))?;
    }
    let body = generator.finalize();

    let lang_attr = escape_html(declared.unwrap_or("text"));
    Ok(format!(
        "<pre class=\"code-block\" data-lang=\"{lang_attr}\"><code>{body}</code></pre>\n"
    ))
}

/// CSS colouring the `hl-` token classes with the named syntect palette.
pub fn palette_css(name: &str) -> Result<String, TransformError> {
    let palette = PALETTES
        .themes
        .get(name)
        .ok_or_else(|| TransformError::new(format!("unknown highlight palette '{name}'")))?;
    css_for_theme_with_class_style(palette, CLASS_STYLE)
        .map_err(|e| TransformError::new(format!("palette '{name}' CSS: {e}")))
}
