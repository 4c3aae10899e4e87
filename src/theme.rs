//! Theme registry: fixed light/dark style definitions selected by name.
//!
//! Every [`Theme`] is built once, on first use, and shared read-only as an
//! `Arc<Theme>` by all concurrent jobs. A theme's style sheet is three parts
//! concatenated: an identifying marker plus the palette's custom properties,
//! the shared base sheet that consumes them, and the syntax-highlighting
//! token CSS for the theme's palette.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Md2PdfError;
use crate::pipeline::highlight;

/// Identifier of a built-in theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeId {
    Light,
    Dark,
}

impl ThemeId {
    pub const ALL: [ThemeId; 2] = [ThemeId::Light, ThemeId::Dark];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl fmt::Display for ThemeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThemeId {
    type Err = Md2PdfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            _ => Err(Md2PdfError::UnknownTheme {
                id: s.to_string(),
                known: ThemeRegistry::ids().join(", "),
            }),
        }
    }
}

/// An immutable, fully assembled visual theme.
#[derive(Debug, Clone, PartialEq)]
pub struct Theme {
    pub id: ThemeId,
    /// Complete CSS: marker, palette, base rules and token colours.
    pub style_sheet: String,
    pub is_dark: bool,
    /// Name of the syntect palette used for code token colours.
    pub highlight_theme: &'static str,
}

impl Theme {
    /// The marker comment every style sheet starts with.
    pub fn marker(id: ThemeId) -> String {
        format!("/* md2pdf-theme: {id} */")
    }

    fn build(id: ThemeId) -> Self {
        let (palette, is_dark, highlight_theme) = match id {
            ThemeId::Light => (LIGHT_PALETTE, false, "InspiredGitHub"),
            ThemeId::Dark => (DARK_PALETTE, true, "base16-ocean.dark"),
        };

        let token_css = highlight::palette_css(highlight_theme).unwrap_or_else(|e| {
            warn!("No token colours for theme '{}': {}", id, e);
            String::new()
        });

        let mut style_sheet = String::with_capacity(
            BASE_CSS.len() + palette.len() + token_css.len() + 64,
        );
        style_sheet.push_str(&Self::marker(id));
        style_sheet.push('\n');
        style_sheet.push_str(palette);
        style_sheet.push_str(BASE_CSS);
        style_sheet.push_str("\n/* code tokens */\n");
        style_sheet.push_str(&token_css);

        Self {
            id,
            style_sheet,
            is_dark,
            highlight_theme,
        }
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Lookup table from [`ThemeId`] to its shared [`Theme`].
pub struct ThemeRegistry {
    themes: BTreeMap<ThemeId, Arc<Theme>>,
}

static REGISTRY: Lazy<ThemeRegistry> = Lazy::new(|| ThemeRegistry {
    themes: ThemeId::ALL
        .iter()
        .map(|&id| (id, Arc::new(Theme::build(id))))
        .collect(),
});

impl ThemeRegistry {
    pub fn global() -> &'static ThemeRegistry {
        &REGISTRY
    }

    /// Known theme identifiers, in display order.
    pub fn ids() -> Vec<&'static str> {
        ThemeId::ALL.iter().map(|id| id.as_str()).collect()
    }

    pub fn get(&self, id: ThemeId) -> Option<Arc<Theme>> {
        self.themes.get(&id).cloned()
    }
}

/// Resolve a theme identifier (case-insensitive) to its shared theme.
pub fn get_theme(id: &str) -> Result<Arc<Theme>, Md2PdfError> {
    let theme_id: ThemeId = id.parse()?;
    ThemeRegistry::global()
        .get(theme_id)
        .ok_or_else(|| Md2PdfError::Internal(format!("theme '{theme_id}' missing from registry")))
}

// ── Style sheets ─────────────────────────────────────────────────────────

const LIGHT_PALETTE: &str = r#":root {
  --bg: #ffffff;
  --fg: #2f3338;
  --muted: #5a6069;
  --accent: #5b6ee1;
  --divider: #e5e7eb;
  --border: #d6d9df;
  --code-bg: #f6f8fa;
  --blockquote-bg: #f8f9fb;
  --table-bg: #ffffff;
  --thead-bg: #f3f4f6;
  --row-alt: #fafbfc;
  --mark-bg: #fff59d;
  --toc-bg: #f8fafd;
  --kbd-bg: #f3f4f6;
  --link: #3a74ff;
  --callout-accent: #5b6ee1;
  --callout-bg: #eff2ff;
}
"#;

const DARK_PALETTE: &str = r#":root {
  --bg: #1e1f22;
  --fg: #d7d9df;
  --muted: #aab0bb;
  --accent: #7f8cff;
  --divider: #2b2d31;
  --border: #33363d;
  --code-bg: #17181b;
  --blockquote-bg: #1b1c20;
  --table-bg: #202226;
  --thead-bg: #2a2d33;
  --row-alt: #23262b;
  --mark-bg: #5b6ee14a;
  --toc-bg: #1b1c20;
  --kbd-bg: #16181c;
  --link: #8aa2ff;
  --callout-accent: #7f8cff;
  --callout-bg: #23273b;
}
"#;

const BASE_CSS: &str = r#"
@page {
  size: A4;
  margin: 18mm 16mm 20mm 16mm;
  background: var(--bg);
}

html, body {
  background: var(--bg);
  color: var(--fg);
  line-height: 1.55;
  hyphens: auto;
  overflow-wrap: break-word;
}

h1, h2, h3, h4, h5, h6 {
  font-weight: 700;
  line-height: 1.25;
  margin: 1.2em 0 0.5em;
}
h2, h3, h4 { break-after: avoid; }

p, ul, ol, dl, blockquote, pre, table, figure { margin: 0.7em 0; }

a {
  color: var(--link);
  text-decoration: none;
  border-bottom: 1px dashed currentColor;
}

hr {
  border: none;
  border-top: 1px solid var(--divider);
  margin: 1.4em 0;
}

code, pre, kbd { font-size: 0.92em; }
:not(pre) > code {
  background: var(--code-bg);
  border-radius: 4px;
  padding: 0 3px;
}
pre {
  white-space: pre-wrap;
  overflow-wrap: anywhere;
  border: 1px solid var(--border);
  background: var(--code-bg);
  padding: 10px 12px;
  border-radius: 8px;
}

blockquote {
  border-left: 3px solid var(--accent);
  background: var(--blockquote-bg);
  padding: 8px 12px;
  border-radius: 6px;
}
blockquote > :first-child { margin-top: 0; }
blockquote > :last-child { margin-bottom: 0; }

.callout {
  border-left: 4px solid var(--callout-accent);
  background: var(--callout-bg);
  padding: 8px 12px;
  margin: 0.9em 0;
  border-radius: 6px;
  break-inside: avoid;
}
.callout > :last-child { margin-bottom: 0; }
.callout-title {
  margin: 0 0 4px;
  font-weight: 600;
  color: var(--callout-accent);
}
.callout-info, .callout-todo { --callout-accent: #2f8fdd; }
.callout-tip { --callout-accent: #13a8a8; }
.callout-success { --callout-accent: #2ea043; }
.callout-question { --callout-accent: #d4a017; }
.callout-warning { --callout-accent: #e8871e; }
.callout-failure, .callout-danger, .callout-bug { --callout-accent: #e5484d; }
.callout-example { --callout-accent: #8b5cf6; }
.callout-quote { --callout-accent: #8a8f98; }
.callout-abstract { --callout-accent: #00a3bf; }

ul, ol { padding-left: 1.25em; }
li + li { margin-top: 0.2em; }
li:has(> input[type="checkbox"]) { list-style: none; }
input[type="checkbox"] { transform: translateY(1px) scale(0.9); margin-right: 0.4em; }

table {
  width: 100%;
  border-collapse: collapse;
  background: var(--table-bg);
}
th, td {
  border: 1px solid var(--border);
  padding: 8px 10px;
  vertical-align: top;
}
thead th { background: var(--thead-bg); }
tbody tr:nth-child(even) { background: var(--row-alt); }

img, svg { max-width: 100%; height: auto; }

mark { background: var(--mark-bg); }

nav.toc {
  border: 1px dashed var(--border);
  padding: 10px 12px;
  border-radius: 8px;
  background: var(--toc-bg);
  margin: 0 0 1.2em;
}
nav.toc ul { list-style: none; margin: 0; padding: 0; }
nav.toc li.toc-h2 { margin-left: 1em; }
nav.toc li.toc-h3 { margin-left: 2em; }
nav.toc li.toc-h4, nav.toc li.toc-h5, nav.toc li.toc-h6 { margin-left: 3em; }
kbd {
  background: var(--kbd-bg);
  border: 1px solid var(--border);
  border-bottom-width: 2px;
  border-radius: 4px;
  padding: 0 4px;
}

.footnotes { font-size: 0.9em; color: var(--muted); }

h1.doc-title {
  text-align: center;
  font-size: 2em;
  margin-bottom: 1em;
  border-bottom: 2px solid var(--divider);
  padding-bottom: 0.3em;
}
"#;
