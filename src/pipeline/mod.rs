//! Pipeline stages for Markdown-to-PDF conversion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! testable on its own and the rendering backend can be swapped without
//! touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ paths ──▶ transform ──▶ render
//! (walk)   (dest)   (md → html)   (html → pdf, atomic)
//!                    ├ callout
//!                    └ highlight
//! ```
//!
//! 1. [`input`]     — expand files/directories into Markdown sources; decode UTF-8
//! 2. [`paths`]     — compute the destination PDF path for each source
//! 3. [`transform`] — parse Markdown, expand callouts, highlight code, assemble
//!    the themed HTML document
//! 4. [`render`]    — hand the document to the external engine and move the
//!    finished PDF into place atomically; runs in `spawn_blocking` because
//!    it waits on a child process

pub mod callout;
pub mod highlight;
pub mod input;
pub mod paths;
pub mod render;
pub mod transform;

/// Escape text for use in HTML element content or a quoted attribute.
pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
