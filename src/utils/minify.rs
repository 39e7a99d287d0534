//! Minification dispatch for built output.
//!
//! One entry point, [`minify`], keyed on the source's [`ContentKind`].
//! Markup goes through the `minify_html` crate; style/data formats get a
//! conservative whitespace strip; scripts only lose blank lines and
//! indentation (joining statements would change ASI semantics).

use crate::source::ContentKind;
use anyhow::{Result, bail};
use std::borrow::Cow;

/// Minify `bytes` according to content kind.
///
/// Returns `Cow::Borrowed` for kinds with no minifier. Text-format kinds
/// fail on invalid UTF-8; the caller decides whether that is fatal or
/// falls back to the original bytes.
pub fn minify(kind: ContentKind, bytes: &[u8]) -> Result<Cow<'_, [u8]>> {
    match kind {
        ContentKind::Markup => Ok(Cow::Owned(minify_markup(bytes))),
        ContentKind::Style | ContentKind::Xml | ContentKind::Json => {
            Ok(Cow::Owned(strip_whitespace(as_text(kind, bytes)?, "")))
        }
        ContentKind::Script => Ok(Cow::Owned(strip_whitespace(as_text(kind, bytes)?, "\n"))),
        _ => Ok(Cow::Borrowed(bytes)),
    }
}

fn as_text(kind: ContentKind, bytes: &[u8]) -> Result<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(_) => bail!("cannot minify {kind:?}: not valid UTF-8"),
    }
}

fn minify_markup(html: &[u8]) -> Vec<u8> {
    let mut cfg = minify_html::Cfg::new();
    cfg.keep_closing_tags = true;
    cfg.keep_html_and_head_opening_tags = true;
    cfg.keep_comments = false;
    cfg.minify_css = true;
    cfg.minify_js = true;
    minify_html::minify(html, &cfg)
}

/// Trim every line and join the non-empty ones with `sep`.
fn strip_whitespace(text: &str, sep: &str) -> Vec<u8> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_markup_strips_comments_and_space() {
        let html = b"<html>\n  <body>\n    <!-- note -->\n    <p>Hi</p>\n  </body>\n</html>";
        let out = minify(ContentKind::Markup, html).unwrap();
        let text = String::from_utf8_lossy(&out);
        assert!(text.contains("<p>Hi</p>"));
        assert!(!text.contains("note"));
        assert!(!text.contains("\n  "));
    }

    #[test]
    fn test_minify_css_joins_lines() {
        let css = b"a {\n  color: red;\n}\n";
        let out = minify(ContentKind::Style, css).unwrap();
        assert_eq!(&*out, b"a {color: red;}");
    }

    #[test]
    fn test_minify_js_keeps_line_breaks() {
        let js = b"let a = 1\n  let b = 2\n\nreturn a + b\n";
        let out = minify(ContentKind::Script, js).unwrap();
        assert_eq!(&*out, b"let a = 1\nlet b = 2\nreturn a + b");
    }

    #[test]
    fn test_minify_xml_removes_empty_lines() {
        let xml = b"<root>\n\n  <item/>\n\n</root>";
        let out = minify(ContentKind::Xml, xml).unwrap();
        assert_eq!(&*out, b"<root><item/></root>");
    }

    #[test]
    fn test_minify_passthrough_for_binary_kinds() {
        let png = [0x89u8, b'P', b'N', b'G'];
        let out = minify(ContentKind::Other, &png).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn test_minify_invalid_utf8_is_an_error() {
        assert!(minify(ContentKind::Style, &[0xff, 0xfe]).is_err());
    }
}
