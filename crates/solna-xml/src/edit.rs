#![forbid(unsafe_code)]

//! Text-range edits on the source of a parsed document.
//!
//! roxmltree trees are read-only, so filling a signature template or
//! replacing an element with its encryption happens on the document text:
//! compute byte-range edits against the parsed tree, apply them, reparse.

use solna_core::{Error, Result};
use std::ops::Range;

/// Replace `range` of the source text with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub replacement: String,
}

/// Escape text content for use between tags.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            c => out.push(c),
        }
    }
    out
}

/// Byte offset just past the `>` that closes the start tag at `start`.
fn start_tag_end(text: &str, start: usize) -> Result<usize> {
    let mut quote: Option<u8> = None;
    for (i, b) in text.as_bytes()[start..].iter().enumerate() {
        match (quote, *b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"') | (None, b'\'') => quote = Some(*b),
            (None, b'>') => return Ok(start + i + 1),
            (None, _) => {}
        }
    }
    Err(Error::XmlStructure("unterminated start tag".into()))
}

/// An edit that makes `text` the only content of `node`.
///
/// Works on both `<a></a>` and `<a/>` forms; existing content is dropped.
pub fn set_element_text(node: roxmltree::Node<'_, '_>, text: &str) -> Result<TextEdit> {
    if !node.is_element() {
        return Err(Error::XmlStructure("text can only be set on an element".into()));
    }
    let source = node.document().input_text();
    let range = node.range();
    let tag_end = start_tag_end(source, range.start)?;
    let escaped = escape_text(text);

    if source[..tag_end].ends_with("/>") {
        let qname = crate::document::qualified_name(node);
        let open = &source[range.start..tag_end - 2];
        return Ok(TextEdit {
            range: range.start..tag_end,
            replacement: format!("{}>{escaped}</{qname}>", open.trim_end()),
        });
    }

    let element = &source[range.clone()];
    let close = element
        .rfind("</")
        .ok_or_else(|| Error::XmlStructure("element has no end tag".into()))?;
    Ok(TextEdit {
        range: tag_end..range.start + close,
        replacement: escaped,
    })
}

/// An edit that replaces the whole node (start tag to end tag) with
/// `replacement`, which is inserted verbatim.
pub fn replace_node(node: roxmltree::Node<'_, '_>, replacement: String) -> TextEdit {
    TextEdit {
        range: node.range(),
        replacement,
    }
}

/// An edit that replaces everything between the element's start and end
/// tags with `replacement`, inserted verbatim.
pub fn replace_content(node: roxmltree::Node<'_, '_>, replacement: String) -> Result<TextEdit> {
    let source = node.document().input_text();
    let range = node.range();
    let tag_end = start_tag_end(source, range.start)?;
    if source[..tag_end].ends_with("/>") {
        let qname = crate::document::qualified_name(node);
        let open = &source[range.start..tag_end - 2];
        return Ok(TextEdit {
            range: range.start..tag_end,
            replacement: format!("{}>{replacement}</{qname}>", open.trim_end()),
        });
    }
    let close = source[range.clone()]
        .rfind("</")
        .ok_or_else(|| Error::XmlStructure("element has no end tag".into()))?;
    Ok(TextEdit {
        range: tag_end..range.start + close,
        replacement,
    })
}

/// The source text between the element's start and end tags.
pub fn inner_text<'input>(node: roxmltree::Node<'_, 'input>) -> Result<&'input str> {
    let source = node.document().input_text();
    let range = node.range();
    let tag_end = start_tag_end(source, range.start)?;
    if source[..tag_end].ends_with("/>") {
        return Ok("");
    }
    let close = source[range.clone()]
        .rfind("</")
        .ok_or_else(|| Error::XmlStructure("element has no end tag".into()))?;
    Ok(&source[tag_end..range.start + close])
}

/// Apply non-overlapping edits to `text`.
pub fn apply_edits(text: &str, mut edits: Vec<TextEdit>) -> Result<String> {
    edits.sort_by(|a, b| b.range.start.cmp(&a.range.start));
    for pair in edits.windows(2) {
        if pair[1].range.end > pair[0].range.start {
            return Err(Error::XmlStructure("overlapping document edits".into()));
        }
    }
    let mut out = text.to_owned();
    for edit in edits {
        if edit.range.end > out.len() || edit.range.start > edit.range.end {
            return Err(Error::XmlStructure("edit outside the document".into()));
        }
        out.replace_range(edit.range, &edit.replacement);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element<'a, 'i>(doc: &'a roxmltree::Document<'i>, name: &str) -> roxmltree::Node<'a, 'i> {
        doc.descendants().find(|n| n.has_tag_name(name)).unwrap()
    }

    #[test]
    fn test_set_text_on_empty_pair_and_self_closing() {
        let xml = r#"<r><ds:V xmlns:ds="urn:d"></ds:V><W a="x>y"/></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let edits = vec![
            set_element_text(element(&doc, "V"), "abc").unwrap(),
            set_element_text(element(&doc, "W"), "1<2").unwrap(),
        ];
        let out = apply_edits(xml, edits).unwrap();
        assert_eq!(
            out,
            r#"<r><ds:V xmlns:ds="urn:d">abc</ds:V><W a="x>y">1&lt;2</W></r>"#
        );
        roxmltree::Document::parse(&out).unwrap();
    }

    #[test]
    fn test_set_text_replaces_existing_content() {
        let xml = "<r><v>\n  old <b/>\n</v></r>";
        let doc = roxmltree::Document::parse(xml).unwrap();
        let edit = set_element_text(element(&doc, "v"), "new").unwrap();
        assert_eq!(apply_edits(xml, vec![edit]).unwrap(), "<r><v>new</v></r>");
    }

    #[test]
    fn test_replace_node_and_inner_text() {
        let xml = "<r><secret>x</secret><keep/></r>";
        let doc = roxmltree::Document::parse(xml).unwrap();
        let secret = element(&doc, "secret");
        assert_eq!(inner_text(secret).unwrap(), "x");
        let edit = replace_node(secret, "<enc/>".into());
        assert_eq!(apply_edits(xml, vec![edit]).unwrap(), "<r><enc/><keep/></r>");
    }

    #[test]
    fn test_overlapping_edits_rejected() {
        let edits = vec![
            TextEdit {
                range: 0..4,
                replacement: String::new(),
            },
            TextEdit {
                range: 2..6,
                replacement: String::new(),
            },
        ];
        assert!(apply_edits("0123456789", edits).is_err());
    }
}
