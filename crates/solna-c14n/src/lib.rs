#![forbid(unsafe_code)]

//! XML canonicalization for the Solna XML security engine.
//!
//! Implements the six W3C variants:
//! - Canonical XML 1.0 (with and without comments)
//! - Canonical XML 1.1 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! A document subset is expressed as a [`Selection`]; nodes outside it are
//! skipped while their visible descendants are still rendered.

pub mod escape;
mod exclusive;
mod inclusive;
pub mod render;

use solna_core::{algorithm, Result};
use solna_xml::{NodeSet, Selection, XmlDocument};
use std::collections::BTreeSet;

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    Inclusive,
    InclusiveWithComments,
    Inclusive11,
    Inclusive11WithComments,
    Exclusive,
    ExclusiveWithComments,
}

impl C14nMode {
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Inclusive11 => algorithm::C14N11,
            Self::Inclusive11WithComments => algorithm::C14N11_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::C14N11 => Some(Self::Inclusive11),
            algorithm::C14N11_WITH_COMMENTS => Some(Self::Inclusive11WithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(
            self,
            Self::InclusiveWithComments | Self::Inclusive11WithComments | Self::ExclusiveWithComments
        )
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Canonicalize a parsed document, or the part of it in `selection`.
///
/// `inclusive_prefixes` is the exclusive-mode InclusiveNamespaces
/// PrefixList (`#default` names the default namespace); inclusive modes
/// ignore it.
pub fn canonicalize_doc(
    doc: &roxmltree::Document<'_>,
    mode: C14nMode,
    selection: Option<&Selection>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let prefixes: BTreeSet<String> = if mode.is_exclusive() {
        inclusive_prefixes
            .iter()
            .map(|p| if p == "#default" { String::new() } else { p.clone() })
            .collect()
    } else {
        BTreeSet::new()
    };
    let renderer = render::Renderer {
        mode,
        selection,
        inclusive_prefixes: prefixes,
    };
    let mut out = Vec::new();
    renderer.render_node(doc.root(), &mut out, &Default::default())?;
    log::trace!("canonicalized with {}: {} bytes", mode.uri(), out.len());
    Ok(out)
}

/// Canonicalize an [`XmlDocument`].
pub fn canonicalize(
    doc: &XmlDocument,
    mode: C14nMode,
    selection: Option<&Selection>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let parsed = doc.parse_doc()?;
    canonicalize_doc(&parsed, mode, selection, inclusive_prefixes)
}

/// Canonicalize the nodes of a [`NodeSet`].
pub fn canonicalize_node_set(
    nodes: &NodeSet<'_>,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    canonicalize(
        nodes.document(),
        mode,
        Some(nodes.selection()),
        inclusive_prefixes,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str, mode: C14nMode) -> String {
        let doc = roxmltree::Document::parse(xml).unwrap();
        String::from_utf8(canonicalize_doc(&doc, mode, None, &[]).unwrap()).unwrap()
    }

    fn c14n_subtree(xml: &str, name: &str, mode: C14nMode, prefixes: &[String]) -> String {
        let doc = roxmltree::Document::parse(xml).unwrap();
        let node = doc.descendants().find(|n| n.has_tag_name(name)).unwrap();
        let selection = Selection::Tree {
            root: node.id().get_usize(),
            with_comments: mode.with_comments(),
        };
        String::from_utf8(canonicalize_doc(&doc, mode, Some(&selection), prefixes).unwrap())
            .unwrap()
    }

    #[test]
    fn test_mode_uris() {
        for mode in [
            C14nMode::Inclusive,
            C14nMode::InclusiveWithComments,
            C14nMode::Inclusive11,
            C14nMode::Inclusive11WithComments,
            C14nMode::Exclusive,
            C14nMode::ExclusiveWithComments,
        ] {
            assert_eq!(C14nMode::from_uri(mode.uri()), Some(mode));
        }
        assert_eq!(C14nMode::from_uri("urn:nope"), None);
    }

    #[test]
    fn test_attribute_order_and_empty_elements() {
        let out = c14n(r#"<root><a b="1" a="2"/></root>"#, C14nMode::Inclusive);
        assert_eq!(out, r#"<root><a a="2" b="1"></a></root>"#);
    }

    #[test]
    fn test_namespaced_attributes_sort_after_plain_ones() {
        let xml = r#"<r xmlns:z="urn:a" xmlns:y="urn:b"><e y:k="1" z:k="2" k="3"/></r>"#;
        let out = c14n(xml, C14nMode::Inclusive);
        assert_eq!(
            out,
            r#"<r xmlns:y="urn:b" xmlns:z="urn:a"><e k="3" z:k="2" y:k="1"></e></r>"#
        );
    }

    #[test]
    fn test_text_escaping() {
        let out = c14n(r#"<root a="x&quot;y">a &amp; b &lt; c &gt; d</root>"#, C14nMode::Inclusive);
        assert_eq!(out, r#"<root a="x&quot;y">a &amp; b &lt; c &gt; d</root>"#);
    }

    #[test]
    fn test_comments_and_top_level_breaks() {
        let xml = "<!--a--><r><!--in--></r><!--b-->";
        assert_eq!(c14n(xml, C14nMode::Inclusive), "<r></r>");
        assert_eq!(
            c14n(xml, C14nMode::InclusiveWithComments),
            "<!--a-->\n<r><!--in--></r>\n<!--b-->"
        );
    }

    #[test]
    fn test_default_namespace_undeclared() {
        let xml = r#"<a xmlns="urn:d"><b xmlns=""><c/></b></a>"#;
        assert_eq!(
            c14n(xml, C14nMode::Inclusive),
            r#"<a xmlns="urn:d"><b xmlns=""><c></c></b></a>"#
        );
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            r#"<a xmlns="urn:d"><b xmlns=""><c></c></b></a>"#
        );
    }

    #[test]
    fn test_subset_inclusive_keeps_all_in_scope_namespaces() {
        let xml = r#"<root xmlns:a="http://a" xmlns:b="http://b"><a:child/></root>"#;
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Inclusive, &[]),
            r#"<a:child xmlns:a="http://a" xmlns:b="http://b"></a:child>"#
        );
    }

    #[test]
    fn test_subset_exclusive_renders_only_utilized() {
        let xml = r#"<root xmlns:a="http://a" xmlns:b="http://b"><a:child/></root>"#;
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Exclusive, &[]),
            r#"<a:child xmlns:a="http://a"></a:child>"#
        );
        assert_eq!(
            c14n_subtree(xml, "child", C14nMode::Exclusive, &["b".to_owned()]),
            r#"<a:child xmlns:a="http://a" xmlns:b="http://b"></a:child>"#
        );
    }

    #[test]
    fn test_exclusive_declares_prefix_once() {
        let xml = r#"<p:r xmlns:p="urn:p"><p:s><p:t/></p:s></p:r>"#;
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            r#"<p:r xmlns:p="urn:p"><p:s><p:t></p:t></p:s></p:r>"#
        );
    }

    #[test]
    fn test_xml_attribute_inheritance() {
        let xml = r#"<r xml:lang="en" xml:id="i1"><s><t/></s></r>"#;
        assert_eq!(
            c14n_subtree(xml, "s", C14nMode::Inclusive, &[]),
            r#"<s xml:id="i1" xml:lang="en"><t></t></s>"#
        );
        assert_eq!(
            c14n_subtree(xml, "s", C14nMode::Inclusive11, &[]),
            r#"<s xml:lang="en"><t></t></s>"#
        );
        assert_eq!(
            c14n_subtree(xml, "s", C14nMode::Exclusive, &[]),
            "<s><t></t></s>"
        );
    }

    #[test]
    fn test_processing_instruction() {
        let out = c14n("<?pi data?><r/>", C14nMode::Inclusive);
        assert_eq!(out, "<?pi data?>\n<r></r>");
    }

    #[test]
    fn test_node_set_entry_point() {
        let doc = XmlDocument::parse("<r><!--c--><a/></r>".into()).unwrap();
        let all = NodeSet::all(&doc, false);
        let out = canonicalize_node_set(&all, C14nMode::InclusiveWithComments, &[]).unwrap();
        assert_eq!(out, b"<r><a></a></r>");
    }
}
