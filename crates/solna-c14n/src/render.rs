#![forbid(unsafe_code)]

//! The canonical serializer shared by every mode.
//!
//! The tree walk, attribute ordering, escaping and the document-level
//! whitespace rules are identical across modes; only the choice of which
//! namespace declarations to emit (and, for inclusive modes, which `xml:*`
//! attributes to inherit into a document subset) differs. Those choices
//! live in [`crate::inclusive`] and [`crate::exclusive`].

use crate::escape::{write_escaped, Context};
use crate::C14nMode;
use solna_core::{ns, Result};
use solna_xml::document::{in_scope_namespaces, prefix_for_uri, qualified_name};
use solna_xml::Selection;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// A namespace declaration to be rendered. An empty `uri` renders the
/// default-namespace undeclaration `xmlns=""`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// "" for the default namespace.
    pub prefix: String,
    pub uri: String,
}

impl NsDecl {
    pub fn render(&self, out: &mut Vec<u8>) {
        if self.prefix.is_empty() {
            out.extend_from_slice(b" xmlns=\"");
        } else {
            out.extend_from_slice(b" xmlns:");
            out.extend_from_slice(self.prefix.as_bytes());
            out.extend_from_slice(b"=\"");
        }
        write_escaped(out, &self.uri, Context::Attribute);
        out.push(b'"');
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> Ordering {
        // Default namespace first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// "" for no namespace.
    pub ns_uri: String,
    pub local_name: String,
    pub qualified_name: String,
    pub value: String,
}

impl Attr {
    pub fn render(&self, out: &mut Vec<u8>) {
        out.push(b' ');
        out.extend_from_slice(self.qualified_name.as_bytes());
        out.extend_from_slice(b"=\"");
        write_escaped(out, &self.value, Context::Attribute);
        out.push(b'"');
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> Ordering {
        // Unqualified attributes first, then by (namespace URI, local name).
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then_with(|| self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Prefix → URI of the declarations already in effect on the nearest
/// rendered ancestor. A "" URI under the "" prefix records an undeclared
/// default namespace.
pub(crate) type Rendered = BTreeMap<String, String>;

pub(crate) struct Renderer<'s> {
    pub mode: C14nMode,
    pub selection: Option<&'s Selection>,
    /// Exclusive mode's InclusiveNamespaces PrefixList, with `#default`
    /// mapped to "".
    pub inclusive_prefixes: BTreeSet<String>,
}

impl Renderer<'_> {
    fn is_visible(&self, node: roxmltree::Node<'_, '_>) -> bool {
        if node.is_comment() && !self.mode.with_comments() {
            return false;
        }
        self.selection.map_or(true, |s| s.contains(node))
    }

    fn is_subset(&self) -> bool {
        self.selection.is_some()
    }

    pub fn render_node(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut Vec<u8>,
        rendered: &Rendered,
    ) -> Result<()> {
        match node.node_type() {
            roxmltree::NodeType::Root => {
                for child in node.children() {
                    self.render_node(child, out, rendered)?;
                }
            }
            roxmltree::NodeType::Element => self.render_element(node, out, rendered)?,
            roxmltree::NodeType::Text => {
                if self.is_visible(node) {
                    let text = node.text().unwrap_or("");
                    write_escaped(out, text, Context::Text);
                }
            }
            roxmltree::NodeType::Comment => {
                if self.is_visible(node) {
                    self.top_level_break_before(node, out);
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(node.text().unwrap_or("").as_bytes());
                    out.extend_from_slice(b"-->");
                    self.top_level_break_after(node, out);
                }
            }
            roxmltree::NodeType::PI => {
                if self.is_visible(node) {
                    if let Some(pi) = node.pi() {
                        self.top_level_break_before(node, out);
                        out.extend_from_slice(b"<?");
                        out.extend_from_slice(pi.target.as_bytes());
                        if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                            out.push(b' ');
                            write_escaped(out, value, Context::Instruction);
                        }
                        out.extend_from_slice(b"?>");
                        self.top_level_break_after(node, out);
                    }
                }
            }
        }
        Ok(())
    }

    fn top_level_break_before(&self, node: roxmltree::Node<'_, '_>, out: &mut Vec<u8>) {
        if is_top_level(node) && node.prev_siblings().skip(1).any(|s| s.is_element()) {
            out.push(b'\n');
        }
    }

    fn top_level_break_after(&self, node: roxmltree::Node<'_, '_>, out: &mut Vec<u8>) {
        if is_top_level(node) && node.next_siblings().skip(1).any(|s| s.is_element()) {
            out.push(b'\n');
        }
    }

    fn render_element(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut Vec<u8>,
        rendered: &Rendered,
    ) -> Result<()> {
        if !self.is_visible(node) {
            for child in node.children() {
                self.render_node(child, out, rendered)?;
            }
            return Ok(());
        }

        let in_scope = in_scope_namespaces(node);
        let mut decls = if self.mode.is_exclusive() {
            crate::exclusive::namespace_decls(node, &in_scope, rendered, &self.inclusive_prefixes)
        } else {
            crate::inclusive::namespace_decls(&in_scope, rendered)
        };
        decls.sort();

        let mut attrs = element_attributes(node);
        if self.is_subset() && !self.mode.is_exclusive() {
            let parent_rendered = node
                .parent()
                .is_some_and(|p| p.is_element() && self.is_visible(p));
            if !parent_rendered {
                let inherited = crate::inclusive::inherited_xml_attrs(node, &attrs, self.mode);
                attrs.extend(inherited);
            }
        }
        attrs.sort();

        let name = qualified_name(node);
        out.push(b'<');
        out.extend_from_slice(name.as_bytes());
        for decl in &decls {
            decl.render(out);
        }
        for attr in &attrs {
            attr.render(out);
        }
        out.push(b'>');

        let mut child_rendered = rendered.clone();
        for decl in decls {
            child_rendered.insert(decl.prefix, decl.uri);
        }
        for child in node.children() {
            self.render_node(child, out, &child_rendered)?;
        }

        out.extend_from_slice(b"</");
        out.extend_from_slice(name.as_bytes());
        out.push(b'>');
        Ok(())
    }
}

fn is_top_level(node: roxmltree::Node<'_, '_>) -> bool {
    node.parent()
        .is_some_and(|p| p.node_type() == roxmltree::NodeType::Root)
}

/// The element's own attributes in document form (namespace declarations
/// are not attributes in roxmltree).
pub(crate) fn element_attributes(node: roxmltree::Node<'_, '_>) -> Vec<Attr> {
    node.attributes()
        .map(|attr| {
            let ns_uri = attr.namespace().unwrap_or("");
            let qualified_name = match attr.namespace() {
                Some(uri) => match prefix_for_uri(node, uri) {
                    Some(prefix) => format!("{prefix}:{}", attr.name()),
                    None => attr.name().to_owned(),
                },
                None => attr.name().to_owned(),
            };
            Attr {
                ns_uri: ns_uri.to_owned(),
                local_name: attr.name().to_owned(),
                qualified_name,
                value: attr.value().to_owned(),
            }
        })
        .collect()
}

/// Prefixes an element's own name and attributes use ("" for an
/// unprefixed element name). The `xml` prefix is never included.
pub(crate) fn utilized_prefixes(node: roxmltree::Node<'_, '_>) -> BTreeSet<String> {
    let mut used = BTreeSet::new();
    let element_prefix = solna_xml::document::element_prefix(node).unwrap_or("");
    used.insert(element_prefix.to_owned());
    for attr in node.attributes() {
        if let Some(uri) = attr.namespace() {
            if uri == ns::XML {
                continue;
            }
            if let Some(prefix) = prefix_for_uri(node, uri) {
                used.insert(prefix.to_owned());
            }
        }
    }
    used
}
