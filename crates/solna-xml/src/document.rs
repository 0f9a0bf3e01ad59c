#![forbid(unsafe_code)]

//! XML document wrapper over roxmltree with parser limits and ID registration.

use solna_core::{Error, Result};
use std::collections::HashMap;

/// Parser configuration.
///
/// The defaults are the secure ones: no DTD, bounded input size and node
/// count. roxmltree never loads external entities or touches the network,
/// so those cannot be switched on at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserOptions {
    /// Accept documents with a `<!DOCTYPE>`. Internal entities are expanded
    /// by roxmltree with its own recursion limits.
    pub allow_dtd: bool,
    /// Reject inputs larger than this many bytes.
    pub max_bytes: usize,
    /// Reject documents with more nodes than this.
    pub max_nodes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            allow_dtd: false,
            max_bytes: 64 * 1024 * 1024,
            max_nodes: 1_000_000,
        }
    }
}

impl ParserOptions {
    fn roxml(&self) -> roxmltree::ParsingOptions {
        roxmltree::ParsingOptions {
            allow_dtd: self.allow_dtd,
            ..roxmltree::ParsingOptions::default()
        }
    }
}

/// An owned XML document. Stores the text and the options it was accepted
/// with.
///
/// To work with the parsed tree, call [`XmlDocument::parse_doc`] which
/// returns a `roxmltree::Document` borrowing from the text. Node ids are
/// stable across re-parses of the same text.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    text: String,
    options: ParserOptions,
    /// Additional ID attribute names to register (beyond `Id`, `ID`, `id`).
    extra_id_attrs: Vec<String>,
}

impl XmlDocument {
    /// Parse and validate XML with the default options.
    pub fn parse(text: String) -> Result<Self> {
        Self::parse_with(text, ParserOptions::default())
    }

    /// Parse and validate XML, enforcing `options`.
    pub fn parse_with(text: String, options: ParserOptions) -> Result<Self> {
        if text.len() > options.max_bytes {
            return Err(Error::XmlParse(format!(
                "document of {} bytes exceeds the {} byte limit",
                text.len(),
                options.max_bytes
            )));
        }
        {
            let doc = roxmltree::Document::parse_with_options(&text, options.roxml())
                .map_err(|e| Error::XmlParse(e.to_string()))?;
            let count = doc.descendants().count();
            if count > options.max_nodes {
                return Err(Error::XmlParse(format!(
                    "document has {count} nodes, limit is {}",
                    options.max_nodes
                )));
            }
            log::trace!("parsed document: {} bytes, {count} nodes", text.len());
        }
        Ok(Self {
            text,
            options,
            extra_id_attrs: Vec::new(),
        })
    }

    /// Parse and validate XML from bytes.
    pub fn parse_bytes(data: &[u8], options: ParserOptions) -> Result<Self> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?
            .to_owned();
        Self::parse_with(text, options)
    }

    /// Parse `data` wrapped between `prefix` and `suffix`.
    ///
    /// Decrypted element content is usually a forest of nodes with
    /// namespace prefixes bound by the surrounding document; wrapping it in
    /// a dummy element carrying those bindings makes it parseable.
    pub fn parse_wrapped(
        prefix: &str,
        data: &[u8],
        suffix: &str,
        options: ParserOptions,
    ) -> Result<Self> {
        let body = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?;
        let mut text = String::with_capacity(prefix.len() + body.len() + suffix.len());
        text.push_str(prefix);
        text.push_str(body);
        text.push_str(suffix);
        Self::parse_with(text, options)
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Consume the document, returning its text.
    pub fn into_text(self) -> String {
        self.text
    }

    pub fn options(&self) -> &ParserOptions {
        &self.options
    }

    /// Register additional ID attribute names (e.g. `"wsu:Id"` as `"Id"`).
    pub fn add_id_attr(&mut self, name: &str) {
        self.extra_id_attrs.push(name.to_owned());
    }

    pub fn id_attrs(&self) -> &[String] {
        &self.extra_id_attrs
    }

    /// Parse the stored text into a roxmltree document.
    ///
    /// Cannot fail for a document that was accepted by one of the
    /// constructors, but the error is still propagated.
    pub fn parse_doc(&self) -> Result<roxmltree::Document<'_>> {
        roxmltree::Document::parse_with_options(&self.text, self.options.roxml())
            .map_err(|e| Error::XmlParse(e.to_string()))
    }

    /// Build the ID → NodeId mapping for a parsed document.
    ///
    /// The same ID value on two elements is rejected: a reference to it
    /// would be ambiguous.
    pub fn build_id_map(
        &self,
        doc: &roxmltree::Document<'_>,
    ) -> Result<HashMap<String, roxmltree::NodeId>> {
        let default_attrs = ["Id", "ID", "id"];
        let mut map = HashMap::new();
        for node in doc.descendants().filter(|n| n.is_element()) {
            let names = default_attrs
                .iter()
                .copied()
                .chain(self.extra_id_attrs.iter().map(String::as_str));
            for attr_name in names {
                let Some(val) = node.attribute(attr_name) else {
                    continue;
                };
                if let Some(prev) = map.insert(val.to_owned(), node.id()) {
                    if prev != node.id() {
                        return Err(Error::XmlStructure(format!("duplicate ID: {val}")));
                    }
                }
            }
        }
        Ok(map)
    }
}

/// Find the first descendant element with the given local name and namespace.
pub fn find_element<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    ns: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    doc.descendants().find(|n| is_element(*n, ns, local_name))
}

/// Find the first child element with the given local name and namespace.
pub fn find_child_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|n| is_element(*n, ns, local_name))
}

/// Find all child elements with the given local name and namespace.
pub fn find_child_elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|n| is_element(*n, ns, local_name))
        .collect()
}

/// Check an element's expanded name.
pub fn is_element(node: roxmltree::Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns
}

/// Concatenated text of all descendant text nodes.
pub fn text_content(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// The element's qualified name exactly as written in the source
/// (`prefix:local` or `local`).
pub fn qualified_name<'input>(node: roxmltree::Node<'_, 'input>) -> &'input str {
    let text = node.document().input_text();
    let start = node.range().start + 1;
    let rest = &text[start.min(text.len())..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(rest.len());
    &rest[..end]
}

/// The prefix of the element's qualified name, if any.
pub fn element_prefix<'input>(node: roxmltree::Node<'_, 'input>) -> Option<&'input str> {
    qualified_name(node).split_once(':').map(|(p, _)| p)
}

/// The prefix bound to `uri` on `node`, ignoring the default namespace.
pub fn prefix_for_uri<'input>(
    node: roxmltree::Node<'_, 'input>,
    uri: &str,
) -> Option<&'input str> {
    if uri == solna_core::ns::XML {
        return Some("xml");
    }
    node.namespaces()
        .find(|ns| ns.uri() == uri && ns.name().is_some())
        .and_then(|ns| ns.name())
}

/// In-scope namespace bindings of an element, keyed by prefix ("" for the
/// default namespace). Undeclared defaults (`xmlns=""`) are left out.
pub fn in_scope_namespaces(
    node: roxmltree::Node<'_, '_>,
) -> std::collections::BTreeMap<String, String> {
    let mut prefixes: std::collections::BTreeSet<Option<&str>> = Default::default();
    for ancestor in node.ancestors().filter(|n| n.is_element()) {
        for ns in ancestor.namespaces() {
            prefixes.insert(ns.name());
        }
    }
    prefixes
        .into_iter()
        .filter_map(|prefix| {
            let uri = node.lookup_namespace_uri(prefix)?;
            if uri.is_empty() || prefix == Some("xml") {
                return None;
            }
            Some((prefix.unwrap_or("").to_owned(), uri.to_owned()))
        })
        .collect()
}
