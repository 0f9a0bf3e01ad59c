#![forbid(unsafe_code)]

//! Namespace and `xml:*` rules for inclusive canonical XML 1.0 and 1.1.

use crate::render::{Attr, NsDecl, Rendered};
use crate::C14nMode;
use solna_core::ns;
use std::collections::BTreeMap;

/// Every in-scope namespace that differs from what the nearest rendered
/// ancestor already declared, plus `xmlns=""` when that ancestor left a
/// non-empty default in effect and this element has none.
pub(crate) fn namespace_decls(
    in_scope: &BTreeMap<String, String>,
    rendered: &Rendered,
) -> Vec<NsDecl> {
    let mut decls: Vec<NsDecl> = in_scope
        .iter()
        .filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
        .map(|(prefix, uri)| NsDecl {
            prefix: prefix.clone(),
            uri: uri.clone(),
        })
        .collect();
    if !in_scope.contains_key("") && rendered.get("").is_some_and(|uri| !uri.is_empty()) {
        decls.push(NsDecl {
            prefix: String::new(),
            uri: String::new(),
        });
    }
    decls
}

/// `xml:*` attributes a subset apex inherits from its ancestors.
///
/// Canonical XML 1.0 inherits every `xml:*` attribute. 1.1 inherits only
/// `xml:lang` and `xml:space`; `xml:id` is never inherited and `xml:base`
/// is left as written.
pub(crate) fn inherited_xml_attrs(
    node: roxmltree::Node<'_, '_>,
    existing: &[Attr],
    mode: C14nMode,
) -> Vec<Attr> {
    let inheritable = |name: &str| match mode {
        C14nMode::Inclusive11 | C14nMode::Inclusive11WithComments => {
            matches!(name, "lang" | "space")
        }
        _ => true,
    };

    let mut nearest: BTreeMap<&str, &str> = BTreeMap::new();
    for ancestor in node.ancestors().skip(1).filter(|n| n.is_element()) {
        for attr in ancestor.attributes() {
            if attr.namespace() == Some(ns::XML) && inheritable(attr.name()) {
                nearest.entry(attr.name()).or_insert(attr.value());
            }
        }
    }

    nearest
        .into_iter()
        .filter(|(name, _)| {
            !existing
                .iter()
                .any(|a| a.ns_uri == ns::XML && a.local_name == *name)
        })
        .map(|(name, value)| Attr {
            ns_uri: ns::XML.to_owned(),
            local_name: name.to_owned(),
            qualified_name: format!("xml:{name}"),
            value: value.to_owned(),
        })
        .collect()
}
