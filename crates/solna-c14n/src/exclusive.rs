#![forbid(unsafe_code)]

//! Namespace rules for exclusive canonical XML.
//!
//! Only visibly utilized namespaces are rendered: the prefix of the element
//! name, prefixes of its attributes, and whatever the InclusiveNamespaces
//! PrefixList names.

use crate::render::{utilized_prefixes, NsDecl, Rendered};
use std::collections::{BTreeMap, BTreeSet};

pub(crate) fn namespace_decls(
    node: roxmltree::Node<'_, '_>,
    in_scope: &BTreeMap<String, String>,
    rendered: &Rendered,
    inclusive_prefixes: &BTreeSet<String>,
) -> Vec<NsDecl> {
    let mut wanted = utilized_prefixes(node);
    wanted.extend(inclusive_prefixes.iter().cloned());

    let mut decls = Vec::new();
    for prefix in wanted {
        match in_scope.get(&prefix) {
            Some(uri) => {
                if rendered.get(&prefix) != Some(uri) {
                    decls.push(NsDecl {
                        prefix,
                        uri: uri.clone(),
                    });
                }
            }
            None if prefix.is_empty() => {
                if rendered.get("").is_some_and(|uri| !uri.is_empty()) {
                    decls.push(NsDecl {
                        prefix,
                        uri: String::new(),
                    });
                }
            }
            None => {}
        }
    }
    decls
}
