#![forbid(unsafe_code)]

//! URI resolution for references.
//!
//! Handles:
//! - `""`: the whole document without comments
//! - `#xpointer(/)`: the whole document with comments
//! - `#id`: the identified subtree without comments
//! - `#xpointer(id('id'))`: the identified subtree with comments
//! - anything else: external, resolved only through explicit URL maps

use solna_core::{Error, Result};
use solna_xml::xpath::{parse_same_document_ref, parse_xpointer_id};
use solna_xml::{NodeSet, Selection, XmlDocument};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UriType {
    Empty,
    SameDocument,
    External,
}

impl UriType {
    pub fn classify(uri: &str) -> Self {
        if uri.is_empty() {
            Self::Empty
        } else if uri.starts_with('#') {
            Self::SameDocument
        } else {
            Self::External
        }
    }
}

/// Which kinds of reference URI a context accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriTypeSet {
    pub empty: bool,
    pub same_document: bool,
    pub external: bool,
}

impl Default for UriTypeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl UriTypeSet {
    pub fn all() -> Self {
        Self {
            empty: true,
            same_document: true,
            external: true,
        }
    }

    /// Only the document being processed: no external URIs.
    pub fn local() -> Self {
        Self {
            external: false,
            ..Self::all()
        }
    }

    pub fn allows(&self, uri_type: UriType) -> bool {
        match uri_type {
            UriType::Empty => self.empty,
            UriType::SameDocument => self.same_document,
            UriType::External => self.external,
        }
    }
}

/// Resolve an empty or same-document URI against `doc`.
pub fn resolve_same_document<'d>(doc: &'d XmlDocument, uri: &str) -> Result<NodeSet<'d>> {
    if uri.is_empty() {
        return Ok(NodeSet::all(doc, false));
    }
    let fragment = parse_same_document_ref(uri)
        .ok_or_else(|| Error::InvalidUri(format!("not a same-document URI: {uri}")))?;
    if fragment == "xpointer(/)" {
        return Ok(NodeSet::all(doc, true));
    }

    let (id, with_comments) = match parse_xpointer_id(fragment) {
        Some(id) => (id, true),
        None if fragment.starts_with("xpointer(") => {
            return Err(Error::InvalidUri(format!("unsupported XPointer: {uri}")))
        }
        None => (fragment, false),
    };

    let parsed = doc.parse_doc()?;
    let ids = doc.build_id_map(&parsed)?;
    let node = ids
        .get(id)
        .ok_or_else(|| Error::InvalidUri(format!("ID not found: {id}")))?;
    Ok(NodeSet::borrowed(
        doc,
        Selection::Tree {
            root: node.get_usize(),
            with_comments,
        },
    ))
}

/// Map an external URI to a local file.
///
/// Only URIs listed in `url_maps` are resolved, plus relative paths when a
/// `base_dir` is given. Nothing is ever fetched over the network.
pub fn resolve_external(
    uri: &str,
    url_maps: &[(String, String)],
    base_dir: Option<&Path>,
) -> Result<PathBuf> {
    if let Some((_, path)) = url_maps.iter().find(|(url, _)| url == uri) {
        return Ok(PathBuf::from(path));
    }
    if let Some(base) = base_dir {
        if !uri.contains("://") && !uri.starts_with('/') {
            return Ok(base.join(uri));
        }
    }
    Err(Error::InvalidUri(format!("external URI not mapped: {uri}")))
}
