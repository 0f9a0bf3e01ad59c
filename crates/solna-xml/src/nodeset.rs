#![forbid(unsafe_code)]

//! Ownership-aware node sets.
//!
//! A [`NodeSet`] pairs a document handle with a [`Selection`] expression.
//! The handle is either borrowed from the caller or owned by the set; only
//! one set can own a given document, and dropping that set frees it.
//! Selections are evaluated lazily against a parsed tree, so set algebra
//! is cheap and never touches the document.

use crate::document::XmlDocument;
use solna_core::{Error, Result};
use std::collections::BTreeSet;

/// Which nodes of a document are selected.
///
/// Node references are roxmltree node indices, which are stable for a given
/// document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Every node of the document.
    All { with_comments: bool },
    /// The subtree rooted at `root`, including `root`.
    Tree { root: usize, with_comments: bool },
    /// The union of the subtrees rooted at each listed node, comments
    /// included.
    Subtrees(BTreeSet<usize>),
    /// Exactly the listed nodes.
    Nodes(BTreeSet<usize>),
    Union(Box<Selection>, Box<Selection>),
    Intersection(Box<Selection>, Box<Selection>),
    Subtraction(Box<Selection>, Box<Selection>),
}

impl Selection {
    pub fn union(self, other: Selection) -> Selection {
        Selection::Union(Box::new(self), Box::new(other))
    }

    pub fn intersection(self, other: Selection) -> Selection {
        Selection::Intersection(Box::new(self), Box::new(other))
    }

    pub fn subtract(self, other: Selection) -> Selection {
        Selection::Subtraction(Box::new(self), Box::new(other))
    }

    /// Membership test for one node of the parsed document.
    pub fn contains(&self, node: roxmltree::Node<'_, '_>) -> bool {
        match self {
            Selection::All { with_comments } => with_comments_or_not_comment(node, *with_comments),
            Selection::Tree {
                root,
                with_comments,
            } => {
                with_comments_or_not_comment(node, *with_comments)
                    && node.ancestors().any(|a| a.id().get_usize() == *root)
            }
            Selection::Subtrees(roots) => node
                .ancestors()
                .any(|a| roots.contains(&a.id().get_usize())),
            Selection::Nodes(ids) => ids.contains(&node.id().get_usize()),
            Selection::Union(a, b) => a.contains(node) || b.contains(node),
            Selection::Intersection(a, b) => a.contains(node) && b.contains(node),
            Selection::Subtraction(a, b) => a.contains(node) && !b.contains(node),
        }
    }
}

fn with_comments_or_not_comment(node: roxmltree::Node<'_, '_>, with_comments: bool) -> bool {
    with_comments || !node.is_comment()
}

/// Whether a node set owns its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    Borrowed,
    Owned,
}

/// A document handle that is either borrowed or owned.
#[derive(Debug)]
pub enum DocumentRef<'d> {
    Borrowed(&'d XmlDocument),
    Owned(Box<XmlDocument>),
}

impl std::ops::Deref for DocumentRef<'_> {
    type Target = XmlDocument;

    fn deref(&self) -> &XmlDocument {
        match self {
            DocumentRef::Borrowed(doc) => doc,
            DocumentRef::Owned(doc) => doc,
        }
    }
}

/// A selection over one document.
///
/// Not `Clone`: copying an owning set would duplicate ownership. Use
/// [`NodeSet::view`] for a borrowed copy.
#[derive(Debug)]
pub struct NodeSet<'d> {
    doc: DocumentRef<'d>,
    selection: Selection,
}

impl<'d> NodeSet<'d> {
    /// A set over a document owned elsewhere.
    pub fn borrowed(doc: &'d XmlDocument, selection: Selection) -> Self {
        Self {
            doc: DocumentRef::Borrowed(doc),
            selection,
        }
    }

    /// A set that takes ownership of `doc`.
    pub fn owned(doc: XmlDocument, selection: Selection) -> Self {
        Self {
            doc: DocumentRef::Owned(Box::new(doc)),
            selection,
        }
    }

    /// The whole document.
    pub fn all(doc: &'d XmlDocument, with_comments: bool) -> Self {
        Self::borrowed(doc, Selection::All { with_comments })
    }

    /// The subtree rooted at `root`.
    pub fn tree(doc: &'d XmlDocument, root: roxmltree::NodeId, with_comments: bool) -> Self {
        Self::borrowed(
            doc,
            Selection::Tree {
                root: root.get_usize(),
                with_comments,
            },
        )
    }

    pub fn document(&self) -> &XmlDocument {
        &self.doc
    }

    pub fn ownership(&self) -> Ownership {
        match self.doc {
            DocumentRef::Borrowed(_) => Ownership::Borrowed,
            DocumentRef::Owned(_) => Ownership::Owned,
        }
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// A borrowed copy of this set.
    pub fn view(&self) -> NodeSet<'_> {
        NodeSet::borrowed(self.document(), self.selection.clone())
    }

    /// Replace the selection, keeping the document handle and its
    /// ownership. This is how a tree transform passes an owned document on.
    pub fn with_selection(self, selection: Selection) -> NodeSet<'d> {
        NodeSet {
            doc: self.doc,
            selection,
        }
    }

    /// Split into the document handle and the selection.
    pub fn into_parts(self) -> (DocumentRef<'d>, Selection) {
        (self.doc, self.selection)
    }

    /// Nodes in either set.
    pub fn union(&self, other: &NodeSet<'_>) -> Result<NodeSet<'_>> {
        self.same_document(other)?;
        Ok(NodeSet::borrowed(
            self.document(),
            self.selection.clone().union(other.selection.clone()),
        ))
    }

    /// Nodes in both sets.
    pub fn intersection(&self, other: &NodeSet<'_>) -> Result<NodeSet<'_>> {
        self.same_document(other)?;
        Ok(NodeSet::borrowed(
            self.document(),
            self.selection.clone().intersection(other.selection.clone()),
        ))
    }

    /// Nodes in `self` but not in `other`.
    pub fn subtract(&self, other: &NodeSet<'_>) -> Result<NodeSet<'_>> {
        self.same_document(other)?;
        Ok(NodeSet::borrowed(
            self.document(),
            self.selection.clone().subtract(other.selection.clone()),
        ))
    }

    fn same_document(&self, other: &NodeSet<'_>) -> Result<()> {
        if std::ptr::eq(self.document(), other.document()) {
            Ok(())
        } else {
            Err(Error::InvalidNodeSet(
                "set operation across different documents".into(),
            ))
        }
    }

    /// Membership test against a tree parsed from [`NodeSet::document`].
    pub fn contains(&self, node: roxmltree::Node<'_, '_>) -> bool {
        self.selection.contains(node)
    }

    /// Evaluate the selection, returning the indices of every member node
    /// in document order.
    pub fn materialize(&self) -> Result<BTreeSet<usize>> {
        let doc = self.doc.parse_doc()?;
        Ok(doc
            .descendants()
            .filter(|n| self.selection.contains(*n))
            .map(|n| n.id().get_usize())
            .collect())
    }
}
