#![forbid(unsafe_code)]

//! Tree provider for the Solna XML security engine.
//!
//! Wraps roxmltree with secure parser options, ID registration, the
//! ownership-aware [`NodeSet`], the XPath subset used by signature
//! transforms, and text-range editing for template filling.

pub mod document;
pub mod edit;
pub mod nodeset;
pub mod xpath;

pub use document::{ParserOptions, XmlDocument};
pub use nodeset::{DocumentRef, NodeSet, Ownership, Selection};
