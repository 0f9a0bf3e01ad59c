#![forbid(unsafe_code)]

//! Canonicalization as a tree-to-binary transform.

use crate::transform::{DataType, Operation, Transform, TransformId, TransformIo, TransformUsage};
use solna_c14n::C14nMode;
use solna_core::{algorithm, ns, Result};
use solna_xml::document::find_child_element;

macro_rules! c14n_id {
    ($name:literal, $href:expr) => {
        TransformId {
            name: $name,
            href: $href,
            usage: TransformUsage::Canonicalization,
        }
    };
}

pub static C14N_ID: TransformId = c14n_id!("c14n", algorithm::C14N);
pub static C14N_WITH_COMMENTS_ID: TransformId =
    c14n_id!("c14n-with-comments", algorithm::C14N_WITH_COMMENTS);
pub static C14N11_ID: TransformId = c14n_id!("c14n11", algorithm::C14N11);
pub static C14N11_WITH_COMMENTS_ID: TransformId =
    c14n_id!("c14n11-with-comments", algorithm::C14N11_WITH_COMMENTS);
pub static EXC_C14N_ID: TransformId = c14n_id!("exc-c14n", algorithm::EXC_C14N);
pub static EXC_C14N_WITH_COMMENTS_ID: TransformId =
    c14n_id!("exc-c14n-with-comments", algorithm::EXC_C14N_WITH_COMMENTS);

pub(crate) fn id_for_mode(mode: C14nMode) -> &'static TransformId {
    match mode {
        C14nMode::Inclusive => &C14N_ID,
        C14nMode::InclusiveWithComments => &C14N_WITH_COMMENTS_ID,
        C14nMode::Inclusive11 => &C14N11_ID,
        C14nMode::Inclusive11WithComments => &C14N11_WITH_COMMENTS_ID,
        C14nMode::Exclusive => &EXC_C14N_ID,
        C14nMode::ExclusiveWithComments => &EXC_C14N_WITH_COMMENTS_ID,
    }
}

#[derive(Debug)]
pub struct C14nTransform {
    mode: C14nMode,
    inclusive_prefixes: Vec<String>,
}

impl C14nTransform {
    pub fn new(mode: C14nMode) -> Self {
        Self {
            mode,
            inclusive_prefixes: Vec::new(),
        }
    }

    pub fn with_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.inclusive_prefixes = prefixes;
        self
    }

    pub fn mode(&self) -> C14nMode {
        self.mode
    }

    pub fn inclusive_prefixes(&self) -> &[String] {
        &self.inclusive_prefixes
    }
}

/// The InclusiveNamespaces PrefixList under an exclusive c14n method
/// element.
pub fn read_inclusive_prefixes(node: roxmltree::Node<'_, '_>) -> Vec<String> {
    find_child_element(node, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
        .and_then(|n| n.attribute(ns::attr::PREFIX_LIST))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

impl Transform for C14nTransform {
    fn id(&self) -> &'static TransformId {
        id_for_mode(self.mode)
    }

    fn input_type(&self) -> DataType {
        DataType::Tree
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        if self.mode.is_exclusive() {
            self.inclusive_prefixes = read_inclusive_prefixes(node);
        }
        Ok(())
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let Some(nodes) = io.input_nodes.take() else {
            return Ok(());
        };
        let bytes =
            solna_c14n::canonicalize_node_set(&nodes, self.mode, &self.inclusive_prefixes)?;
        io.output.append(&bytes)
    }
}
