#![forbid(unsafe_code)]

//! Enveloped signature transform.
//!
//! Removes the `<Signature>` element containing the `<Transform>` from the
//! node set, along with everything under it.

use crate::transform::{DataType, Operation, Transform, TransformId, TransformIo, TransformUsage};
use solna_core::{algorithm, ns, Error, Result};
use solna_xml::document::is_element;
use solna_xml::Selection;

pub static ENVELOPED_ID: TransformId = TransformId {
    name: "enveloped-signature",
    href: algorithm::ENVELOPED_SIGNATURE,
    usage: TransformUsage::Generic,
};

#[derive(Debug, Default)]
pub struct EnvelopedSignatureTransform {
    /// Node index of the `<Signature>` element to remove.
    signature_node_index: Option<usize>,
}

impl EnvelopedSignatureTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with the node index of the Signature element to remove.
    pub fn for_signature(signature_node_index: usize) -> Self {
        Self {
            signature_node_index: Some(signature_node_index),
        }
    }

    pub fn signature_node_index(&self) -> Option<usize> {
        self.signature_node_index
    }
}

impl Transform for EnvelopedSignatureTransform {
    fn id(&self) -> &'static TransformId {
        &ENVELOPED_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Tree
    }

    fn output_type(&self) -> DataType {
        DataType::Tree
    }

    fn read_node(&mut self, node: roxmltree::Node<'_, '_>) -> Result<()> {
        let signature = node
            .ancestors()
            .skip(1)
            .find(|n| is_element(*n, ns::DSIG, ns::node::SIGNATURE))
            .ok_or_else(|| {
                Error::Transform("enveloped-signature transform outside a <Signature>".into())
            })?;
        self.signature_node_index = Some(signature.id().get_usize());
        Ok(())
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let Some(nodes) = io.input_nodes.take() else {
            return Ok(());
        };
        let sig = self.signature_node_index.ok_or_else(|| {
            Error::Transform("enveloped-signature: Signature element not located".into())
        })?;

        {
            let doc = nodes.document().parse_doc()?;
            let found = u32::try_from(sig)
                .ok()
                .and_then(|i| doc.get_node(roxmltree::NodeId::new(i)))
                .is_some_and(|n| is_element(n, ns::DSIG, ns::node::SIGNATURE));
            if !found {
                return Err(Error::Transform(
                    "enveloped-signature: input document does not contain the Signature".into(),
                ));
            }
        }

        let selection = nodes.selection().clone().subtract(Selection::Tree {
            root: sig,
            with_comments: true,
        });
        io.output_nodes = Some(nodes.with_selection(selection));
        Ok(())
    }
}
