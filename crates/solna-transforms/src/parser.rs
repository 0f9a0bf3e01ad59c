#![forbid(unsafe_code)]

//! Adapters between bytes and node sets.
//!
//! The chain inserts these when adjacent transforms disagree on their data
//! type; they never appear in documents.

use crate::transform::{DataType, Operation, Transform, TransformId, TransformIo, TransformUsage};
use solna_core::{algorithm, Error, Result};
use solna_xml::{NodeSet, ParserOptions, Selection, XmlDocument};

pub static XML_PARSER_ID: TransformId = TransformId {
    name: "xml-parser",
    href: algorithm::XML_PARSER,
    usage: TransformUsage::Internal,
};

pub static TEXT_CONTENT_ID: TransformId = TransformId {
    name: "text-content",
    href: algorithm::TEXT_CONTENT,
    usage: TransformUsage::Internal,
};

/// Bytes to node set. The parsed document is owned by the output node set.
#[derive(Debug, Default)]
pub struct XmlParserTransform {
    options: ParserOptions,
    data: Vec<u8>,
}

impl XmlParserTransform {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            data: Vec::new(),
        }
    }
}

impl Transform for XmlParserTransform {
    fn id(&self) -> &'static TransformId {
        &XML_PARSER_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Tree
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        self.data.extend(io.input.take());
        if self.data.len() > self.options.max_bytes {
            return Err(Error::XmlParse(format!(
                "input exceeds the {} byte limit",
                self.options.max_bytes
            )));
        }
        if last {
            let doc = XmlDocument::parse_bytes(&self.data, self.options.clone())?;
            self.data = Vec::new();
            io.output_nodes = Some(NodeSet::owned(
                doc,
                Selection::All {
                    with_comments: true,
                },
            ));
        }
        Ok(())
    }

    fn finalize(&mut self) {
        self.data = Vec::new();
    }
}

/// Node set to bytes: the concatenated text nodes of the selection, the
/// view of a node set the base64 transform expects.
#[derive(Debug, Default)]
pub struct TextContentTransform;

impl TextContentTransform {
    pub fn new() -> Self {
        Self
    }
}

impl Transform for TextContentTransform {
    fn id(&self) -> &'static TransformId {
        &TEXT_CONTENT_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Tree
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let Some(nodes) = io.input_nodes.take() else {
            return Ok(());
        };
        let doc = nodes.document().parse_doc()?;
        for node in doc
            .descendants()
            .filter(|n| n.is_text() && nodes.contains(*n))
        {
            io.output.append(node.text().unwrap_or("").as_bytes())?;
        }
        Ok(())
    }
}
