#![forbid(unsafe_code)]

//! Ordered transform chains.
//!
//! A chain owns its stages in a `Vec`. Data pushed into the chain runs
//! through every stage in order; bytes and node sets are handed from one
//! stage's output slots to the next stage's input slots. When two adjacent
//! transforms disagree on their data type, an adapter is inserted: the XML
//! parser for bytes to tree, canonical XML or text content for tree to
//! bytes.

use crate::c14n_transform::C14nTransform;
use crate::parser::{TextContentTransform, XmlParserTransform};
use crate::stage::Stage;
use crate::transform::{DataType, Operation, Transform, TreeConversion};
use solna_c14n::C14nMode;
use solna_core::{Error, Outcome, Result};
use solna_xml::{NodeSet, ParserOptions};
use std::io::Read;

#[derive(Debug)]
pub struct TransformChain<'d> {
    operation: Operation,
    parser_options: ParserOptions,
    stages: Vec<Stage<'d>>,
}

impl<'d> TransformChain<'d> {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            parser_options: ParserOptions::default(),
            stages: Vec::new(),
        }
    }

    /// Options for any XML parser adapter the chain inserts.
    pub fn with_parser_options(mut self, options: ParserOptions) -> Self {
        self.parser_options = options;
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stages(&self) -> &[Stage<'d>] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&Stage<'d>> {
        self.stages.get(index)
    }

    pub fn stage_mut(&mut self, index: usize) -> Option<&mut Stage<'d>> {
        self.stages.get_mut(index)
    }

    pub fn first(&self) -> Option<&Stage<'d>> {
        self.stages.first()
    }

    pub fn last(&self) -> Option<&Stage<'d>> {
        self.stages.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut Stage<'d>> {
        self.stages.last_mut()
    }

    /// Names of all stages in order, adapters included.
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Append an initialized transform, inserting an adapter first if
    /// needed. Returns the index of the new stage.
    pub fn push(&mut self, transform: Box<dyn Transform>) -> Result<usize> {
        self.push_stage(transform, None)
    }

    /// Like [`TransformChain::push`], reading the algorithm parameters from
    /// `node` before the transform is initialized.
    pub fn push_with_params(
        &mut self,
        transform: Box<dyn Transform>,
        node: roxmltree::Node<'_, '_>,
    ) -> Result<usize> {
        self.push_stage(transform, Some(node))
    }

    fn push_stage(
        &mut self,
        transform: Box<dyn Transform>,
        node: Option<roxmltree::Node<'_, '_>>,
    ) -> Result<usize> {
        if let Some(prev) = self.stages.last() {
            if let Some(adapter) = self.adapter(prev.output_type(), transform.as_ref()) {
                log::debug!(
                    "inserting {} between {} and {}",
                    adapter.id().name,
                    prev.name(),
                    transform.id().name
                );
                let stage = self.new_stage(adapter, None)?;
                self.stages.push(stage);
            }
        }
        let stage = self.new_stage(transform, node)?;
        log::debug!("chain[{}] = {}", self.stages.len(), stage.name());
        self.stages.push(stage);
        Ok(self.stages.len() - 1)
    }

    fn new_stage(
        &self,
        transform: Box<dyn Transform>,
        node: Option<roxmltree::Node<'_, '_>>,
    ) -> Result<Stage<'d>> {
        let mut stage = Stage::new(transform);
        if let Some(node) = node {
            stage.read_node(node)?;
        }
        stage.initialize(self.operation)?;
        Ok(stage)
    }

    /// The adapter needed to feed `from` data into `next`, if any.
    fn adapter(&self, from: DataType, next: &dyn Transform) -> Option<Box<dyn Transform>> {
        match (from, next.input_type()) {
            (DataType::Binary, DataType::Tree) => Some(Box::new(XmlParserTransform::new(
                self.parser_options.clone(),
            ))),
            (DataType::Tree, DataType::Binary) => Some(match next.tree_conversion() {
                TreeConversion::Canonical => Box::new(C14nTransform::new(C14nMode::Inclusive)),
                TreeConversion::TextContent => Box::new(TextContentTransform::new()),
            }),
            _ => None,
        }
    }

    /// Insert an adapter at the front when the chain's input kind differs
    /// from what the first stage takes.
    fn adapt_input(&mut self, input: DataType) -> Result<()> {
        let Some(first) = self.stages.first() else {
            return Err(Error::InvalidStatus("push into an empty chain".into()));
        };
        if let Some(adapter) = self.adapter(input, first.transform()) {
            log::debug!("inserting {} before {}", adapter.id().name, first.name());
            let stage = self.new_stage(adapter, None)?;
            self.stages.insert(0, stage);
        }
        Ok(())
    }

    /// Feed a chunk of bytes. The chain output is complete after a call
    /// with `last` set.
    pub fn push_binary(&mut self, chunk: &[u8], last: bool) -> Result<()> {
        self.adapt_input(DataType::Binary)?;
        self.stages[0].io.input.append(chunk)?;
        self.run(last)
    }

    /// Feed a node set. Always the last input.
    pub fn push_tree(&mut self, nodes: NodeSet<'d>) -> Result<()> {
        self.adapt_input(DataType::Tree)?;
        self.stages[0].io.input_nodes = Some(nodes);
        self.run(true)
    }

    /// Stream `reader` through the chain in chunks of `chunk_size` bytes.
    pub fn push_reader(&mut self, mut reader: impl Read, chunk_size: usize) -> Result<()> {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        loop {
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return self.push_binary(&[], true);
            }
            self.push_binary(&chunk[..n], false)?;
        }
    }

    fn run(&mut self, last: bool) -> Result<()> {
        for i in 0..self.stages.len() {
            self.stages[i].execute(last)?;
            let (head, tail) = self.stages.split_at_mut(i + 1);
            let Some(next) = tail.first_mut() else {
                break;
            };
            let from = &mut head[i].io;
            if !from.output.is_empty() {
                let bytes = from.output.take();
                next.io.input.append(&bytes)?;
            }
            if let Some(nodes) = from.output_nodes.take() {
                next.io.input_nodes = Some(nodes);
            }
        }
        Ok(())
    }

    /// Output bytes of the last stage.
    pub fn output(&self) -> &[u8] {
        self.stages
            .last()
            .map(|s| s.io.output.as_slice())
            .unwrap_or_default()
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        self.stages
            .last_mut()
            .map(|s| s.io.output.take())
            .unwrap_or_default()
    }

    /// Output node set of the last stage, for chains ending in a tree
    /// transform.
    pub fn take_output_nodes(&mut self) -> Option<NodeSet<'d>> {
        self.stages.last_mut().and_then(|s| s.io.output_nodes.take())
    }

    /// Verify the result of the last stage against `expected`.
    pub fn verify_last(&mut self, expected: &[u8]) -> Result<Outcome> {
        self.stages
            .last_mut()
            .ok_or_else(|| Error::InvalidStatus("verify on an empty chain".into()))?
            .verify(expected)
    }

    /// Whether every stage has finished.
    pub fn is_finished(&self) -> bool {
        !self.stages.is_empty()
            && self
                .stages
                .iter()
                .all(|s| s.status() >= crate::transform::TransformStatus::Finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base64_transform::Base64DecodeTransform;
    use crate::enveloped::EnvelopedSignatureTransform;
    use crate::transform::{TransformId, TransformIo, TransformStatus, TransformUsage};
    use proptest::prelude::*;
    use solna_xml::XmlDocument;

    static REVERSE: TransformId = TransformId {
        name: "reverse",
        href: "urn:test:reverse",
        usage: TransformUsage::Generic,
    };
    static APPEND: TransformId = TransformId {
        name: "append",
        href: "urn:test:append",
        usage: TransformUsage::Generic,
    };

    #[derive(Default)]
    struct Reverse(Vec<u8>);

    impl Transform for Reverse {
        fn id(&self) -> &'static TransformId {
            &REVERSE
        }
        fn input_type(&self) -> DataType {
            DataType::Binary
        }
        fn output_type(&self) -> DataType {
            DataType::Binary
        }
        fn initialize(&mut self, _op: Operation) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
            self.0.extend(io.input.take());
            if last {
                self.0.reverse();
                io.output.append(&self.0)?;
            }
            Ok(())
        }
    }

    struct Append(u8);

    impl Transform for Append {
        fn id(&self) -> &'static TransformId {
            &APPEND
        }
        fn input_type(&self) -> DataType {
            DataType::Binary
        }
        fn output_type(&self) -> DataType {
            DataType::Binary
        }
        fn initialize(&mut self, _op: Operation) -> Result<()> {
            Ok(())
        }
        fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
            let data = io.input.take();
            io.output.append(&data)?;
            if last {
                io.output.append(&[self.0])?;
            }
            Ok(())
        }
    }

    fn run_binary(transforms: Vec<Box<dyn Transform>>, data: &[u8]) -> Vec<u8> {
        let mut chain = TransformChain::new(Operation::Sign);
        for t in transforms {
            chain.push(t).unwrap();
        }
        chain.push_binary(data, true).unwrap();
        chain.take_output()
    }

    #[test]
    fn test_streaming_through_stages() {
        let mut chain = TransformChain::new(Operation::Verify);
        chain.push(Box::new(Base64DecodeTransform::new())).unwrap();
        chain.push(Box::new(Reverse::default())).unwrap();
        chain.push_binary(b"YWJj", false).unwrap();
        chain.push_binary(b"ZGVm", true).unwrap();
        assert_eq!(chain.output(), b"fedcba");
        assert!(chain.is_finished());
    }

    #[test]
    fn test_input_after_finish_is_invalid_status() {
        let mut chain = TransformChain::new(Operation::Sign);
        chain.push(Box::new(Append(b'!'))).unwrap();
        chain.push_binary(b"a", true).unwrap();
        assert!(matches!(
            chain.push_binary(b"b", true),
            Err(Error::InvalidStatus(_))
        ));
        assert_eq!(chain.stage(0).unwrap().status(), TransformStatus::Finished);
    }

    #[test]
    fn test_empty_chain() {
        let mut chain = TransformChain::new(Operation::Sign);
        assert!(chain.push_binary(b"x", true).is_err());
        assert!(chain.verify_last(b"x").is_err());
    }

    #[test]
    fn test_adapters_inserted_between_types() {
        let mut chain = TransformChain::new(Operation::Verify);
        chain.push(Box::new(Append(b'.'))).unwrap();
        chain
            .push(Box::new(EnvelopedSignatureTransform::for_signature(0)))
            .unwrap();
        chain.push(Box::new(Base64DecodeTransform::new())).unwrap();
        assert_eq!(
            chain.names(),
            ["append", "xml-parser", "enveloped-signature", "text-content", "base64"]
        );
    }

    #[test]
    fn test_tree_input_gets_canonicalized() {
        let doc = XmlDocument::parse("<r b='2' a='1'><!--c--></r>".into()).unwrap();
        let mut chain = TransformChain::new(Operation::Sign);
        chain.push(Box::new(Append(b'.'))).unwrap();
        chain.push_tree(NodeSet::all(&doc, false)).unwrap();
        assert_eq!(chain.names(), ["c14n", "append"]);
        assert_eq!(chain.output(), br#"<r a="1" b="2"></r>."#);
    }

    #[test]
    fn test_push_reader_in_small_chunks() {
        let mut chain = TransformChain::new(Operation::Verify);
        chain.push(Box::new(Base64DecodeTransform::new())).unwrap();
        chain.push_reader(&b"SGVsbG8sIHdvcmxkIQ=="[..], 3).unwrap();
        assert_eq!(chain.output(), b"Hello, world!");
    }

    #[test]
    fn test_binary_input_parsed_for_tree_transform() {
        let xml = br#"<doc><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"/><v>1</v></doc>"#;
        let mut chain = TransformChain::new(Operation::Verify);
        // Node 2 is the Signature element: root, doc, Signature.
        chain
            .push(Box::new(EnvelopedSignatureTransform::for_signature(2)))
            .unwrap();
        chain.push(Box::new(Append(b'.'))).unwrap();
        chain.push_binary(xml, true).unwrap();
        assert_eq!(chain.first().unwrap().name(), "xml-parser");
        assert_eq!(chain.output(), b"<doc><v>1</v></doc>.");
    }

    proptest! {
        #[test]
        fn reordering_changes_result(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            extra in any::<u8>(),
        ) {
            prop_assume!(data.iter().any(|b| *b != extra));
            let reverse = || Box::new(Reverse::default()) as Box<dyn Transform>;
            let append = || Box::new(Append(extra)) as Box<dyn Transform>;
            let forward = run_binary(vec![reverse(), append()], &data);
            let backward = run_binary(vec![append(), reverse()], &data);
            prop_assert_ne!(forward, backward);
        }
    }
}
