#![forbid(unsafe_code)]

//! The transform abstraction.
//!
//! A transform is one algorithm instance in a chain. It reads bytes or a
//! node set from its input, writes bytes or a node set to its output, and
//! moves through a fixed lifecycle enforced by [`crate::Stage`].

use solna_core::{Buffer, Error, Result};
use solna_keys::{Key, KeyRequirement};
use solna_xml::NodeSet;

/// What a transform algorithm is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformUsage {
    /// A `<DigestMethod>`.
    Digest,
    /// A `<SignatureMethod>`.
    Signature,
    /// A block cipher in `<EncryptionMethod>`.
    Cipher,
    /// Key wrap or key transport in an `<EncryptedKey>`.
    KeyTransport,
    /// A `<CanonicalizationMethod>`; also valid inside `<Transforms>`.
    Canonicalization,
    /// Only valid inside `<Transforms>`.
    Generic,
    /// Inserted by the engine itself; never named by a document.
    Internal,
}

impl TransformUsage {
    /// Whether the algorithm may appear in a `<Transforms>` list.
    pub fn is_dsig_transform(self) -> bool {
        matches!(self, Self::Canonicalization | Self::Generic)
    }
}

/// Identity of a transform algorithm, shared by all its instances.
#[derive(Debug, PartialEq, Eq)]
pub struct TransformId {
    pub name: &'static str,
    pub href: &'static str,
    pub usage: TransformUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
}

/// The kind of data on one side of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Binary,
    Tree,
}

/// Lifecycle status. Only ever moves forward:
/// `None → Working → Finished`, then `Ok` or `Fail` after verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransformStatus {
    None,
    Working,
    Finished,
    Ok,
    Fail,
}

/// How a node set is turned into bytes when a binary transform follows a
/// tree transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeConversion {
    /// Canonical XML 1.0 without comments.
    Canonical,
    /// Concatenated text nodes (the base64 transform's view of a node set).
    TextContent,
}

/// Input and output slots of one transform.
///
/// Binary transforms drain `input` and append to `output`; tree transforms
/// take `input_nodes` and fill `output_nodes`.
#[derive(Debug, Default)]
pub struct TransformIo<'d> {
    pub input: Buffer,
    pub output: Buffer,
    pub input_nodes: Option<NodeSet<'d>>,
    pub output_nodes: Option<NodeSet<'d>>,
}

impl<'d> TransformIo<'d> {
    /// Whether unconsumed input is waiting.
    pub fn has_pending_input(&self) -> bool {
        !self.input.is_empty() || self.input_nodes.is_some()
    }

    /// Take the input node set, failing if there is none.
    pub fn take_input_nodes(&mut self, who: &str) -> Result<NodeSet<'d>> {
        self.input_nodes
            .take()
            .ok_or_else(|| Error::InvalidNodeSet(format!("{who}: no input node set")))
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
        self.input_nodes = None;
        self.output_nodes = None;
    }
}

/// One transform algorithm instance.
///
/// Implementations never see an out-of-order call; [`crate::Stage`] checks
/// the lifecycle before delegating.
pub trait Transform {
    fn id(&self) -> &'static TransformId;

    fn input_type(&self) -> DataType;

    fn output_type(&self) -> DataType;

    /// How a node set should be serialized when fed to this transform.
    /// Only consulted for binary-input transforms.
    fn tree_conversion(&self) -> TreeConversion {
        TreeConversion::Canonical
    }

    /// Read algorithm parameters from the `<Transform>`,
    /// `<SignatureMethod>`, `<DigestMethod>` or `<EncryptionMethod>`
    /// element.
    fn read_node(&mut self, _node: roxmltree::Node<'_, '_>) -> Result<()> {
        Ok(())
    }

    /// Prepare for `op`. Fails with `InvalidTransform` if the algorithm
    /// does not support it.
    fn initialize(&mut self, op: Operation) -> Result<()>;

    /// The key this transform needs, if any.
    fn key_requirement(&self) -> Option<KeyRequirement> {
        None
    }

    fn set_key(&mut self, _key: &Key) -> Result<()> {
        Err(Error::InvalidTransform(format!(
            "{} does not take a key",
            self.id().name
        )))
    }

    /// Consume all available input. Output is only complete after a call
    /// with `last` set.
    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()>;

    /// Compare the computed result with `expected`. A mismatch is
    /// `Ok(false)`, never an error.
    fn verify(&mut self, _expected: &[u8]) -> Result<bool> {
        Err(Error::InvalidTransform(format!(
            "{} cannot verify",
            self.id().name
        )))
    }

    /// Release algorithm state. Called at most once.
    fn finalize(&mut self) {}
}

impl std::fmt::Debug for dyn Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.id().name)
            .field("href", &self.id().href)
            .finish()
    }
}

/// Reject operations outside `allowed`.
pub fn require_operation(id: &TransformId, op: Operation, allowed: &[Operation]) -> Result<()> {
    if allowed.contains(&op) {
        Ok(())
    } else {
        Err(Error::InvalidTransform(format!(
            "{} does not support {op:?}",
            id.name
        )))
    }
}
