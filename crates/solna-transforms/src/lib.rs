#![forbid(unsafe_code)]

//! Transform pipeline engine for the Solna XML security engine.
//!
//! Every algorithm (canonicalization, digest, signature, cipher, and the
//! generic XML-DSig transforms) is a [`Transform`]. Transforms are wrapped
//! in lifecycle-checked [`Stage`]s and chained in a [`TransformChain`],
//! which moves bytes or node sets from stage to stage and inserts adapters
//! where adjacent data types differ.

pub mod base64_transform;
pub mod c14n_transform;
pub mod chain;
pub mod enveloped;
pub mod memory;
pub mod parser;
pub mod registry;
pub mod stage;
pub mod transform;
pub mod uri;
pub mod xpath_transform;

pub use chain::TransformChain;
pub use memory::MemoryTap;
pub use registry::{CryptoBackend, TransformRegistry};
pub use stage::Stage;
pub use transform::{
    require_operation, DataType, Operation, Transform, TransformId, TransformIo, TransformStatus,
    TransformUsage, TreeConversion,
};
pub use uri::{UriType, UriTypeSet};
