#![forbid(unsafe_code)]

//! Base64 decode transform.
//!
//! Streams: whitespace is dropped and complete four-character quanta are
//! decoded as they arrive, so memory stays bounded by one chunk.

use crate::transform::{
    DataType, Operation, Transform, TransformId, TransformIo, TransformUsage, TreeConversion,
};
use base64::Engine;
use solna_core::{algorithm, Error, Result};

pub static BASE64_ID: TransformId = TransformId {
    name: "base64",
    href: algorithm::BASE64,
    usage: TransformUsage::Generic,
};

#[derive(Debug, Default)]
pub struct Base64DecodeTransform {
    /// Undecoded characters carried over to the next chunk, fewer than four.
    pending: Vec<u8>,
}

impl Base64DecodeTransform {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transform for Base64DecodeTransform {
    fn id(&self) -> &'static TransformId {
        &BASE64_ID
    }

    fn input_type(&self) -> DataType {
        DataType::Binary
    }

    fn output_type(&self) -> DataType {
        DataType::Binary
    }

    fn tree_conversion(&self) -> TreeConversion {
        TreeConversion::TextContent
    }

    fn initialize(&mut self, _op: Operation) -> Result<()> {
        Ok(())
    }

    fn execute(&mut self, io: &mut TransformIo<'_>, last: bool) -> Result<()> {
        let input = io.input.take();
        self.pending
            .extend(input.into_iter().filter(|b| !b.is_ascii_whitespace()));

        let ready = if last {
            self.pending.len()
        } else {
            self.pending.len() - self.pending.len() % 4
        };
        if ready == 0 {
            return Ok(());
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&self.pending[..ready])
            .map_err(|e| Error::Base64(format!("decode error: {e}")))?;
        self.pending.drain(..ready);
        io.output.append(&decoded)
    }

    fn finalize(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_decode_across_chunks() {
        let mut t = Base64DecodeTransform::new();
        t.initialize(Operation::Verify).unwrap();
        let mut io = TransformIo::default();
        for (chunk, last) in [(&b"SGVs"[..], false), (b"bG8g\nV2", false), (b"9ybGQ=", true)] {
            io.input.append(chunk).unwrap();
            t.execute(&mut io, last).unwrap();
        }
        assert_eq!(io.output.as_slice(), b"Hello World");
    }

    #[test]
    fn test_invalid_input() {
        let mut t = Base64DecodeTransform::new();
        let mut io = TransformIo::default();
        io.input.append(b"!!!!").unwrap();
        assert!(matches!(t.execute(&mut io, true), Err(Error::Base64(_))));
    }
}
