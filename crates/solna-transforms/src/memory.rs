#![forbid(unsafe_code)]

//! Pass-through transform that keeps a copy of everything it sees.
//!
//! Inserted before a digest or signature transform to capture the
//! pre-digest bytes of a reference or the canonical `<SignedInfo>`.

use crate::transform::{DataType, Operation, Transform, TransformId, TransformIo, TransformUsage};
use solna_core::{algorithm, Result};
use std::cell::RefCell;
use std::rc::Rc;

pub static MEMORY_BUFFER_ID: TransformId = TransformId {
    name: "memory-buffer",
    href: algorithm::MEMORY_BUFFER,
    usage: TransformUsage::Internal,
};

/// Shared handle to the captured bytes. Stays readable after the chain is
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct MemoryTap(Rc<RefCell<Vec<u8>>>);

impl MemoryTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of the bytes captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBufferTransform {
    tap: MemoryTap,
}

impl MemoryBufferTransform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tap(tap: MemoryTap) -> Self {
        Self { tap }
    }

    pub fn tap(&self) -> MemoryTap {
        self.tap.clone()
    }
}

impl Transform for MemoryBufferTransform {
    fn id(&self) -> &'static TransformId {
        &MEMORY_BUFFER_ID
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

    fn execute(&mut self, io: &mut TransformIo<'_>, _last: bool) -> Result<()> {
        let data = io.input.take();
        self.tap.0.borrow_mut().extend_from_slice(&data);
        io.output.append(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_outlives_transform() {
        let tap = MemoryTap::new();
        {
            let mut t = MemoryBufferTransform::with_tap(tap.clone());
            let mut io = TransformIo::default();
            io.input.append(b"abc").unwrap();
            t.execute(&mut io, false).unwrap();
            io.input.append(b"def").unwrap();
            t.execute(&mut io, true).unwrap();
            assert_eq!(io.output.as_slice(), b"abcdef");
        }
        assert_eq!(tap.contents(), b"abcdef");
        assert_eq!(tap.take(), b"abcdef");
        assert!(tap.contents().is_empty());
    }
}
