#![forbid(unsafe_code)]

//! Core types for the Solna XML security engine.
//!
//! Everything here is shared by every other crate in the workspace: the
//! error taxonomy, the verification [`Outcome`], algorithm and namespace
//! identifiers, and the [`Buffer`] that transforms read from and write to.

pub mod algorithm;
pub mod buffer;
pub mod error;
pub mod ns;

pub use buffer::Buffer;
pub use error::{Error, Result};

/// Result of a verification step, reported separately from [`Error`].
///
/// `Ok(Outcome::Failed)` means the call ran to completion and the data did
/// not match. It is never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    NotStarted,
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }
}
