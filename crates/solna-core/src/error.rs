#![forbid(unsafe_code)]

/// Errors produced by the Solna XML security engine.
///
/// A failed verification is never reported through this type: verification
/// outcomes travel as [`crate::Outcome`] inside an `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid XML structure: {0}")]
    XmlStructure(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    #[error("invalid transform status: {0}")]
    InvalidStatus(String),

    #[error("invalid key data: {0}")]
    InvalidKeyData(String),

    #[error("key not found: {0}")]
    MissingKey(String),

    #[error("key usage mismatch: {0}")]
    KeyUsageMismatch(String),

    #[error("size mismatch: {0}")]
    SizeMismatch(String),

    #[error("crypto backend error: {0}")]
    Backend(String),

    #[error("invalid node set: {0}")]
    InvalidNodeSet(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures raised by the tree provider (parse, structure,
    /// missing element or attribute).
    pub fn is_tree_error(&self) -> bool {
        matches!(
            self,
            Self::XmlParse(_)
                | Self::XmlStructure(_)
                | Self::MissingElement(_)
                | Self::MissingAttribute(_)
        )
    }

    /// True for failures raised while negotiating or binding a key.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidKeyData(_) | Self::MissingKey(_) | Self::KeyUsageMismatch(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_groups() {
        assert!(Error::XmlParse("x".into()).is_tree_error());
        assert!(Error::MissingElement("SignedInfo".into()).is_tree_error());
        assert!(!Error::Backend("x".into()).is_tree_error());
        assert!(Error::KeyUsageMismatch("x".into()).is_key_error());
        assert!(!Error::SizeMismatch("x".into()).is_key_error());
    }

    #[test]
    fn test_display() {
        let e = Error::InvalidStatus("execute before initialize".into());
        assert_eq!(
            e.to_string(),
            "invalid transform status: execute before initialize"
        );
    }
}
