#![forbid(unsafe_code)]

//! DSig context: keys, configuration and results of one operation.

use crate::reference::{Manifest, Reference};
use solna_core::{Error, Outcome, Result};
use solna_keys::{KeyInfoContext, KeySource, KeysManager};
use solna_transforms::{TransformRegistry, UriTypeSet};
use solna_xml::ParserOptions;
use std::path::PathBuf;

/// Context for one XML-DSig sign or verify operation.
///
/// Configuration is plain public fields. After the operation the context
/// holds the per-reference results; it cannot be run a second time.
pub struct DsigContext<'r> {
    /// Where transforms come from.
    pub registry: &'r TransformRegistry,
    /// Keys manager for key lookup.
    pub keys_manager: KeysManager,
    /// How `<KeyInfo>` is searched. Inline key values are off unless the
    /// manager starts out empty.
    pub key_info_ctx: KeyInfoContext,
    /// Additional ID attribute names to register.
    pub id_attrs: Vec<String>,
    /// URI-to-file mappings for external references.
    pub url_maps: Vec<(String, String)>,
    /// Base directory for relative external references.
    pub base_dir: Option<PathBuf>,
    /// Minimum accepted `HMACOutputLength` in bits (0 = algorithm floor only).
    pub hmac_min_out_len: usize,
    /// Process `<Manifest>` references into [`DsigContext::manifests`].
    pub process_manifests: bool,
    /// Keep each reference's pre-digest bytes.
    pub store_references: bool,
    /// Keep the canonical `<SignedInfo>` bytes.
    pub store_signed_info: bool,
    /// Reference URI kinds that may be dereferenced.
    pub enabled_uri_types: UriTypeSet,
    /// If set, the only algorithms allowed in a reference's `<Transforms>`.
    pub enabled_transforms: Option<Vec<String>>,
    pub parser_options: ParserOptions,

    pub(crate) status: Outcome,
    pub(crate) references: Vec<Reference>,
    pub(crate) manifests: Vec<Manifest>,
    pub(crate) signed_info: Option<Vec<u8>>,
    pub(crate) signature_value: Option<Vec<u8>>,
    pub(crate) c14n_method: Option<String>,
    pub(crate) signature_method: Option<String>,
    pub(crate) key_source: Option<KeySource>,
    used: bool,
}

impl std::fmt::Debug for DsigContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsigContext")
            .field("status", &self.status)
            .field("references", &self.references.len())
            .field("manifests", &self.manifests.len())
            .field("signature_method", &self.signature_method)
            .field("key_source", &self.key_source)
            .finish_non_exhaustive()
    }
}

impl<'r> DsigContext<'r> {
    /// Create a new DSig context with the given registry and keys.
    pub fn new(registry: &'r TransformRegistry, keys_manager: KeysManager) -> Self {
        let key_info_ctx = KeyInfoContext::for_manager(&keys_manager);
        Self {
            registry,
            keys_manager,
            key_info_ctx,
            id_attrs: Vec::new(),
            url_maps: Vec::new(),
            base_dir: None,
            hmac_min_out_len: 0,
            process_manifests: false,
            store_references: false,
            store_signed_info: false,
            enabled_uri_types: UriTypeSet::default(),
            enabled_transforms: None,
            parser_options: ParserOptions::default(),
            status: Outcome::NotStarted,
            references: Vec::new(),
            manifests: Vec::new(),
            signed_info: None,
            signature_value: None,
            c14n_method: None,
            signature_method: None,
            key_source: None,
            used: false,
        }
    }

    /// Add an ID attribute name to register during processing.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    /// Map an external URI to a local file path.
    pub fn add_url_map(&mut self, url: &str, file_path: &str) {
        self.url_maps.push((url.to_owned(), file_path.to_owned()));
    }

    /// Overall result: the signature value and every `<SignedInfo>`
    /// reference. Manifest references never count.
    pub fn status(&self) -> Outcome {
        self.status
    }

    /// `<SignedInfo>` references, in document order.
    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Processed manifests, when [`DsigContext::process_manifests`] is set.
    pub fn manifests(&self) -> &[Manifest] {
        &self.manifests
    }

    /// Canonical `<SignedInfo>`, when [`DsigContext::store_signed_info`]
    /// is set.
    pub fn signed_info(&self) -> Option<&[u8]> {
        self.signed_info.as_deref()
    }

    /// The raw signature value produced or checked.
    pub fn signature_value(&self) -> Option<&[u8]> {
        self.signature_value.as_deref()
    }

    pub fn c14n_method(&self) -> Option<&str> {
        self.c14n_method.as_deref()
    }

    pub fn signature_method(&self) -> Option<&str> {
        self.signature_method.as_deref()
    }

    /// Where the signing or verification key came from.
    pub fn key_source(&self) -> Option<KeySource> {
        self.key_source
    }

    /// Mark the context as used; a second operation is an error.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.used {
            return Err(Error::InvalidStatus(
                "DsigContext has already been used".into(),
            ));
        }
        self.used = true;
        Ok(())
    }
}
