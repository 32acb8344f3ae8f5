//! Named model presets and their pretrained checkpoints.

use std::collections::BTreeMap;

use crate::{
    config::BiFormerConfig,
    error::{BiFormerError, BiFormerResult},
};

/// Where a pretrained checkpoint lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointSource {
    /// Checkpoint identifier, e.g. `biformer_stl_nchw_in1k`.
    pub key: String,
    pub url: String,
    /// Local file name used when caching the download.
    pub file_name: String,
    /// Expected leading hex digits of the file's SHA-256. When absent, the hash is taken
    /// from a `-<hex>.` segment of `file_name` if it has one.
    pub sha256_prefix: Option<String>,
}

impl CheckpointSource {
    pub fn new(key: impl Into<String>, url: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            file_name: format!("{key}.pth"),
            key,
            url: url.into(),
            sha256_prefix: None,
        }
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    #[must_use]
    pub fn with_sha256_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sha256_prefix = Some(prefix.into());
        self
    }
}

/// A registered model: how to configure it and where its weights are.
#[derive(Debug, Clone)]
pub struct ModelSpec {
    pub config_builder: fn() -> BiFormerConfig,
    pub checkpoint: Option<CheckpointSource>,
}

/// Model names mapped to their specs.
///
/// The registry is a plain value: build one, register additional models on it and pass
/// it to whatever needs to resolve names.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    specs: BTreeMap<String, ModelSpec>,
}

impl ModelRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The published models.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "biformer_stl_nchw",
            ModelSpec {
                config_builder: BiFormerConfig::biformer_stl_nchw,
                checkpoint: Some(CheckpointSource::new(
                    "biformer_stl_nchw_in1k",
                    "https://matix.li/216749d857fd",
                )),
            },
        );
        registry
    }

    /// Adds or replaces a model.
    pub fn register(&mut self, name: impl Into<String>, spec: ModelSpec) -> &mut Self {
        self.specs.insert(name.into(), spec);
        self
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns [`BiFormerError::UnknownModel`] if `name` is not registered.
    pub fn get(&self, name: &str) -> BiFormerResult<&ModelSpec> {
        self.specs.get(name).ok_or_else(|| BiFormerError::UnknownModel {
            name: name.to_owned(),
            available: self.names().collect::<Vec<_>>().join(", "),
        })
    }

    /// # Errors
    ///
    /// Returns [`BiFormerError::UnknownModel`] if `name` is not registered.
    pub fn config(&self, name: &str) -> BiFormerResult<BiFormerConfig> {
        self.get(name).map(|spec| (spec.config_builder)())
    }

    /// # Errors
    ///
    /// Returns [`BiFormerError::UnknownModel`] if `name` is not registered, or
    /// [`BiFormerError::MissingCheckpoint`] if it has no pretrained weights.
    pub fn checkpoint(&self, name: &str) -> BiFormerResult<&CheckpointSource> {
        self.get(name)?
            .checkpoint
            .as_ref()
            .ok_or_else(|| BiFormerError::MissingCheckpoint {
                name: name.to_owned(),
            })
    }
}
