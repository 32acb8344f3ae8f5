//! Fetching, verifying and loading pretrained checkpoints.
//!
//! Checkpoints are resolved through a [`CheckpointFetcher`], verified against a SHA-256
//! prefix and, with the `pretrained` feature, read from PyTorch `.pth` files into a
//! [`crate::BiFormer`].

use std::{
    fs::File,
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};

use crate::{
    error::{BiFormerError, BiFormerResult},
    registry::{CheckpointSource, ModelRegistry},
};

/// Resolves a checkpoint to a file on disk.
pub trait CheckpointFetcher {
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be found or downloaded.
    fn fetch(&self, source: &CheckpointSource) -> BiFormerResult<PathBuf>;
}

/// Looks checkpoints up by file name in a directory.
#[derive(Debug, Clone)]
pub struct LocalFetcher {
    dir: PathBuf,
}

impl LocalFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl CheckpointFetcher for LocalFetcher {
    fn fetch(&self, source: &CheckpointSource) -> BiFormerResult<PathBuf> {
        let path = self.dir.join(&source.file_name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("checkpoint '{}' not found at {}", source.key, path.display()),
            )
            .into())
        }
    }
}

#[cfg(feature = "pretrained")]
pub use http::HttpFetcher;

#[cfg(feature = "pretrained")]
mod http {
    use std::{
        fs::{self, File},
        io,
        path::{Path, PathBuf},
    };

    use super::CheckpointFetcher;
    use crate::{
        error::{BiFormerError, BiFormerResult},
        registry::CheckpointSource,
    };

    /// Downloads checkpoints over HTTP into a cache directory, reusing cached files.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        cache_dir: PathBuf,
    }

    impl HttpFetcher {
        pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
            Self {
                cache_dir: cache_dir.into(),
            }
        }

        /// Caches under the platform cache directory, e.g. `~/.cache/biformer-burn/checkpoints`.
        ///
        /// # Errors
        ///
        /// Returns [`BiFormerError::Io`] if the platform has no cache directory.
        pub fn with_default_cache() -> BiFormerResult<Self> {
            let base = dirs::cache_dir().ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, "no cache directory on this platform")
            })?;
            Ok(Self::new(base.join("biformer-burn").join("checkpoints")))
        }

        pub fn cache_dir(&self) -> &Path {
            &self.cache_dir
        }
    }

    impl CheckpointFetcher for HttpFetcher {
        fn fetch(&self, source: &CheckpointSource) -> BiFormerResult<PathBuf> {
            let path = self.cache_dir.join(&source.file_name);
            if path.is_file() {
                tracing::info!(path = %path.display(), "using cached checkpoint");
                return Ok(path);
            }

            fs::create_dir_all(&self.cache_dir)?;
            tracing::info!(url = %source.url, path = %path.display(), "downloading checkpoint");

            let download_failed = |reason: String| BiFormerError::DownloadFailed {
                url: source.url.clone(),
                reason,
            };
            let response = ureq::get(&source.url)
                .call()
                .map_err(|e| download_failed(e.to_string()))?;

            // Written next to the target and renamed so a partial download is never cached.
            let partial = path.with_extension("part");
            let mut file = File::create(&partial)?;
            if let Err(e) = io::copy(&mut response.into_reader(), &mut file) {
                drop(file);
                let _ = fs::remove_file(&partial);
                return Err(download_failed(e.to_string()));
            }
            file.sync_all()?;
            fs::rename(&partial, &path)?;

            Ok(path)
        }
    }
}

/// Hex SHA-256 digest of a file.
///
/// # Errors
///
/// Returns [`BiFormerError::Io`] if the file cannot be read.
pub fn sha256_file(path: &Path) -> BiFormerResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash prefix embedded in a torch-hub style file name, `name-<hex>.ext`.
pub fn hash_prefix_from_file_name(file_name: &str) -> Option<&str> {
    file_name.match_indices('-').find_map(|(index, _)| {
        let rest = &file_name[index + 1..];
        let len = rest
            .bytes()
            .take_while(|&b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
            .count();
        (len > 0 && rest[len..].starts_with('.')).then(|| &rest[..len])
    })
}

/// Checks a fetched checkpoint against its expected SHA-256 prefix.
///
/// The prefix comes from [`CheckpointSource::sha256_prefix`] or, failing that, from the
/// file name. Without either the check is skipped with a warning.
///
/// # Errors
///
/// Returns [`BiFormerError::HashMismatch`] if the digest does not start with the expected
/// prefix, or [`BiFormerError::Io`] if the file cannot be read.
pub fn verify_checkpoint(path: &Path, source: &CheckpointSource) -> BiFormerResult<()> {
    let expected = source
        .sha256_prefix
        .as_deref()
        .or_else(|| hash_prefix_from_file_name(&source.file_name))
        .map(str::to_ascii_lowercase);

    let Some(expected) = expected else {
        tracing::warn!(
            checkpoint = %source.key,
            "no known SHA-256 for checkpoint, skipping verification"
        );
        return Ok(());
    };

    let actual = sha256_file(path)?;
    if !actual.starts_with(&expected) {
        return Err(BiFormerError::HashMismatch {
            file: path.display().to_string(),
            expected,
            actual,
        });
    }

    tracing::info!(checkpoint = %source.key, sha256 = %actual, "checkpoint verified");
    Ok(())
}

/// Resolves and verifies the checkpoint of a registered model.
///
/// # Errors
///
/// Returns the registry, fetcher or verification error.
pub fn fetch_checkpoint(
    registry: &ModelRegistry,
    name: &str,
    fetcher: &impl CheckpointFetcher,
) -> BiFormerResult<PathBuf> {
    let source = registry.checkpoint(name)?;
    let path = fetcher.fetch(source)?;
    verify_checkpoint(&path, source)?;
    Ok(path)
}

#[cfg(feature = "pretrained")]
pub use pytorch::{load_pretrained, load_pytorch_checkpoint};

#[cfg(feature = "pretrained")]
mod pytorch {
    use std::path::Path;

    use burn::{
        prelude::*,
        record::{FullPrecisionSettings, Recorder},
    };
    use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

    use super::{fetch_checkpoint, CheckpointFetcher};
    use crate::{
        error::{BiFormerError, BiFormerResult},
        models::{BiFormer, BiFormerRecord},
        registry::ModelRegistry,
    };

    /// Builds a registered model and loads its pretrained weights.
    ///
    /// # Errors
    ///
    /// Returns the registry, fetch, verification, construction or loading error.
    pub fn load_pretrained<B: Backend>(
        registry: &ModelRegistry,
        name: &str,
        fetcher: &impl CheckpointFetcher,
        device: &B::Device,
    ) -> BiFormerResult<BiFormer<B>> {
        let model = registry.config(name)?.init::<B>(device)?;
        let path = fetch_checkpoint(registry, name, fetcher)?;
        tracing::info!(model = name, path = %path.display(), "loading pretrained weights");
        load_pytorch_checkpoint(model, &path, device)
    }

    /// Loads a PyTorch checkpoint whose state dict sits under the `"model"` key.
    ///
    /// # Errors
    ///
    /// Returns [`BiFormerError::WeightLoadingFailed`] if the file cannot be decoded or a
    /// parameter is missing.
    pub fn load_pytorch_checkpoint<B: Backend>(
        model: BiFormer<B>,
        path: &Path,
        device: &B::Device,
    ) -> BiFormerResult<BiFormer<B>> {
        let load_args = LoadArgs::new(path.to_path_buf())
            .with_top_level_key("model")
            // Stem is conv then norm, merges are norm then conv.
            .with_key_remap(r"downsample_layers\.0\.0\.(.+)", "downsample_layers.0.proj.$1")
            .with_key_remap(r"downsample_layers\.0\.1\.(.+)", "downsample_layers.0.norm.$1")
            .with_key_remap(r"downsample_layers\.([1-3])\.0\.(.+)", "downsample_layers.$1.norm.$2")
            .with_key_remap(r"downsample_layers\.([1-3])\.1\.(.+)", "downsample_layers.$1.proj.$2")
            .with_key_remap(r"(.+)\.mlp\.0\.(.+)", "$1.mlp.fc1.$2")
            .with_key_remap(r"(.+)\.mlp\.2\.(.+)", "$1.mlp.fc2.$2");

        let record: BiFormerRecord<B> = PyTorchFileRecorder::<FullPrecisionSettings>::default()
            .load(load_args, device)
            .map_err(|e| BiFormerError::WeightLoadingFailed {
                reason: e.to_string(),
            })?;

        Ok(model.load_record(record))
    }
}
