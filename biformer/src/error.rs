use thiserror::Error;

/// The error type for `biformer-burn` operations.
///
/// Configuration problems are reported when a model is constructed, shape problems
/// before a forward pass starts, and checkpoint problems while fetching or loading
/// pretrained weights.
#[derive(Error, Debug)]
pub enum BiFormerError {
    /// The routing budget is neither positive nor the non-routed marker `-1`.
    #[error("topk should be > 0 or = -1, got {topk}")]
    InvalidTopk {
        /// The rejected routing budget.
        topk: i64,
    },

    /// A normalization layer was given an unknown data layout identifier.
    #[error("unsupported data format '{format}' (expected 'channels_last' or 'channels_first')")]
    UnsupportedDataFormat {
        /// The rejected identifier.
        format: String,
    },

    /// The configuration is logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// Why the configuration was rejected.
        reason: String,
    },

    /// An input tensor does not have a shape the network can process.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// Description of the accepted shapes.
        expected: String,
        /// The shape that was passed in.
        actual: String,
    },

    /// The model name is not present in the registry.
    #[error("unknown model '{name}' - available models: {available}")]
    UnknownModel {
        /// The requested model name.
        name: String,
        /// Comma-separated list of registered names.
        available: String,
    },

    /// The model is registered but has no pretrained checkpoint.
    #[error("model '{name}' has no pretrained checkpoint")]
    MissingCheckpoint {
        /// The requested model name.
        name: String,
    },

    /// Downloading a checkpoint failed.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed {
        /// The checkpoint URL.
        url: String,
        /// The transport or HTTP error.
        reason: String,
    },

    /// The checkpoint content does not match its expected SHA-256 prefix.
    #[error("hash mismatch for {file}: expected prefix {expected}, got {actual}")]
    HashMismatch {
        /// The checked file.
        file: String,
        /// The expected hex prefix.
        expected: String,
        /// The full hex digest of the file.
        actual: String,
    },

    /// File system error while reading or caching a checkpoint.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The checkpoint could not be turned into a model record.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The recorder error.
        reason: String,
    },
}

/// A specialized `Result` type for `biformer-burn` operations.
pub type BiFormerResult<T> = Result<T, BiFormerError>;
