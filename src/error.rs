//! # Error Handling
//!
//! Error types for the audio kernel and their mapping onto the numeric status
//! codes returned across the C export surface.
//!
//! ## Error Categories:
//! - **Configuration**: invalid sample rate / channel layout at `init`
//! - **Lifecycle misuse**: processing or starting before `init`, after `stop`
//! - **Resource exhaustion**: pool empty or queue full (never fatal)
//! - **Boundary errors**: malformed PCM from the codec layer, failing speech backends
//!
//! Every variant is recovered locally and surfaced as a `Result` or a status
//! code. Nothing in here terminates the process.

use std::fmt;

/// Errors produced by the engine, the pipeline and the buffer plumbing.
///
/// ## Usage Example:
/// ```rust
/// use audio_kernel::error::EngineError;
/// let err = EngineError::NotRunning;
/// assert!(err.status_code() < 0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Configuration rejected during `init` or validation
    Config(String),

    /// Operation requires `init` first
    NotInitialized,

    /// Operation requires a running engine
    NotRunning,

    /// The pipeline is owned by the processing thread right now
    PipelineDetached,

    /// Caller-provided output cannot hold the processed input
    BufferMismatch { input: usize, output: usize },

    /// Every pooled block is checked out
    PoolExhausted,

    /// The ring buffer has no free slot
    QueueFull,

    /// PCM data handed over by the codec layer is malformed
    Codec(String),

    /// A speech recognizer or synthesizer failed
    Speech(String),

    /// Anything else (thread join failures, spawn failures)
    Internal(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Config(msg) => write!(f, "Configuration error: {}", msg),
            EngineError::NotInitialized => write!(f, "Audio engine is not initialized"),
            EngineError::NotRunning => write!(f, "Audio engine is not running"),
            EngineError::PipelineDetached => {
                write!(f, "DSP pipeline is owned by the processing thread")
            }
            EngineError::BufferMismatch { input, output } => write!(
                f,
                "Output buffer too small: input has {} samples, output holds {}",
                input, output
            ),
            EngineError::PoolExhausted => write!(f, "Sample buffer pool exhausted"),
            EngineError::QueueFull => write!(f, "Ring buffer is full"),
            EngineError::Codec(msg) => write!(f, "PCM codec error: {}", msg),
            EngineError::Speech(msg) => write!(f, "Speech backend error: {}", msg),
            EngineError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    /// Numeric status for the C export surface.
    ///
    /// ## Mapping:
    /// - `0` is reserved for success and never returned here
    /// - lifecycle misuse → `-1`
    /// - configuration → `-2`, buffer errors → `-3`, resource exhaustion → `-4`
    /// - codec → `-5`, speech backends → `-6`, internal → `-99`
    pub fn status_code(&self) -> i32 {
        match self {
            EngineError::NotInitialized
            | EngineError::NotRunning
            | EngineError::PipelineDetached => -1,
            EngineError::Config(_) => -2,
            EngineError::BufferMismatch { .. } => -3,
            EngineError::PoolExhausted | EngineError::QueueFull => -4,
            EngineError::Codec(_) => -5,
            EngineError::Speech(_) => -6,
            EngineError::Internal(_) => -99,
        }
    }

    /// True for the non-fatal exhaustion family (drop the block and carry on).
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, EngineError::PoolExhausted | EngineError::QueueFull)
    }
}

/// Configuration validation runs through `anyhow`; failures surface as
/// configuration errors at the engine boundary.
impl From<anyhow::Error> for EngineError {
    fn from(err: anyhow::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Shorthand for results carrying an [`EngineError`].
pub type EngineResult<T> = Result<T, EngineError>;
