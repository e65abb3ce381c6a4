//! # Audio Kernel
//!
//! Real-time audio processing core: lock-free queues, a preallocated block
//! pool and a stateful DSP chain (noise suppression, NLMS echo cancellation,
//! gain normalization) behind an engine lifecycle and a C export surface.
//!
//! ## Application Architecture:
//! - **audio**: ring buffer, sample blocks, pool, buffer manager, DSP pipeline
//! - **engine**: lifecycle state machine, synchronous and threaded processing
//! - **config**: layered configuration (defaults, TOML file, environment)
//! - **state**: lock-free statistics publication
//! - **speech**: recognizer/synthesizer boundary
//! - **health**: serializable health reports
//! - **ffi**: raw-pointer entry points for other languages
//! - **error**: error taxonomy and status codes
//!
//! ## Usage Example:
//! ```rust
//! use audio_kernel::{AudioConfig, AudioEngine};
//!
//! let mut engine = AudioEngine::default();
//! engine.init(&AudioConfig::new(16000, 1, 16)).unwrap();
//! engine.start().unwrap();
//!
//! let input = vec![0.25f32; 512];
//! let mut output = vec![0.0f32; 512];
//! engine.process_audio(&input, &mut output).unwrap();
//! assert_eq!(engine.get_stats().frames_processed, 1);
//! ```

pub mod audio;   // Real-time building blocks (audio/ directory)
pub mod config;  // Configuration management (config.rs)
pub mod engine;  // Engine lifecycle (engine.rs)
pub mod error;   // Error handling types (error.rs)
pub mod ffi;     // C export surface (ffi.rs)
pub mod health;  // Health reports (health.rs)
pub mod speech;  // Speech inference boundary (speech.rs)
pub mod state;   // Statistics publication (state.rs)

pub use audio::block::SampleBlock;
pub use audio::buffer::{BufferManager, CaptureEndpoint, ProcessingEndpoint, RenderEndpoint};
pub use audio::pool::SampleBufferPool;
pub use audio::processor::{AdaptiveFilterState, DspPipeline};
pub use audio::ring_buffer::{Consumer, Producer, RingBuffer};
pub use config::{AudioConfig, DspSettings, EngineConfig, OverflowPolicy, QueueSettings};
pub use engine::{AudioEngine, EngineState};
pub use error::{EngineError, EngineResult};
pub use health::HealthReport;
pub use speech::{SpeechRecognizer, SpeechSynthesizer, Transcript};
pub use state::{AudioStats, StatsPublisher};
