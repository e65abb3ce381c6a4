//! # Audio Processing Module
//!
//! Real-time building blocks underneath the engine.
//!
//! ## Key Components:
//! - **Ring Buffer**: wait-free SPSC queue with split producer/consumer handles
//! - **Sample Blocks**: fixed-capacity float blocks that move by ownership
//! - **Buffer Pool**: preallocated blocks, checked out and released without allocation
//! - **Buffer Manager**: pool plus input/output queues, split per thread role
//! - **DSP Pipeline**: noise suppression, echo cancellation, gain normalization
//! - **PCM**: 16-bit little-endian conversion at the codec boundary
//!
//! ## Audio Format:
//! Samples are interleaved `f32` in `[-1.0, 1.0]`. The stream defaults to
//! 16 kHz, mono, 16-bit source PCM.

pub mod block;       // Fixed-capacity sample blocks
pub mod buffer;      // Pool + queues, split into capture/processing/render endpoints
pub mod pcm;         // 16-bit PCM <-> f32
pub mod pool;        // Preallocated block pool
pub mod processor;   // Stateful DSP chain
pub mod ring_buffer; // Lock-free SPSC queue
pub mod stages;      // Individual in-place DSP stages
