//! # Speech Boundary
//!
//! Recognition and synthesis backends are opaque to the kernel. The engine
//! only guarantees where the DSP chain sits relative to them:
//! - **Recognition**: samples go through the pipeline first, then to the recognizer
//! - **Synthesis**: synthesized samples go through the pipeline before playback
//!
//! Backends report failures through `anyhow`; the engine surfaces them as
//! [`EngineError::Speech`].

use crate::config::AudioConfig;
use crate::engine::AudioEngine;
use crate::error::{EngineError, EngineResult};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

/// Result of a recognition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    /// The recognized text
    pub text: String,

    /// Backend confidence (0.0 to 1.0)
    pub confidence: f32,

    /// Duration of the audio handed to the recognizer
    pub audio_duration_ms: f64,

    /// Time the recognizer took
    pub processing_time_ms: u64,
}

/// Speech-to-text backend.
pub trait SpeechRecognizer {
    fn recognize(&mut self, samples: &[f32], format: &AudioConfig) -> anyhow::Result<Transcript>;
}

/// Text-to-speech backend producing samples in `format`.
pub trait SpeechSynthesizer {
    fn synthesize(&mut self, text: &str, format: &AudioConfig) -> anyhow::Result<Vec<f32>>;
}

impl AudioEngine {
    /// Clean up `input` with the DSP chain, then hand it to `recognizer`.
    pub fn transcribe<R>(&mut self, recognizer: &mut R, input: &[f32]) -> EngineResult<Transcript>
    where
        R: SpeechRecognizer + ?Sized,
    {
        if input.is_empty() {
            return Err(EngineError::Speech("audio data is empty".to_string()));
        }

        let mut samples = input.to_vec();
        self.process_in_place(&mut samples)?;

        let format = self.config().audio;
        let start = Instant::now();
        let transcript = recognizer
            .recognize(&samples, &format)
            .map_err(|e| EngineError::Speech(e.to_string()))?;

        let _guard = self.span().enter();
        debug!(
            audio_ms = format.duration_ms(samples.len()),
            elapsed_ms = start.elapsed().as_millis() as u64,
            confidence = transcript.confidence,
            "Transcription complete"
        );
        Ok(transcript)
    }

    /// Synthesize `text` and run the result through the DSP chain.
    pub fn synthesize<S>(&mut self, synthesizer: &mut S, text: &str) -> EngineResult<Vec<f32>>
    where
        S: SpeechSynthesizer + ?Sized,
    {
        self.ensure_running()?;

        if text.trim().is_empty() {
            return Err(EngineError::Speech("text is empty".to_string()));
        }

        let format = self.config().audio;
        let mut samples = synthesizer
            .synthesize(text, &format)
            .map_err(|e| EngineError::Speech(e.to_string()))?;
        self.process_in_place(&mut samples)?;

        let _guard = self.span().enter();
        debug!(
            chars = text.len(),
            samples = samples.len(),
            "Synthesis complete"
        );
        Ok(samples)
    }
}
