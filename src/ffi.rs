//! # C Export Surface
//!
//! Raw-pointer entry points for cross-language callers. Each engine lives
//! behind an opaque [`EngineHandle`] created by `audio_engine_create` and
//! destroyed by `audio_engine_cleanup`; callers that want a single
//! process-wide engine simply create one.
//!
//! ## Status Codes:
//! - `0`: success
//! - negative: [`EngineError::status_code`], or `-1` for a null handle
//!
//! No function unwinds across the boundary; a panic becomes `-99`.

use crate::config::{AudioConfig, EngineConfig};
use crate::engine::AudioEngine;
use crate::error::{EngineError, EngineResult};
use crate::state::AudioStats;
use std::os::raw::c_int;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::slice;
use tracing::error;

const STATUS_OK: c_int = 0;
const STATUS_NULL_HANDLE: c_int = -1;
const STATUS_NULL_BUFFER: c_int = -3;
const STATUS_PANIC: c_int = -99;

/// Opaque engine handle for C callers.
pub struct EngineHandle {
    engine: AudioEngine,
}

fn status(result: EngineResult<()>) -> c_int {
    match result {
        Ok(()) => STATUS_OK,
        Err(e) => e.status_code(),
    }
}

/// Run `f` on the engine behind `handle`, converting panics into a status.
///
/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
unsafe fn with_engine<F>(handle: *mut EngineHandle, f: F) -> c_int
where
    F: FnOnce(&mut AudioEngine) -> c_int,
{
    // SAFETY: the caller guarantees `handle` is null or live and unaliased.
    let Some(handle) = (unsafe { handle.as_mut() }) else {
        return STATUS_NULL_HANDLE;
    };

    catch_unwind(AssertUnwindSafe(|| f(&mut handle.engine))).unwrap_or_else(|_| {
        error!("Panic caught at the C boundary");
        STATUS_PANIC
    })
}

/// Allocate a new, uninitialized engine with default settings.
#[no_mangle]
pub extern "C" fn audio_engine_create() -> *mut EngineHandle {
    let handle = Box::new(EngineHandle {
        engine: AudioEngine::new(EngineConfig::default()),
    });
    Box::into_raw(handle)
}

/// Initialize for 16 kHz, mono, 16-bit source audio.
///
/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_init(handle: *mut EngineHandle) -> c_int {
    with_engine(handle, |engine| status(engine.init(&AudioConfig::new(16000, 1, 16))))
}

/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_start(handle: *mut EngineHandle) -> c_int {
    with_engine(handle, |engine| status(engine.start()))
}

/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_stop(handle: *mut EngineHandle) -> c_int {
    with_engine(handle, |engine| status(engine.stop()))
}

/// Process `len` samples from `input` into `output`.
///
/// `input` and `output` may be the same pointer for in-place processing.
///
/// # Safety
/// - `handle` must be null or a live pointer from `audio_engine_create`
/// - `input` must be readable and `output` writable for `len` floats
/// - the two buffers must either be identical or not overlap at all
#[no_mangle]
pub unsafe extern "C" fn audio_engine_process(
    handle: *mut EngineHandle,
    input: *const f32,
    output: *mut f32,
    len: u32,
) -> c_int {
    if input.is_null() || output.is_null() {
        return if handle.is_null() {
            STATUS_NULL_HANDLE
        } else {
            STATUS_NULL_BUFFER
        };
    }
    let len = len as usize;

    with_engine(handle, |engine| {
        if std::ptr::eq(input, output) {
            // SAFETY: one buffer, valid for `len` floats per the caller.
            let buffer = unsafe { slice::from_raw_parts_mut(output, len) };
            return status(engine.process_in_place(buffer));
        }

        // SAFETY: distinct, non-overlapping buffers valid for `len` floats.
        let (input, output) = unsafe {
            (
                slice::from_raw_parts(input, len),
                slice::from_raw_parts_mut(output, len),
            )
        };
        status(engine.process_audio(input, output))
    })
}

/// Latency of the last processed block in milliseconds, or `-1.0` for a
/// null handle.
///
/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_get_latency(handle: *mut EngineHandle) -> f64 {
    // SAFETY: the caller guarantees `handle` is null or live.
    match unsafe { handle.as_ref() } {
        Some(handle) => handle.engine.get_latency_ms(),
        None => -1.0,
    }
}

/// Copy the latest statistics into `out`.
///
/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`, and
/// `out` must be null or writable for one `AudioStats`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_get_stats(
    handle: *mut EngineHandle,
    out: *mut AudioStats,
) -> c_int {
    if out.is_null() {
        return EngineError::BufferMismatch { input: 1, output: 0 }.status_code();
    }
    with_engine(handle, |engine| {
        // SAFETY: `out` is non-null and writable per the caller.
        unsafe { out.write(engine.get_stats()) };
        STATUS_OK
    })
}

/// `1` when running, `0` when not, `-1` for a null handle.
///
/// # Safety
/// `handle` must be null or a live pointer from `audio_engine_create`.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_health(handle: *mut EngineHandle) -> c_int {
    with_engine(handle, |engine| c_int::from(engine.health_check()))
}

/// Stop and free the engine. A null handle is accepted and ignored.
///
/// # Safety
/// `handle` must be null or a pointer from `audio_engine_create` that has not
/// been cleaned up yet. It must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn audio_engine_cleanup(handle: *mut EngineHandle) -> c_int {
    if handle.is_null() {
        return STATUS_OK;
    }

    // SAFETY: non-null and produced by `Box::into_raw` in `audio_engine_create`.
    let mut handle = unsafe { Box::from_raw(handle) };
    let stopped = catch_unwind(AssertUnwindSafe(|| status(handle.engine.stop())))
        .unwrap_or(STATUS_PANIC);
    drop(handle);
    stopped
}
