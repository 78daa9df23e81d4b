// Error taxonomy for the IPA control loop.
//
// Fatal errors (unsupported hardware, missing sensor controls) surface to
// the caller of `init`/`configure`. Everything that can go wrong on a
// per-frame basis is recoverable: it is logged and the frame completes with
// stale algorithm outputs, so none of these constructors are used on the
// per-frame hot path's return type.

use canonical_error::{CanonicalError, failed_precondition_error,
                      internal_error, invalid_argument_error,
                      unimplemented_error};

/// ISP hardware revision reported at `init` is not one this build knows how
/// to interpret the statistics/parameter buffer layout for.
pub fn unsupported_hardware_error(revision: u32) -> CanonicalError {
    unimplemented_error(
        &format!("unsupported ISP hardware revision {}", revision))
}

/// A sensor control range (`EXPOSURE`, `ANALOGUE_GAIN`, `VBLANK`) required by
/// `configure` was not reported by the caller.
pub fn missing_control_error(name: &str) -> CanonicalError {
    failed_precondition_error(
        &format!("required sensor control range missing: {}", name))
}

/// The statistics buffer is smaller than expected for the configured grid,
/// or its `meas_type` bitmask lacks a bit this build requires.
pub fn invalid_stats_error(detail: &str) -> CanonicalError {
    invalid_argument_error(&format!("invalid stats buffer: {}", detail))
}

/// Mapping a shared statistics or parameter buffer failed.
pub fn buffer_mapping_failed_error(detail: &str) -> CanonicalError {
    internal_error(&format!("buffer mapping failed: {}", detail))
}

/// A pipeline event carried an opcode this build does not recognize.
pub fn unknown_event_error(opcode: u32) -> CanonicalError {
    invalid_argument_error(&format!("unknown pipeline event opcode {}", opcode))
}
