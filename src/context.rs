// Strongly-typed per-session and per-frame context, replacing a type-erased
// metadata map: every field any algorithm reads or writes has a name and a
// type checked at compile time instead of a string key looked up at runtime.

use std::time::Duration;

use crate::af::AfState;
use crate::awb::AwbResult;
use crate::controls::{AeConstraintMode, AeExposureMode, AeMeteringMode, AfModeControl, AwbMode};

/// Configuration fixed for the lifetime of a capture session: established by
/// `configure` and never changed by per-frame processing. The sensor's
/// exposure/gain/VBLANK control ranges are supplied directly to `configure`
/// rather than duplicated here, since `configure` is what derives the
/// running `AgcRanges` from them.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub sensor_model: String,
    pub line_duration: Duration,
    pub af_min_pos: i32,
    pub af_max_pos: i32,
}

/// Running, cross-frame algorithm state: the fields an algorithm carries
/// forward from one frame to the next so its next `process` call can build
/// on the last one instead of starting cold.
#[derive(Clone, Debug)]
pub struct AlgorithmState {
    pub ae_enabled: bool,
    pub ae_constraint_mode: AeConstraintMode,
    pub ae_exposure_mode: AeExposureMode,
    pub ae_metering_mode: AeMeteringMode,
    pub awb_enabled: bool,
    pub awb_mode: AwbMode,
    pub awb_result: AwbResult,
    pub af_mode: AfModeControl,
    pub af_state: AfState,
    pub gamma: f64,
    /// Direct passthrough image-processing controls: unlike AE/AWB/AF these
    /// have no closed-loop algorithm behind them, they are just held here
    /// until the next `on_fill_params` writes them into the CPROC/FLT/BNR
    /// module payloads.
    pub brightness: f64,
    pub contrast_level: f64,
    pub saturation: f64,
    pub sharpness: f64,
    pub noise_reduction_mode: crate::controls::NoiseReductionMode,
}

impl Default for AlgorithmState {
    fn default() -> Self {
        AlgorithmState {
            ae_enabled: true,
            ae_constraint_mode: AeConstraintMode::Normal,
            ae_exposure_mode: AeExposureMode::Normal,
            ae_metering_mode: AeMeteringMode::CentreWeighted,
            awb_enabled: true,
            awb_mode: AwbMode::Auto,
            awb_result: AwbResult::default(),
            af_mode: AfModeControl::Auto,
            af_state: AfState::Idle,
            gamma: crate::contrast::DEFAULT_GAMMA,
            brightness: 0.0,
            contrast_level: 1.0,
            saturation: 1.0,
            sharpness: 1.0,
            noise_reduction_mode: crate::controls::NoiseReductionMode::Fast,
        }
    }
}

/// Everything scoped to exactly one frame's worth of processing: built fresh
/// in `on_fill_params`/`on_stats_ready` and discarded once the frame's
/// metadata has been delivered.
#[derive(Clone, Debug, Default)]
pub struct FrameContext {
    pub sequence: u64,
    pub exposure_lines: u32,
    pub analogue_gain: f64,
    pub analogue_gain_code: u32,
    pub ae_converged: bool,
    pub af_position: i32,
    pub af_locked: bool,
}

/// Top-level context threaded through every algorithm call: session-wide
/// configuration, cross-frame running state, and the context for whichever
/// frame is currently in flight.
pub struct IpaContext {
    pub session: SessionConfig,
    pub state: AlgorithmState,
    pub frame: FrameContext,
}

impl IpaContext {
    pub fn new(session: SessionConfig) -> Self {
        IpaContext { session, state: AlgorithmState::default(), frame: FrameContext::default() }
    }

    pub fn begin_frame(&mut self, sequence: u64) {
        self.frame = FrameContext { sequence, ..FrameContext::default() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionConfig {
        SessionConfig {
            sensor_model: "test-sensor".into(),
            line_duration: Duration::from_nanos(16_800),
            af_min_pos: 0,
            af_max_pos: 1023,
        }
    }

    #[test]
    fn begin_frame_resets_frame_scoped_fields_only() {
        let mut ctx = IpaContext::new(session());
        ctx.state.gamma = 1.3;
        ctx.frame.exposure_lines = 500;
        ctx.begin_frame(7);
        assert_eq!(ctx.frame.sequence, 7);
        assert_eq!(ctx.frame.exposure_lines, 0);
        assert_eq!(ctx.state.gamma, 1.3);
    }

    #[test]
    fn default_algorithm_state_enables_both_3a_loops() {
        let state = AlgorithmState::default();
        assert!(state.ae_enabled);
        assert!(state.awb_enabled);
        assert_eq!(state.af_mode, AfModeControl::Auto);
    }
}
