// Component A: frame orchestrator. Ties the whole per-frame control loop
// together: `on_fill_params` programs the hardware ahead of a capture from
// the previously-computed 3A decision, `on_stats_ready` consumes that
// capture's statistics and runs AWB, AGC, AF and the gamma curve to decide
// the *next* one.

use std::collections::HashMap;
use std::time::Duration;

use canonical_error::CanonicalError;
use log::{error, warn};

use crate::af::{AfAlgorithm, AfState};
use crate::agc::{AgcAlgorithm, AgcRanges};
use crate::awb::AwbAlgorithm;
use crate::context::{IpaContext, SessionConfig};
use crate::contrast::GammaLut;
use crate::controls::{AeMeteringMode, AppControls, MeteringPreset, NoiseReductionMode, ResultMetadata};
use crate::delayed_controls::DelayedControls;
use crate::error::missing_control_error;
use crate::grid::resolve_grid;
use crate::param_assembler::ParamBufferView;
use crate::sensor::{ControlId, ControlRange, SensorHelper};
use crate::stats::{extract, StatsBufferView};

#[derive(Clone, Copy, Debug)]
pub struct FrameInfo {
    pub requested_exposure_lines: u32,
    pub requested_gain_code: u32,
    pub update_mask: u32,
}

#[derive(Clone, Debug)]
pub enum FrameEvent {
    ParamsFilled { frame_sequence: u64, update_mask: u32 },
    MetadataReady { frame_sequence: u64, metadata: ResultMetadata },
}

pub struct FrameOrchestrator {
    ctx: IpaContext,
    sensor: Box<dyn SensorHelper>,
    delayed: DelayedControls,
    awb: AwbAlgorithm,
    agc: AgcAlgorithm,
    af: AfAlgorithm,
    gamma: GammaLut,
    stats_width: u32,
    stats_height: u32,
    frame_table: HashMap<u64, FrameInfo>,
    last_metadata: ResultMetadata,
    configured: bool,
}

/// Placeholder ranges `init` seeds the AGC with before `configure` has heard
/// back from the sensor; degenerate on purpose so a caller that forgets to
/// call `configure` gets visibly useless output rather than a plausible one.
fn placeholder_agc_ranges(line_duration: Duration) -> AgcRanges {
    AgcRanges {
        min_exposure_lines: 1,
        max_exposure_lines: 1,
        min_gain: 1.0,
        max_gain: 1.0,
        min_shutter: Duration::from_micros(1),
        max_shutter: Duration::from_micros(1),
        line_duration,
    }
}

impl FrameOrchestrator {
    /// Component lifecycle step 1: binds the sensor-specific gain/exposure
    /// conversion and establishes default running state. Cheap and
    /// infallible; real validation happens in `configure`.
    pub fn init(sensor: Box<dyn SensorHelper>, session: SessionConfig) -> Self {
        let agc = AgcAlgorithm::new(placeholder_agc_ranges(session.line_duration));
        let af = AfAlgorithm::new(session.af_min_pos, session.af_max_pos);
        FrameOrchestrator {
            ctx: IpaContext::new(session),
            sensor,
            delayed: DelayedControls::new(default_delays()),
            awb: AwbAlgorithm::new(),
            agc,
            af,
            gamma: GammaLut::default(),
            stats_width: 0,
            stats_height: 0,
            frame_table: HashMap::new(),
            last_metadata: ResultMetadata::default(),
            configured: false,
        }
    }

    /// Component lifecycle step 2: validates the sensor's advertised control
    /// ranges and the statistics grid's raw dimensions, resolving the grid
    /// up front so every later frame reuses the same descriptor. Also seeds
    /// the AGC's working min/max exposure-lines and gain from the same
    /// hardware control ranges, so AGC never has to be told about them a
    /// second time through a separately constructed `AgcRanges`.
    pub fn configure(&mut self, exposure_range: ControlRange, gain_range: ControlRange,
                      vblank_range: ControlRange, raw_width: u32, raw_height: u32)
        -> Result<(), CanonicalError>
    {
        if exposure_range.min <= 0 || exposure_range.max <= exposure_range.min {
            return Err(missing_control_error("EXPOSURE"));
        }
        if gain_range.min <= 0 || gain_range.max <= gain_range.min {
            return Err(missing_control_error("ANALOGUE_GAIN"));
        }
        if vblank_range.min <= 0 || vblank_range.max <= vblank_range.min {
            return Err(missing_control_error("VBLANK"));
        }

        let line_duration = self.ctx.session.line_duration;
        self.agc.set_ranges(AgcRanges {
            min_exposure_lines: exposure_range.min as u32,
            max_exposure_lines: exposure_range.max as u32,
            min_gain: self.sensor.gain(gain_range.min as u32),
            max_gain: self.sensor.gain(gain_range.max as u32),
            min_shutter: self.sensor.exposure_duration(exposure_range.min as u32, line_duration),
            max_shutter: self.sensor.exposure_duration(exposure_range.max as u32, line_duration),
            line_duration,
        });

        self.stats_width = raw_width;
        self.stats_height = raw_height;
        self.delayed.reset();
        self.frame_table.clear();
        self.configured = true;
        Ok(())
    }

    pub fn frame_info(&self, frame_sequence: u64) -> Option<&FrameInfo> {
        self.frame_table.get(&frame_sequence)
    }

    pub fn af_position(&self) -> i32 {
        self.af.position()
    }

    pub fn cancel_all(&mut self) {
        self.frame_table.clear();
        self.delayed.reset();
        self.af.cancel();
    }

    /// Programs `buffer` with the hardware parameters decided by the most
    /// recent `on_stats_ready` call, and queues the exposure/gain values
    /// into delayed-controls so a later `on_stats_ready` can tell what was
    /// actually active when a given frame's stats were captured.
    pub fn on_fill_params(&mut self, frame_sequence: u64, buffer: &mut [u8])
        -> Result<FrameEvent, CanonicalError>
    {
        self.delayed.frame_start(frame_sequence);

        let (width, height) = (self.stats_width.min(u16::MAX as u32) as u16,
                                self.stats_height.min(u16::MAX as u32) as u16);
        let identity_ccm = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

        let mut view = ParamBufferView::new(buffer)?;
        view.write_gamma_lut(self.gamma.table());
        view.write_awb_gains(self.ctx.state.awb_result.red_gain, self.ctx.state.awb_result.blue_gain);
        view.write_awb_measure_window(0, 0, width, height);
        view.write_aec_window(0, 0, width, height);
        view.write_histogram_weights(&[1; 15]);
        view.write_black_level(0);
        view.write_colour_correction_matrix(&identity_ccm);
        view.write_colour_processing(
            self.ctx.state.brightness, self.ctx.state.contrast_level, self.ctx.state.saturation);
        view.write_noise_reduction(
            noise_reduction_strength(self.ctx.state.noise_reduction_mode),
            noise_reduction_strength(self.ctx.state.noise_reduction_mode));
        view.write_sharpness(self.ctx.state.sharpness.round() as u16);
        view.write_lens_shading_enable(true);
        view.write_defect_pixel_correction(true);
        view.write_image_effects(0);
        view.write_bayer_demosaic_mode(4);
        let update_mask = view.finish();

        self.delayed.push(&[
            (ControlId::Exposure, self.ctx.frame.exposure_lines as i64),
            (ControlId::AnalogueGain, self.ctx.frame.analogue_gain_code as i64),
        ]);

        self.frame_table.insert(frame_sequence, FrameInfo {
            requested_exposure_lines: self.ctx.frame.exposure_lines,
            requested_gain_code: self.ctx.frame.analogue_gain_code,
            update_mask,
        });

        Ok(FrameEvent::ParamsFilled { frame_sequence, update_mask })
    }

    /// Runs the 3A algorithms against one frame's worth of statistics.
    /// `af_contrast_score` comes from the AF measurement window, a separate
    /// hardware block from the AE/AWB grid this module otherwise parses.
    /// A malformed stats buffer is logged and answered with the last known
    /// good metadata rather than aborting the session over one bad frame.
    pub fn on_stats_ready(&mut self, frame_sequence: u64, stats_bytes: &[u8],
                           af_contrast_score: f64, app_controls: &AppControls)
        -> Result<FrameEvent, CanonicalError>
    {
        if !self.configured {
            return Err(missing_control_error("configure must run before on_stats_ready"));
        }
        self.apply_app_controls(app_controls);
        self.ctx.begin_frame(frame_sequence);

        if let Some(lines) = self.delayed.get(ControlId::Exposure, frame_sequence) {
            let shutter = self.sensor.exposure_duration(lines as u32, self.ctx.session.line_duration);
            self.agc.note_applied_exposure(shutter);
        }

        let (grid, exact) = resolve_grid(self.stats_width, self.stats_height);
        if !exact {
            warn!("frame {}: statistics grid does not exactly tile {}x{}",
                  frame_sequence, self.stats_width, self.stats_height);
        }

        let metadata = match StatsBufferView::new(stats_bytes, &grid) {
            Ok(view) => {
                let (zones, _histogram) = extract(&view, &grid);
                self.run_algorithms(&zones, af_contrast_score, app_controls)
            }
            Err(e) => {
                error!("frame {}: {}, reusing last known-good metadata", frame_sequence, e);
                self.last_metadata.clone()
            }
        };

        self.frame_table.remove(&frame_sequence);
        self.last_metadata = metadata.clone();
        Ok(FrameEvent::MetadataReady { frame_sequence, metadata })
    }

    fn apply_app_controls(&mut self, controls: &AppControls) {
        if let Some(enabled) = controls.ae_enable {
            self.ctx.state.ae_enabled = enabled;
        }
        if let Some(enabled) = controls.awb_enable {
            self.ctx.state.awb_enabled = enabled;
        }
        if let Some(mode) = controls.ae_metering_mode {
            self.ctx.state.ae_metering_mode = mode;
        }
        if let Some(mode) = controls.af_mode {
            self.ctx.state.af_mode = mode;
            self.af.set_mode(mode);
        }
        if let Some(true) = controls.af_trigger {
            self.af.trigger();
        }
        if let Some((r, b)) = controls.colour_gains {
            self.ctx.state.awb_result.red_gain = r;
            self.ctx.state.awb_result.blue_gain = b;
        }
        if let Some(brightness) = controls.brightness {
            self.ctx.state.brightness = brightness;
        }
        if let Some(contrast) = controls.contrast {
            self.ctx.state.contrast_level = contrast;
        }
        if let Some(saturation) = controls.saturation {
            self.ctx.state.saturation = saturation;
        }
        if let Some(sharpness) = controls.sharpness {
            self.ctx.state.sharpness = sharpness;
        }
        if let Some(mode) = controls.noise_reduction_mode {
            self.ctx.state.noise_reduction_mode = mode;
        }
    }

    /// Runs AWB, then AGC, then AF, then the gamma curve, in that fixed
    /// order every frame; there is no self-registration or plugin
    /// discovery, this function body is the entire dispatch table.
    fn run_algorithms(&mut self, zones: &[crate::grid::Zone], af_contrast_score: f64,
                       controls: &AppControls) -> ResultMetadata
    {
        if controls.colour_gains.is_none() && self.ctx.state.awb_enabled {
            self.ctx.state.awb_result = self.awb.process(zones);
        }

        if controls.is_manual_exposure() {
            let exposure = Duration::from_micros(controls.exposure_time_us.unwrap() as u64);
            let gain = controls.analogue_gain.unwrap();
            let out = self.agc.manual_override(exposure, gain, self.sensor.as_ref());
            self.ctx.frame.exposure_lines = out.exposure_lines;
            self.ctx.frame.analogue_gain = out.analogue_gain;
            self.ctx.frame.analogue_gain_code = out.analogue_gain_code;
            self.ctx.frame.ae_converged = false;
        } else if self.ctx.state.ae_enabled {
            let metering = match self.ctx.state.ae_metering_mode {
                AeMeteringMode::Spot => MeteringPreset::Spot,
                AeMeteringMode::Matrix => MeteringPreset::Matrix,
                _ => MeteringPreset::CentreWeighted,
            };
            self.agc.set_metering_mode(metering);
            let sensor = self.sensor.as_ref();
            let awb_result = self.ctx.state.awb_result;
            let out = self.agc.process(zones, awb_result, sensor);
            self.ctx.frame.exposure_lines = out.exposure_lines;
            self.ctx.frame.analogue_gain = out.analogue_gain;
            self.ctx.frame.analogue_gain_code = out.analogue_gain_code;
            self.ctx.frame.ae_converged = out.converged;
        }

        let af_out = self.af.process(af_contrast_score);
        self.ctx.frame.af_position = af_out.position;
        self.ctx.frame.af_locked = af_out.locked;
        self.ctx.state.af_state = af_out.state;

        self.gamma.set_gamma(self.ctx.state.gamma);

        ResultMetadata {
            frame_duration_us: self.sensor.exposure_duration(
                self.ctx.frame.exposure_lines, self.ctx.session.line_duration).as_micros() as u32,
            analogue_gain: self.ctx.frame.analogue_gain,
            ae_locked: Some(self.ctx.frame.ae_converged),
            af_state: af_out.state,
            colour_gains: (self.ctx.state.awb_result.red_gain, self.ctx.state.awb_result.blue_gain),
            colour_temperature_k: self.ctx.state.awb_result.temperature_k.round() as u32,
            pipeline_depth: self.delayed.max_delay(),
        }
    }
}

fn default_delays() -> HashMap<ControlId, u32> {
    let mut delays = HashMap::new();
    delays.insert(ControlId::Exposure, 2);
    delays.insert(ControlId::AnalogueGain, 1);
    delays.insert(ControlId::VBlank, 2);
    delays
}

fn noise_reduction_strength(mode: NoiseReductionMode) -> u16 {
    match mode {
        NoiseReductionMode::Off => 0,
        NoiseReductionMode::Minimal => 1,
        NoiseReductionMode::Zsl => 2,
        NoiseReductionMode::Fast => 3,
        NoiseReductionMode::HighQuality => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::LinearSensorHelper;

    fn session() -> SessionConfig {
        SessionConfig {
            sensor_model: "test".into(),
            line_duration: Duration::from_nanos(16_800),
            af_min_pos: 0,
            af_max_pos: 1023,
        }
    }

    fn make_orchestrator() -> FrameOrchestrator {
        let sensor = Box::new(LinearSensorHelper::new(256.0));
        let mut orch = FrameOrchestrator::init(sensor, session());
        orch.configure(ControlRange { min: 1, max: 100_000 },
                        ControlRange { min: 256, max: 2048 },
                        ControlRange { min: 100, max: 10_000 }, 1280, 720).unwrap();
        orch
    }

    fn grey_stats_buffer() -> Vec<u8> {
        let (grid, _) = resolve_grid(1280, 720);
        let num_cells = (grid.width * grid.height) as usize;
        let mut bytes = Vec::with_capacity(4 + num_cells * 8);
        bytes.extend_from_slice(&(crate::stats::MEAS_TYPE_AE | crate::stats::MEAS_TYPE_AWB).to_le_bytes());
        for _ in 0..num_cells {
            bytes.extend_from_slice(&[100, 100, 100, 100, 10, 0, 0, 0]);
        }
        bytes
    }

    #[test]
    fn configure_rejects_degenerate_ranges() {
        let sensor = Box::new(LinearSensorHelper::new(256.0));
        let mut orch = FrameOrchestrator::init(sensor, session());
        let bad = ControlRange { min: 10, max: 5 };
        assert!(orch.configure(bad, ControlRange { min: 256, max: 2048 },
                                ControlRange { min: 100, max: 10_000 }, 1280, 720).is_err());
    }

    #[test]
    fn configure_rejects_degenerate_vblank_range() {
        let sensor = Box::new(LinearSensorHelper::new(256.0));
        let mut orch = FrameOrchestrator::init(sensor, session());
        let bad_vblank = ControlRange { min: 10, max: 10 };
        assert!(orch.configure(ControlRange { min: 1, max: 100_000 },
                                ControlRange { min: 256, max: 2048 }, bad_vblank, 1280, 720).is_err());
    }

    #[test]
    fn on_stats_ready_requires_configure_first() {
        let sensor = Box::new(LinearSensorHelper::new(256.0));
        let mut orch = FrameOrchestrator::init(sensor, session());
        let result = orch.on_stats_ready(0, &grey_stats_buffer(), 1.0, &AppControls::default());
        assert!(result.is_err());
    }

    #[test]
    fn fill_then_stats_round_trip_produces_metadata() {
        let mut orch = make_orchestrator();
        let mut buf = vec![0u8; 4 + 256 * 2 + 128];
        let fill = orch.on_fill_params(0, &mut buf).unwrap();
        assert!(matches!(fill, FrameEvent::ParamsFilled { .. }));

        let stats_event = orch.on_stats_ready(0, &grey_stats_buffer(), 5.0, &AppControls::default())
            .unwrap();
        match stats_event {
            FrameEvent::MetadataReady { metadata, .. } => {
                assert!(metadata.colour_temperature_k > 0);
            }
            _ => panic!("expected MetadataReady"),
        }
    }

    #[test]
    fn malformed_stats_buffer_reuses_last_metadata_instead_of_failing() {
        let mut orch = make_orchestrator();
        let first = orch.on_stats_ready(0, &grey_stats_buffer(), 1.0, &AppControls::default())
            .unwrap();
        let first_metadata = match first {
            FrameEvent::MetadataReady { metadata, .. } => metadata,
            _ => unreachable!(),
        };

        let broken = vec![0u8; 2];
        let second = orch.on_stats_ready(1, &broken, 1.0, &AppControls::default()).unwrap();
        match second {
            FrameEvent::MetadataReady { metadata, .. } => {
                assert_eq!(metadata.colour_temperature_k, first_metadata.colour_temperature_k);
            }
            _ => panic!("expected MetadataReady"),
        }
    }

    #[test]
    fn cancel_all_clears_frame_table() {
        let mut orch = make_orchestrator();
        let mut buf = vec![0u8; 4 + 256 * 2 + 128];
        orch.on_fill_params(0, &mut buf).unwrap();
        assert_eq!(orch.frame_table.len(), 1);
        orch.cancel_all();
        assert_eq!(orch.frame_table.len(), 0);
    }
}
