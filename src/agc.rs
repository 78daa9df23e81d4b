// Component D: mean-based auto-exposure/gain control.
//
// A region-weighted AGC variant exists in other ISP stacks as an alternative
// to this mean-based one; it is treated as superseded here, so this is the
// only AGC implementation in this crate.

use std::time::Duration;

use log::debug;

use crate::awb::AwbResult;
use crate::controls::MeteringPreset;
use crate::grid::Zone;
use crate::sensor::SensorHelper;

const TARGET_Y: f64 = 0.4;
const MAX_REFINEMENT_ITERS: u32 = 8;
const REFINEMENT_STOP: f64 = 1.01;
const MAX_GAIN_STEP: f64 = 10.0;
const STABLE_FRACTION: f64 = 0.2;
const KNUM_STARTUP: u64 = 10;
const CONVERGED_TOLERANCE: f64 = 0.01;

#[derive(Clone, Copy, Debug)]
pub struct AgcRanges {
    pub min_exposure_lines: u32,
    pub max_exposure_lines: u32,
    pub min_gain: f64,
    pub max_gain: f64,
    pub min_shutter: Duration,
    pub max_shutter: Duration,
    pub line_duration: Duration,
}

#[derive(Clone, Copy, Debug)]
pub struct AgcState {
    pub exposure_lines: u32,
    pub analogue_gain: f64,
    pub filtered_exposure: Duration,
    pub prev_exposure: Duration,
    pub frame_count: u64,
}

impl AgcState {
    fn new(ranges: &AgcRanges) -> Self {
        let initial = ranges.min_shutter.max(Duration::from_millis(10));
        AgcState {
            exposure_lines: ranges.min_exposure_lines,
            analogue_gain: ranges.min_gain,
            filtered_exposure: initial,
            prev_exposure: initial,
            frame_count: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct AgcOutput {
    pub exposure_lines: u32,
    pub analogue_gain_code: u32,
    pub analogue_gain: f64,
    pub shutter: Duration,
    pub converged: bool,
}

pub struct AgcAlgorithm {
    ranges: AgcRanges,
    state: AgcState,
    metering: MeteringPreset,
}

impl AgcAlgorithm {
    pub fn new(ranges: AgcRanges) -> Self {
        AgcAlgorithm { state: AgcState::new(&ranges), ranges, metering: MeteringPreset::CentreWeighted }
    }

    pub fn set_metering_mode(&mut self, metering: MeteringPreset) {
        self.metering = metering;
    }

    /// Re-seeds the working ranges (and the state derived from them) without
    /// discarding the metering preset. Called from `configure` once the
    /// hardware's exposure/gain control ranges are known.
    pub fn set_ranges(&mut self, ranges: AgcRanges) {
        self.state = AgcState::new(&ranges);
        self.ranges = ranges;
    }

    pub fn state(&self) -> AgcState {
        self.state
    }

    /// Corrects the running exposure baseline to the value that was actually
    /// in effect on the sensor when the stats now being processed were
    /// captured, as reported by `DelayedControls::get`. Without this, the
    /// closed loop would extrapolate its next target from what it last
    /// *requested* rather than from what the hardware had actually applied
    /// by the time of capture.
    pub fn note_applied_exposure(&mut self, shutter: Duration) {
        self.state.prev_exposure = shutter;
    }

    /// Runs one frame of the mean-based AE/gain control loop against the
    /// zone statistics from the Stats Extractor, and the current AWB gains
    /// (grey-world gains bias the luma measurement toward what the ISP will
    /// actually apply). `sensor` converts the resulting analogue gain into a
    /// register code.
    pub fn process(&mut self, zones: &[Zone], awb: AwbResult, sensor: &dyn SensorHelper)
        -> AgcOutput
    {
        let base_y = self.compute_initial_y(zones, awb, 1.0);

        let mut current_gain = 1.0f64;
        for _ in 0..MAX_REFINEMENT_ITERS {
            let initial_y = base_y * current_gain;
            let extra = (TARGET_Y / (initial_y + 0.001)).min(MAX_GAIN_STEP);
            current_gain *= extra;
            if extra < REFINEMENT_STOP {
                break;
            }
        }

        let max_target = self.ranges.max_shutter.mul_f64(self.ranges.max_gain);
        let raw_target = self.state.prev_exposure.mul_f64(current_gain);
        let target = if raw_target > max_target { max_target } else { raw_target };

        let alpha = if self.state.frame_count < KNUM_STARTUP {
            1.0
        } else if within_fraction(self.state.filtered_exposure, target, STABLE_FRACTION) {
            STABLE_FRACTION.sqrt()
        } else {
            STABLE_FRACTION
        };
        let filtered_secs = self.state.filtered_exposure.as_secs_f64() * (1.0 - alpha)
            + target.as_secs_f64() * alpha;
        let filtered_exposure = Duration::from_secs_f64(filtered_secs.max(0.0));

        let converged = within_fraction(filtered_exposure, target, CONVERGED_TOLERANCE);

        let shutter = clamp_duration(
            filtered_exposure.div_f64(self.ranges.min_gain),
            self.ranges.min_shutter, self.ranges.max_shutter);
        let gain = (filtered_exposure.as_secs_f64() / shutter.as_secs_f64())
            .clamp(self.ranges.min_gain, self.ranges.max_gain);

        let exposure_lines = sensor.exposure_lines(shutter, self.ranges.line_duration)
            .clamp(self.ranges.min_exposure_lines, self.ranges.max_exposure_lines);
        let analogue_gain_code = sensor.gain_code(gain);

        self.state.filtered_exposure = filtered_exposure;
        self.state.prev_exposure = filtered_exposure;
        self.state.exposure_lines = exposure_lines;
        self.state.analogue_gain = gain;
        self.state.frame_count += 1;

        debug!("AGC: base_y={:.4} current_gain={:.3} target={:?} filtered={:?} \
                shutter={:?} gain={:.3} converged={}",
               base_y, current_gain, target, filtered_exposure, shutter, gain, converged);

        AgcOutput { exposure_lines, analogue_gain_code, analogue_gain: gain, shutter, converged }
    }

    /// Applies a manual override: running state is left untouched, the
    /// caller is responsible for programming the hardware with the exact
    /// values supplied.
    pub fn manual_override(&self, exposure: Duration, gain: f64, sensor: &dyn SensorHelper)
        -> AgcOutput
    {
        AgcOutput {
            exposure_lines: sensor.exposure_lines(exposure, self.ranges.line_duration),
            analogue_gain_code: sensor.gain_code(gain),
            analogue_gain: gain,
            shutter: exposure,
            converged: false,
        }
    }

    fn compute_initial_y(&self, zones: &[Zone], awb: AwbResult, current_gain: f64) -> f64 {
        let num_zones = zones.len();
        let mut weighted_sum = 0.0f64;
        let mut weighted_count = 0.0f64;
        for (i, zone) in zones.iter().enumerate() {
            if zone.counted == 0 {
                continue;
            }
            let w = self.metering.weight(i, num_zones);
            if w == 0.0 {
                continue;
            }
            let avg_r = zone.r_sum / zone.counted as f64;
            let avg_g = zone.g_sum / zone.counted as f64;
            let avg_b = zone.b_sum / zone.counted as f64;
            let luma = 0.299 * avg_r * awb.red_gain
                + 0.587 * avg_g * awb.green_gain
                + 0.114 * avg_b * awb.blue_gain;
            weighted_sum += w * luma * current_gain;
            weighted_count += w * zone.counted as f64;
        }
        if weighted_count == 0.0 {
            return 0.0;
        }
        (weighted_sum / weighted_count) / 255.0
    }
}

fn within_fraction(a: Duration, b: Duration, fraction: f64) -> bool {
    let b_secs = b.as_secs_f64();
    if b_secs == 0.0 {
        return a.as_secs_f64() == 0.0;
    }
    ((a.as_secs_f64() / b_secs) - 1.0).abs() < fraction
}

fn clamp_duration(d: Duration, min: Duration, max: Duration) -> Duration {
    d.clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::LinearSensorHelper;

    fn uniform_grey_zones(luma: f64) -> Vec<Zone> {
        vec![Zone { r_sum: luma * 20.0, g_sum: luma * 20.0, b_sum: luma * 20.0,
                    counted: 20, uncounted: 0 }; 16 * 12]
    }

    fn ranges() -> AgcRanges {
        AgcRanges {
            min_exposure_lines: 1,
            max_exposure_lines: 100_000,
            min_gain: 1.0,
            max_gain: 8.0,
            min_shutter: Duration::from_micros(100),
            max_shutter: Duration::from_millis(33),
            line_duration: Duration::from_nanos(16_800),
        }
    }

    /// A scene whose measured luma scales linearly with the total exposure
    /// (shutter x gain) actually applied to capture it, calibrated so that
    /// the reference 10ms/1.0x settings read 20/255 -- the closed-loop
    /// equivalent of the single-shot "dark scene reads 20" starting point.
    fn scene_zones_at(total_exposure_ms: f64) -> Vec<Zone> {
        uniform_grey_zones((20.0 * total_exposure_ms / 10.0).clamp(0.0, 255.0))
    }

    #[test]
    fn converges_on_grey_scene_within_ten_frames() {
        let sensor = LinearSensorHelper::new(256.0);
        let mut agc = AgcAlgorithm::new(ranges());
        let mut total_exposure_ms = 10.0;

        let mut out = agc.process(&scene_zones_at(total_exposure_ms), AwbResult::default(), &sensor);
        total_exposure_ms = out.shutter.as_secs_f64() * 1000.0 * out.analogue_gain;
        for _ in 0..9 {
            out = agc.process(&scene_zones_at(total_exposure_ms), AwbResult::default(), &sensor);
            total_exposure_ms = out.shutter.as_secs_f64() * 1000.0 * out.analogue_gain;
        }
        assert!(out.converged);
        assert_eq!(out.shutter, Duration::from_millis(33));
        assert!((out.analogue_gain - 1.55).abs() < 0.05,
                "unexpected gain {}", out.analogue_gain);
    }

    #[test]
    fn exposure_and_gain_stay_within_ranges() {
        let sensor = LinearSensorHelper::new(256.0);
        let r = ranges();
        let mut agc = AgcAlgorithm::new(r);
        let zones = uniform_grey_zones(200.0);
        for _ in 0..5 {
            let out = agc.process(&zones, AwbResult::default(), &sensor);
            assert!(out.analogue_gain >= r.min_gain && out.analogue_gain <= r.max_gain);
            assert!(out.exposure_lines >= r.min_exposure_lines
                    && out.exposure_lines <= r.max_exposure_lines);
        }
    }

    #[test]
    fn manual_override_does_not_touch_running_state() {
        let sensor = LinearSensorHelper::new(256.0);
        let mut agc = AgcAlgorithm::new(ranges());
        let before = agc.state();
        let out = agc.manual_override(Duration::from_micros(16667), 2.0, &sensor);
        assert_eq!(out.exposure_lines, sensor.exposure_lines(
            Duration::from_micros(16667), ranges().line_duration));
        assert_eq!(agc.state().frame_count, before.frame_count);
        assert_eq!(agc.state().analogue_gain, before.analogue_gain);
    }
}
