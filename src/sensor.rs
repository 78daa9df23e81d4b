// Sensor gain-code / gain conversion, and the control-range inputs that
// `configure` consumes.

use std::time::Duration;

/// Recognized sensor/ISP control ids. Only these are ever read from an
/// incoming control range or written to an outgoing control list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ControlId {
    Exposure,
    AnalogueGain,
    VBlank,
}

impl ControlId {
    pub fn name(&self) -> &'static str {
        match self {
            ControlId::Exposure => "EXPOSURE",
            ControlId::AnalogueGain => "ANALOGUE_GAIN",
            ControlId::VBlank => "VBLANK",
        }
    }
}

/// An inclusive `[min, max]` range for one integer sensor control.
#[derive(Clone, Copy, Debug)]
pub struct ControlRange {
    pub min: i64,
    pub max: i64,
}

/// Translates between sensor gain codes (integer register values) and
/// linear analogue gain multipliers, and between exposure duration and
/// sensor line counts. `init` loads one of these for the configured sensor
/// model; a new sensor model requires a new implementation, not a config
/// knob, since the conversion is tied to the sensor's register semantics.
pub trait SensorHelper: Send + Sync {
    fn gain(&self, code: u32) -> f64;
    fn gain_code(&self, gain: f64) -> u32;

    fn exposure_lines(&self, exposure: Duration, line_duration: Duration) -> u32 {
        let lines = exposure.as_secs_f64() / line_duration.as_secs_f64();
        lines.round().max(0.0) as u32
    }

    fn exposure_duration(&self, lines: u32, line_duration: Duration) -> Duration {
        line_duration.mul_f64(lines as f64)
    }
}

/// Common linear sensor model: `gain = code / divisor`, `code = gain * divisor`.
pub struct LinearSensorHelper {
    divisor: f64,
}

impl LinearSensorHelper {
    pub fn new(divisor: f64) -> Self {
        assert!(divisor > 0.0);
        LinearSensorHelper { divisor }
    }
}

impl SensorHelper for LinearSensorHelper {
    fn gain(&self, code: u32) -> f64 {
        code as f64 / self.divisor
    }

    fn gain_code(&self, gain: f64) -> u32 {
        (gain * self.divisor).round().max(0.0) as u32
    }
}
