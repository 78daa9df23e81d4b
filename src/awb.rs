// Component C: grey-world auto-white-balance.

use log::warn;

use crate::grid::Zone;

pub const GAIN_MIN: f64 = 0.125;
pub const GAIN_MAX: f64 = 8.0;
const MIN_VALID_ZONES: usize = 10;
const TRIM_FRACTION: f64 = 0.25;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AwbResult {
    pub temperature_k: f64,
    pub red_gain: f64,
    pub green_gain: f64,
    pub blue_gain: f64,
}

impl Default for AwbResult {
    fn default() -> Self {
        AwbResult { temperature_k: 5500.0, red_gain: 1.0, green_gain: 1.0, blue_gain: 1.0 }
    }
}

/// `XYZ`-from-`RGB` matrix used to estimate CCT from the grey-world
/// averages, followed by McCamy's cubic approximation.
const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [-0.14282, 1.54924, -0.95641],
    [-0.32466, 1.57837, -0.73191],
    [-0.68202, 0.77073, 0.56332],
];

pub struct AwbAlgorithm {
    previous: AwbResult,
}

impl AwbAlgorithm {
    pub fn new() -> Self {
        AwbAlgorithm { previous: AwbResult::default() }
    }

    pub fn current(&self) -> AwbResult {
        self.previous
    }

    pub fn process(&mut self, zones: &[Zone]) -> AwbResult {
        let valid: Vec<&Zone> = zones.iter().filter(|z| z.is_valid_for_awb()).collect();
        if valid.len() < MIN_VALID_ZONES {
            warn!("AWB degenerate: only {} valid zones (need {})",
                  valid.len(), MIN_VALID_ZONES);
            return self.previous;
        }

        let mut by_gr = valid.clone();
        by_gr.sort_by(|a, b| {
            (a.g_sum / a.r_sum).partial_cmp(&(b.g_sum / b.r_sum)).unwrap()
        });
        let gr_trimmed = trim_middle(&by_gr);

        let mut by_gb = valid.clone();
        by_gb.sort_by(|a, b| {
            (a.g_sum / a.b_sum).partial_cmp(&(b.g_sum / b.b_sum)).unwrap()
        });
        let gb_trimmed = trim_middle(&by_gb);

        let sum_g_r: f64 = gr_trimmed.iter().map(|z| z.g_sum).sum();
        let sum_r: f64 = gr_trimmed.iter().map(|z| z.r_sum).sum();
        let sum_g_b: f64 = gb_trimmed.iter().map(|z| z.g_sum).sum();
        let sum_b: f64 = gb_trimmed.iter().map(|z| z.b_sum).sum();

        let red_gain = if sum_r <= 0.0 { GAIN_MAX } else { (sum_g_r / sum_r).clamp(GAIN_MIN, GAIN_MAX) };
        let blue_gain = if sum_b <= 0.0 { GAIN_MAX } else { (sum_g_b / sum_b).clamp(GAIN_MIN, GAIN_MAX) };

        let n_r = gr_trimmed.len().max(1) as f64;
        let n_b = gb_trimmed.len().max(1) as f64;
        let mean_r = gr_trimmed.iter().map(|z| z.r_sum).sum::<f64>() / n_r;
        let mean_g = (sum_g_r / n_r + sum_g_b / n_b) / 2.0;
        let mean_b = sum_b / n_b;

        let temperature_k = estimate_cct(mean_r, mean_g, mean_b);

        let result = AwbResult { temperature_k, red_gain, green_gain: 1.0, blue_gain };
        self.previous = result;
        result
    }
}

/// Symmetric 25% trim off each end of a list already sorted by the ratio of
/// interest.
fn trim_middle<'a>(sorted: &'a [&'a Zone]) -> &'a [&'a Zone] {
    let n = sorted.len();
    let trim = ((n as f64) * TRIM_FRACTION).floor() as usize;
    if n - 2 * trim == 0 {
        sorted
    } else {
        &sorted[trim..n - trim]
    }
}

fn estimate_cct(r: f64, g: f64, b: f64) -> f64 {
    let x = RGB_TO_XYZ[0][0] * r + RGB_TO_XYZ[0][1] * g + RGB_TO_XYZ[0][2] * b;
    let y = RGB_TO_XYZ[1][0] * r + RGB_TO_XYZ[1][1] * g + RGB_TO_XYZ[1][2] * b;
    let z = RGB_TO_XYZ[2][0] * r + RGB_TO_XYZ[2][1] * g + RGB_TO_XYZ[2][2] * b;
    let sum = x + y + z;
    if sum.abs() < 1e-9 {
        return 5500.0;
    }
    let cx = x / sum;
    let cy = y / sum;
    let n = (cx - 0.3320) / (0.1858 - cy);
    449.0 * n.powi(3) + 3525.0 * n.powi(2) + 6823.3 * n + 5520.33
}

#[cfg(test)]
mod tests {
    use super::*;

    fn red_cast_zone() -> Zone {
        Zone { r_sum: 200.0, g_sum: 100.0, b_sum: 50.0, counted: 20, uncounted: 0 }
    }

    #[test]
    fn too_few_valid_zones_reuses_previous() {
        let mut awb = AwbAlgorithm::new();
        awb.previous = AwbResult { temperature_k: 4000.0, red_gain: 2.0, green_gain: 1.0, blue_gain: 0.5 };
        let zones = vec![red_cast_zone(); 5];
        let result = awb.process(&zones);
        assert_eq!(result, awb.previous);
    }

    #[test]
    fn red_cast_scene_yields_expected_gains() {
        let mut awb = AwbAlgorithm::new();
        let zones = vec![red_cast_zone(); 80];
        let result = awb.process(&zones);
        assert!((result.red_gain - 0.5).abs() < 1e-9);
        assert!((result.blue_gain - 2.0).abs() < 1e-9);
        assert_eq!(result.green_gain, 1.0);
        assert!(result.temperature_k.is_finite() && result.temperature_k > 0.0,
                "unexpected CCT {}", result.temperature_k);
    }

    #[test]
    fn gains_stay_within_bounds() {
        let mut awb = AwbAlgorithm::new();
        let mut zones = vec![Zone { r_sum: 1.0, g_sum: 100.0, b_sum: 1.0, counted: 20, uncounted: 0 }; 40];
        zones.extend(vec![Zone { r_sum: 100.0, g_sum: 100.0, b_sum: 100.0, counted: 20, uncounted: 0 }; 40]);
        let result = awb.process(&zones);
        assert!(result.red_gain >= GAIN_MIN && result.red_gain <= GAIN_MAX);
        assert!(result.blue_gain >= GAIN_MIN && result.blue_gain <= GAIN_MAX);
    }
}
