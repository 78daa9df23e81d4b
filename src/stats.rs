// Statistics buffer parsing (component B: Stats Extractor & Histogram).
//
// The inbound buffer is an opaque, driver-defined byte blob. `StatsBufferView`
// is a narrow safe adapter: it validates the blob's size and `meas_type`
// bitmask against the configured grid before anything downstream touches it,
// then the rest of the crate only ever sees `Zone`/`Histogram` values.

use bytemuck::{Pod, Zeroable};
use log::warn;

use crate::error::invalid_stats_error;
use crate::grid::{GridDescriptor, Zone};
use crate::histogram::Histogram;

/// Bit in `meas_type` indicating the AE block (`exp_mean[]`) is present.
pub const MEAS_TYPE_AE: u32 = 1 << 0;
/// Bit in `meas_type` indicating the AWB per-cell block is present.
pub const MEAS_TYPE_AWB: u32 = 1 << 1;
/// Bit in `meas_type` indicating the optional histogram block is present.
pub const MEAS_TYPE_HISTOGRAM: u32 = 1 << 2;

const REQUIRED_MEAS_TYPE: u32 = MEAS_TYPE_AE | MEAS_TYPE_AWB;

/// Number of cells in the coarser analysis grid that raw ISP-grid cells are
/// downsampled into, regardless of the ISP's own grid resolution.
pub const ANALYSIS_GRID_WIDTH: usize = 16;
pub const ANALYSIS_GRID_HEIGHT: usize = 12;
pub const ANALYSIS_ZONE_COUNT: usize = ANALYSIS_GRID_WIDTH * ANALYSIS_GRID_HEIGHT;

pub const HISTOGRAM_BINS: usize = 256;

/// `sat_ratio` is encoded 0..=255 representing a fraction of saturated
/// pixels in the cell; a cell counts toward a zone only below this
/// threshold (255 * 20 / 100 == "at most 20% saturated").
pub const SAT_RATIO_THRESHOLD: u8 = (255 * 20 / 100) as u8;

/// One fixed-layout per-cell AWB record as written by the ISP hardware.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AwbCellRecord {
    gr_avg: u8,
    r_avg: u8,
    b_avg: u8,
    gb_avg: u8,
    sat_ratio: u8,
    _pad: [u8; 3],
}

const AWB_RECORD_SIZE: usize = std::mem::size_of::<AwbCellRecord>();

/// Validated view over an inbound statistics buffer: a header plus a
/// contiguous array of [`AwbCellRecord`]s for the configured grid.
pub struct StatsBufferView<'a> {
    meas_type: u32,
    cells: &'a [AwbCellRecord],
}

impl<'a> StatsBufferView<'a> {
    /// `bytes` layout: `[meas_type: u32 LE][cell records...]`. Returns
    /// `InvalidStats` if the buffer is too small for `grid`'s cell count or
    /// lacks the AE/AWB bits this build requires.
    pub fn new(bytes: &'a [u8], grid: &GridDescriptor)
        -> Result<Self, canonical_error::CanonicalError>
    {
        const HEADER_SIZE: usize = 4;
        if bytes.len() < HEADER_SIZE {
            return Err(invalid_stats_error("buffer shorter than header"));
        }
        let meas_type = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if meas_type & REQUIRED_MEAS_TYPE != REQUIRED_MEAS_TYPE {
            return Err(invalid_stats_error(
                "meas_type missing required AE/AWB bits"));
        }
        let num_cells = (grid.width * grid.height) as usize;
        let needed = HEADER_SIZE + num_cells * AWB_RECORD_SIZE;
        if bytes.len() < needed {
            return Err(invalid_stats_error(
                &format!("buffer too small: need {needed}, have {}", bytes.len())));
        }
        let cell_bytes = &bytes[HEADER_SIZE..HEADER_SIZE + num_cells * AWB_RECORD_SIZE];
        let cells: &[AwbCellRecord] = bytemuck::cast_slice(cell_bytes);
        Ok(StatsBufferView { meas_type, cells })
    }

    pub fn has_histogram(&self) -> bool {
        self.meas_type & MEAS_TYPE_HISTOGRAM != 0
    }
}

/// Downsamples the ISP grid into the fixed 16x12 analysis grid and builds a
/// histogram of counted-cell luma over it.
pub fn extract(view: &StatsBufferView, grid: &GridDescriptor)
    -> (Vec<Zone>, Histogram)
{
    let mut zones = vec![Zone::default(); ANALYSIS_ZONE_COUNT];
    let mut histogram = Histogram::new(HISTOGRAM_BINS);

    if grid.width == 0 || grid.height == 0 {
        warn!("empty statistics grid, returning empty zones/histogram");
        return (zones, histogram);
    }

    for row in 0..grid.height {
        for col in 0..grid.width {
            let idx = (row * grid.width + col) as usize;
            let cell = match view.cells.get(idx) {
                Some(c) => c,
                None => continue,
            };
            let out_col = (col as usize * ANALYSIS_GRID_WIDTH / grid.width as usize)
                .min(ANALYSIS_GRID_WIDTH - 1);
            let out_row = (row as usize * ANALYSIS_GRID_HEIGHT / grid.height as usize)
                .min(ANALYSIS_GRID_HEIGHT - 1);
            let out_idx = out_row * ANALYSIS_GRID_WIDTH + out_col;

            if cell.sat_ratio > SAT_RATIO_THRESHOLD {
                zones[out_idx].uncounted += 1;
                continue;
            }
            let green = (cell.gr_avg as f64 + cell.gb_avg as f64) / 2.0;
            let zone = &mut zones[out_idx];
            zone.r_sum += cell.r_avg as f64;
            zone.g_sum += green;
            zone.b_sum += cell.b_avg as f64;
            zone.counted += 1;

            let bin = green.round().clamp(0.0, (HISTOGRAM_BINS - 1) as f64) as usize;
            histogram.add(bin);
        }
    }
    (zones, histogram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::resolve_grid;

    fn make_buffer(grid: &GridDescriptor, sat_ratio: u8) -> Vec<u8> {
        let num_cells = (grid.width * grid.height) as usize;
        let mut bytes = Vec::with_capacity(4 + num_cells * AWB_RECORD_SIZE);
        bytes.extend_from_slice(&(MEAS_TYPE_AE | MEAS_TYPE_AWB).to_le_bytes());
        for _ in 0..num_cells {
            bytes.extend_from_slice(&[100, 200, 50, 100, sat_ratio, 0, 0, 0]);
        }
        bytes
    }

    #[test]
    fn rejects_short_buffer() {
        let (grid, _) = resolve_grid(1280, 720);
        let buf = vec![0u8; 4];
        assert!(StatsBufferView::new(&buf, &grid).is_err());
    }

    #[test]
    fn rejects_missing_meas_type_bits() {
        let (grid, _) = resolve_grid(160, 120);
        let num_cells = (grid.width * grid.height) as usize;
        let mut bytes = vec![0u8; 4 + num_cells * AWB_RECORD_SIZE];
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(StatsBufferView::new(&bytes, &grid).is_err());
    }

    #[test]
    fn counted_cells_accumulate_sums() {
        let (grid, _) = resolve_grid(160, 120);
        let bytes = make_buffer(&grid, 10);
        let view = StatsBufferView::new(&bytes, &grid).unwrap();
        let (zones, histogram) = extract(&view, &grid);
        let total_counted: u32 = zones.iter().map(|z| z.counted).sum();
        assert_eq!(total_counted, grid.width * grid.height);
        assert_eq!(histogram.total(), total_counted as u64);
    }

    #[test]
    fn saturated_cells_are_uncounted() {
        let (grid, _) = resolve_grid(160, 120);
        let bytes = make_buffer(&grid, 255);
        let view = StatsBufferView::new(&bytes, &grid).unwrap();
        let (zones, _) = extract(&view, &grid);
        let total_counted: u32 = zones.iter().map(|z| z.counted).sum();
        assert_eq!(total_counted, 0);
        let total_uncounted: u32 = zones.iter().map(|z| z.uncounted).sum();
        assert_eq!(total_uncounted, grid.width * grid.height);
    }
}
