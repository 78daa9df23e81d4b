// Luma histogram with lazily computed cumulative counts.

#[derive(Clone, Debug)]
pub struct Histogram {
    bins: Vec<u32>,
    cumulative: Option<Vec<u64>>,
}

impl Histogram {
    pub fn new(num_bins: usize) -> Self {
        Histogram { bins: vec![0; num_bins], cumulative: None }
    }

    pub fn from_bins(bins: Vec<u32>) -> Self {
        Histogram { bins, cumulative: None }
    }

    pub fn num_bins(&self) -> usize {
        self.bins.len()
    }

    pub fn add(&mut self, bin: usize) {
        self.bins[bin] += 1;
        self.cumulative = None;
    }

    pub fn total(&self) -> u64 {
        self.bins.iter().map(|&c| c as u64).sum()
    }

    fn cumulative(&mut self) -> &[u64] {
        if self.cumulative.is_none() {
            let mut cum = Vec::with_capacity(self.bins.len() + 1);
            cum.push(0u64);
            let mut running = 0u64;
            for &count in &self.bins {
                running += count as u64;
                cum.push(running);
            }
            self.cumulative = Some(cum);
        }
        self.cumulative.as_ref().unwrap()
    }

    /// Smallest bin index `b` in `[0, num_bins]` such that `cum[b]/total >= q`.
    /// Returns `num_bins` for an empty histogram (no bin reaches any quantile).
    pub fn quantile(&mut self, q: f64) -> usize {
        let total = self.total();
        let num_bins = self.bins.len();
        if total == 0 {
            return num_bins;
        }
        let target = q * total as f64;
        let cum = self.cumulative();
        for (b, &c) in cum.iter().enumerate() {
            if c as f64 >= target {
                return b;
            }
        }
        num_bins
    }

    /// Linear interpolation of the cumulative count at a fractional bin index.
    pub fn cumulative_freq(&mut self, bin: f64) -> f64 {
        let num_bins = self.bins.len();
        let cum = self.cumulative();
        if bin <= 0.0 {
            return cum[0] as f64;
        }
        if bin >= num_bins as f64 {
            return cum[num_bins] as f64;
        }
        let lo = bin.floor() as usize;
        let hi = lo + 1;
        let frac = bin - lo as f64;
        cum[lo] as f64 + frac * (cum[hi] as f64 - cum[lo] as f64)
    }

    /// Mean bin value, weighted by count, restricted to
    /// `[quantile(q_lo), quantile(q_hi)]`. An empty histogram returns
    /// `num_bins - 0.5`, which forces a "very bright" reading that drives AE
    /// toward reducing exposure rather than stalling on a divide-by-zero.
    pub fn inter_quantile_mean(&mut self, q_lo: f64, q_hi: f64) -> f64 {
        let num_bins = self.bins.len();
        if self.total() == 0 {
            return num_bins as f64 - 0.5;
        }
        let lo = self.quantile(q_lo);
        let hi = self.quantile(q_hi);
        let mut weighted_sum = 0.0f64;
        let mut count_sum = 0.0f64;
        for bin in lo..=hi.min(num_bins - 1) {
            let count = self.bins[bin] as f64;
            weighted_sum += count * bin as f64;
            count_sum += count;
        }
        if count_sum == 0.0 {
            num_bins as f64 - 0.5
        } else {
            weighted_sum / count_sum
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn empty_histogram_quantile_mean_is_very_bright() {
        let mut h = Histogram::new(256);
        assert_abs_diff_eq!(h.inter_quantile_mean(0.1, 0.9), 255.5);
    }

    #[test]
    fn quantile_is_monotonic() {
        let mut h = Histogram::new(16);
        for b in 0..16 {
            for _ in 0..(b + 1) {
                h.add(b);
            }
        }
        let q1 = h.quantile(0.2);
        let q2 = h.quantile(0.6);
        assert!(q1 <= q2);
    }

    #[test]
    fn cumulative_is_additive_and_non_decreasing() {
        let mut h = Histogram::new(8);
        h.add(0);
        h.add(0);
        h.add(3);
        h.add(7);
        let total = h.total();
        assert_eq!(total, 4);
        let cum = h.cumulative().to_vec();
        assert_eq!(cum[0], 0);
        assert_eq!(cum[8], total);
        for w in cum.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn quantile_cumulative_freq_round_trip() {
        let mut h = Histogram::new(256);
        for b in 0..256 {
            h.add(b);
        }
        for &b in &[1usize, 100, 255] {
            let total = h.total() as f64;
            let freq = h.cumulative_freq(b as f64) / total;
            assert_eq!(h.quantile(freq), b);
        }
    }

    #[test]
    fn all_mass_at_one_bin_gives_constant_mean() {
        let mut h = Histogram::new(256);
        for _ in 0..1000 {
            h.add(20);
        }
        assert_abs_diff_eq!(h.inter_quantile_mean(0.0, 1.0), 20.0);
    }
}
