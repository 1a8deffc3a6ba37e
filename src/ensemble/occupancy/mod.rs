use std::ops::Range;
use crate::SercaError;
use super::state_machine::topology::edge::StateId;

/// How much of the time axis a histogram keeps.
/// - Full
///     - every bin, for time-course exports
/// - Trailing(window)
///     - only the last `window` bins, enough for the steady-state average
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Full,
    Trailing(usize),
}

/// Per-bin, per-state molecule counts summed over an ensemble.
///
/// One bin is sampled every `bin_width` steps from the same global step counter,
/// so every recorded bin holds exactly one count per molecule.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyHistogram {
    state_count: usize,
    bin_width: usize,
    total_bins: usize,
    first_bin: usize,
    counts: Vec<u64>,
}

impl OccupancyHistogram {

    /// Sizes a histogram for `timesteps` steps sampled every `bin_width` steps.
    ///
    /// A trailing window that is empty or reaches back before the first bin is a
    /// configuration error rather than a silent read of empty bins.
    pub fn new(
        state_count: usize,
        timesteps: usize,
        bin_width: usize,
        retention: Retention,
    ) -> Result<Self, SercaError> {
        if state_count == 0 {
            return Err(SercaError::Config("histogram needs at least one state".to_string()));
        }
        if bin_width == 0 {
            return Err(SercaError::Config("bin width must be at least one step".to_string()));
        }

        let total_bins = timesteps / bin_width;
        let first_bin = match retention {
            Retention::Full => 0,
            Retention::Trailing(window) => {
                if window == 0 || window > total_bins {
                    return Err(SercaError::WindowOutOfRange {
                        window,
                        available: total_bins,
                        timesteps,
                        bin_width,
                    });
                }
                total_bins - window
            }
        };
        if total_bins == 0 {
            return Err(SercaError::WindowOutOfRange { window: 1, available: 0, timesteps, bin_width });
        }

        let retained = total_bins - first_bin;
        Ok(Self {
            state_count,
            bin_width,
            total_bins,
            first_bin,
            counts: vec![0; retained * state_count],
        })
    }

    /// Returns the bin sampled after zero-based `step`, if that step is a sampling step
    #[inline]
    pub fn sampling_bin(&self, step: usize) -> Option<usize> {
        let elapsed = step + 1;
        if elapsed % self.bin_width != 0 {
            return None;
        }
        let bin = elapsed / self.bin_width - 1;
        if bin < self.total_bins { Some(bin) } else { None }
    }

    /// Adds one molecule in `state` to `bin`; bins before the retained range are dropped
    #[inline]
    pub fn record(&mut self, bin: usize, state: StateId) {
        if bin >= self.first_bin && bin < self.total_bins && state < self.state_count {
            self.counts[(bin - self.first_bin) * self.state_count + state] += 1;
        }
    }

    /// Adds another histogram of identical shape into this one
    pub fn merge(&mut self, other: &OccupancyHistogram) -> Result<(), SercaError> {
        if self.state_count != other.state_count
            || self.bin_width != other.bin_width
            || self.total_bins != other.total_bins
            || self.first_bin != other.first_bin
        {
            return Err(SercaError::Config(
                "cannot merge occupancy histograms of different shape".to_string(),
            ));
        }
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            *mine += theirs;
        }
        Ok(())
    }

    pub fn get_state_count(&self) -> usize {
        self.state_count
    }

    pub fn get_bin_width(&self) -> usize {
        self.bin_width
    }

    /// Number of bins the full time axis resolves
    pub fn get_total_bins(&self) -> usize {
        self.total_bins
    }

    /// Bin indices actually held in memory
    pub fn retained_bins(&self) -> Range<usize> {
        self.first_bin..self.total_bins
    }

    /// Per-state counts of one retained bin
    pub fn counts_in_bin(&self, bin: usize) -> Option<&[u64]> {
        if !self.retained_bins().contains(&bin) {
            return None;
        }
        let start = (bin - self.first_bin) * self.state_count;
        Some(&self.counts[start..start + self.state_count])
    }

    /// Molecules counted in each retained bin
    pub fn bin_totals(&self) -> Vec<u64> {
        self.counts
            .chunks(self.state_count)
            .map(|bin| bin.iter().sum())
            .collect()
    }

    /// Simulated time at which `bin` was sampled
    pub fn bin_time(&self, bin: usize, dt: f64) -> f64 {
        ((bin + 1) * self.bin_width) as f64 * dt
    }

    /// Averages each state's counts over the last `window` bins and divides by the ensemble size,
    /// giving steady-state occupation fractions in [0, 1].
    pub fn steady_state(&self, window: usize, molecules: usize) -> Result<Vec<f64>, SercaError> {
        if molecules == 0 {
            return Err(SercaError::EmptyWorkload("steady state of an empty ensemble".to_string()));
        }
        let retained = self.total_bins - self.first_bin;
        if window == 0 || window > retained {
            return Err(SercaError::WindowOutOfRange {
                window,
                available: retained,
                timesteps: self.total_bins * self.bin_width,
                bin_width: self.bin_width,
            });
        }

        let mut fractions = vec![0.0; self.state_count];
        for bin in self.total_bins - window..self.total_bins {
            if let Some(counts) = self.counts_in_bin(bin) {
                for (fraction, count) in fractions.iter_mut().zip(counts) {
                    *fraction += *count as f64;
                }
            }
        }

        let scale = window as f64 * molecules as f64;
        fractions.iter_mut().for_each(|fraction| *fraction /= scale);
        return Ok(fractions);
    }
}
