// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! In-memory visibilities: one [`VisibilityFrame`] per time step, gathered
//! into an [`Observation`].

use marlu::{c32, RADec, XyzGeocentric, UVW};

use crate::context::AntennaTable;

/// All visibilities for one time step.
///
/// Samples are stored flat, indexed by `(baseline, channel, pol)` with pol
/// varying fastest. A negative weight marks a flagged sample, its magnitude is
/// the original weight.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityFrame {
    /// Julian date of the centre of this time step
    pub jd: f64,
    /// UVFITS baseline code of each baseline
    pub baselines: Vec<u32>,
    /// Per-baseline (u,v,w) \[seconds of light travel\]
    pub uvws: Vec<UVW>,
    /// Visibility samples
    pub vis: Vec<c32>,
    /// Weights, parallel to `vis`
    pub weights: Vec<f32>,
    /// Number of frequency channels
    pub n_freq: usize,
    /// Number of polarisation products
    pub n_pol: usize,
}

impl VisibilityFrame {
    /// A frame with all samples and weights zeroed.
    pub fn new(jd: f64, n_baselines: usize, n_freq: usize, n_pol: usize) -> Self {
        let n_samples = n_baselines * n_freq * n_pol;
        Self {
            jd,
            baselines: vec![0; n_baselines],
            uvws: vec![UVW::default(); n_baselines],
            vis: vec![c32::default(); n_samples],
            weights: vec![0.0; n_samples],
            n_freq,
            n_pol,
        }
    }

    /// Number of baselines in this frame.
    pub fn num_baselines(&self) -> usize {
        self.baselines.len()
    }

    /// Index of a sample in `vis` and `weights`.
    #[inline]
    pub fn vis_index(&self, baseline: usize, chan: usize, pol: usize) -> usize {
        baseline * self.n_pol * self.n_freq + chan * self.n_pol + pol
    }

    /// Number of samples per baseline.
    pub fn samples_per_baseline(&self) -> usize {
        self.n_freq * self.n_pol
    }

    /// Resize to hold `n_baselines`, zeroing everything. Keeps allocations
    /// where possible so one frame can be reused across time steps.
    pub fn reset(&mut self, jd: f64, n_baselines: usize) {
        let n_samples = n_baselines * self.samples_per_baseline();
        self.jd = jd;
        self.baselines.clear();
        self.baselines.resize(n_baselines, 0);
        self.uvws.clear();
        self.uvws.resize(n_baselines, UVW::default());
        self.vis.clear();
        self.vis.resize(n_samples, c32::default());
        self.weights.clear();
        self.weights.resize(n_samples, 0.0);
    }

    /// Negate a positive weight, marking the sample flagged. Already flagged
    /// or empty samples are left alone.
    #[inline]
    pub fn flag_sample(&mut self, baseline: usize, chan: usize, pol: usize) {
        let idx = self.vis_index(baseline, chan, pol);
        if self.weights[idx] > 0.0 {
            self.weights[idx] = -self.weights[idx];
        }
    }
}

/// A complete dataset: frames in time order plus what describes their axes.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    /// Field name (`OBJECT`)
    pub field_name: String,
    /// J2000 phase centre
    pub phase_centre: RADec,
    /// Number of frequency channels
    pub n_freq: usize,
    /// Number of polarisation products
    pub n_pol: usize,
    /// UVFITS code of the first polarisation product
    pub pol_type: i32,
    /// Centre frequency \[Hz\]
    pub cent_freq_hz: f64,
    /// Signed channel width \[Hz\]
    pub freq_delta_hz: f64,
    /// Name of the array (`ARRNAM`)
    pub array_name: String,
    /// Geocentric position of the array centre
    pub array_xyz: XyzGeocentric,
    /// The stations
    pub antennas: AntennaTable,
    /// The time steps
    pub frames: Vec<VisibilityFrame>,
}

impl Observation {
    /// Number of time steps.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Total number of random groups needed to write every frame.
    pub fn num_groups(&self) -> usize {
        self.frames.iter().map(|f| f.num_baselines()).sum()
    }

    /// Julian date of the first frame.
    pub fn start_jd(&self) -> Option<f64> {
        self.frames.first().map(|f| f.jd)
    }

    /// Frequency of a channel \[Hz\], from the axis description.
    pub fn chan_freq_hz(&self, chan: usize) -> f64 {
        let crpix = (self.n_freq / 2 + 1) as f64;
        self.cent_freq_hz + (chan as f64 + 1.0 - crpix) * self.freq_delta_hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vis_index_pol_fastest() {
        let frame = VisibilityFrame::new(0.0, 3, 5, 4);
        assert_eq!(frame.vis.len(), 60);
        assert_eq!(frame.vis_index(0, 0, 1), 1);
        assert_eq!(frame.vis_index(0, 1, 0), 4);
        assert_eq!(frame.vis_index(2, 4, 3), 2 * 20 + 4 * 4 + 3);
    }

    #[test]
    fn test_flag_sample_is_idempotent() {
        let mut frame = VisibilityFrame::new(0.0, 1, 1, 1);
        frame.weights[0] = 8.0;
        frame.flag_sample(0, 0, 0);
        assert_eq!(frame.weights[0], -8.0);
        frame.flag_sample(0, 0, 0);
        assert_eq!(frame.weights[0], -8.0);

        frame.weights[0] = 0.0;
        frame.flag_sample(0, 0, 0);
        assert_eq!(frame.weights[0], 0.0);
    }

    #[test]
    fn test_reset_reuses_frame() {
        let mut frame = VisibilityFrame::new(1.0, 2, 2, 2);
        frame.weights.iter_mut().for_each(|w| *w = 1.0);
        frame.reset(2.0, 3);
        assert_eq!(frame.jd, 2.0);
        assert_eq!(frame.num_baselines(), 3);
        assert_eq!(frame.weights.len(), 12);
        assert!(frame.weights.iter().all(|&w| w == 0.0));
    }
}
