// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! UVW and phase corrections applied to each correlation product as it is
//! read.

use std::f64::consts::PI;

use itertools::izip;
use log::trace;
use marlu::{c32, c64, XyzGeodetic, UVW};

use crate::{
    constants::{CABLE_VELOCITY_FACTOR, VEL_C},
    context::ObservationHeader,
    pos::FrameGeometry,
};

/// Per-antenna (u,v,w) \[metres\] for one scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AntennaUvws {
    /// In the J2000 frame, these are what gets written
    pub j2000: Vec<UVW>,
    /// In the frame of the epoch, kept for diagnostics
    pub epoch: Vec<UVW>,
}

impl AntennaUvws {
    /// Compute (u,v,w) of every antenna relative to the array centre, in both
    /// frames. The two should agree in `w`.
    pub fn new(positions: &[XyzGeodetic], geom: &FrameGeometry) -> Self {
        let app = geom.apparent_hadec();
        let j2000 = geom.j2000_hadec();
        let (epoch, j2000): (Vec<_>, Vec<_>) = positions
            .iter()
            .enumerate()
            .map(|(i, &xyz)| {
                let uvw_ep = UVW::from_xyz(xyz, app);
                let uvw_2000 = UVW::from_xyz(geom.precess(xyz), j2000);
                trace!(
                    "Ant: {i}, u,v,w: {},{},{}. At epoch: {},{},{}",
                    uvw_2000.u,
                    uvw_2000.v,
                    uvw_2000.w,
                    uvw_ep.u,
                    uvw_ep.v,
                    uvw_ep.w
                );
                (uvw_ep, uvw_2000)
            })
            .unzip();
        Self { j2000, epoch }
    }

    /// Baseline (u,v,w) \[metres\] in the J2000 frame, `ant1 - ant2`. Zero for
    /// an antenna with itself.
    pub fn baseline(&self, ant1: usize, ant2: usize) -> UVW {
        if ant1 == ant2 {
            UVW::default()
        } else {
            self.j2000[ant1] - self.j2000[ant2]
        }
    }
}

/// Electrical path difference \[metres\] between the inputs of a product.
pub fn cable_delay_m(cable_delta1_m: f64, cable_delta2_m: f64) -> f64 {
    (cable_delta2_m - cable_delta1_m) * CABLE_VELOCITY_FACTOR
}

/// Wavelength \[metres\] of every channel, as used for phase correction.
pub fn channel_wavelengths_m(header: &ObservationHeader) -> Vec<f64> {
    (0..header.n_chans)
        .map(|chan| (VEL_C / 1e6) / header.chan_freq_mhz(chan))
        .collect()
}

/// Everything needed to correct one cross-correlation product.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProductCorrection {
    /// Geometric delay \[metres\], zero when geometric correction is off
    pub w_m: f64,
    /// Cable delay \[metres\]
    pub cable_delay_m: f64,
    /// Whether the antennas were swapped to put the lower index first
    pub reversed: bool,
    /// Whether to conjugate the raw sample as it is read
    pub conjugate: bool,
}

impl ProductCorrection {
    /// The phasor `exp(-2πi(w ± cable)/λ)` for a channel, the cable term
    /// changing sign for reversed products.
    pub fn phasor(&self, lambda_m: f64) -> c64 {
        let sign = if self.reversed { -1.0 } else { 1.0 };
        let angle = -2.0 * PI * (self.w_m + self.cable_delay_m * sign) / lambda_m;
        c64::from_polar(1.0, angle)
    }

    /// Correct a single raw sample.
    pub fn apply(&self, raw: c32, lambda_m: f64) -> c32 {
        let im = if self.conjugate { -raw.im } else { raw.im };
        let mut vis = c64::new(raw.re as f64, im as f64);
        if self.reversed {
            vis = vis.conj();
        }
        vis *= self.phasor(lambda_m);
        c32::new(vis.re as f32, vis.im as f32)
    }

    /// Correct a block of channels in place.
    pub fn apply_spectrum(&self, spectrum: &mut [c32], lambdas_m: &[f64]) {
        for (vis, &lambda_m) in izip!(spectrum.iter_mut(), lambdas_m) {
            *vis = self.apply(*vis, lambda_m);
        }
    }
}
