// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Methods for flagging visibilities, either from the statistics of the
//! autocorrelations or from a file of global flags.
//!
//! A sample is flagged by negating its weight.

use std::{
    fmt::Display,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
    str::FromStr,
};

use log::{debug, info, trace, warn};

use crate::{
    constants::{CHAN_ALL_ANT_ALL_TIME, COARSE_BAND_CHANS, COARSE_BAND_EDGE_CHANS, IQR_PER_SIGMA},
    context::meaningful_lines,
    error::ConfigError,
    io::uvfits::decode_baseline,
    util::progress_bar,
    visibility::{Observation, VisibilityFrame},
};

/// How the auto-flagger chooses the neighbouring channels it compares against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoFlagMode {
    /// Neighbours are the channels either side, clamped to the band
    Generic = 1,
    /// 40 kHz channels in 32-channel coarse bands. Coarse band edges are
    /// never used as neighbours.
    CoarseBands = 2,
}

impl FromStr for AutoFlagMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(Self::Generic),
            "2" => Ok(Self::CoarseBands),
            other => Err(ConfigError::AutoFlagUnavailable {
                reason: format!("unsupported autoflag mode {other}"),
            }),
        }
    }
}

impl Display for AutoFlagMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => write!(f, "1 (generic)"),
            Self::CoarseBands => write!(f, "2 (coarse band edges excluded)"),
        }
    }
}

impl AutoFlagMode {
    /// The inclusive range of channels whose statistics are pooled for `chan`.
    pub fn neighbourhood(&self, chan: usize, n_neighbours: usize, n_chans: usize) -> (usize, usize) {
        let mut lower = chan.saturating_sub(n_neighbours);
        let mut upper = (chan + n_neighbours).min(n_chans.saturating_sub(1));
        if *self == Self::CoarseBands {
            let n_rej = COARSE_BAND_EDGE_CHANS;
            let width = COARSE_BAND_CHANS;
            let pos = chan % width;
            if pos <= n_rej || pos > width - n_rej {
                lower = chan;
                upper = chan;
            }
            if pos > n_rej && lower % width < n_rej {
                lower += n_rej - lower % width;
            }
            if pos < width - n_rej && upper % width >= width - n_rej {
                upper -= upper % width - (width - 1 - n_rej);
            }
        }
        (lower, upper)
    }
}

/// The median of an already sorted slice, taken at index `n/2`.
#[inline]
fn sorted_median(sorted: &[f32]) -> f32 {
    sorted[sorted.len() / 2]
}

/// Median and σ (from the interquartile range) of each channel of `chan_data`,
/// which holds `n_times` values per channel.
fn channel_stats(chan_data: &[f32], n_times: usize) -> (Vec<f32>, Vec<f32>) {
    let mut sorted = chan_data.to_vec();
    sorted
        .chunks_exact_mut(n_times)
        .map(|values| {
            values.sort_unstable_by(|a, b| a.total_cmp(b));
            let n = n_times as f32;
            let q1 = values[(0.25 * n) as usize];
            let med = values[(0.5 * n) as usize];
            let q3 = values[(0.75 * n) as usize];
            (med, ((q3 - q1) / IQR_PER_SIGMA).abs())
        })
        .unzip()
}

/// Negate the weights of every baseline in `frame` containing `ant` (1-based),
/// for `pol` and, where there is one, the cross-hand product sharing the same
/// receptor.
pub fn flag_antenna(frame: &mut VisibilityFrame, ant: usize, pol: usize, chan: usize) {
    for bl in 0..frame.num_baselines() {
        let (ant1, ant2) = decode_baseline(frame.baselines[bl]);
        if ant1 == ant || ant2 == ant {
            frame.flag_sample(bl, chan, pol);
            if frame.n_pol > 1 && pol + 2 < frame.n_pol {
                frame.flag_sample(bl, chan, pol + 2);
            }
        }
    }
}

/// Negate the weights of every baseline and pol of `frame` in `chan`.
pub fn flag_all_antennas(frame: &mut VisibilityFrame, chan: usize) {
    for bl in 0..frame.num_baselines() {
        for pol in 0..frame.n_pol {
            frame.flag_sample(bl, chan, pol);
        }
    }
}

/// Flag outliers in the autocorrelations of each antenna, and every baseline
/// formed with that antenna at the same time and channel.
///
/// Each antenna and receptor is treated separately. Per channel, the median
/// and a σ estimated from the interquartile range are taken over time. These
/// are then pooled with the neighbouring channels by taking the median of each,
/// which keeps long-lived narrowband RFI from hiding itself. A sample more than
/// `sigma` σ from the pooled median is an outlier.
///
/// Returns the number of outliers found.
pub fn auto_flag(
    obs: &mut Observation,
    sigma: f32,
    n_neighbours: usize,
    mode: AutoFlagMode,
    draw_progress: bool,
) -> usize {
    trace!("start auto_flag");

    let n_times = obs.num_frames();
    let n_chans = obs.n_freq;
    let n_ants = obs.antennas.len();
    if n_times == 0 || n_chans == 0 {
        return 0;
    }

    // per frame, the baseline index of each antenna's autocorrelation
    let auto_idxs: Vec<Vec<Option<usize>>> = obs
        .frames
        .iter()
        .map(|frame| {
            let mut idxs = vec![None; n_ants + 1];
            for (bl, &baseline) in frame.baselines.iter().enumerate() {
                let (ant1, ant2) = decode_baseline(baseline);
                if ant1 == ant2 && ant1 <= n_ants {
                    idxs[ant1] = Some(bl);
                }
            }
            idxs
        })
        .collect();

    let n_receptors = (obs.n_pol + 1) / 2;

    let flag_progress = progress_bar(n_ants, "autoflag ants", draw_progress);

    let mut chan_data = vec![0.0_f32; n_chans * n_times];
    let mut n_outliers = 0;
    for ant in 1..=n_ants {
        flag_progress.inc(1);
        if auto_idxs.iter().all(|idxs| idxs[ant].is_none()) {
            trace!("ant {ant} has no autocorrelations, skipping");
            continue;
        }
        for pol in 0..n_receptors {
            for (t, (frame, idxs)) in obs.frames.iter().zip(auto_idxs.iter()).enumerate() {
                for chan in 0..n_chans {
                    chan_data[chan * n_times + t] = match idxs[ant] {
                        Some(bl) => frame.vis[frame.vis_index(bl, chan, pol)].re,
                        None => 0.0,
                    };
                }
            }

            let (chan_median, chan_sigma) = channel_stats(&chan_data, n_times);

            for chan in 0..n_chans {
                let (lower, upper) = mode.neighbourhood(chan, n_neighbours, n_chans);
                let mut local_medians = chan_median[lower..=upper].to_vec();
                let mut local_sigmas = chan_sigma[lower..=upper].to_vec();
                local_medians.sort_unstable_by(|a, b| a.total_cmp(b));
                local_sigmas.sort_unstable_by(|a, b| a.total_cmp(b));
                let local_median = sorted_median(&local_medians);
                let local_sigma = sorted_median(&local_sigmas);
                trace!(
                    "ant: {ant}, pol: {pol}, chan: {chan}. Median: {}, stddev: {}. Local median: {local_median}, local stdev: {local_sigma}",
                    chan_median[chan], chan_sigma[chan]
                );

                for t in 0..n_times {
                    let val = chan_data[chan * n_times + t];
                    if (val - local_median).abs() > sigma * local_sigma {
                        debug!("flagging ant: {ant}, pol: {pol}, chan: {chan}, time: {t}. Val: {val}");
                        flag_antenna(&mut obs.frames[t], ant, pol, chan);
                        n_outliers += 1;
                    }
                }
            }
        }
    }

    flag_progress.finish();
    info!("autoflagging found {n_outliers} outliers");
    trace!("end auto_flag");
    n_outliers
}

/// A rule from a flags file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagRule {
    /// Flag a channel on every baseline at every time
    ChanAllAntAllTime(usize),
}

/// Global flags, applied after auto-flagging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlagsFile {
    /// The rules, in file order
    pub rules: Vec<FlagRule>,
}

impl FlagsFile {
    /// Read a flags file.
    ///
    /// # Errors
    ///
    /// Will return a [`ConfigError`] if the file can't be read, or a rule has
    /// no valid channel.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = path.as_ref().display().to_string();
        let f = File::open(path.as_ref()).map_err(|io_error| ConfigError::FileRead {
            file: file.clone(),
            io_error,
            source_file: file!(),
            source_line: line!(),
        })?;
        Self::from_reader(&file, BufReader::new(f))
    }

    /// Parse a flags file from any reader. Unknown keys are warned about and
    /// skipped.
    ///
    /// # Errors
    ///
    /// See: [`FlagsFile::read`]
    pub fn from_reader<R: Read>(file: &str, reader: BufReader<R>) -> Result<Self, ConfigError> {
        let mut rules = vec![];
        for line in meaningful_lines(file, reader.lines()) {
            let (line_num, line) = line?;
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some(CHAN_ALL_ANT_ALL_TIME) => {
                    let chan = fields
                        .next()
                        .and_then(|v| v.parse::<usize>().ok())
                        .ok_or_else(|| ConfigError::BadLine {
                            file: file.to_string(),
                            line_num,
                            line: line.clone(),
                            reason: format!("{CHAN_ALL_ANT_ALL_TIME} needs a channel number"),
                            source_file: file!(),
                            source_line: line!(),
                        })?;
                    rules.push(FlagRule::ChanAllAntAllTime(chan));
                }
                Some(key) => warn!("{file} line {line_num}: unknown flag {key}, ignoring"),
                None => {}
            }
        }
        Ok(Self { rules })
    }

    /// Apply every rule to `obs`, returning how many were applied. Rules for
    /// channels outside the band are skipped with a warning.
    pub fn apply(&self, obs: &mut Observation) -> usize {
        let mut applied = 0;
        for rule in &self.rules {
            match *rule {
                FlagRule::ChanAllAntAllTime(chan) => {
                    if chan >= obs.n_freq {
                        warn!(
                            "asked to flag channel {chan}, but only have {}. Skipping",
                            obs.n_freq
                        );
                        continue;
                    }
                    debug!("Flagging chan {chan} on all antennas");
                    for frame in obs.frames.iter_mut() {
                        flag_all_antennas(frame, chan);
                    }
                    applied += 1;
                }
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{Antenna, AntennaTable},
        io::uvfits::encode_baseline,
    };
    use marlu::{c32, RADec, XyzGeocentric, XyzGeodetic};

    /// Two antennas with all products, every autocorrelation equal to `level`.
    fn flat_observation(n_times: usize, n_chans: usize, level: f32) -> Observation {
        let pairs = [(1, 1), (1, 2), (2, 2)];
        let frames = (0..n_times)
            .map(|t| {
                let mut frame = VisibilityFrame::new(t as f64, pairs.len(), n_chans, 4);
                for (bl, &(a1, a2)) in pairs.iter().enumerate() {
                    frame.baselines[bl] = encode_baseline(a1, a2);
                    for chan in 0..n_chans {
                        for pol in 0..4 {
                            let idx = frame.vis_index(bl, chan, pol);
                            // a little scatter so σ is not zero
                            let jitter = ((t * 7 + chan * 3 + pol) % 5) as f32 * 0.01;
                            frame.vis[idx] = c32::new(level + jitter, 0.0);
                            frame.weights[idx] = 1.0;
                        }
                    }
                }
                frame
            })
            .collect();
        Observation {
            field_name: "TEST".to_string(),
            phase_centre: RADec::from_degrees(0.0, 0.0),
            n_freq: n_chans,
            n_pol: 4,
            pol_type: -5,
            cent_freq_hz: 100e6,
            freq_delta_hz: 40e3,
            array_name: "TEST".to_string(),
            array_xyz: XyzGeocentric::default(),
            antennas: AntennaTable {
                antennas: (0..2)
                    .map(|i| Antenna::new(&format!("T{i}"), i, XyzGeodetic::default()))
                    .collect(),
            },
            frames,
        }
    }

    #[test]
    fn test_neighbourhood_generic_clamps() {
        let mode = AutoFlagMode::Generic;
        assert_eq!(mode.neighbourhood(0, 2, 10), (0, 2));
        assert_eq!(mode.neighbourhood(5, 2, 10), (3, 7));
        assert_eq!(mode.neighbourhood(9, 2, 10), (7, 9));
    }

    #[test]
    fn test_neighbourhood_coarse_bands() {
        let mode = AutoFlagMode::CoarseBands;
        // edge channels only use themselves
        assert_eq!(mode.neighbourhood(3, 2, 64), (3, 3));
        assert_eq!(mode.neighbourhood(6, 2, 64), (6, 6));
        assert_eq!(mode.neighbourhood(28, 2, 64), (28, 28));
        assert_eq!(mode.neighbourhood(32, 2, 64), (32, 32));
        // pulled in from the lower edge
        assert_eq!(mode.neighbourhood(7, 2, 64), (6, 9));
        // pulled in from the upper edge
        assert_eq!(mode.neighbourhood(25, 2, 64), (23, 25));
        // clear of both edges
        assert_eq!(mode.neighbourhood(16, 2, 64), (14, 18));
    }

    #[test]
    fn test_auto_flag_mode_from_str() {
        assert_eq!("1".parse::<AutoFlagMode>().unwrap(), AutoFlagMode::Generic);
        assert_eq!("2".parse::<AutoFlagMode>().unwrap(), AutoFlagMode::CoarseBands);
        assert!(matches!(
            "3".parse::<AutoFlagMode>(),
            Err(ConfigError::AutoFlagUnavailable { .. })
        ));
    }

    #[test]
    fn test_channel_stats_truncated_percentiles() {
        let data = [4.0, 1.0, 3.0, 2.0, 10.0, 20.0, 30.0, 40.0];
        let (median, sigma) = channel_stats(&data, 4);
        // sorted [1,2,3,4]: q1 = s[1], med = s[2], q3 = s[3]
        assert_eq!(median, vec![3.0, 30.0]);
        assert!((sigma[0] - 2.0 / 1.35).abs() < 1e-6);
        assert!((sigma[1] - 20.0 / 1.35).abs() < 1e-5);
    }

    #[test]
    fn test_flag_antenna_flags_cross_hand_too() {
        let mut obs = flat_observation(1, 2, 1.0);
        let frame = &mut obs.frames[0];
        flag_antenna(frame, 2, 0, 1);
        // (1,1) untouched
        assert!(frame.weights[frame.vis_index(0, 1, 0)] > 0.0);
        // (1,2) and (2,2) flagged on XX and XY
        for bl in 1..3 {
            assert_eq!(frame.weights[frame.vis_index(bl, 1, 0)], -1.0);
            assert_eq!(frame.weights[frame.vis_index(bl, 1, 2)], -1.0);
            assert_eq!(frame.weights[frame.vis_index(bl, 1, 1)], 1.0);
            assert_eq!(frame.weights[frame.vis_index(bl, 0, 0)], 1.0);
        }
    }

    #[test]
    fn test_auto_flag_finds_spike() {
        let mut obs = flat_observation(20, 16, 100.0);
        // a spike in antenna 1's XX auto at time 5, channel 8
        let frame = &mut obs.frames[5];
        let idx = frame.vis_index(0, 8, 0);
        frame.vis[idx] = c32::new(1000.0, 0.0);

        let n_outliers = auto_flag(&mut obs, 5.0, 2, AutoFlagMode::Generic, false);
        assert_eq!(n_outliers, 1);

        let frame = &obs.frames[5];
        for bl in 0..2 {
            assert!(frame.weights[frame.vis_index(bl, 8, 0)] < 0.0);
            assert!(frame.weights[frame.vis_index(bl, 8, 2)] < 0.0);
            assert!(frame.weights[frame.vis_index(bl, 8, 1)] > 0.0);
        }
        // antenna 2's auto is not flagged
        assert!(frame.weights[frame.vis_index(2, 8, 0)] > 0.0);
        // neither is anything else
        let n_flagged: usize = obs
            .frames
            .iter()
            .map(|f| f.weights.iter().filter(|&&w| w < 0.0).count())
            .sum();
        assert_eq!(n_flagged, 4);
    }

    #[test]
    fn test_flags_file() {
        let text = "# global flags\nCHAN_ALL_ANT_ALL_TIME 3\nSOMETHING_ELSE 1\nCHAN_ALL_ANT_ALL_TIME 99\n";
        let flags = FlagsFile::from_reader("flags.txt", BufReader::new(text.as_bytes())).unwrap();
        assert_eq!(
            flags.rules,
            vec![
                FlagRule::ChanAllAntAllTime(3),
                FlagRule::ChanAllAntAllTime(99)
            ]
        );

        let mut obs = flat_observation(2, 4, 1.0);
        assert_eq!(flags.apply(&mut obs), 1);
        for frame in &obs.frames {
            for bl in 0..3 {
                for pol in 0..4 {
                    assert_eq!(frame.weights[frame.vis_index(bl, 3, pol)], -1.0);
                    assert_eq!(frame.weights[frame.vis_index(bl, 2, pol)], 1.0);
                }
            }
        }
    }

    #[test]
    fn test_flags_file_bad_channel() {
        let text = "CHAN_ALL_ANT_ALL_TIME x\n";
        assert!(matches!(
            FlagsFile::from_reader("flags.txt", BufReader::new(text.as_bytes())),
            Err(ConfigError::BadLine { line_num: 1, .. })
        ));
    }
}
