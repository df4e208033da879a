// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Run a whole conversion: map inputs, ingest every scan, flag, and write.

use std::{
    collections::HashMap,
    fmt::Display,
    path::PathBuf,
    time::Duration,
};

use derive_builder::Builder;
use log::{info, trace, warn};

use crate::{
    constants::{DEFAULT_AUTOFLAG_N_NEIGHBOURS, DEFAULT_AUTOFLAG_SIGMA},
    context::{AntennaTable, ArrayGeometry, InputMapping, ObservationHeader},
    error::{ConfigError, Corr2UvfitsError},
    flags::{auto_flag, AutoFlagMode, FlagsFile},
    ingest::{check_streams, IngestSession},
    io::UvfitsWriter,
    mapper::BaselineMapper,
    util::progress_bar,
    with_increment_duration, Observation,
};

/// Options for converting one observation.
#[derive(Builder, Debug, Default, Clone)]
pub struct ConversionOptions {
    /// The autocorrelation dump
    #[builder(default)]
    pub autos_in: Option<PathBuf>,
    /// The cross-correlation dump
    #[builder(default)]
    pub cross_in: Option<PathBuf>,
    /// Where to write the uvfits file
    pub uvfits_out: PathBuf,

    /// Hold the apparent hour angle at `HA_HRS` and evaluate all frame
    /// geometry at the first scan.
    #[builder(default = "false")]
    pub lock_pointing: bool,
    /// Auto-flagging mode, if any
    #[builder(default)]
    pub autoflag: Option<AutoFlagMode>,
    /// Outlier threshold for auto-flagging, in σ
    #[builder(default = "DEFAULT_AUTOFLAG_SIGMA")]
    pub autoflag_sigma: f32,
    /// Channels either side used for the local auto-flagging statistics
    #[builder(default = "DEFAULT_AUTOFLAG_N_NEIGHBOURS")]
    pub autoflag_n_neighbours: usize,
    /// Channels to flag for every antenna and time
    #[builder(default)]
    pub flags_file: Option<PathBuf>,

    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Display for ConversionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} lock pointing.",
            if self.lock_pointing {
                "Will"
            } else {
                "Will not"
            }
        )?;
        if let Some(mode) = self.autoflag {
            writeln!(
                f,
                "Will auto flag with mode {} at {} sigma over {} neighbouring channels.",
                mode, self.autoflag_sigma, self.autoflag_n_neighbours
            )?;
        } else {
            writeln!(f, "Will not auto flag.")?;
        }
        if let Some(flags_file) = &self.flags_file {
            writeln!(f, "Will apply flags from {}.", flags_file.display())?;
        } else {
            writeln!(f, "Will not apply a flags file.")?;
        }
        Ok(())
    }
}

impl ConversionOptions {
    /// Check the options make sense for an observation, before any data is
    /// read.
    ///
    /// # Errors
    ///
    /// See [`check_streams`].
    pub fn validate(&self, header: &ObservationHeader) -> Result<(), ConfigError> {
        check_streams(
            header.corr_type,
            self.autos_in.is_some(),
            self.cross_in.is_some(),
            self.autoflag.is_some(),
        )
    }
}

/// What a conversion did.
#[derive(Debug, Default, Clone)]
pub struct ConversionReport {
    /// Number of scans read from the dumps
    pub num_scans: usize,
    /// Number of baselines in each scan
    pub num_baselines: usize,
    /// Number of outliers found by auto-flagging
    pub num_outliers: usize,
    /// Number of flags-file rules applied
    pub num_flag_rules: usize,
    /// Wall time spent in each stage
    pub durations: HashMap<String, Duration>,
}

/// Convert the dumps described by `header` and `options` into a uvfits file.
///
/// Configuration problems are all found before any visibilities are read.
///
/// # Errors
///
/// Will return a [`Corr2UvfitsError`] if the configuration is inconsistent,
/// a dump can't be read, or the uvfits file can't be written.
pub fn convert_observation(
    header: &ObservationHeader,
    inputs: &InputMapping,
    antennas: &AntennaTable,
    geometry: &ArrayGeometry,
    options: &ConversionOptions,
) -> Result<ConversionReport, Corr2UvfitsError> {
    trace!("start convert_observation");

    let mut durations = HashMap::<String, Duration>::new();

    // //////////// //
    // Check config //
    // //////////// //

    let (mapper, locked_ha_rad, flags_file, array_xyz) = with_increment_duration!(durations, "init", {
        options.validate(header)?;
        let mapper = BaselineMapper::new(header, inputs, antennas)?;
        let locked_ha_rad = if options.lock_pointing {
            Some(header.locked_hour_angle_rad("header")?)
        } else {
            None
        };
        let flags_file = options
            .flags_file
            .as_ref()
            .map(FlagsFile::read)
            .transpose()?;
        let array_xyz = geometry.to_geocentric()?;
        (mapper, locked_ha_rad, flags_file, array_xyz)
    });

    // ////// //
    // Ingest //
    // ////// //

    let frames = with_increment_duration!(durations, "read", {
        let mut session = IngestSession::new(
            header,
            inputs,
            &mapper,
            antennas.positions(),
            geometry.location,
            locked_ha_rad,
        );
        session.open(options.autos_in.as_deref(), options.cross_in.as_deref())?;

        let read_progress = progress_bar(header.n_scans, "reading scans", options.draw_progress);
        let mut frames = Vec::with_capacity(header.n_scans);
        for frame in &mut session {
            frames.push(frame?);
            read_progress.inc(1);
        }
        read_progress.finish();
        frames
    });

    if frames.is_empty() {
        warn!("no scans were read, the uvfits file will hold no data");
    }
    info!(
        "read {} scans of {} baselines",
        frames.len(),
        mapper.num_baselines()
    );

    let mut obs = Observation {
        field_name: header.field_name.clone(),
        phase_centre: header.phase_centre(),
        n_freq: header.n_chans,
        n_pol: header.num_pols(),
        pol_type: header.pol_type(),
        cent_freq_hz: header.cent_freq_hz(),
        freq_delta_hz: header.freq_delta_hz(),
        array_name: geometry.name.clone(),
        array_xyz,
        antennas: antennas.clone(),
        frames,
    };

    // //////// //
    // Flagging //
    // //////// //

    let num_outliers = match options.autoflag {
        Some(mode) => with_increment_duration!(durations, "flag", {
            auto_flag(
                &mut obs,
                options.autoflag_sigma,
                options.autoflag_n_neighbours,
                mode,
                options.draw_progress,
            )
        }),
        None => 0,
    };

    let num_flag_rules = match &flags_file {
        Some(flags_file) => with_increment_duration!(durations, "flag", {
            flags_file.apply(&mut obs)
        }),
        None => 0,
    };

    // ///// //
    // Write //
    // ///// //

    with_increment_duration!(durations, "write", {
        let mut writer = UvfitsWriter::new(
            &options.uvfits_out,
            &obs,
            obs.num_groups(),
            header.start_jd(),
        )?;
        let write_progress =
            progress_bar(obs.num_frames(), "writing uvfits", options.draw_progress);
        for frame in &obs.frames {
            writer.write_frame(frame)?;
            write_progress.inc(1);
        }
        writer.finalise(&obs.antennas)?;
        write_progress.finish();
    });

    trace!("end convert_observation");

    Ok(ConversionReport {
        num_scans: obs.num_frames(),
        num_baselines: mapper.num_baselines(),
        num_outliers,
        num_flag_rules,
        durations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_defaults() {
        let options = ConversionOptionsBuilder::default()
            .uvfits_out("out.uvfits".into())
            .build()
            .unwrap();
        assert!(!options.lock_pointing);
        assert!(options.draw_progress);
        assert!(options.autoflag.is_none());
        assert!((options.autoflag_sigma - DEFAULT_AUTOFLAG_SIGMA).abs() < f32::EPSILON);
        assert_eq!(options.autoflag_n_neighbours, DEFAULT_AUTOFLAG_N_NEIGHBOURS);
    }

    #[test]
    fn test_options_require_output() {
        assert!(ConversionOptionsBuilder::default().build().is_err());
    }

    #[test]
    fn test_options_display() {
        let options = ConversionOptionsBuilder::default()
            .uvfits_out("out.uvfits".into())
            .lock_pointing(true)
            .autoflag(Some(AutoFlagMode::CoarseBands))
            .autoflag_sigma(3.0)
            .autoflag_n_neighbours(4)
            .build()
            .unwrap();
        let display = options.to_string();
        assert!(display.contains("Will lock pointing."));
        assert!(display.contains("Will auto flag with mode 2 at 3 sigma over 4 neighbouring channels."));
        assert!(display.contains("Will not apply a flags file."));
    }
}
