// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Command Line Interface helpers for corr2uvfits

use crate::{
    constants::{DEFAULT_AUTOFLAG_N_NEIGHBOURS, DEFAULT_AUTOFLAG_SIGMA, DEFAULT_HEIGHT_METRES},
    context::{AntennaTable, ArrayGeometry, InputMapping, ObservationHeader},
    error::{Corr2UvfitsError, Corr2UvfitsError::DryRun},
    flags::AutoFlagMode,
    mapper::BaselineMapper,
    pipeline::{convert_observation, ConversionOptions, ConversionReport},
};
use clap::{arg, command, ValueHint::FilePath};
use log::{debug, info, trace};
use prettytable::{format as prettyformat, row, table};
use std::{
    ffi::OsString,
    fmt::{Debug, Display},
    path::PathBuf,
    time::Duration,
};

const DEFAULT_HEADER_PATH: &str = "header.txt";
const DEFAULT_INSTR_CONFIG_PATH: &str = "instr_config.txt";
const DEFAULT_STATIONS_PATH: &str = "antenna_locations.txt";

/// Everything needed to convert one observation, loaded and checked.
pub struct Corr2UvfitsContext {
    /// Where the header was read from
    pub header_path: PathBuf,
    /// The observation header
    pub header: ObservationHeader,
    /// The correlator input mapping
    pub inputs: InputMapping,
    /// The stations
    pub antennas: AntennaTable,
    /// Where the array is
    pub geometry: ArrayGeometry,
    /// Conversion options
    pub options: ConversionOptions,
}

// Add build-time information from the "built" crate.
include!(concat!(env!("OUT_DIR"), "/built.rs"));

/// Write many info-level log lines of how this executable was compiled.
///
/// # Errors
///
/// propagates writeln! fails
pub fn fmt_build_info(f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match GIT_HEAD_REF {
        Some(hr) => {
            let dirty = GIT_DIRTY.unwrap_or(false);
            writeln!(
                f,
                "Compiled on git commit hash: {}{}",
                GIT_COMMIT_HASH.unwrap_or("<unknown>"),
                if dirty { " (dirty)" } else { "" }
            )?;
            writeln!(f, "            git head ref: {}", hr)?;
        }
        None => writeln!(f, "Compiled on git commit hash: <no git info>")?,
    }
    writeln!(f, "            {}", BUILT_TIME_UTC)?;
    writeln!(f, "         with compiler {}", RUSTC_VERSION)?;
    writeln!(f)?;
    Ok(())
}

impl Display for Corr2UvfitsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} version {}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
        )?;

        fmt_build_info(f)?;

        let header = &self.header;
        writeln!(f, "Field name:           {}", header.field_name)?;
        writeln!(f, "Array position:       {}", &self.geometry.location)?;
        writeln!(f, "Phase centre:         {}", header.phase_centre())?;
        if let Some(ha_hrs) = header.ha_hrs {
            writeln!(f, "Hour angle:           {ha_hrs} h")?;
        }
        writeln!(
            f,
            "Start:                {}, jd={:.6} (first scan centre)",
            header.start_epoch,
            header.start_jd()
        )?;
        writeln!(
            f,
            "Scans:                {} x {} s",
            header.n_scans, header.int_time
        )?;
        writeln!(
            f,
            "Channels:             {} x {:.3} kHz centred on {} MHz{}",
            header.n_chans,
            header.freq_delta_hz().abs() / 1e3,
            header.cent_freq_mhz,
            if header.invert_freq { ", inverted" } else { "" }
        )?;
        writeln!(
            f,
            "Correlations:         CORRTYPE {} with {} inputs{}",
            header.corr_type,
            header.n_inputs,
            if header.conjugate { ", conjugated" } else { "" }
        )?;
        writeln!(
            f,
            "{} correct geometry.",
            if header.geom_correct {
                "Will"
            } else {
                "Will not"
            }
        )?;

        let mut ant_table = table!([
            "",
            "name",
            "X [m]",
            "Y [m]",
            "Z [m]",
            "inputs",
            "f"
        ]);
        ant_table.set_format(*prettyformat::consts::FORMAT_CLEAN);
        for (ant_idx, antenna) in self.antennas.antennas.iter().enumerate() {
            let ant_inputs: Vec<usize> = self
                .inputs
                .inputs
                .iter()
                .enumerate()
                .filter_map(|(idx, inp)| (inp.antenna == ant_idx).then_some(idx))
                .collect();
            let flagged = ant_inputs
                .iter()
                .any(|&idx| self.inputs.inputs[idx].flagged);
            let row = row![r =>
                format!("ant{}:", ant_idx),
                antenna.name,
                format!("{:.3}", antenna.position.x),
                format!("{:.3}", antenna.position.y),
                format!("{:.3}", antenna.position.z),
                format!("{:?}", ant_inputs),
                if flagged {"f"} else {""}
            ];
            ant_table.add_row(row);
        }
        writeln!(
            f,
            "Antenna details (all={}):\n{}",
            self.antennas.len(),
            ant_table
        )?;

        writeln!(f, "Conversion Options: \n{}", &self.options)?;

        Ok(())
    }
}

impl Corr2UvfitsContext {
    fn get_matches<I, T>(args: I) -> Result<clap::ArgMatches, Corr2UvfitsError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        let app = command!()
            .arg_required_else_help(true)
            .next_line_help(false)
            .about("Convert raw correlator auto and cross correlation dumps into UVFITS.")
            .args(&[
                // input options
                arg!(-a --autos <PATH> "Autocorrelation dump")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-c --cross <PATH> "Cross correlation dump")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-H --header <PATH> "Observation header file")
                    .required(false)
                    .default_value(DEFAULT_HEADER_PATH)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-I --"instr-config" <PATH> "Correlator input to antenna mapping")
                    .required(false)
                    .default_value(DEFAULT_INSTR_CONFIG_PATH)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),
                arg!(-S --stations <PATH> "Station locations, local east north height [m]")
                    .required(false)
                    .default_value(DEFAULT_STATIONS_PATH)
                    .value_hint(FilePath)
                    .help_heading("INPUT"),

                // processing options
                arg!(-A --"array-location" <LON_LAT> "Array longitude,latitude [degrees]")
                    .required(false)
                    .allow_hyphen_values(true),
                arg!(-l --"lock-pointing" "Hold the apparent hour angle at HA_HRS"),
                arg!(--"dry-run" "Just print the summary and exit"),
                arg!(--"no-draw-progress" "do not show progress bars"),
                arg!(-d --debug ... "Raise the log level, repeat for more"),

                // flagging options
                arg!(-f --autoflag <MODE> "Flag outliers in the autocorrelations. \
                        1: generic, 2: 32 channel coarse bands with edges excluded")
                    .required(false)
                    .help_heading("FLAGGING"),
                arg!(--"autoflag-sigma" <SIGMA> "Outlier threshold for auto-flagging, in sigma")
                    .required(false)
                    .help_heading("FLAGGING"),
                arg!(--"autoflag-neighbours" <N> "Channels either side used for the local auto-flagging statistics")
                    .required(false)
                    .help_heading("FLAGGING"),
                arg!(-F --"flags-file" <PATH> "Channels to flag for every antenna and time")
                    .required(false)
                    .value_hint(FilePath)
                    .help_heading("FLAGGING"),

                // output options
                arg!(-o --"uvfits-out" <PATH> "Path for uvfits output")
                    .required(true)
                    .value_hint(FilePath)
                    .help_heading("OUTPUT"),
            ]);

        Ok(app.try_get_matches_from(args)?)
    }

    fn parse_array_location(matches: &clap::ArgMatches) -> Result<ArrayGeometry, Corr2UvfitsError> {
        let value = match matches.value_of("array-location") {
            Some(value) => value,
            None => return Ok(ArrayGeometry::default()),
        };
        let invalid = || Corr2UvfitsError::InvalidCommandLineArgument {
            option: "--array-location <LON,LAT>".into(),
            expected: "longitude,latitude in degrees with -90 <= latitude <= 90".into(),
            received: value.into(),
        };
        let coords: Vec<f64> = value
            .split(',')
            .map(|s| s.trim().parse())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid())?;
        match coords.as_slice() {
            &[lon, lat] if (-90.0..=90.0).contains(&lat) => {
                debug!("array location lon={lon} lat={lat} height={DEFAULT_HEIGHT_METRES}");
                Ok(ArrayGeometry::from_lon_lat_degrees(lon, lat))
            }
            _ => Err(invalid()),
        }
    }

    fn parse_options(matches: &clap::ArgMatches) -> Result<ConversionOptions, Corr2UvfitsError> {
        let uvfits_out = match matches.value_of("uvfits-out") {
            Some(path) => path.into(),
            None => unreachable!("--uvfits-out <PATH> is required, enforced by clap"),
        };
        let autoflag = matches
            .value_of("autoflag")
            .map(str::parse::<AutoFlagMode>)
            .transpose()?;
        let autoflag_sigma = match matches.value_of("autoflag-sigma") {
            Some(value) => match value.parse::<f32>() {
                Ok(sigma) if sigma > 0.0 => sigma,
                _ => {
                    return Err(Corr2UvfitsError::InvalidCommandLineArgument {
                        option: "--autoflag-sigma <SIGMA>".into(),
                        expected: "a positive number".into(),
                        received: value.into(),
                    })
                }
            },
            None => DEFAULT_AUTOFLAG_SIGMA,
        };
        let autoflag_n_neighbours = match matches.value_of("autoflag-neighbours") {
            Some(value) => value.parse::<usize>().map_err(|_| {
                Corr2UvfitsError::InvalidCommandLineArgument {
                    option: "--autoflag-neighbours <N>".into(),
                    expected: "a non-negative integer".into(),
                    received: value.into(),
                }
            })?,
            None => DEFAULT_AUTOFLAG_N_NEIGHBOURS,
        };
        Ok(ConversionOptions {
            autos_in: matches.value_of("autos").map(Into::into),
            cross_in: matches.value_of("cross").map(Into::into),
            uvfits_out,
            lock_pointing: matches.is_present("lock-pointing"),
            autoflag,
            autoflag_sigma,
            autoflag_n_neighbours,
            flags_file: matches.value_of("flags-file").map(Into::into),
            draw_progress: !matches.is_present("no-draw-progress"),
        })
    }

    /// Parse an iterator of arguments, `args` into a `Corr2UvfitsContext`.
    ///
    /// # Errors
    ///
    /// Can raise:
    /// - `clap::Error` if clap cannot parse `args`
    /// - `Corr2UvfitsError::ConfigError` if an input file is missing,
    ///     malformed, or inconsistent with the others.
    /// - `Corr2UvfitsError::InvalidCommandLineArgument` if the arguments are
    ///     invalid.
    pub fn from_args<I, T>(args: I) -> Result<Self, Corr2UvfitsError>
    where
        I: IntoIterator<Item = T> + Debug,
        T: Into<OsString> + Clone,
    {
        debug!("args:\n{:?}", &args);
        let matches = Self::get_matches(args)?;
        Self::from_matches(&matches)
    }

    fn from_matches(matches: &clap::ArgMatches) -> Result<Self, Corr2UvfitsError> {
        trace!("arg matches:\n{:?}", &matches);

        let header_path: PathBuf = matches
            .value_of("header")
            .unwrap_or(DEFAULT_HEADER_PATH)
            .into();
        let instr_config_path = matches
            .value_of("instr-config")
            .unwrap_or(DEFAULT_INSTR_CONFIG_PATH);
        let stations_path = matches
            .value_of("stations")
            .unwrap_or(DEFAULT_STATIONS_PATH);

        let options = Self::parse_options(matches)?;
        let geometry = Self::parse_array_location(matches)?;

        let header = ObservationHeader::read(&header_path)?;
        let inputs = InputMapping::read(instr_config_path)?;
        let antennas = AntennaTable::read(stations_path, &geometry)?;

        // everything that can be checked without touching the data
        BaselineMapper::new(&header, &inputs, &antennas)?;
        options.validate(&header)?;
        if options.lock_pointing {
            header.locked_hour_angle_rad(&header_path.display().to_string())?;
        }

        let result = Self {
            header_path,
            header,
            inputs,
            antennas,
            geometry,
            options,
        };

        info!("{}", &result);

        if matches.is_present("dry-run") {
            return Err(DryRun {});
        }

        Ok(result)
    }

    /// Read, correct, flag and write the observation.
    ///
    /// # Errors
    ///
    /// See [`convert_observation`].
    pub fn run(self) -> Result<ConversionReport, Corr2UvfitsError> {
        trace!("converting with header {}", self.header_path.display());
        convert_observation(
            &self.header,
            &self.inputs,
            &self.antennas,
            &self.geometry,
            &self.options,
        )
    }
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    // a logger may already be installed, e.g. when called more than once in tests
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, level),
    )
    .try_init();
}

/// Run the whole program on `args`, returning the process exit code.
pub fn main_with_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T> + Debug,
    T: Into<OsString> + Clone,
{
    let matches = match Corr2UvfitsContext::get_matches(args) {
        Ok(matches) => matches,
        Err(Corr2UvfitsError::ClapError(inner)) => {
            // Swallow broken pipe errors
            trace!("clap error: {:?}", inner.kind());
            let _ = inner.print();
            match inner.kind() {
                clap::ErrorKind::DisplayHelp | clap::ErrorKind::DisplayVersion => return 0,
                _ => return 1,
            }
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    init_logging(matches.occurrences_of("debug"));

    let ctx = match Corr2UvfitsContext::from_matches(&matches) {
        Ok(ctx) => ctx,
        Err(DryRun {}) => {
            info!("Dry run. No files will be written.");
            return 0;
        }
        Err(e) => {
            eprintln!("error parsing args: {e}");
            return 1;
        }
    };

    match ctx.run() {
        Ok(report) => {
            info!(
                "wrote {} scans of {} baselines, {} auto flag outliers, {} flag file rules applied",
                report.num_scans, report.num_baselines, report.num_outliers, report.num_flag_rules
            );
            info!(
                "total duration: {:?}",
                report.durations.into_iter().fold(
                    Duration::ZERO,
                    |duration_sum, (name, duration)| {
                        info!("{} duration: {:?}", name, duration);
                        duration_sum + duration
                    }
                )
            );
            0
        }
        Err(e) => {
            eprintln!("conversion error: {e}");
            1
        }
    }
}
