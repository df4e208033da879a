// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Errors that can occur anywhere in the conversion.

use thiserror::Error;

use crate::{
    io::error::{UvfitsReadError, UvfitsWriteError},
    pos::error::ErfaError,
};

#[derive(Error, Debug)]
/// Problems with the plain-text inputs, or with how they fit together. These
/// are always raised before any visibility data is touched.
pub enum ConfigError {
    /// A required file could not be opened or read.
    #[error("{source_file}:{source_line}\nCouldn't read {file}: {io_error}")]
    FileRead {
        /// The file that could not be read
        file: String,
        /// The underlying error
        io_error: std::io::Error,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A line could not be parsed.
    #[error("{source_file}:{source_line}\nFailed parsing {file} line {line_num}: <{line}>. {reason}")]
    BadLine {
        /// The file being parsed
        file: String,
        /// The 1-based line number
        line_num: usize,
        /// The offending line
        line: String,
        /// What was wrong with it
        reason: String,
        /// The file where the error originated (usually `file!()`)
        source_file: &'static str,
        /// The line number where the error originated (usually `line!()`)
        source_line: u32,
    },

    /// A header key without a default was not given.
    #[error("{key} unspecified in {file}. There is no default.")]
    MissingKey {
        /// The header file
        file: String,
        /// The missing key
        key: &'static str,
    },

    /// Locked pointing needs `HA_HRS`.
    #[error("HA_HRS must be specified in {file} when pointing is locked")]
    LockedPointingWithoutHourAngle {
        /// The header file
        file: String,
    },

    /// The input mapping and the header disagree.
    #[error("mismatch between the number of inputs in the instrument config ({found}) and header ({expected})")]
    InputCountMismatch {
        /// `N_INPUTS` from the header
        expected: usize,
        /// Number of inputs listed in the instrument config
        found: usize,
    },

    /// More antennas are used than the station file describes.
    #[error("mismatch between the number of antennas in the station file ({stations}) and the instrument config ({present})")]
    AntennaCountMismatch {
        /// Number of stations in the station file
        stations: usize,
        /// Number of distinct antennas in the instrument config
        present: usize,
    },

    /// An input refers to an antenna index beyond the station table.
    #[error("input {input} refers to antenna {antenna}, but only {stations} stations are known")]
    UnknownAntenna {
        /// The correlator input
        input: usize,
        /// The antenna index it refers to
        antenna: usize,
        /// Number of stations in the station file
        stations: usize,
    },

    /// The requested auto-flagging can't run on this data.
    #[error("cannot auto flag: {reason}")]
    AutoFlagUnavailable {
        /// Why
        reason: String,
    },

    /// The inputs form no baseline of the requested correlation type.
    #[error("no baselines for CORRTYPE {corr_type} from {n_inputs} inputs on {n_antennas} antennas")]
    NoBaselines {
        /// The correlation type letter
        corr_type: char,
        /// Number of correlator inputs
        n_inputs: usize,
        /// Number of distinct antennas in the instrument config
        n_antennas: usize,
    },

    /// A correlator dump needed for this correlation type was not given.
    #[error("CORRTYPE {corr_type} requires the {kind} correlation file")]
    MissingDump {
        /// The correlation type letter
        corr_type: char,
        /// "auto" or "cross"
        kind: &'static str,
    },
}

#[derive(Error, Debug)]
/// Problems reading scans from the correlator dumps.
pub enum IngestError {
    /// A dump could not be opened.
    #[error("cannot open {kind} correlation input file <{path}>: {io_error}")]
    Open {
        /// "auto" or "cross"
        kind: &'static str,
        /// The path
        path: String,
        /// The underlying error
        io_error: std::io::Error,
    },

    /// A block ended early.
    #[error("scan {scan}, inputs {inp1},{inp2}: expected to read {expected} channels, only got {got}")]
    ShortRead {
        /// The scan being read
        scan: usize,
        /// First input of the product
        inp1: usize,
        /// Second input of the product
        inp2: usize,
        /// Channels expected
        expected: usize,
        /// Complete channels read
        got: usize,
    },

    /// The correlation type needs a dump that was not attached.
    #[error("CORRTYPE {corr_type} requires the {kind} correlation stream")]
    MissingStream {
        /// The correlation type letter
        corr_type: char,
        /// "auto" or "cross"
        kind: &'static str,
    },

    /// `next_scan` was called when the session was not ready.
    #[error("ingest session is {state}, cannot read scan")]
    NotReady {
        /// The state the session was in
        state: String,
    },

    /// A generic IO error.
    #[error(transparent)]
    IO(#[from] std::io::Error),

    /// An error from the coordinate engine.
    #[error(transparent)]
    Erfa(#[from] ErfaError),
}

#[derive(Error, Debug)]
/// All the errors that can occur in corr2uvfits.
pub enum Corr2UvfitsError {
    /// Not actually an error, the user asked for a dry run.
    #[error("Dry run")]
    DryRun {},

    /// An invalid command line argument.
    #[error("Invalid Command Line Argument {option}. expected {expected}, received {received}")]
    InvalidCommandLineArgument {
        /// The argument
        option: String,
        /// What it should look like
        expected: String,
        /// What was given
        received: String,
    },

    #[cfg(feature = "cli")]
    #[error(transparent)]
    /// Error derived from [`clap::Error`]
    ClapError(#[from] clap::Error),

    #[error(transparent)]
    /// Error derived from [`ConfigError`]
    ConfigError(#[from] ConfigError),

    #[error(transparent)]
    /// Error derived from [`IngestError`]
    IngestError(#[from] IngestError),

    #[error(transparent)]
    /// Error derived from [`UvfitsWriteError`]
    UvfitsWriteError(#[from] UvfitsWriteError),

    #[error(transparent)]
    /// Error derived from [`UvfitsReadError`]
    UvfitsReadError(#[from] UvfitsReadError),

    #[error(transparent)]
    /// Error derived from [`ErfaError`]
    ErfaError(#[from] ErfaError),

    #[error(transparent)]
    /// Error derived from [`std::io::Error`]
    IO(#[from] std::io::Error),
}
