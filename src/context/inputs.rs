// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The instrument config: which antenna and receptor feeds each correlator
//! input.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use log::{debug, warn};

use super::meaningful_lines;
use crate::error::ConfigError;

/// One correlator input.
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelatorInput {
    /// Index into the station table
    pub antenna: usize,
    /// Receptor index, 0 for X/R/I and 1 for Y/L
    pub pol: usize,
    /// Cable length relative to nominal \[metres\]
    pub cable_delta_m: f64,
    /// Whether all data from this input should be flagged
    pub flagged: bool,
}

/// Decode a receptor letter. Unknown letters are warned about and treated as
/// the first receptor.
pub fn decode_pol_char(c: char) -> usize {
    match c.to_ascii_uppercase() {
        'X' | 'R' | 'I' => 0,
        'Y' | 'L' => 1,
        _ => {
            warn!("Unknown pol char: <{c}>");
            0
        }
    }
}

/// The index of a receptor pair in the output polarisation axis `XX, YY, XY,
/// YX`.
pub fn decode_pol_index(pol1: usize, pol2: usize) -> usize {
    match (pol1, pol2) {
        (1, 1) => 1,
        (0, 1) => 2,
        (1, 0) => 3,
        _ => 0,
    }
}

/// The mapping from correlator inputs to antennas, in input order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InputMapping {
    /// The inputs, indexed by input number
    pub inputs: Vec<CorrelatorInput>,
}

impl InputMapping {
    /// Read an instrument config file.
    ///
    /// # Errors
    ///
    /// Will return a [`ConfigError`] if the file can't be read, a line has
    /// fewer than four fields or an unparseable number, or the inputs are not
    /// numbered densely from 0.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|io_error| ConfigError::FileRead {
            file: path.display().to_string(),
            io_error,
            source_file: file!(),
            source_line: line!(),
        })?;
        Self::from_reader(&path.display().to_string(), BufReader::new(file))
    }

    /// Parse an instrument config from anything readable.
    ///
    /// Lines are `input antenna pol cable_delta [flag]`, with inputs listed
    /// in order from 0.
    ///
    /// # Errors
    ///
    /// See [`InputMapping::read`]. Input numbers that skip, repeat or go out
    /// of order are also an error.
    pub fn from_reader<R: Read>(file: &str, reader: BufReader<R>) -> Result<Self, ConfigError> {
        let mut inputs = vec![];
        for result in meaningful_lines(file, reader.lines()) {
            let (line_num, line) = result?;
            let bad_line = |reason: &str| ConfigError::BadLine {
                file: file.to_string(),
                line_num,
                line: line.clone(),
                reason: reason.to_string(),
                source_file: file!(),
                source_line: line!(),
            };

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return Err(bad_line("expected: input antenna pol cable_delta [flag]"));
            }
            let input: usize = fields[0]
                .parse()
                .map_err(|_| bad_line("input must be a non-negative integer"))?;
            if input != inputs.len() {
                return Err(bad_line(&format!(
                    "expected input {}, inputs must be numbered densely from 0",
                    inputs.len()
                )));
            }
            let antenna = fields[1]
                .parse()
                .map_err(|_| bad_line("antenna must be a non-negative integer"))?;
            let pol = fields[2]
                .chars()
                .next()
                .map(decode_pol_char)
                .unwrap_or_default();
            let cable_delta_m = fields[3]
                .parse()
                .map_err(|_| bad_line("cable length delta must be a number"))?;
            let flagged = match fields.get(4) {
                Some(flag) => {
                    flag.parse::<i32>()
                        .map_err(|_| bad_line("flag must be an integer"))?
                        != 0
                }
                None => false,
            };

            debug!(
                "input: {input} is antenna {antenna} with pol {pol}. Length delta: {cable_delta_m}"
            );
            inputs.push(CorrelatorInput {
                antenna,
                pol,
                cable_delta_m,
                flagged,
            });
        }
        Ok(Self { inputs })
    }

    /// Number of inputs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether there are no inputs.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Distinct antenna indices that at least one input refers to, ascending.
    pub fn present_antennas(&self) -> BTreeSet<usize> {
        self.inputs.iter().map(|inp| inp.antenna).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn parse(text: &str) -> Result<InputMapping, ConfigError> {
        InputMapping::from_reader("instr_config.txt", BufReader::new(text.as_bytes()))
    }

    #[test]
    fn test_parse_mapping() {
        let mapping = parse(
            "# lines: input antenna pol delta flag\n\
             0 0 X 0.0 0\n\
             1 0 Y 1.5\n\
             \n\
             2 3 l -2.0 1\n\
             3 3 R 0\n",
        )
        .unwrap();
        assert_eq!(mapping.len(), 4);
        assert_eq!(mapping.inputs[1].pol, 1);
        assert_abs_diff_eq!(mapping.inputs[1].cable_delta_m, 1.5);
        assert_eq!(mapping.inputs[2].pol, 1);
        assert!(mapping.inputs[2].flagged);
        assert!(!mapping.inputs[3].flagged);
        assert_eq!(mapping.inputs[3].pol, 0);
        assert_eq!(
            mapping.present_antennas().into_iter().collect::<Vec<_>>(),
            vec![0, 3]
        );
    }

    #[test]
    fn test_short_line_is_error() {
        assert!(matches!(
            parse("0 0 X\n"),
            Err(ConfigError::BadLine { line_num: 1, .. })
        ));
    }

    #[test]
    fn test_inputs_must_be_dense() {
        assert!(matches!(
            parse("0 0 X 0.0\n2 1 X 0.0\n"),
            Err(ConfigError::BadLine { line_num: 2, .. })
        ));
        assert!(matches!(
            parse("1 0 X 0.0\n"),
            Err(ConfigError::BadLine { line_num: 1, .. })
        ));
        assert!(matches!(
            parse("0 0 X 0.0\n0 0 Y 0.0\n"),
            Err(ConfigError::BadLine { line_num: 2, .. })
        ));
        assert!(matches!(
            parse("x 0 X 0.0\n"),
            Err(ConfigError::BadLine { line_num: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_pol_is_first_receptor() {
        let mapping = parse("0 1 Q 0.0\n").unwrap();
        assert_eq!(mapping.inputs[0].pol, 0);
    }

    #[test]
    fn test_pol_index() {
        assert_eq!(decode_pol_index(0, 0), 0);
        assert_eq!(decode_pol_index(1, 1), 1);
        assert_eq!(decode_pol_index(0, 1), 2);
        assert_eq!(decode_pol_index(1, 0), 3);
    }
}
