// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Resolve correlator inputs into antennas and baselines.

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::{
    context::{AntennaTable, CorrType, InputMapping, ObservationHeader},
    error::ConfigError,
};

/// Baseline indices for the antenna pairs present in the data.
///
/// Indices are assigned by walking the present antennas in ascending order,
/// `(a, b)` with `a <= b`, keeping only the pairs the correlation type allows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BaselineMapper {
    /// The correlation type the lookup was built for
    pub corr_type: CorrType,
    /// Station indices with at least one input, ascending
    pub present_antennas: Vec<usize>,
    lookup: BTreeMap<(usize, usize), usize>,
    pairs: Vec<(usize, usize)>,
}

impl BaselineMapper {
    /// Check the inputs against the header and station table, then build the
    /// baseline lookup.
    ///
    /// # Errors
    ///
    /// Will return a [`ConfigError`] if the number of inputs disagrees with
    /// `N_INPUTS`, more antennas are present than there are stations, or an
    /// input refers to an antenna beyond the station table.
    pub fn new(
        header: &ObservationHeader,
        inputs: &InputMapping,
        antennas: &AntennaTable,
    ) -> Result<Self, ConfigError> {
        if inputs.len() != header.n_inputs {
            return Err(ConfigError::InputCountMismatch {
                expected: header.n_inputs,
                found: inputs.len(),
            });
        }

        let present = inputs.present_antennas();
        if present.len() > antennas.len() {
            return Err(ConfigError::AntennaCountMismatch {
                stations: antennas.len(),
                present: present.len(),
            });
        }
        if let Some((input, inp)) = inputs
            .inputs
            .iter()
            .enumerate()
            .find(|(_, inp)| inp.antenna >= antennas.len())
        {
            return Err(ConfigError::UnknownAntenna {
                input,
                antenna: inp.antenna,
                stations: antennas.len(),
            });
        }

        let n_antennas = present.len();
        let mapper = Self::from_present(header.corr_type, present.into_iter().collect());
        if mapper.num_baselines() == 0 {
            return Err(ConfigError::NoBaselines {
                corr_type: header.corr_type.as_char(),
                n_inputs: header.n_inputs,
                n_antennas,
            });
        }
        debug!(
            "{} antennas present, {} baselines for CORRTYPE {}",
            mapper.present_antennas.len(),
            mapper.num_baselines(),
            header.corr_type
        );
        Ok(mapper)
    }

    /// Build the lookup from an ascending list of present antennas.
    pub fn from_present(corr_type: CorrType, present_antennas: Vec<usize>) -> Self {
        let mut lookup = BTreeMap::new();
        let mut pairs = vec![];
        for (i, &ant1) in present_antennas.iter().enumerate() {
            for &ant2 in &present_antennas[i..] {
                if corr_type.includes_pair(ant1, ant2) {
                    trace!("baseline {} is antennas ({ant1}, {ant2})", pairs.len());
                    lookup.insert((ant1, ant2), pairs.len());
                    pairs.push((ant1, ant2));
                }
            }
        }
        Self {
            corr_type,
            present_antennas,
            lookup,
            pairs,
        }
    }

    /// The baseline index of an antenna pair, in either order.
    pub fn baseline_index(&self, ant1: usize, ant2: usize) -> Option<usize> {
        let key = if ant1 <= ant2 {
            (ant1, ant2)
        } else {
            (ant2, ant1)
        };
        self.lookup.get(&key).copied()
    }

    /// The antenna pair of a baseline index.
    pub fn antenna_pair(&self, baseline: usize) -> Option<(usize, usize)> {
        self.pairs.get(baseline).copied()
    }

    /// Every antenna pair, in baseline index order.
    pub fn antenna_pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }

    /// Number of baselines per frame.
    pub fn num_baselines(&self) -> usize {
        self.pairs.len()
    }

    /// Number of antennas with data.
    pub fn num_present_antennas(&self) -> usize {
        self.present_antennas.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Antenna, CorrelatorInput};
    use marlu::XyzGeodetic;
    use std::io::BufReader;

    fn header(n_inputs: usize, corr_type: char) -> ObservationHeader {
        let text = format!(
            "N_INPUTS {n_inputs}\nCORRTYPE {corr_type}\nFREQCENT 100\nRA_HRS 0\nDEC_DEGS 0\nDATE 20120101\n"
        );
        ObservationHeader::from_reader("header.txt", BufReader::new(text.as_bytes())).unwrap()
    }

    fn inputs(antennas: &[usize]) -> InputMapping {
        InputMapping {
            inputs: antennas
                .iter()
                .map(|&antenna| CorrelatorInput {
                    antenna,
                    pol: 0,
                    cable_delta_m: 0.0,
                    flagged: false,
                })
                .collect(),
        }
    }

    fn stations(n: usize) -> AntennaTable {
        AntennaTable {
            antennas: (0..n)
                .map(|i| Antenna::new(&format!("T{i}"), i, XyzGeodetic::default()))
                .collect(),
        }
    }

    #[test]
    fn test_baseline_counts_follow_corr_type() {
        let present = vec![0, 2, 5];
        for (corr_type, expected) in [
            (CorrType::Both, 6),
            (CorrType::Auto, 3),
            (CorrType::Cross, 3),
        ] {
            let mapper = BaselineMapper::from_present(corr_type, present.clone());
            assert_eq!(mapper.num_baselines(), expected);
            assert_eq!(mapper.num_baselines(), corr_type.num_baselines(3));
        }
    }

    #[test]
    fn test_lookup_order() {
        let mapper = BaselineMapper::from_present(CorrType::Both, vec![0, 2, 5]);
        assert_eq!(
            mapper.antenna_pairs(),
            &[(0, 0), (0, 2), (0, 5), (2, 2), (2, 5), (5, 5)]
        );
        assert_eq!(mapper.baseline_index(5, 2), Some(4));
        assert_eq!(mapper.baseline_index(1, 1), None);

        let cross = BaselineMapper::from_present(CorrType::Cross, vec![0, 2, 5]);
        assert_eq!(cross.baseline_index(0, 0), None);
        assert_eq!(cross.baseline_index(2, 5), Some(2));
    }

    #[test]
    fn test_new_validates() {
        let mapper = BaselineMapper::new(&header(4, 'B'), &inputs(&[0, 0, 1, 1]), &stations(3)).unwrap();
        assert_eq!(mapper.present_antennas, vec![0, 1]);
        assert_eq!(mapper.num_baselines(), 3);

        assert!(matches!(
            BaselineMapper::new(&header(6, 'B'), &inputs(&[0, 0, 1, 1]), &stations(3)),
            Err(ConfigError::InputCountMismatch {
                expected: 6,
                found: 4
            })
        ));
        assert!(matches!(
            BaselineMapper::new(&header(4, 'B'), &inputs(&[0, 1, 2, 3]), &stations(3)),
            Err(ConfigError::AntennaCountMismatch {
                stations: 3,
                present: 4
            })
        ));
        assert!(matches!(
            BaselineMapper::new(&header(1, 'C'), &inputs(&[0]), &stations(3)),
            Err(ConfigError::NoBaselines {
                corr_type: 'C',
                n_inputs: 1,
                n_antennas: 1
            })
        ));
        assert!(matches!(
            BaselineMapper::new(&header(2, 'C'), &inputs(&[1, 1]), &stations(3)),
            Err(ConfigError::NoBaselines { .. })
        ));
        assert!(matches!(
            BaselineMapper::new(&header(2, 'B'), &inputs(&[0, 7]), &stations(3)),
            Err(ConfigError::UnknownAntenna {
                input: 1,
                antenna: 7,
                ..
            })
        ));
    }
}
