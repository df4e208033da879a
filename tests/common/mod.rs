// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use byteorder::{LittleEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

pub struct TestPaths {
    pub header: PathBuf,
    pub instr_config: PathBuf,
    pub stations: PathBuf,
    pub autos: PathBuf,
    pub cross: PathBuf,
}

impl TestPaths {
    /// Arguments naming every input file.
    pub fn args(&self) -> Vec<String> {
        #[rustfmt::skip]
        let args = vec![
            "-a", self.autos.to_str().unwrap(),
            "-c", self.cross.to_str().unwrap(),
            "-H", self.header.to_str().unwrap(),
            "-I", self.instr_config.to_str().unwrap(),
            "-S", self.stations.to_str().unwrap(),
            "--no-draw-progress",
        ];
        args.into_iter().map(String::from).collect()
    }
}

/// A small dual-pol observation, with each input X then Y of one antenna.
pub struct TestObs {
    pub n_scans: usize,
    pub n_ants: usize,
    pub n_chans: usize,
    /// Local east, north, height of each station
    pub enh: Vec<(f64, f64, f64)>,
    /// Cable length delta of each input \[metres\]
    pub cable_m: Vec<f64>,
    pub extra_header: String,
}

impl TestObs {
    pub fn new(n_scans: usize, n_ants: usize, n_chans: usize) -> Self {
        Self {
            n_scans,
            n_ants,
            n_chans,
            enh: (0..n_ants)
                .map(|ant| (10.0 * ant as f64, -5.0 * ant as f64, 0.0))
                .collect(),
            cable_m: vec![0.0; 2 * n_ants],
            extra_header: String::new(),
        }
    }

    /// Write all the inputs into `dir`. `auto_value(scan, input, chan)` gives
    /// each autocorrelation sample, crosses are all `1 + 0.5i`.
    pub fn write<F>(&self, dir: &Path, auto_value: F) -> TestPaths
    where
        F: Fn(usize, usize, usize) -> f32,
    {
        let n_inputs = 2 * self.n_ants;
        let paths = TestPaths {
            header: dir.join("header.txt"),
            instr_config: dir.join("instr_config.txt"),
            stations: dir.join("antenna_locations.txt"),
            autos: dir.join("test.LACSPC"),
            cross: dir.join("test.LCCSPC"),
        };

        let mut header = File::create(&paths.header).unwrap();
        writeln!(
            header,
            "FIELDNAME INTEGRATION\nN_SCANS {}\nN_INPUTS {n_inputs}\nN_CHANS {}\nCORRTYPE B\n\
             INT_TIME 8\nFREQCENT 150.0\nBANDWIDTH 1.28\nHA_HRS 0.5\nRA_HRS 4.0\n\
             DEC_DEGS -27.0\nDATE 20120101\nTIME 120000\n{}",
            self.n_scans, self.n_chans, self.extra_header
        )
        .unwrap();

        let mut instr_config = File::create(&paths.instr_config).unwrap();
        for (input, cable_m) in self.cable_m.iter().enumerate() {
            let pol = if input % 2 == 0 { 'X' } else { 'Y' };
            writeln!(instr_config, "{input} {} {pol} {cable_m} 0", input / 2).unwrap();
        }

        let mut stations = File::create(&paths.stations).unwrap();
        for (ant, (e, n, h)) in self.enh.iter().enumerate() {
            writeln!(stations, "Tile{:02} {e} {n} {h}", ant + 1).unwrap();
        }

        let mut autos = BufWriter::new(File::create(&paths.autos).unwrap());
        let mut cross = BufWriter::new(File::create(&paths.cross).unwrap());
        for scan in 0..self.n_scans {
            for inp1 in 0..n_inputs {
                for inp2 in inp1..n_inputs {
                    for chan in 0..self.n_chans {
                        if inp1 == inp2 {
                            autos
                                .write_f32::<LittleEndian>(auto_value(scan, inp1, chan))
                                .unwrap();
                        } else {
                            cross.write_f32::<LittleEndian>(1.0).unwrap();
                            cross.write_f32::<LittleEndian>(0.5).unwrap();
                        }
                    }
                }
            }
        }
        autos.flush().unwrap();
        cross.flush().unwrap();

        paths
    }
}
