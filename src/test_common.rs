// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use byteorder::{LittleEndian, WriteBytesExt};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// Paths of a synthetic dataset written by [`write_test_dataset`].
pub struct TestPaths {
    pub header: PathBuf,
    pub instr_config: PathBuf,
    pub stations: PathBuf,
    pub autos: PathBuf,
    pub cross: PathBuf,
}

/// Write a small dual-pol observation of `n_ants` antennas into `dir`.
///
/// Autocorrelations are `10 + 0.1 * chan`, crosses are `1 + 0.5i`.
pub fn write_test_dataset(dir: &Path, n_scans: usize, n_ants: usize, n_chans: usize) -> TestPaths {
    let n_inputs = 2 * n_ants;
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
        "# synthetic\nFIELDNAME TEST\nN_SCANS {n_scans}\nN_INPUTS {n_inputs}\nN_CHANS {n_chans}\n\
         CORRTYPE B\nINT_TIME 8\nFREQCENT 150.0\nBANDWIDTH 1.28\nHA_HRS 0.0\nRA_HRS 4.0\n\
         DEC_DEGS -27.0\nDATE 20120101\nTIME 120000"
    )
    .unwrap();

    let mut instr_config = File::create(&paths.instr_config).unwrap();
    writeln!(instr_config, "# input antenna pol delta flag").unwrap();
    for input in 0..n_inputs {
        let pol = if input % 2 == 0 { 'X' } else { 'Y' };
        writeln!(instr_config, "{input} {} {pol} 0.0 0", input / 2).unwrap();
    }

    let mut stations = File::create(&paths.stations).unwrap();
    for ant in 0..n_ants {
        writeln!(
            stations,
            "Tile{:02} {:.1} {:.1} 0.0",
            ant + 1,
            10.0 * ant as f64,
            -5.0 * ant as f64
        )
        .unwrap();
    }

    let mut autos = BufWriter::new(File::create(&paths.autos).unwrap());
    let mut cross = BufWriter::new(File::create(&paths.cross).unwrap());
    for _ in 0..n_scans {
        for inp1 in 0..n_inputs {
            for inp2 in inp1..n_inputs {
                for chan in 0..n_chans {
                    if inp1 == inp2 {
                        autos
                            .write_f32::<LittleEndian>(10.0 + 0.1 * chan as f32)
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
