// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use corr2uvfits::{
    context::{Antenna, AntennaTable},
    corrections::ProductCorrection,
    flags::{auto_flag, AutoFlagMode},
    io::{encode_baseline, write_uvfits},
    Observation, VisibilityFrame,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use marlu::{c32, RADec, XyzGeocentric, XyzGeodetic};
use tempfile::tempdir;

const NUM_ANTS: usize = 32;
const NUM_CHANS: usize = 128;
const NUM_TIMESTEPS: usize = 10;

/// Every baseline of `NUM_ANTS` antennas including autos, with a little
/// scatter in the samples.
fn synthetic_observation() -> Observation {
    let pairs: Vec<(usize, usize)> = (1..=NUM_ANTS)
        .flat_map(|a1| (a1..=NUM_ANTS).map(move |a2| (a1, a2)))
        .collect();
    let frames = (0..NUM_TIMESTEPS)
        .map(|t| {
            let mut frame = VisibilityFrame::new(
                2455928.0 + t as f64 * 8.0 / 86400.0,
                pairs.len(),
                NUM_CHANS,
                4,
            );
            for (bl, &(a1, a2)) in pairs.iter().enumerate() {
                frame.baselines[bl] = encode_baseline(a1, a2);
                for chan in 0..NUM_CHANS {
                    for pol in 0..4 {
                        let idx = frame.vis_index(bl, chan, pol);
                        let jitter = ((t * 7 + chan * 3 + pol + bl) % 11) as f32 * 0.01;
                        frame.vis[idx] = c32::new(10.0 + jitter, jitter);
                        frame.weights[idx] = 8.0;
                    }
                }
            }
            frame
        })
        .collect();
    Observation {
        field_name: "BENCH".to_string(),
        phase_centre: RADec::from_degrees(60.0, -27.0),
        n_freq: NUM_CHANS,
        n_pol: 4,
        pol_type: -5,
        cent_freq_hz: 150e6,
        freq_delta_hz: 10e3,
        array_name: "BENCH".to_string(),
        array_xyz: XyzGeocentric::default(),
        antennas: AntennaTable {
            antennas: (0..NUM_ANTS)
                .map(|i| {
                    let position = XyzGeodetic {
                        x: i as f64,
                        y: 2.0 * i as f64,
                        z: 0.5 * i as f64,
                    };
                    Antenna::new(&format!("Tile{:03}", i + 1), i, position)
                })
                .collect(),
        },
        frames,
    }
}

fn bench_phase_correction(crt: &mut Criterion) {
    let correction = ProductCorrection {
        w_m: 123.4,
        cable_delay_m: 5.6,
        reversed: true,
        conjugate: false,
    };
    let lambdas_m: Vec<f64> = (0..NUM_CHANS)
        .map(|chan| 299.792458 / (150.0 + chan as f64 * 0.01))
        .collect();
    let mut spectrum = vec![c32::new(1.0, 0.5); NUM_CHANS];

    crt.bench_function(
        format!("phase_correction - {} channels", NUM_CHANS).as_str(),
        |bch| {
            bch.iter(|| {
                correction.apply_spectrum(black_box(&mut spectrum), black_box(&lambdas_m));
            })
        },
    );
}

fn bench_auto_flag(crt: &mut Criterion) {
    let obs = synthetic_observation();

    crt.bench_function(
        format!(
            "auto_flag - {} ants, {} channels, {} timesteps",
            NUM_ANTS, NUM_CHANS, NUM_TIMESTEPS
        )
        .as_str(),
        |bch| {
            bch.iter(|| {
                let mut obs = obs.clone();
                auto_flag(
                    black_box(&mut obs),
                    5.0,
                    2,
                    AutoFlagMode::CoarseBands,
                    false,
                )
            })
        },
    );
}

fn bench_uvfits_output(crt: &mut Criterion) {
    let obs = synthetic_observation();
    let tmp_dir = tempdir().unwrap();
    let uvfits_path = tmp_dir.path().join("bench.uvfits");

    crt.bench_function(
        format!("uvfits_output - {} timesteps", NUM_TIMESTEPS).as_str(),
        |bch| {
            bch.iter(|| {
                write_uvfits(black_box(uvfits_path.as_path()), black_box(&obs)).unwrap();
            })
        },
    );
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_phase_correction, bench_auto_flag, bench_uvfits_output
);
criterion_main!(benches);
