//! Deterministic synthetic measurement generator.
//!
//! Usage: `generate_sample [out_dir] [count] [seed]`. Writes `count` JSON
//! measurement documents the viewer can open directly; the same seed always
//! produces the same files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;

const N_DELAY: usize = 32;
const N_QDYN: usize = 8;
const N_QSTA: usize = 64;
const N_SECTOR: usize = 4;
const N_FRAME: usize = 128;
const DETECTOR: usize = 32;
const T0: f64 = 1e-5;

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let out_dir = PathBuf::from(args.next().unwrap_or_else(|| "sample_data".into()));
    let count: usize = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("parsing file count")?
        .unwrap_or(3);
    let seed: u64 = args
        .next()
        .map(|s| s.parse())
        .transpose()
        .context("parsing seed")?
        .unwrap_or(42);

    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = StdRng::seed_from_u64(seed);
    for n in 0..count {
        let name = format!("sample_{n:03}.json");
        let doc = generate_measurement(&mut rng, n);
        let path = out_dir.join(&name);
        std::fs::write(&path, serde_json::to_string_pretty(&doc)?)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("wrote {}", path.display());
    }
    info!("generated {count} measurements in {}", out_dir.display());
    Ok(())
}

/// One synthetic multitau measurement. The g2 curves decay exponentially
/// with a q-dependent rate plus small per-point noise; SAXS follows a
/// Porod-like power law.
fn generate_measurement(rng: &mut StdRng, index: usize) -> serde_json::Value {
    // multitau-style delay axis, geometric past the first level
    let tau: Vec<f64> = (0..N_DELAY)
        .map(|k| 2f64.powf(k as f64 / 4.0))
        .collect();
    let ql_dyn: Vec<f64> = (1..=N_QDYN).map(|i| i as f64 * 0.002).collect();
    let ql_sta: Vec<f64> = (1..=N_QSTA).map(|i| i as f64 * 0.0005).collect();

    // slight per-file drift so averaging has something to smooth out
    let drift = 1.0 + 0.02 * index as f64;

    let mut g2 = Vec::with_capacity(N_DELAY);
    let mut g2_err = Vec::with_capacity(N_DELAY);
    for &t in &tau {
        let t_el = t * T0;
        let mut row = Vec::with_capacity(N_QDYN);
        let mut err_row = Vec::with_capacity(N_QDYN);
        for &q in &ql_dyn {
            let gamma = 1e4 * q * q * 1e3 * drift;
            let clean = 1.0 + 0.25 * (-2.0 * gamma * t_el).exp();
            let noise = 0.002 * rng.gen_range(-1.0..1.0);
            row.push(clean + noise);
            err_row.push(0.003 + 0.001 * rng.gen::<f64>());
        }
        g2.push(row);
        g2_err.push(err_row);
    }

    let saxs_1d: Vec<f64> = ql_sta
        .iter()
        .map(|&q| porod(q, drift) * (1.0 + 0.01 * rng.gen_range(-1.0..1.0)))
        .collect();
    let saxs_partial: Vec<Vec<f64>> = (0..N_SECTOR)
        .map(|s| {
            let sector_gain = 1.0 + 0.05 * s as f64;
            ql_sta
                .iter()
                .map(|&q| porod(q, drift) * sector_gain * (1.0 + 0.01 * rng.gen_range(-1.0..1.0)))
                .collect()
        })
        .collect();

    let center = (DETECTOR / 2) as f64;
    let saxs_2d: Vec<Vec<f64>> = (0..DETECTOR)
        .map(|y| {
            (0..DETECTOR)
                .map(|x| {
                    let r = ((x as f64 - center).powi(2) + (y as f64 - center).powi(2)).sqrt();
                    porod(0.0005 * (r + 1.0), drift)
                })
                .collect()
        })
        .collect();

    // row 0: frame index, row 1: frame sums around a flat level
    let int_t: Vec<Vec<f64>> = vec![
        (0..N_FRAME).map(|i| i as f64).collect(),
        (0..N_FRAME)
            .map(|_| 1000.0 * drift * (1.0 + 0.01 * rng.gen_range(-1.0..1.0)))
            .collect(),
    ];

    json!({
        "analysis_type": "Multitau",
        "fields": {
            "t0": T0,
            "tau": tau,
            "ql_dyn": ql_dyn,
            "ql_sta": ql_sta,
            "g2": g2,
            "g2_err": g2_err,
            "saxs_1d": saxs_1d,
            "saxs_partial": saxs_partial,
            "saxs_2d": saxs_2d,
            "int_t": int_t,
        }
    })
}

fn porod(q: f64, scale: f64) -> f64 {
    scale * 1e-6 / (q * q * q * q).max(1e-12)
}
