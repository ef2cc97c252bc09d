//! Unit and spike localization.
//!
//! Estimates where on the probe each unit (and each spike) originated.
//! Two methods: amplitude-weighted center of mass over the unit's
//! channels, and monopolar triangulation - fitting a point current source
//! `p_i = alpha / ||(x, y, z) - c_i||` to the per-channel peak-to-peak
//! amplitudes with Gauss-Newton steps. Triangulation needs at least four
//! channels; sparser units fall back to center of mass.

use std::collections::BTreeMap;
use std::path::Path;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{LocationConfig, LocationMethod};
use crate::errors::Result;
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::storage;
use crate::waveforms::WaveformExtractor;

/// Minimum channel count for a monopolar fit (four free parameters).
const MIN_CHANNELS_FOR_TRIANGULATION: usize = 4;
/// Gauss-Newton iteration cap.
const MAX_ITERATIONS: usize = 40;

/// Estimated (x, y, z) per unit (z is 0 for center of mass).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitLocations {
    pub method: LocationMethod,
    pub by_unit: BTreeMap<u32, [f32; 3]>,
}

impl UnitLocations {
    #[must_use]
    pub fn unit(&self, unit_id: u32) -> Option<[f32; 3]> {
        self.by_unit.get(&unit_id).copied()
    }

    /// Persists the locations as `unit_locations.json` under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        storage::write_json(&folder.join("unit_locations.json"), self)
    }
}

/// Estimated (x, y) per spike, in train order per unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpikeLocations {
    pub method: LocationMethod,
    pub by_unit: BTreeMap<u32, Vec<[f32; 2]>>,
}

impl SpikeLocations {
    #[must_use]
    pub fn unit(&self, unit_id: u32) -> Option<&[[f32; 2]]> {
        self.by_unit.get(&unit_id).map(Vec::as_slice)
    }

    /// Persists the locations as `spike_locations.json` under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        storage::write_json(&folder.join("spike_locations.json"), self)
    }
}

/// Amplitude-weighted center of mass over channel locations.
fn center_of_mass(amplitudes: &[f32], locations: &[[f32; 2]]) -> [f32; 3] {
    let mut wx = 0.0_f64;
    let mut wy = 0.0_f64;
    let mut total = 0.0_f64;
    for (&a, loc) in amplitudes.iter().zip(locations.iter()) {
        let w = f64::from(a.abs());
        wx += w * f64::from(loc[0]);
        wy += w * f64::from(loc[1]);
        total += w;
    }
    if total == 0.0 {
        // Degenerate template: report the channel centroid.
        let n = locations.len() as f64;
        let cx: f64 = locations.iter().map(|l| f64::from(l[0])).sum::<f64>() / n;
        let cy: f64 = locations.iter().map(|l| f64::from(l[1])).sum::<f64>() / n;
        [cx as f32, cy as f32, 0.0]
    } else {
        [(wx / total) as f32, (wy / total) as f32, 0.0]
    }
}

/// Gauss-Newton fit of a monopolar source to per-channel amplitudes.
fn monopolar_fit(amplitudes: &[f32], locations: &[[f32; 2]]) -> [f32; 3] {
    let com = center_of_mass(amplitudes, locations);
    if amplitudes.len() < MIN_CHANNELS_FOR_TRIANGULATION {
        return com;
    }

    let p: Vec<f64> = amplitudes.iter().map(|&a| f64::from(a.abs())).collect();
    let p_max = p.iter().fold(0.0_f64, |m, &v| m.max(v));
    if p_max == 0.0 {
        return com;
    }

    // Parameters (x, y, z, alpha); start above the center of mass.
    let mut x = f64::from(com[0]);
    let mut y = f64::from(com[1]);
    let mut z = 20.0;
    let mut alpha = p_max * z;

    let n = p.len();
    for _ in 0..MAX_ITERATIONS {
        let mut jacobian = DMatrix::<f64>::zeros(n, 4);
        let mut residuals = DVector::<f64>::zeros(n);
        for i in 0..n {
            let dx = x - f64::from(locations[i][0]);
            let dy = y - f64::from(locations[i][1]);
            let d = (dx * dx + dy * dy + z * z).sqrt().max(1e-9);
            residuals[i] = p[i] - alpha / d;
            let d3 = d * d * d;
            jacobian[(i, 0)] = alpha * dx / d3;
            jacobian[(i, 1)] = alpha * dy / d3;
            jacobian[(i, 2)] = alpha * z / d3;
            jacobian[(i, 3)] = -1.0 / d;
        }

        let mut normal = jacobian.transpose() * &jacobian;
        for k in 0..4 {
            normal[(k, k)] += 1e-9;
        }
        let rhs = jacobian.transpose() * &residuals;
        let Some(step) = normal.lu().solve(&rhs) else { break };

        x -= step[0];
        y -= step[1];
        z = (z - step[2]).max(1e-3);
        alpha = (alpha - step[3]).max(1e-9);

        if step.amax() < 1e-6 {
            break;
        }
    }

    [x as f32, y as f32, z as f32]
}

fn locate(
    method: LocationMethod,
    amplitudes: &[f32],
    locations: &[[f32; 2]],
) -> [f32; 3] {
    match method {
        LocationMethod::CenterOfMass => center_of_mass(amplitudes, locations),
        LocationMethod::MonopolarTriangulation => monopolar_fit(amplitudes, locations),
    }
}

/// Estimates each unit's location from its template amplitudes.
///
/// # Errors
/// Returns an error if a unit is missing from the waveforms
pub fn compute_unit_locations(
    waveforms: &WaveformExtractor,
    config: &LocationConfig,
    pool: &rayon::ThreadPool,
) -> Result<UnitLocations> {
    let channel_locations = waveforms.channel_locations();
    let mut jobs = Vec::with_capacity(waveforms.units().len());
    for unit in waveforms.units() {
        let ptp = waveforms.ptp_amplitudes(unit.unit_id)?;
        let amplitudes: Vec<f32> = ptp.iter().map(|&(_, a)| a).collect();
        let locations: Vec<[f32; 2]> = ptp.iter().map(|&(ch, _)| channel_locations[ch]).collect();
        jobs.push((unit.unit_id, amplitudes, locations));
    }

    let by_unit = pool.install(|| {
        jobs.into_par_iter()
            .map(|(unit_id, amplitudes, locations)| {
                (unit_id, locate(config.method, &amplitudes, &locations))
            })
            .collect()
    });

    Ok(UnitLocations { method: config.method, by_unit })
}

/// Estimates a location for every spike from its own snippet amplitudes.
///
/// Spikes whose window leaves the recording take the unit's location.
///
/// # Errors
/// Returns an error if a unit is missing from the waveforms or sorting
pub fn compute_spike_locations(
    waveforms: &WaveformExtractor,
    recording: &Recording,
    sorting: &Sorting,
    config: &LocationConfig,
    unit_locations: &UnitLocations,
    pool: &rayon::ThreadPool,
) -> Result<SpikeLocations> {
    let frames = waveforms.samples_per_waveform();
    let nbefore = waveforms.nbefore() as i64;
    let scaled = waveforms.params().return_scaled;
    let channel_locations = waveforms.channel_locations();

    let mut jobs = Vec::with_capacity(sorting.num_units());
    for &unit_id in sorting.unit_ids() {
        let unit = waveforms
            .unit(unit_id)
            .ok_or(crate::errors::SpikepostError::UnitNotFound { unit_id })?;
        let locations: Vec<[f32; 2]> =
            unit.channel_indices.iter().map(|&ch| channel_locations[ch]).collect();
        let fallback = unit_locations.unit(unit_id).unwrap_or([0.0, 0.0, 0.0]);
        jobs.push((unit_id, sorting.spike_train(unit_id)?, unit.channel_indices.clone(), locations, fallback));
    }

    let by_unit = pool.install(|| {
        jobs.into_par_iter()
            .map(|(unit_id, train, channels, locations, fallback)| {
                let nch = channels.len();
                let mut snippet = vec![0.0_f32; frames * nch];
                let mut ptp = vec![0.0_f32; nch];
                let spike_locations: Vec<[f32; 2]> = train
                    .iter()
                    .map(|&t| {
                        let start = t as i64 - nbefore;
                        if recording.fill_snippet(start, frames, &channels, scaled, &mut snippet) {
                            for (ci, p) in ptp.iter_mut().enumerate() {
                                let mut lo = f32::MAX;
                                let mut hi = f32::MIN;
                                for frame in 0..frames {
                                    let v = snippet[frame * nch + ci];
                                    lo = lo.min(v);
                                    hi = hi.max(v);
                                }
                                *p = hi - lo;
                            }
                            let loc = locate(config.method, &ptp, &locations);
                            [loc[0], loc[1]]
                        } else {
                            [fallback[0], fallback[1]]
                        }
                    })
                    .collect();
                (unit_id, spike_locations)
            })
            .collect()
    });

    Ok(SpikeLocations { method: config.method, by_unit })
}
