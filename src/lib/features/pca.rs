//! Principal components of spike snippets.
//!
//! Projects individual spike snippets into a low-dimensional feature space
//! used by the isolation-style quality metrics. In `by_channel_local` mode
//! one basis is fit per channel, across the sampled spikes of every unit
//! seen on that channel; a unit's feature vector is the concatenation of
//! its channels' projections. In `concatenated` mode a single basis is fit
//! on the dense-embedded snippet.
//!
//! Bases are kept alongside the projections so that spikes of one unit can
//! be projected into another unit's channel space when metrics compare
//! units pairwise.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{PcaConfig, PcaMode};
use crate::errors::Result;
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::storage;
use crate::waveforms::{WaveformExtractor, subsample_indices};

/// One fitted PCA basis.
#[derive(Debug, Clone)]
struct GroupBasis {
    mean: Vec<f64>,
    /// `components[j]` is the j-th principal axis (unit length).
    components: Vec<Vec<f64>>,
    /// Per-component projection scale (1/sqrt(eigenvalue) when whitening).
    scales: Vec<f64>,
}

impl GroupBasis {
    fn zero(dim: usize, k: usize) -> Self {
        Self {
            mean: vec![0.0; dim],
            components: vec![vec![0.0; dim]; k],
            scales: vec![1.0; k],
        }
    }

    fn project(&self, x: &[f64]) -> Vec<f64> {
        self.components
            .iter()
            .zip(self.scales.iter())
            .map(|(comp, &scale)| {
                let dot: f64 =
                    x.iter().zip(self.mean.iter()).zip(comp.iter()).map(|((&v, &m), &c)| (v - m) * c).sum();
                dot * scale
            })
            .collect()
    }
}

/// Fits a `k`-component basis to row vectors of equal length.
fn fit_basis(rows: &[Vec<f64>], k: usize, whiten: bool) -> GroupBasis {
    let Some(dim) = rows.first().map(Vec::len) else {
        return GroupBasis::zero(0, k);
    };
    let n = rows.len();
    if n < 2 {
        return GroupBasis::zero(dim, k);
    }

    let mut mean = vec![0.0_f64; dim];
    for row in rows {
        for (m, &v) in mean.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n as f64;
    }

    let mut covariance = DMatrix::<f64>::zeros(dim, dim);
    for row in rows {
        let centered = DVector::from_iterator(dim, row.iter().zip(mean.iter()).map(|(&v, &m)| v - m));
        covariance += &centered * centered.transpose();
    }
    covariance /= (n - 1) as f64;

    let eigen = SymmetricEigen::new(covariance);
    let mut order: Vec<usize> = (0..dim).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

    let mut components = Vec::with_capacity(k);
    let mut scales = Vec::with_capacity(k);
    for &idx in order.iter().take(k.min(dim)) {
        components.push(eigen.eigenvectors.column(idx).iter().copied().collect());
        let eigenvalue = eigen.eigenvalues[idx].max(0.0);
        scales.push(if whiten { 1.0 / eigenvalue.max(1e-12).sqrt() } else { 1.0 });
    }
    // Pad with null axes when the space is smaller than requested, so
    // every projection has exactly k values.
    while components.len() < k {
        components.push(vec![0.0; dim]);
        scales.push(1.0);
    }

    GroupBasis { mean, components, scales }
}

/// Projections of one unit's sampled spikes.
#[derive(Debug, Clone)]
pub struct UnitProjections {
    /// Sample indices of the spikes that were projected.
    pub spike_sample_indices: Vec<u64>,
    /// Feature dimensionality per spike.
    pub dims: usize,
    /// Row-major `[num_spikes x dims]` projections.
    pub projections: Vec<f32>,
}

impl UnitProjections {
    #[must_use]
    pub fn num_spikes(&self) -> usize {
        if self.dims == 0 { 0 } else { self.projections.len() / self.dims }
    }

    /// Projections as row vectors.
    #[must_use]
    pub fn rows(&self) -> Vec<Vec<f64>> {
        self.projections
            .chunks(self.dims.max(1))
            .map(|row| row.iter().map(|&v| f64::from(v)).collect())
            .collect()
    }
}

#[derive(Serialize)]
struct UnitPcaManifest {
    unit_id: u32,
    num_spikes: usize,
    dims: usize,
}

#[derive(Serialize)]
struct PcaManifest<'a> {
    n_components: usize,
    mode: PcaMode,
    whiten: bool,
    units: &'a [UnitPcaManifest],
}

/// Fitted bases plus per-unit spike projections.
#[derive(Debug, Clone)]
pub struct PrincipalComponents {
    pub n_components: usize,
    pub mode: PcaMode,
    pub whiten: bool,
    frames: usize,
    nbefore: usize,
    scaled: bool,
    num_channels: usize,
    /// `by_channel_local`: basis per global channel with any coverage.
    channel_bases: BTreeMap<usize, GroupBasis>,
    /// `concatenated`: one basis on the dense-embedded snippet.
    concat_basis: Option<GroupBasis>,
    by_unit: BTreeMap<u32, UnitProjections>,
}

impl PrincipalComponents {
    #[must_use]
    pub fn unit(&self, unit_id: u32) -> Option<&UnitProjections> {
        self.by_unit.get(&unit_id)
    }

    /// Feature dimensionality of a spike described on `channels`.
    #[must_use]
    pub fn feature_dims(&self, channels: &[usize]) -> usize {
        match self.mode {
            PcaMode::ByChannelLocal => channels.len() * self.n_components,
            PcaMode::Concatenated => self.n_components,
        }
    }

    /// Projects arbitrary spikes onto the feature space spanned by
    /// `channels`. Spikes whose window leaves the recording are skipped.
    /// Used to embed other units' spikes into a unit's own space.
    #[must_use]
    pub fn project_spikes(
        &self,
        recording: &Recording,
        spike_times: &[u64],
        channels: &[usize],
    ) -> Vec<Vec<f64>> {
        let mut rows = Vec::with_capacity(spike_times.len());
        let mut snippet = vec![0.0_f32; self.frames * channels.len()];
        for &t in spike_times {
            let start = t as i64 - self.nbefore as i64;
            if !recording.fill_snippet(start, self.frames, channels, self.scaled, &mut snippet) {
                continue;
            }
            rows.push(self.project_snippet(&snippet, channels));
        }
        rows
    }

    fn project_snippet(&self, snippet: &[f32], channels: &[usize]) -> Vec<f64> {
        match self.mode {
            PcaMode::ByChannelLocal => {
                let nch = channels.len();
                let mut row = Vec::with_capacity(nch * self.n_components);
                for (ci, &ch) in channels.iter().enumerate() {
                    let x: Vec<f64> =
                        (0..self.frames).map(|f| f64::from(snippet[f * nch + ci])).collect();
                    match self.channel_bases.get(&ch) {
                        Some(basis) => row.extend(basis.project(&x)),
                        None => row.extend(std::iter::repeat(0.0).take(self.n_components)),
                    }
                }
                row
            }
            PcaMode::Concatenated => {
                // Dense-embed the snippet before projecting.
                let nch = channels.len();
                let mut dense = vec![0.0_f64; self.frames * self.num_channels];
                for f in 0..self.frames {
                    for (ci, &ch) in channels.iter().enumerate() {
                        dense[f * self.num_channels + ch] = f64::from(snippet[f * nch + ci]);
                    }
                }
                self.concat_basis.as_ref().map_or_else(
                    || vec![0.0; self.n_components],
                    |basis| basis.project(&dense),
                )
            }
        }
    }

    /// Persists a manifest plus the raw projection payload under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        let units: Vec<UnitPcaManifest> = self
            .by_unit
            .iter()
            .map(|(&unit_id, p)| UnitPcaManifest {
                unit_id,
                num_spikes: p.num_spikes(),
                dims: p.dims,
            })
            .collect();
        storage::write_json(
            &folder.join("principal_components.json"),
            &PcaManifest {
                n_components: self.n_components,
                mode: self.mode,
                whiten: self.whiten,
                units: &units,
            },
        )?;
        let payload: Vec<f32> =
            self.by_unit.values().flat_map(|p| p.projections.iter().copied()).collect();
        storage::write_f32_bin(&folder.join("principal_components.bin"), &payload)
    }
}

/// Fits the PCA bases and projects every unit's sampled spikes.
///
/// # Errors
/// Returns an error if a unit is missing from the waveforms or sorting
pub fn compute_principal_components(
    waveforms: &WaveformExtractor,
    recording: &Recording,
    sorting: &Sorting,
    config: &PcaConfig,
    pool: &rayon::ThreadPool,
) -> Result<PrincipalComponents> {
    let frames = waveforms.samples_per_waveform();
    let nbefore = waveforms.nbefore();
    let scaled = waveforms.params().return_scaled;
    let max_spikes = waveforms.params().max_spikes_per_unit;
    let num_channels = waveforms.num_channels();

    // Sampled, in-bounds snippets per unit on the unit's own channels.
    struct UnitSnippets {
        unit_id: u32,
        channels: Vec<usize>,
        spike_sample_indices: Vec<u64>,
        /// Row-major `[spike][frame * nch + ci]`.
        snippets: Vec<Vec<f32>>,
    }

    let mut sampled: Vec<UnitSnippets> = Vec::with_capacity(sorting.num_units());
    for &unit_id in sorting.unit_ids() {
        let unit = waveforms
            .unit(unit_id)
            .ok_or(crate::errors::SpikepostError::UnitNotFound { unit_id })?;
        let train = sorting.spike_train(unit_id)?;
        let channels = unit.channel_indices.clone();
        let mut spike_sample_indices = Vec::new();
        let mut snippets = Vec::new();
        let mut snippet = vec![0.0_f32; frames * channels.len()];
        for idx in subsample_indices(train.len(), max_spikes) {
            let t = train[idx];
            let start = t as i64 - nbefore as i64;
            if recording.fill_snippet(start, frames, &channels, scaled, &mut snippet) {
                spike_sample_indices.push(t);
                snippets.push(snippet.clone());
            }
        }
        sampled.push(UnitSnippets { unit_id, channels, spike_sample_indices, snippets });
    }

    // Fit bases.
    let mut channel_bases = BTreeMap::new();
    let mut concat_basis = None;
    match config.mode {
        PcaMode::ByChannelLocal => {
            let covered: BTreeSet<usize> =
                sampled.iter().flat_map(|u| u.channels.iter().copied()).collect();
            let fitted: Vec<(usize, GroupBasis)> = pool.install(|| {
                covered
                    .into_iter()
                    .collect::<Vec<_>>()
                    .into_par_iter()
                    .map(|ch| {
                        let mut rows = Vec::new();
                        for unit in &sampled {
                            if let Some(ci) = unit.channels.iter().position(|&c| c == ch) {
                                let nch = unit.channels.len();
                                for snippet in &unit.snippets {
                                    rows.push(
                                        (0..frames)
                                            .map(|f| f64::from(snippet[f * nch + ci]))
                                            .collect(),
                                    );
                                }
                            }
                        }
                        (ch, fit_basis(&rows, config.n_components, config.whiten))
                    })
                    .collect()
            });
            channel_bases.extend(fitted);
        }
        PcaMode::Concatenated => {
            let mut rows = Vec::new();
            for unit in &sampled {
                let nch = unit.channels.len();
                for snippet in &unit.snippets {
                    let mut dense = vec![0.0_f64; frames * num_channels];
                    for f in 0..frames {
                        for (ci, &ch) in unit.channels.iter().enumerate() {
                            dense[f * num_channels + ch] = f64::from(snippet[f * nch + ci]);
                        }
                    }
                    rows.push(dense);
                }
            }
            concat_basis = Some(fit_basis(&rows, config.n_components, config.whiten));
        }
    }

    let mut result = PrincipalComponents {
        n_components: config.n_components,
        mode: config.mode,
        whiten: config.whiten,
        frames,
        nbefore,
        scaled,
        num_channels,
        channel_bases,
        concat_basis,
        by_unit: BTreeMap::new(),
    };

    // Project every unit's sampled snippets.
    let by_unit: BTreeMap<u32, UnitProjections> = pool.install(|| {
        sampled
            .par_iter()
            .map(|unit| {
                let dims = result.feature_dims(&unit.channels);
                let mut projections = Vec::with_capacity(unit.snippets.len() * dims);
                for snippet in &unit.snippets {
                    let row = result.project_snippet(snippet, &unit.channels);
                    projections.extend(row.into_iter().map(|v| v as f32));
                }
                (
                    unit.unit_id,
                    UnitProjections {
                        spike_sample_indices: unit.spike_sample_indices.clone(),
                        dims,
                        projections,
                    },
                )
            })
            .collect()
    });
    result.by_unit = by_unit;

    Ok(result)
}
