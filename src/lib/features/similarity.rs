//! Pairwise template similarity.
//!
//! Cosine similarity of flattened dense templates, computed for every unit
//! pair of the sparse waveform representation. The same measure drives
//! deduplication on the raw pass.

use std::path::Path;

use serde::Serialize;

use crate::config::{SimilarityConfig, SimilarityMethod};
use crate::errors::Result;
use crate::storage;
use crate::waveforms::WaveformExtractor;

/// Cosine similarity of two equal-length vectors; 0.0 when either is null.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        norm_a += f64::from(x) * f64::from(x);
        norm_b += f64::from(y) * f64::from(y);
    }
    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a.sqrt() * norm_b.sqrt()) }
}

/// Symmetric unit-by-unit similarity matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSimilarity {
    pub unit_ids: Vec<u32>,
    pub method: SimilarityMethod,
    /// `matrix[i][j]` is the similarity of `unit_ids[i]` and `unit_ids[j]`.
    pub matrix: Vec<Vec<f64>>,
}

impl TemplateSimilarity {
    /// Similarity of a unit pair by id.
    #[must_use]
    pub fn pair(&self, a: u32, b: u32) -> Option<f64> {
        let i = self.unit_ids.iter().position(|&id| id == a)?;
        let j = self.unit_ids.iter().position(|&id| id == b)?;
        Some(self.matrix[i][j])
    }

    /// Persists the matrix as `template_similarity.json` under `folder`.
    ///
    /// # Errors
    /// Returns an error on I/O failure
    pub fn save(&self, folder: &Path) -> Result<()> {
        storage::write_json(&folder.join("template_similarity.json"), self)
    }
}

/// Computes the pairwise similarity matrix on dense templates.
///
/// # Errors
/// Returns an error if a template cannot be assembled
pub fn compute_template_similarity(
    waveforms: &WaveformExtractor,
    config: &SimilarityConfig,
) -> Result<TemplateSimilarity> {
    let unit_ids = waveforms.unit_ids();
    let templates: Vec<Vec<f32>> =
        unit_ids.iter().map(|&id| waveforms.dense_template(id)).collect::<Result<_>>()?;

    let n = unit_ids.len();
    let mut matrix = vec![vec![0.0_f64; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            let s = match config.method {
                SimilarityMethod::CosineSimilarity => {
                    cosine_similarity(&templates[i], &templates[j])
                }
            };
            matrix[i][j] = s;
            matrix[j][i] = s;
        }
    }

    Ok(TemplateSimilarity { unit_ids, method: config.method, matrix })
}
