//! Derived-artifact computations over the sparse waveform representation.
//!
//! A fixed, ordered battery: spike amplitudes, unit locations, spike
//! locations, correlograms, ISI histograms, template similarity, template
//! metrics, principal components, and - last, because it consumes all the
//! sibling artifacts - quality metrics. Each computation is a pure
//! function of the sparse waveforms and its own typed parameter struct;
//! per-unit work inside a computation runs on the shared worker pool.
//!
//! There is no partial-result mode: the first failing computation aborts
//! the block.

pub mod amplitudes;
pub mod correlograms;
pub mod isi;
pub mod locations;
pub mod pca;
pub mod quality;
pub mod similarity;
pub mod template_metrics;

use std::path::Path;

use anyhow::{Context, Result};

use crate::config::PostprocessingConfig;
use crate::logging::StepTimer;
use crate::recording::Recording;
use crate::sorting::Sorting;
use crate::waveforms::WaveformExtractor;

use self::amplitudes::SpikeAmplitudes;
use self::correlograms::Correlograms;
use self::isi::IsiHistograms;
use self::locations::{SpikeLocations, UnitLocations};
use self::pca::PrincipalComponents;
use self::quality::{QualityInputs, QualityMetricsRow};
use self::similarity::TemplateSimilarity;
use self::template_metrics::TemplateMetricsRow;

/// Everything the feature pipeline produced for one block.
pub struct FeatureArtifacts {
    pub amplitudes: SpikeAmplitudes,
    pub unit_locations: UnitLocations,
    pub spike_locations: SpikeLocations,
    pub correlograms: Correlograms,
    pub isi_histograms: IsiHistograms,
    pub similarity: TemplateSimilarity,
    pub template_metrics: Vec<TemplateMetricsRow>,
    pub principal_components: PrincipalComponents,
    pub quality_metrics: Vec<QualityMetricsRow>,
}

/// Runs the full battery against the sparse representation and persists
/// every artifact under `output_folder`.
///
/// # Errors
/// Returns the first computation or persistence failure; the block has no
/// partial-result mode
#[allow(clippy::too_many_lines)]
pub fn run_feature_pipeline(
    recording: &Recording,
    sorting: &Sorting,
    waveforms: &WaveformExtractor,
    config: &PostprocessingConfig,
    pool: &rayon::ThreadPool,
    output_folder: &Path,
) -> Result<FeatureArtifacts> {
    let num_units = sorting.num_units() as u64;

    let timer = StepTimer::new("Computing spike amplitudes");
    let amplitudes = amplitudes::compute_spike_amplitudes(
        waveforms,
        recording,
        sorting,
        &config.spike_amplitudes,
        pool,
    )?;
    amplitudes.save(output_folder).context("Failed to persist spike amplitudes")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing unit locations");
    let unit_locations = locations::compute_unit_locations(waveforms, &config.locations, pool)?;
    unit_locations.save(output_folder).context("Failed to persist unit locations")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing spike locations");
    let spike_locations = locations::compute_spike_locations(
        waveforms,
        recording,
        sorting,
        &config.locations,
        &unit_locations,
        pool,
    )?;
    spike_locations.save(output_folder).context("Failed to persist spike locations")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing correlograms");
    let correlograms = correlograms::compute_correlograms(sorting, &config.correlograms, pool)?;
    correlograms.save(output_folder).context("Failed to persist correlograms")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing ISI histograms");
    let isi_histograms = isi::compute_isi_histograms(sorting, &config.isis)?;
    isi_histograms.save(output_folder).context("Failed to persist ISI histograms")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing template similarity");
    let similarity = similarity::compute_template_similarity(waveforms, &config.similarity)?;
    similarity.save(output_folder).context("Failed to persist template similarity")?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing template metrics");
    let template_metric_rows =
        template_metrics::compute_template_metrics(waveforms, &config.template_metrics)?;
    template_metrics::save_template_metrics(output_folder, &template_metric_rows)?;
    timer.log_completion(num_units);

    let timer = StepTimer::new("Computing PCA");
    let principal_components = pca::compute_principal_components(
        waveforms,
        recording,
        sorting,
        &config.principal_components,
        pool,
    )?;
    principal_components.save(output_folder).context("Failed to persist principal components")?;
    timer.log_completion(num_units);

    // Quality metrics run last: they fan in every sibling artifact.
    let timer = StepTimer::new("Computing quality metrics");
    let inputs = QualityInputs {
        recording,
        sorting,
        waveforms,
        amplitudes: &amplitudes,
        unit_locations: &unit_locations,
        spike_locations: &spike_locations,
        similarity: &similarity,
        template_metrics: &template_metric_rows,
        pca: &principal_components,
    };
    let quality_metrics =
        quality::compute_quality_metrics(&inputs, &config.quality_metrics, pool)?;
    quality::save_quality_metrics(output_folder, &quality_metrics)?;
    timer.log_completion(num_units);

    Ok(FeatureArtifacts {
        amplitudes,
        unit_locations,
        spike_locations,
        correlograms,
        isi_histograms,
        similarity,
        template_metrics: template_metric_rows,
        principal_components,
        quality_metrics,
    })
}
