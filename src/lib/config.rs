//! Statically validated postprocessing configuration.
//!
//! Every computation in the pipeline is driven by its own typed parameter
//! struct. Unknown keys are rejected at parse time (`deny_unknown_fields`)
//! and value constraints are checked once, up front, by
//! [`PostprocessingConfig::validate`] - a computation never sees an option
//! it does not recognize. Defaults mirror the production parameter tables.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SpikepostError};
use crate::storage;
use crate::validation::{validate_bin_within_window, validate_positive, validate_unit_fraction};

/// Polarity convention for locating a waveform's peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeakSign {
    /// Negative-going peak (extracellular spikes are negative at the soma).
    Neg,
    /// Positive-going peak.
    Pos,
    /// Largest absolute excursion of either sign.
    Both,
}

/// Output layout for per-spike amplitudes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplitudeOutput {
    /// One flat vector across all units, with a parallel unit-index vector.
    Concatenated,
    /// One vector per unit.
    ByUnit,
}

/// Localization method for unit and spike locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMethod {
    /// Fit a monopolar current source to per-channel amplitudes.
    MonopolarTriangulation,
    /// Amplitude-weighted center of mass over the unit's channels.
    CenterOfMass,
}

/// Similarity metric for pairwise template comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMethod {
    /// Cosine similarity of flattened templates.
    CosineSimilarity,
}

/// Fitting mode for principal components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcaMode {
    /// One PCA per channel, fit across spikes of all units seen on it.
    ByChannelLocal,
    /// One PCA on the concatenated multi-channel snippet.
    Concatenated,
}

/// Quality metric names recognized by the pipeline.
///
/// The allowlist in [`QualityMetricsConfig::metric_names`] is a list of
/// these variants; a name outside this enum fails configuration parsing,
/// so an unknown metric can never reach the computation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    NumSpikes,
    FiringRate,
    PresenceRatio,
    Snr,
    IsiViolation,
    RpViolation,
    SlidingRpViolation,
    AmplitudeCutoff,
    AmplitudeMedian,
    Drift,
    IsolationDistance,
    LRatio,
    DPrime,
    NearestNeighbor,
    NnIsolation,
    NnNoiseOverlap,
}

impl std::fmt::Display for MetricName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MetricName::NumSpikes => "num_spikes",
            MetricName::FiringRate => "firing_rate",
            MetricName::PresenceRatio => "presence_ratio",
            MetricName::Snr => "snr",
            MetricName::IsiViolation => "isi_violation",
            MetricName::RpViolation => "rp_violation",
            MetricName::SlidingRpViolation => "sliding_rp_violation",
            MetricName::AmplitudeCutoff => "amplitude_cutoff",
            MetricName::AmplitudeMedian => "amplitude_median",
            MetricName::Drift => "drift",
            MetricName::IsolationDistance => "isolation_distance",
            MetricName::LRatio => "l_ratio",
            MetricName::DPrime => "d_prime",
            MetricName::NearestNeighbor => "nearest_neighbor",
            MetricName::NnIsolation => "nn_isolation",
            MetricName::NnNoiseOverlap => "nn_noise_overlap",
        };
        f.write_str(name)
    }
}

/// Channel sparsity parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SparsityConfig {
    /// Channels within this distance (um) of a unit's peak channel are kept.
    pub radius_um: f64,
}

impl Default for SparsityConfig {
    fn default() -> Self {
        Self { radius_um: 100.0 }
    }
}

/// Waveform extraction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WaveformConfig {
    /// Window before each spike (ms).
    pub ms_before: f64,
    /// Window after each spike (ms).
    pub ms_after: f64,
    /// Maximum spikes sampled per unit when averaging.
    pub max_spikes_per_unit: usize,
    /// Scale snippets to microvolts using the recording gain/offset.
    pub return_scaled: bool,
    /// Also compute the per-sample standard deviation template.
    pub compute_std: bool,
}

impl WaveformConfig {
    /// The small, unscaled extraction used only for dedup/sparsity decisions.
    #[must_use]
    pub fn raw_pass() -> Self {
        Self {
            ms_before: 0.5,
            ms_after: 1.5,
            max_spikes_per_unit: 100,
            return_scaled: false,
            compute_std: false,
        }
    }

    /// The full-fidelity extraction every downstream feature reads.
    #[must_use]
    pub fn sparse_pass() -> Self {
        Self {
            ms_before: 3.0,
            ms_after: 4.0,
            max_spikes_per_unit: 500,
            return_scaled: true,
            compute_std: true,
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self::sparse_pass()
    }
}

/// Spike amplitude parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AmplitudeConfig {
    pub peak_sign: PeakSign,
    pub return_scaled: bool,
    pub output: AmplitudeOutput,
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            peak_sign: PeakSign::Neg,
            return_scaled: true,
            output: AmplitudeOutput::Concatenated,
        }
    }
}

/// Unit/spike localization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LocationConfig {
    pub method: LocationMethod,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self { method: LocationMethod::MonopolarTriangulation }
    }
}

/// Histogram parameters shared by correlograms and ISI histograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistogramConfig {
    /// Total histogram window (ms).
    pub window_ms: f64,
    /// Bin width (ms).
    pub bin_ms: f64,
}

impl HistogramConfig {
    /// Default correlogram histogram: 100 ms window, 2 ms bins.
    #[must_use]
    pub fn correlograms() -> Self {
        Self { window_ms: 100.0, bin_ms: 2.0 }
    }

    /// Default ISI histogram: 100 ms window, 5 ms bins.
    #[must_use]
    pub fn isis() -> Self {
        Self { window_ms: 100.0, bin_ms: 5.0 }
    }
}

/// Template similarity parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimilarityConfig {
    pub method: SimilarityMethod,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self { method: SimilarityMethod::CosineSimilarity }
    }
}

/// Template metric parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TemplateMetricsConfig {
    /// Template upsampling factor before measuring widths and slopes.
    pub upsampling_factor: usize,
    /// Optional sparsity radius override; `None` uses the pipeline mask.
    pub sparsity_radius_um: Option<f64>,
}

impl Default for TemplateMetricsConfig {
    fn default() -> Self {
        Self { upsampling_factor: 10, sparsity_radius_um: None }
    }
}

/// Principal component parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PcaConfig {
    pub n_components: usize,
    pub mode: PcaMode,
    pub whiten: bool,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self { n_components: 5, mode: PcaMode::ByChannelLocal, whiten: true }
    }
}

/// Presence ratio parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PresenceRatioParams {
    pub bin_duration_s: f64,
}

impl Default for PresenceRatioParams {
    fn default() -> Self {
        Self { bin_duration_s: 60.0 }
    }
}

/// Signal-to-noise ratio parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SnrParams {
    pub peak_sign: PeakSign,
}

impl Default for SnrParams {
    fn default() -> Self {
        Self { peak_sign: PeakSign::Neg }
    }
}

/// Inter-spike-interval violation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct IsiViolationParams {
    pub isi_threshold_ms: f64,
    pub min_isi_ms: f64,
}

impl Default for IsiViolationParams {
    fn default() -> Self {
        Self { isi_threshold_ms: 1.5, min_isi_ms: 0.0 }
    }
}

/// Refractory-period violation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RpViolationParams {
    pub refractory_period_ms: f64,
    pub censored_period_ms: f64,
}

impl Default for RpViolationParams {
    fn default() -> Self {
        Self { refractory_period_ms: 1.0, censored_period_ms: 0.0 }
    }
}

/// Sliding refractory-period violation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SlidingRpParams {
    pub bin_size_ms: f64,
    pub window_size_s: f64,
    pub exclude_ref_period_below_ms: f64,
    pub max_ref_period_ms: f64,
}

impl Default for SlidingRpParams {
    fn default() -> Self {
        Self {
            bin_size_ms: 0.25,
            window_size_s: 1.0,
            exclude_ref_period_below_ms: 0.5,
            max_ref_period_ms: 10.0,
        }
    }
}

/// Amplitude-cutoff parameters (estimated fraction of missed spikes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AmplitudeCutoffParams {
    pub peak_sign: PeakSign,
    pub num_histogram_bins: usize,
    pub histogram_smoothing_value: f64,
    /// Minimum spikes-per-bin ratio; below it the metric is undefined.
    pub amplitudes_bins_min_ratio: usize,
}

impl Default for AmplitudeCutoffParams {
    fn default() -> Self {
        Self {
            peak_sign: PeakSign::Neg,
            num_histogram_bins: 100,
            histogram_smoothing_value: 3.0,
            amplitudes_bins_min_ratio: 5,
        }
    }
}

/// Amplitude-median parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AmplitudeMedianParams {
    pub peak_sign: PeakSign,
}

impl Default for AmplitudeMedianParams {
    fn default() -> Self {
        Self { peak_sign: PeakSign::Neg }
    }
}

/// Drift estimation parameters (from spike locations over time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DriftParams {
    pub interval_s: f64,
    pub min_spikes_per_interval: usize,
    pub min_num_bins: usize,
}

impl Default for DriftParams {
    fn default() -> Self {
        Self { interval_s: 60.0, min_spikes_per_interval: 100, min_num_bins: 2 }
    }
}

/// Nearest-neighbor metric parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NearestNeighborParams {
    pub max_spikes: usize,
    pub min_spikes: usize,
    pub n_neighbors: usize,
}

impl Default for NearestNeighborParams {
    fn default() -> Self {
        Self { max_spikes: 10_000, min_spikes: 10, n_neighbors: 4 }
    }
}

/// Parameters for isolation-style nearest-neighbor metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NnIsolationParams {
    pub max_spikes: usize,
    pub min_spikes: usize,
    pub n_neighbors: usize,
    pub n_components: usize,
    pub radius_um: f64,
}

impl Default for NnIsolationParams {
    fn default() -> Self {
        Self {
            max_spikes: 10_000,
            min_spikes: 10,
            n_neighbors: 4,
            n_components: 10,
            radius_um: 100.0,
        }
    }
}

/// Per-metric parameter blocks for the quality metric battery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QmParams {
    pub presence_ratio: PresenceRatioParams,
    pub snr: SnrParams,
    pub isi_violation: IsiViolationParams,
    pub rp_violation: RpViolationParams,
    pub sliding_rp_violation: SlidingRpParams,
    pub amplitude_cutoff: AmplitudeCutoffParams,
    pub amplitude_median: AmplitudeMedianParams,
    pub drift: DriftParams,
    pub nearest_neighbor: NearestNeighborParams,
    pub nn_isolation: NnIsolationParams,
    pub nn_noise_overlap: NnIsolationParams,
}

/// Quality metric battery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QualityMetricsConfig {
    pub qm_params: QmParams,
    /// Metrics to compute; names outside [`MetricName`] fail at parse time.
    pub metric_names: Vec<MetricName>,
    /// Parallelism hint for the metric battery.
    pub n_jobs: usize,
}

impl Default for QualityMetricsConfig {
    fn default() -> Self {
        Self {
            qm_params: QmParams::default(),
            metric_names: vec![
                MetricName::NumSpikes,
                MetricName::FiringRate,
                MetricName::PresenceRatio,
                MetricName::Snr,
                MetricName::IsiViolation,
                MetricName::RpViolation,
                MetricName::SlidingRpViolation,
                MetricName::AmplitudeCutoff,
                MetricName::Drift,
                MetricName::IsolationDistance,
                MetricName::LRatio,
                MetricName::DPrime,
            ],
            n_jobs: 1,
        }
    }
}

/// The full, resolved parameter set for a postprocessing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PostprocessingConfig {
    /// Template similarity above this removes the weaker unit.
    pub duplicate_threshold: f64,
    pub sparsity: SparsityConfig,
    /// Raw pass: small, unscaled, dedup/sparsity decisions only.
    pub waveforms_deduplicate: WaveformConfig,
    /// Sparse pass: the representation every feature reads.
    pub waveforms: WaveformConfig,
    pub spike_amplitudes: AmplitudeConfig,
    pub locations: LocationConfig,
    pub correlograms: HistogramConfig,
    pub isis: HistogramConfig,
    pub similarity: SimilarityConfig,
    pub template_metrics: TemplateMetricsConfig,
    pub principal_components: PcaConfig,
    pub quality_metrics: QualityMetricsConfig,
}

impl Default for PostprocessingConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: 0.9,
            sparsity: SparsityConfig::default(),
            waveforms_deduplicate: WaveformConfig::raw_pass(),
            waveforms: WaveformConfig::sparse_pass(),
            spike_amplitudes: AmplitudeConfig::default(),
            locations: LocationConfig::default(),
            correlograms: HistogramConfig::correlograms(),
            isis: HistogramConfig::isis(),
            similarity: SimilarityConfig::default(),
            template_metrics: TemplateMetricsConfig::default(),
            principal_components: PcaConfig::default(),
            quality_metrics: QualityMetricsConfig::default(),
        }
    }
}

impl PostprocessingConfig {
    /// Loads a configuration from a JSON file, rejecting unknown keys.
    ///
    /// # Errors
    /// Returns an error on I/O failure or if the JSON contains unknown or
    /// invalid fields
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = storage::read_json(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every value constraint once, before any computation starts.
    ///
    /// # Errors
    /// Returns the first constraint violation found
    pub fn validate(&self) -> Result<()> {
        validate_unit_fraction(self.duplicate_threshold, "duplicate_threshold")?;
        validate_positive(self.sparsity.radius_um, "sparsity.radius_um")?;

        for (name, wf) in
            [("waveforms_deduplicate", &self.waveforms_deduplicate), ("waveforms", &self.waveforms)]
        {
            validate_positive(wf.ms_before + wf.ms_after, &format!("{name}.window_ms"))?;
            validate_positive(wf.max_spikes_per_unit, &format!("{name}.max_spikes_per_unit"))?;
        }

        validate_bin_within_window(
            self.correlograms.bin_ms,
            self.correlograms.window_ms,
            "correlograms",
        )?;
        validate_bin_within_window(self.isis.bin_ms, self.isis.window_ms, "isis")?;
        validate_positive(self.template_metrics.upsampling_factor, "upsampling_factor")?;
        if let Some(radius) = self.template_metrics.sparsity_radius_um {
            validate_positive(radius, "template_metrics.sparsity_radius_um")?;
        }
        validate_positive(self.principal_components.n_components, "n_components")?;

        let qm = &self.quality_metrics.qm_params;
        validate_positive(qm.presence_ratio.bin_duration_s, "presence_ratio.bin_duration_s")?;
        validate_positive(qm.isi_violation.isi_threshold_ms, "isi_violation.isi_threshold_ms")?;
        validate_positive(qm.rp_violation.refractory_period_ms, "rp_violation.refractory_period_ms")?;
        if qm.sliding_rp_violation.exclude_ref_period_below_ms
            >= qm.sliding_rp_violation.max_ref_period_ms
        {
            return Err(SpikepostError::InvalidParameter {
                parameter: "sliding_rp_violation".to_string(),
                reason: "Scan lower bound must be below max_ref_period_ms".to_string(),
            });
        }
        validate_positive(qm.amplitude_cutoff.num_histogram_bins, "num_histogram_bins")?;
        if self.quality_metrics.metric_names.is_empty() {
            return Err(SpikepostError::InvalidParameter {
                parameter: "quality_metrics.metric_names".to_string(),
                reason: "At least one metric name is required".to_string(),
            });
        }

        Ok(())
    }
}

/// Run-wide worker pool configuration.
///
/// Built once by the orchestrator and threaded explicitly into every
/// computation; never installed as process-global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct JobConfig {
    /// Worker count; values <= 0 mean "all available cores".
    pub n_jobs: i64,
    /// Duration of a processing chunk (s) for trace-scanning work.
    pub chunk_duration_s: f64,
    /// Emit interval progress logs.
    pub progress_bar: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self { n_jobs: -1, chunk_duration_s: 1.0, progress_bar: true }
    }
}

impl JobConfig {
    /// Resolves the configured worker count against the machine.
    #[must_use]
    pub fn resolve_threads(&self) -> usize {
        if self.n_jobs > 0 {
            self.n_jobs as usize
        } else {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        }
    }

    /// Builds the bounded worker pool used for per-unit work.
    ///
    /// # Errors
    /// Returns an error if the pool cannot be constructed
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new().num_threads(self.resolve_threads()).build().map_err(|e| {
            SpikepostError::InvalidParameter {
                parameter: "n_jobs".to_string(),
                reason: format!("Failed to build worker pool: {e}"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_production_tables() {
        let config = PostprocessingConfig::default();
        assert!((config.duplicate_threshold - 0.9).abs() < f64::EPSILON);
        assert!((config.sparsity.radius_um - 100.0).abs() < f64::EPSILON);

        assert!((config.waveforms_deduplicate.ms_before - 0.5).abs() < f64::EPSILON);
        assert!((config.waveforms_deduplicate.ms_after - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.waveforms_deduplicate.max_spikes_per_unit, 100);
        assert!(!config.waveforms_deduplicate.return_scaled);

        assert!((config.waveforms.ms_before - 3.0).abs() < f64::EPSILON);
        assert!((config.waveforms.ms_after - 4.0).abs() < f64::EPSILON);
        assert_eq!(config.waveforms.max_spikes_per_unit, 500);
        assert!(config.waveforms.return_scaled);
        assert!(config.waveforms.compute_std);

        assert_eq!(config.correlograms, HistogramConfig { window_ms: 100.0, bin_ms: 2.0 });
        assert_eq!(config.isis, HistogramConfig { window_ms: 100.0, bin_ms: 5.0 });
        assert_eq!(config.principal_components.n_components, 5);
        assert_eq!(config.template_metrics.upsampling_factor, 10);
        assert_eq!(config.quality_metrics.metric_names.len(), 12);
        assert_eq!(config.quality_metrics.n_jobs, 1);

        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{ "duplicate_threshold": 0.9, "not_a_real_option": 1 }"#;
        let result: std::result::Result<PostprocessingConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("not_a_real_option"));
    }

    #[test]
    fn test_unknown_nested_key_rejected() {
        let json = r#"{ "correlograms": { "window_ms": 100.0, "bin_ms": 2.0, "shape": "flat" } }"#;
        let result: std::result::Result<PostprocessingConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_metric_name_rejected() {
        let json = r#"{ "quality_metrics": { "metric_names": ["snr", "made_up_metric"] } }"#;
        let result: std::result::Result<PostprocessingConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("made_up_metric"));
    }

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(-0.5)]
    fn test_invalid_duplicate_threshold(#[case] threshold: f64) {
        let config = PostprocessingConfig { duplicate_threshold: threshold, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_radius_rejected_before_computation() {
        let config = PostprocessingConfig {
            sparsity: SparsityConfig { radius_um: 0.0 },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("radius_um"));
    }

    #[test]
    fn test_bin_wider_than_window_rejected() {
        let config = PostprocessingConfig {
            isis: HistogramConfig { window_ms: 10.0, bin_ms: 20.0 },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_metric_names_rejected() {
        let mut config = PostprocessingConfig::default();
        config.quality_metrics.metric_names.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = PostprocessingConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: PostprocessingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{ "duplicate_threshold": 0.85 }"#).unwrap();

        let config = PostprocessingConfig::load(&path).unwrap();
        assert!((config.duplicate_threshold - 0.85).abs() < f64::EPSILON);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.waveforms.max_spikes_per_unit, 500);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{ "sparsity": { "radius_um": 0.0 } }"#).unwrap();

        assert!(PostprocessingConfig::load(&path).is_err());
    }

    #[test]
    fn test_job_config_resolve_threads() {
        let explicit = JobConfig { n_jobs: 4, ..Default::default() };
        assert_eq!(explicit.resolve_threads(), 4);

        let all_cores = JobConfig::default();
        assert!(all_cores.resolve_threads() >= 1);
    }

    #[test]
    fn test_metric_name_display_matches_serde() {
        let name = MetricName::SlidingRpViolation;
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, format!("\"{name}\""));
    }
}
