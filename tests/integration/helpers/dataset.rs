//! Synthetic recording/sorting dataset generation.
//!
//! Builds deterministic multichannel traces with injected biphasic spike
//! waveforms at known times, plus the matching sorting, and writes them in
//! the capsule's on-disk layout for end-to-end runs.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

use spikepost_lib::recording::Recording;
use spikepost_lib::sorting::Sorting;

/// One synthetic unit: where it peaks, how strongly, and when it fires.
pub struct UnitSpec {
    pub unit_id: u32,
    pub peak_channel: usize,
    pub amplitude: f32,
    /// Inter-spike period in samples.
    pub period: u64,
    /// First spike sample.
    pub phase: u64,
}

/// Deterministic low-amplitude noise so traces are not perfectly flat.
fn noise(seed: u64) -> f32 {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
    state ^= state >> 33;
    ((state % 1000) as f32 / 1000.0 - 0.5) * 0.2
}

/// Builds a recording with injected spikes and the matching sorting.
pub fn build_dataset(
    num_channels: usize,
    num_samples: usize,
    sampling_frequency: f64,
    units: &[UnitSpec],
) -> (Recording, Sorting) {
    let mut traces = vec![0.0_f32; num_samples * num_channels];
    for (i, value) in traces.iter_mut().enumerate() {
        *value = noise(i as u64);
    }

    let mut trains: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
    let mut unit_ids = Vec::new();
    for unit in units {
        let mut train = Vec::new();
        let mut t = unit.phase;
        while (t as usize) + 4 < num_samples {
            train.push(t);
            // Biphasic waveform on the peak channel, 40% on neighbors.
            for (channel, scale) in [
                (unit.peak_channel as i64 - 1, 0.4),
                (unit.peak_channel as i64, 1.0),
                (unit.peak_channel as i64 + 1, 0.4),
            ] {
                if channel < 0 || channel >= num_channels as i64 {
                    continue;
                }
                let base = t as usize * num_channels + channel as usize;
                traces[base] -= unit.amplitude * scale;
                traces[base + num_channels] += unit.amplitude * scale * 0.3;
            }
            t += unit.period;
        }
        trains.insert(unit.unit_id, train);
        unit_ids.push(unit.unit_id);
    }

    let channel_ids = (0..num_channels).map(|c| format!("AP{c}")).collect();
    let channel_locations = (0..num_channels).map(|c| [0.0, 20.0 * c as f32]).collect();
    let recording = Recording::new(
        channel_ids,
        channel_locations,
        sampling_frequency,
        traces,
        0.195,
        0.0,
    )
    .unwrap();
    let sorting = Sorting::new(unit_ids, sampling_frequency, trains).unwrap();
    (recording, sorting)
}

/// Writes one block in the capsule layout under `data_dir`.
pub fn write_block(data_dir: &Path, block_name: &str, recording: &Recording, sorting: &Sorting) {
    recording.save(&data_dir.join("preprocessed").join(block_name), true).unwrap();
    sorting.save(&data_dir.join("spikesorted").join(block_name), true).unwrap();
}

/// A two-unit block where unit 11 is a weaker duplicate of unit 10 and
/// unit 20 is distinct.
pub fn duplicated_units_block() -> (Recording, Sorting) {
    build_dataset(
        4,
        30_000,
        10_000.0,
        &[
            UnitSpec { unit_id: 10, peak_channel: 0, amplitude: 12.0, period: 100, phase: 30 },
            UnitSpec { unit_id: 11, peak_channel: 0, amplitude: 12.0, period: 290, phase: 75 },
            UnitSpec { unit_id: 20, peak_channel: 3, amplitude: 15.0, period: 130, phase: 50 },
        ],
    )
}

/// A clean two-unit block with no duplicates.
pub fn clean_block() -> (Recording, Sorting) {
    build_dataset(
        4,
        30_000,
        10_000.0,
        &[
            UnitSpec { unit_id: 1, peak_channel: 0, amplitude: 14.0, period: 110, phase: 40 },
            UnitSpec { unit_id: 2, peak_channel: 3, amplitude: 11.0, period: 170, phase: 90 },
        ],
    )
}

/// The spikepost binary under test.
pub fn spikepost_cmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spikepost"))
}
