//! Local-filesystem object persistence helpers.
//!
//! Recordings, sortings, waveform representations and derived artifacts
//! are persisted to named folders: a JSON manifest plus, where the payload
//! is numeric and large, a little-endian `f32` binary file. This module
//! centralizes folder preparation, reclamation, and the JSON / binary
//! read-write primitives so that every object round-trips bit-identically.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::errors::{Result, SpikepostError};

/// Creates `folder`, failing if it already exists unless `overwrite` is set,
/// in which case the existing folder is deleted first.
///
/// # Errors
/// Returns an error if the folder exists and `overwrite` is false, or on I/O failure
pub fn create_fresh_dir(folder: &Path, overwrite: bool) -> Result<()> {
    if folder.exists() {
        if !overwrite {
            return Err(SpikepostError::InvalidParameter {
                parameter: "folder".to_string(),
                reason: format!(
                    "Folder already exists (pass overwrite to replace): {}",
                    folder.display()
                ),
            });
        }
        fs::remove_dir_all(folder).map_err(|e| SpikepostError::io(folder, e))?;
    }
    fs::create_dir_all(folder).map_err(|e| SpikepostError::io(folder, e))
}

/// Deletes a folder and everything under it, reclaiming its storage.
///
/// Used for the raw waveform scratch folder, which must be reclaimed before
/// the sparse rebuild to bound peak disk usage. Missing folders are not an
/// error.
///
/// # Errors
/// Returns an error on I/O failure
pub fn reclaim_dir(folder: &Path) -> Result<()> {
    if folder.exists() {
        fs::remove_dir_all(folder).map_err(|e| SpikepostError::io(folder, e))?;
    }
    Ok(())
}

/// Serializes `value` as pretty-printed JSON to `path`.
///
/// Struct field order is fixed, so repeated saves of equal values produce
/// identical bytes.
///
/// # Errors
/// Returns an error on I/O or serialization failure
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| SpikepostError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| SpikepostError::json(path, e))?;
    writer.write_all(b"\n").map_err(|e| SpikepostError::io(path, e))?;
    writer.flush().map_err(|e| SpikepostError::io(path, e))
}

/// Deserializes a JSON file into `T`.
///
/// # Errors
/// Returns an error on I/O or deserialization failure
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| SpikepostError::io(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| SpikepostError::json(path, e))
}

/// Writes a slice of `f32` samples as little-endian binary.
///
/// # Errors
/// Returns an error on I/O failure
pub fn write_f32_bin(path: &Path, values: &[f32]) -> Result<()> {
    let file = File::create(path).map_err(|e| SpikepostError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for v in values {
        writer.write_all(&v.to_le_bytes()).map_err(|e| SpikepostError::io(path, e))?;
    }
    writer.flush().map_err(|e| SpikepostError::io(path, e))
}

/// Reads a little-endian `f32` binary file, validating its length.
///
/// # Errors
/// Returns an error on I/O failure or if the file does not hold exactly
/// `expected_len` values
pub fn read_f32_bin(path: &Path, expected_len: usize) -> Result<Vec<f32>> {
    let file = File::open(path).map_err(|e| SpikepostError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).map_err(|e| SpikepostError::io(path, e))?;

    if bytes.len() != expected_len * 4 {
        return Err(SpikepostError::DataIntegrity {
            context: path.display().to_string(),
            reason: format!(
                "Expected {} f32 values ({} bytes), file holds {} bytes",
                expected_len,
                expected_len * 4,
                bytes.len()
            ),
        });
    }

    let mut values = Vec::with_capacity(expected_len);
    for chunk in bytes.chunks_exact(4) {
        values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    Ok(values)
}
