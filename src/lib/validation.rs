//! Input validation utilities
//!
//! Common validation functions for command-line parameters, configuration
//! values, and input folders, with consistent error messages.
//!
//! All validation functions use the structured error types from
//! [`crate::errors`] so that callers get rich context when validation fails.

use std::fmt::Display;
use std::path::Path;

use crate::errors::{Result, SpikepostError};

/// Validate that a directory exists
///
/// # Arguments
/// * `path` - Path to validate
/// * `description` - Human-readable description of the folder (e.g., "Recording folder")
///
/// # Errors
/// Returns an error if the directory does not exist
pub fn validate_dir_exists<P: AsRef<Path>>(path: P, description: &str) -> Result<()> {
    let path_ref = path.as_ref();
    if !path_ref.is_dir() {
        return Err(SpikepostError::InvalidParameter {
            parameter: description.to_string(),
            reason: format!("Directory does not exist: {}", path_ref.display()),
        });
    }
    Ok(())
}

/// Validate that a value is strictly positive
///
/// # Arguments
/// * `value` - Value to validate
/// * `name` - Name of the parameter for error messages
///
/// # Errors
/// Returns an error if the value is not positive
///
/// # Example
/// ```
/// use spikepost_lib::validation::validate_positive;
///
/// validate_positive(100.0, "radius_um").unwrap();
///
/// let result = validate_positive(0.0, "radius_um");
/// assert!(result.is_err());
/// ```
#[allow(clippy::needless_pass_by_value)]
pub fn validate_positive<T: PartialOrd + Display + Default>(value: T, name: &str) -> Result<()> {
    if value <= T::default() {
        return Err(SpikepostError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("Must be positive (> 0), got: {value}"),
        });
    }
    Ok(())
}

/// Validate that a fraction lies strictly between 0 and 1
///
/// Used for similarity thresholds, which are meaningless at either extreme.
///
/// # Errors
/// Returns an error if `value` is not in the open interval (0, 1)
///
/// # Example
/// ```
/// use spikepost_lib::validation::validate_unit_fraction;
///
/// validate_unit_fraction(0.9, "duplicate_threshold").unwrap();
///
/// assert!(validate_unit_fraction(1.0, "duplicate_threshold").is_err());
/// assert!(validate_unit_fraction(0.0, "duplicate_threshold").is_err());
/// ```
pub fn validate_unit_fraction(value: f64, name: &str) -> Result<()> {
    if !(value > 0.0 && value < 1.0) {
        return Err(SpikepostError::InvalidParameter {
            parameter: name.to_string(),
            reason: format!("Must be strictly between 0 and 1, got: {value}"),
        });
    }
    Ok(())
}

/// Validate that a histogram bin width fits within its window
///
/// # Errors
/// Returns an error if `bin_ms` is not positive or exceeds `window_ms`
///
/// # Example
/// ```
/// use spikepost_lib::validation::validate_bin_within_window;
///
/// validate_bin_within_window(2.0, 100.0, "correlograms").unwrap();
///
/// assert!(validate_bin_within_window(200.0, 100.0, "correlograms").is_err());
/// assert!(validate_bin_within_window(0.0, 100.0, "correlograms").is_err());
/// ```
pub fn validate_bin_within_window(bin_ms: f64, window_ms: f64, name: &str) -> Result<()> {
    if bin_ms <= 0.0 {
        return Err(SpikepostError::InvalidParameter {
            parameter: format!("{name}.bin_ms"),
            reason: format!("Must be positive (> 0), got: {bin_ms}"),
        });
    }
    if bin_ms > window_ms {
        return Err(SpikepostError::InvalidParameter {
            parameter: format!("{name}.bin_ms"),
            reason: format!("Bin width ({bin_ms} ms) exceeds histogram window ({window_ms} ms)"),
        });
    }
    Ok(())
}

/// Validate that a collection of ids contains no duplicates
///
/// # Errors
/// Returns an error naming the first duplicated id
pub fn validate_unique_ids<T: PartialEq + Display>(ids: &[T], name: &str) -> Result<()> {
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(SpikepostError::InvalidParameter {
                parameter: name.to_string(),
                reason: format!("Duplicate id: {id}"),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn test_validate_dir_exists_valid() {
        let temp_dir = TempDir::new().unwrap();
        validate_dir_exists(temp_dir.path(), "Test folder").unwrap();
    }

    #[test]
    fn test_validate_dir_exists_invalid() {
        let result = validate_dir_exists("/nonexistent/folder", "Recording folder");
        assert!(result.is_err());
        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("Recording folder"));
        assert!(err_msg.contains("does not exist"));
    }

    #[rstest]
    #[case(1.0, true, "small positive")]
    #[case(100.0, true, "typical radius")]
    #[case(0.0, false, "zero")]
    #[case(-50.0, false, "negative")]
    fn test_validate_positive_f64(
        #[case] value: f64,
        #[case] should_succeed: bool,
        #[case] description: &str,
    ) {
        let result = validate_positive(value, "radius_um");
        if should_succeed {
            assert!(result.is_ok(), "Failed for: {description}");
        } else {
            assert!(result.is_err(), "Should have failed for: {description}");
            let err_msg = result.unwrap_err().to_string();
            assert!(err_msg.contains("radius_um"), "Missing parameter name for: {description}");
            assert!(err_msg.contains("Must be positive"), "Missing reason for: {description}");
        }
    }

    #[test]
    fn test_validate_positive_int() {
        validate_positive(5_usize, "max_spikes_per_unit").unwrap();
        assert!(validate_positive(0_usize, "max_spikes_per_unit").is_err());
    }

    #[rstest]
    #[case(0.5, true)]
    #[case(0.9, true)]
    #[case(0.999, true)]
    #[case(0.0, false)]
    #[case(1.0, false)]
    #[case(1.5, false)]
    #[case(-0.1, false)]
    fn test_validate_unit_fraction(#[case] value: f64, #[case] should_succeed: bool) {
        let result = validate_unit_fraction(value, "duplicate_threshold");
        assert_eq!(result.is_ok(), should_succeed, "value: {value}");
    }

    #[test]
    fn test_validate_bin_within_window() {
        validate_bin_within_window(2.0, 100.0, "correlograms").unwrap();
        validate_bin_within_window(100.0, 100.0, "correlograms").unwrap();

        let err = validate_bin_within_window(120.0, 100.0, "correlograms").unwrap_err();
        assert!(err.to_string().contains("exceeds histogram window"));

        let err = validate_bin_within_window(0.0, 100.0, "isis").unwrap_err();
        assert!(err.to_string().contains("Must be positive"));
    }

    #[test]
    fn test_validate_unique_ids() {
        validate_unique_ids(&[1_u32, 2, 3], "unit_ids").unwrap();

        let err = validate_unique_ids(&[1_u32, 2, 1], "unit_ids").unwrap_err();
        assert!(err.to_string().contains("Duplicate id: 1"));
    }
}
