//! Input validation for encode job parameters.

use crate::types::BYTES_PER_PIXEL;

/// Maximum dimension value (must be positive)
pub const MAX_DIMENSION: u32 = 16384;

/// Validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Dimension (width/height) is out of valid range
    DimensionOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },
    /// Row stride is smaller than one packed row
    StrideTooSmall { stride: u32, min: usize },
    /// Payload does not hold `height` rows of `stride` bytes
    PayloadTooSmall { len: usize, expected: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DimensionOutOfRange { field, value, max } => {
                write!(f, "{} out of range: {} (max {})", field, value, max)
            }
            ValidationError::StrideTooSmall { stride, min } => {
                write!(f, "Row stride too small: {} bytes (min {})", stride, min)
            }
            ValidationError::PayloadTooSmall { len, expected } => {
                write!(f, "Payload too small: {} bytes (expected {})", len, expected)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate dimension values (width, height).
///
/// Dimensions must be positive and not exceed MAX_DIMENSION (16384).
pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ValidationError> {
    if width == 0 || width > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "width",
            value: width,
            max: MAX_DIMENSION,
        });
    }
    if height == 0 || height > MAX_DIMENSION {
        return Err(ValidationError::DimensionOutOfRange {
            field: "height",
            value: height,
            max: MAX_DIMENSION,
        });
    }
    Ok(())
}

/// Validate that `len` payload bytes hold `height` rows of `bytes_per_row`,
/// each at least one packed RGBA row wide.
pub fn validate_row_layout(
    width: u32,
    height: u32,
    bytes_per_row: u32,
    len: usize,
) -> Result<(), ValidationError> {
    let min = width as usize * BYTES_PER_PIXEL;
    if (bytes_per_row as usize) < min {
        return Err(ValidationError::StrideTooSmall {
            stride: bytes_per_row,
            min,
        });
    }
    let expected = bytes_per_row as usize * height as usize;
    if len < expected {
        return Err(ValidationError::PayloadTooSmall { len, expected });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dimensions() {
        assert!(validate_dimensions(1920, 1080).is_ok());
        assert!(validate_dimensions(1, 1).is_ok());
        assert!(validate_dimensions(MAX_DIMENSION, MAX_DIMENSION).is_ok());
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            validate_dimensions(0, 1080),
            Err(ValidationError::DimensionOutOfRange { field: "width", .. })
        ));
        assert!(matches!(
            validate_dimensions(1920, 0),
            Err(ValidationError::DimensionOutOfRange { field: "height", .. })
        ));
        assert!(validate_dimensions(MAX_DIMENSION + 1, 100).is_err());
    }

    #[test]
    fn test_row_layout() {
        assert!(validate_row_layout(800, 600, 3200, 3200 * 600).is_ok());
        assert!(matches!(
            validate_row_layout(800, 600, 3199, 3200 * 600),
            Err(ValidationError::StrideTooSmall { .. })
        ));
        assert!(matches!(
            validate_row_layout(800, 600, 3200, 3200 * 599),
            Err(ValidationError::PayloadTooSmall { .. })
        ));
    }
}
