//! Input validation for values that cross the process boundary.

pub mod path_validation;
pub mod validation;

pub use path_validation::{validate_output_path, PathError};
pub use validation::{validate_dimensions, validate_row_layout, ValidationError};
