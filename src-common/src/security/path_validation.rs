//! Path validation for screenshot output files.

use std::path::Path;

/// Path validation error types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path contains directory traversal sequences (..)
    ContainsTraversal,
    /// Path contains null bytes
    ContainsNullByte,
    /// Path is not absolute
    NotAbsolute,
    /// Path does not end in `.png`
    NotPng,
    /// Parent directory does not exist
    MissingParent,
    /// Path is too long
    TooLong(usize),
}

impl std::fmt::Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::ContainsTraversal => write!(f, "Path contains directory traversal"),
            PathError::ContainsNullByte => write!(f, "Path contains null byte"),
            PathError::NotAbsolute => write!(f, "Path must be absolute"),
            PathError::NotPng => write!(f, "Path must have a .png extension"),
            PathError::MissingParent => write!(f, "Parent directory does not exist"),
            PathError::TooLong(len) => write!(f, "Path too long: {} chars", len),
        }
    }
}

impl std::error::Error for PathError {}

/// Maximum path length in characters.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Validate a PNG output path before anything is written to it.
///
/// The worker runs with the caller's privileges, so this only guards against
/// malformed paths:
/// 1. Rejects paths containing null bytes
/// 2. Rejects paths that are too long
/// 3. Rejects paths containing ".." traversal sequences
/// 4. Requires absolute paths with a `.png` extension
/// 5. Requires the parent directory to exist
pub fn validate_output_path(path: &Path) -> Result<(), PathError> {
    let path_str = path.to_string_lossy();

    if path_str.contains('\0') {
        return Err(PathError::ContainsNullByte);
    }

    if path_str.len() > MAX_PATH_LENGTH {
        return Err(PathError::TooLong(path_str.len()));
    }

    for component in path.components() {
        if component.as_os_str() == ".." {
            return Err(PathError::ContainsTraversal);
        }
    }

    if !path.is_absolute() {
        return Err(PathError::NotAbsolute);
    }

    let is_png = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("png"))
        .unwrap_or(false);
    if !is_png {
        return Err(PathError::NotPng);
    }

    match path.parent() {
        Some(parent) if parent.is_dir() => Ok(()),
        _ => Err(PathError::MissingParent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_rejects_traversal() {
        let path = PathBuf::from("/home/user/../etc/shot.png");
        assert_eq!(
            validate_output_path(&path),
            Err(PathError::ContainsTraversal)
        );
    }

    #[test]
    fn test_rejects_relative_path() {
        let path = PathBuf::from("screenshots/shot.png");
        assert_eq!(validate_output_path(&path), Err(PathError::NotAbsolute));
    }

    #[test]
    fn test_rejects_null_byte() {
        let path = PathBuf::from("/tmp/sh\0ot.png");
        assert_eq!(validate_output_path(&path), Err(PathError::ContainsNullByte));
    }

    #[test]
    fn test_rejects_other_extension() {
        let path = std::env::temp_dir().join("shot.jpg");
        assert_eq!(validate_output_path(&path), Err(PathError::NotPng));
    }

    #[test]
    fn test_rejects_missing_parent() {
        let path = std::env::temp_dir()
            .join(format!("framecap-missing-{}", std::process::id()))
            .join("shot.png");
        assert_eq!(validate_output_path(&path), Err(PathError::MissingParent));
    }

    #[test]
    fn test_accepts_temp_png() {
        let path = std::env::temp_dir().join("shot.PNG");
        assert!(validate_output_path(&path).is_ok());
    }
}
