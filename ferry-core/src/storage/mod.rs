//! Local file storage shared by a node.
//!
//! A node shares the regular files of one flat directory. Names are plain
//! file names, never paths.

pub mod local_store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

pub use local_store::LocalStore;

/// Errors that occur during local storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Name is empty, hidden, or would escape the shared directory
    #[error("Invalid filename '{name}': {reason}")]
    InvalidFilename {
        /// The rejected name
        name: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checks that `name` is a plain file name inside the shared directory.
///
/// Hidden names are reserved for in-flight writes.
///
/// # Errors
///
/// - `StorageError::InvalidFilename` - Empty, hidden, or path-like name
pub fn validate_filename(name: &str) -> Result<(), StorageError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name.contains(['/', '\\', '\0']) {
        Some("name contains a path separator")
    } else if name.starts_with('.') {
        Some("hidden names are reserved")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(StorageError::InvalidFilename {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_filename_accepts_plain_names() {
        assert!(validate_filename("report.pdf").is_ok());
        assert!(validate_filename("archivo 1.txt").is_ok());
    }

    #[test]
    fn test_validate_filename_rejects_traversal() {
        for name in ["", "..", ".", "../etc/passwd", "a/b", "a\\b", ".hidden"] {
            assert!(
                matches!(
                    validate_filename(name),
                    Err(StorageError::InvalidFilename { .. })
                ),
                "{name:?} should be rejected"
            );
        }
    }
}
