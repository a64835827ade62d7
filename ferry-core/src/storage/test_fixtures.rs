//! Test fixtures for storage testing.

use super::LocalStore;

/// Creates a store inside a fresh temporary directory.
///
/// The store lives in `<temp>/shared`. Keep the returned `TempDir` alive for
/// as long as the store is used.
///
/// # Panics
///
/// Panics if the temporary directory cannot be created. This is acceptable
/// in test fixtures where failures indicate environment issues.
pub fn create_temp_store() -> (tempfile::TempDir, LocalStore) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(temp_dir.path().join("shared")).unwrap();
    (temp_dir, store)
}
