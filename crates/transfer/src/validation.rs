use std::path::{Component, Path};

use crate::UploadError;

/// Longest filename accepted for an artifact.
const MAX_FILENAME_LEN: usize = 255;

/// Validates a client-declared filename.
///
/// The filename names the assembled artifact inside the store, so it must
/// be a single plain path component.
///
/// Rejects:
/// - Empty names and names longer than 255 bytes
/// - Absolute paths and Windows prefixes (`C:`, `\\server`)
/// - Directory separators, `.` and `..`
/// - NUL bytes
pub fn validate_filename(filename: &str) -> Result<(), UploadError> {
    if filename.trim().is_empty() {
        return Err(UploadError::InvalidInput("filename is required".into()));
    }

    if filename.len() > MAX_FILENAME_LEN {
        return Err(UploadError::InvalidInput(format!(
            "filename longer than {MAX_FILENAME_LEN} bytes"
        )));
    }

    if filename.contains(['/', '\\', '\0']) {
        return Err(UploadError::InvalidInput(format!(
            "filename must not contain separators: {filename}"
        )));
    }

    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        (Some(Component::ParentDir | Component::CurDir), _) => {
            return Err(UploadError::InvalidInput(format!(
                "relative directory not allowed: {filename}"
            )));
        }
        _ => {
            return Err(UploadError::InvalidInput(format!(
                "filename must be a single path component: {filename}"
            )));
        }
    }

    if filename.len() >= 2 && filename.as_bytes()[1] == b':' {
        return Err(UploadError::InvalidInput(format!(
            "drive prefix not allowed: {filename}"
        )));
    }

    Ok(())
}
