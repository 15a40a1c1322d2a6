//! Where converted recordings are written.

use std::path::{Path, PathBuf};

use chrono::Local;
use voxshift_core::{wav, Result, SampleBuffer};

use crate::settings::AppSettings;

/// Output directory: `VOXSHIFT_OUTPUT_DIR`, then the configured directory,
/// then the user's Documents folder when it exists, then the working
/// directory.
pub fn output_dir(settings: &AppSettings) -> PathBuf {
    if let Some(dir) = std::env::var_os("VOXSHIFT_OUTPUT_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = settings.output_dir.as_ref() {
        return dir.clone();
    }
    dirs::document_dir()
        .filter(|d| d.is_dir())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Save a converted buffer as `converted_<voice>_<timestamp>.wav` in `dir`.
pub fn save_converted(dir: &Path, voice: &str, buffer: &SampleBuffer) -> Result<PathBuf> {
    wav::save_converted(dir, voice, buffer, Local::now())
}
