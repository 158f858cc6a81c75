use std::path::Path;

use anyhow::{bail, Context, Result};

use convert_common::config::LimitsConfig;

/// Read an upload, refusing files above `limits.max_upload_kb` before any
/// bytes are loaded.
pub fn read_upload(path: &Path, limits: &LimitsConfig) -> Result<Vec<u8>> {
    let meta = std::fs::metadata(path).with_context(|| format!("reading {}", path.display()))?;
    let max = limits.max_upload_kb.saturating_mul(1024);
    if meta.len() > max {
        bail!(
            "{} is {} KiB, above the {} KiB upload limit",
            path.display(),
            meta.len().div_ceil(1024),
            limits.max_upload_kb
        );
    }
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

/// The name an upload is known by: its file name without directories.
pub fn upload_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
