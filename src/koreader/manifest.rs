//! The device-side book list.
//!
//! Calibre's device driver maintains `.metadata.calibre` at the device root:
//! a JSON array with one record per book it has sent across. Three fields
//! matter here: the title for logging, the `lpath` the book lives at on the
//! device, and the `application_id` linking it back to the library.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// One book from `.metadata.calibre`.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceBook {
    /// Title as the device driver recorded it.
    #[serde(default)]
    pub title: String,
    /// Book path relative to the device root.
    pub lpath: String,
    /// The Calibre library id, when the driver recorded one.
    #[serde(default)]
    pub application_id: Option<i64>,
}

/// Read the device manifest.
pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<DeviceBook>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Manifest(format!("cannot read {}: {e}", path.display())))?;
    let books = serde_json::from_str(&raw)
        .map_err(|e| Error::Manifest(format!("{}: {e}", path.display())))?;
    Ok(books)
}

/// Where KOReader keeps the sidecar for the book at `lpath`.
///
/// `Books/Title.epub` maps to `Books/Title.sdr/metadata.epub.lua` next to
/// the book, relative to the manifest's directory.
pub fn sidecar_path(manifest_path: &Path, lpath: &str) -> PathBuf {
    let device_root = manifest_path.parent().unwrap_or_else(|| Path::new(""));
    let mut sdr_dir = device_root.join(lpath);
    sdr_dir.set_extension("sdr");
    sdr_dir.join("metadata.epub.lua")
}
