mod manifest;
mod position;
mod sidecar;

pub use manifest::{DeviceBook, read_manifest, sidecar_path};
pub use position::{PathStep, SourcePosition};
pub use sidecar::{SourceAnnotation, parse_sidecar, read_sidecar};
