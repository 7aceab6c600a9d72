//! Image data model
//!
//! Platform requests and the serde view of what the registry-copy tool
//! leaves on disk: the manifest and the image config blob.

pub mod manifest;
pub mod platform;

pub use manifest::{Descriptor, ImageConfig, ImageManifest};
pub use platform::Platform;
