//! Package identifiers and the `Directory.Packages.props` document model.
//!
//! This crate defines the schema layer: `PackageId` and `PinMode` types, a
//! lossless XML tree that preserves untouched bytes, and `ManifestDocument`,
//! which reads and edits the import directive and `PackageVersion` pins of a
//! central package management file.

pub mod document;
pub mod types;
mod xml;

pub use document::{ManifestDocument, PinUpdate, PARENT_IMPORT_PROJECT};
pub use types::{PackageId, PinMode, VersionPin};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed manifest '{path}': {reason}")]
    MalformedDocument { path: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_display_names_path_and_reason() {
        let e = SchemaError::MalformedDocument {
            path: "samples/Directory.Packages.props".to_owned(),
            reason: "unexpected end".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("samples/Directory.Packages.props"));
        assert!(msg.contains("unexpected end"));
    }

    #[test]
    fn io_error_converts() {
        let e: SchemaError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(e.to_string().starts_with("failed to read manifest"));
    }
}
