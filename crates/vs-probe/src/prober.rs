//! The [`Prober`] trait defining the interface for media file probing.

use std::path::Path;

use crate::types::MediaDescriptor;

/// Extracts a [`MediaDescriptor`] from a source file.
///
/// Probing is read-only and side-effect free. Implementations must be safe
/// to share across worker threads.
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe the file at `path`.
    ///
    /// Fails with `UnsupportedContainer` when the signature is unknown,
    /// `CorruptHeader` when the headers cannot be parsed and
    /// `NoDecodableStreams` when no usable stream is present.
    fn probe(&self, path: &Path) -> vs_core::Result<MediaDescriptor>;

    /// Whether this prober recognizes the file's signature. A `true` result
    /// does not guarantee that [`Prober::probe`] will succeed.
    fn supports(&self, path: &Path) -> bool;
}
