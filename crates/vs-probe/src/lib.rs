//! # vs-probe
//!
//! Reads container headers to describe a media file without decoding its
//! payload. The container is identified from its leading signature bytes,
//! never from the file extension:
//!
//! - Matroska / WebM (EBML header, `DocType` tells them apart)
//! - MP4 / QuickTime (`ftyp` box, major brand `qt  ` means MOV)
//! - AVI (`RIFF....AVI `)
//!
//! Streams whose codec is not recognized are left out of the descriptor. A
//! file with none left fails with `NoDecodableStreams`.

mod avi;
pub mod composite;
mod ebml;
pub mod prober;
pub mod rust_prober;
pub mod signature;
pub mod types;

pub use composite::CompositeProber;
pub use prober::Prober;
pub use rust_prober::RustProber;
pub use signature::sniff_container;
pub use types::{MediaDescriptor, StreamDescriptor};
