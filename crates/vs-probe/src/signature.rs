//! Container identification from leading signature bytes.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use vs_core::{Container, Error, Result};

use crate::ebml;

/// Bytes read from the start of a file for sniffing.
const SNIFF_LEN: usize = 64;

const EBML_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// Identify the container of `path` from its first bytes.
pub fn sniff_container(path: &Path) -> Result<Container> {
    let mut file = File::open(path)?;
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;

    detect(&head).ok_or_else(|| {
        Error::UnsupportedContainer(format!(
            "unrecognized signature {} in {}",
            hex_prefix(&head),
            path.display()
        ))
    })
}

/// Identify a container from a header prefix.
pub fn detect(head: &[u8]) -> Option<Container> {
    if head.len() < 12 {
        return None;
    }

    if head[0..4] == EBML_MAGIC {
        // A header too damaged to read a DocType is left for the Matroska
        // parser to reject.
        return match ebml::doc_type(head).as_deref() {
            Some("webm") => Some(Container::Webm),
            _ => Some(Container::Mkv),
        };
    }

    if &head[0..4] == b"RIFF" && &head[8..12] == b"AVI " {
        return Some(Container::Avi);
    }

    match &head[4..8] {
        b"ftyp" if &head[8..12] == b"qt  " => Some(Container::Mov),
        b"ftyp" => Some(Container::Mp4),
        // QuickTime files predating ftyp start directly with an atom.
        b"moov" | b"mdat" | b"wide" | b"free" => Some(Container::Mov),
        _ => None,
    }
}

fn hex_prefix(head: &[u8]) -> String {
    head.iter().take(8).map(|b| format!("{b:02x}")).collect()
}
