//! A prober that delegates to an ordered list of [`Prober`]s.

use std::path::Path;

use vs_core::Error;

use crate::prober::Prober;
use crate::types::MediaDescriptor;

/// Tries each registered [`Prober`] in order and returns the first success.
///
/// A prober whose `supports` returns `false` is skipped. When every
/// candidate fails, the last error is returned so the caller sees the most
/// specific failure kind.
pub struct CompositeProber {
    probers: Vec<Box<dyn Prober>>,
}

impl CompositeProber {
    pub fn new(probers: Vec<Box<dyn Prober>>) -> Self {
        Self { probers }
    }
}

impl Prober for CompositeProber {
    fn name(&self) -> &'static str {
        "composite"
    }

    fn supports(&self, path: &Path) -> bool {
        self.probers.iter().any(|p| p.supports(path))
    }

    fn probe(&self, path: &Path) -> vs_core::Result<MediaDescriptor> {
        let mut last_err = None;

        for prober in &self.probers {
            if !prober.supports(path) {
                continue;
            }

            match prober.probe(path) {
                Ok(info) => return Ok(info),
                Err(e) => {
                    tracing::debug!(prober = prober.name(), error = %e, "prober failed, trying next");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::UnsupportedContainer(format!("no prober recognizes {}", path.display()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rust_prober::RustProber;

    struct Failing;

    impl Prober for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        fn supports(&self, _path: &Path) -> bool {
            true
        }
        fn probe(&self, _path: &Path) -> vs_core::Result<MediaDescriptor> {
            Err(Error::CorruptHeader("always".into()))
        }
    }

    #[test]
    fn no_probers_is_unsupported() {
        let composite = CompositeProber::new(vec![]);
        let err = composite.probe(Path::new("movie.mkv")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedContainer(_)));
    }

    #[test]
    fn falls_through_to_next_prober() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.avi");
        std::fs::write(&path, crate::avi::fixture::sample()).unwrap();

        let composite = CompositeProber::new(vec![Box::new(Failing), Box::new(RustProber::new())]);
        let desc = composite.probe(&path).unwrap();
        assert_eq!(desc.streams.len(), 2);
    }

    #[test]
    fn last_error_wins() {
        let composite = CompositeProber::new(vec![Box::new(Failing)]);
        let err = composite.probe(Path::new("/whatever")).unwrap_err();
        assert!(matches!(err, Error::CorruptHeader(_)));
    }
}
