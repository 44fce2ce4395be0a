//! Output staging.
//!
//! Outputs are written to a hidden partial file next to their destination
//! and renamed into place only once the whole pipeline has succeeded. A
//! staging that is dropped without [`OutputStaging::commit`] deletes its
//! partial file, so failed and cancelled jobs never leave output behind.

use std::path::{Path, PathBuf};

use vs_core::{Error, Result};

#[derive(Debug)]
pub struct OutputStaging {
    partial: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl OutputStaging {
    /// Prepare to write `dest`. Creates the parent directory if needed.
    pub fn create(dest: impl Into<PathBuf>) -> Result<Self> {
        let dest = dest.into();
        let file_name = dest
            .file_name()
            .ok_or_else(|| Error::Validation(format!("output path has no file name: {}", dest.display())))?
            .to_string_lossy()
            .into_owned();
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        if dest.exists() {
            return Err(Error::Conflict(format!("output already exists: {}", dest.display())));
        }

        Ok(Self {
            partial: dir.join(format!(".{file_name}.partial")),
            dest,
            committed: false,
        })
    }

    /// The file the muxer writes to.
    pub fn partial(&self) -> &Path {
        &self.partial
    }

    /// The final output location.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Move the partial file into place and return the final path.
    pub fn commit(mut self) -> Result<PathBuf> {
        if !self.partial.exists() {
            return Err(Error::stage(
                "mux",
                format!("muxer produced no output at {}", self.partial.display()),
            ));
        }

        // Rename first (same filesystem), fall back to copy+remove.
        if std::fs::rename(&self.partial, &self.dest).is_err() {
            std::fs::copy(&self.partial, &self.dest)?;
            let _ = std::fs::remove_file(&self.partial);
        }

        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for OutputStaging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.partial) {
            Ok(()) => tracing::debug!(path = %self.partial.display(), "removed partial output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.partial.display(), "failed to remove partial output: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn partial_is_hidden_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let staging = OutputStaging::create(dir.path().join("out/movie.webm")).unwrap();
        assert!(dir.path().join("out").is_dir());
        assert_eq!(staging.partial(), dir.path().join("out/.movie.webm.partial"));
        assert_eq!(staging.dest(), dir.path().join("out/movie.webm"));
    }

    #[test]
    fn commit_moves_partial_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let staging = OutputStaging::create(dir.path().join("movie.mp4")).unwrap();
        fs::write(staging.partial(), b"payload").unwrap();
        let partial = staging.partial().to_path_buf();

        let out = staging.commit().unwrap();
        assert_eq!(fs::read(&out).unwrap(), b"payload");
        assert!(!partial.exists());
    }

    #[test]
    fn drop_without_commit_deletes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let staging = OutputStaging::create(dir.path().join("movie.mkv")).unwrap();
        fs::write(staging.partial(), b"half written").unwrap();
        let partial = staging.partial().to_path_buf();

        drop(staging);
        assert!(!partial.exists());
        assert!(!dir.path().join("movie.mkv").exists());
    }

    #[test]
    fn commit_without_output_is_mux_failure() {
        let dir = tempfile::tempdir().unwrap();
        let staging = OutputStaging::create(dir.path().join("movie.avi")).unwrap();
        let err = staging.commit().unwrap_err();
        assert!(matches!(err, Error::Stage { ref stage, .. } if stage == "mux"));
    }

    #[test]
    fn existing_destination_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("movie.mov");
        fs::write(&dest, b"keep me").unwrap();
        assert!(matches!(OutputStaging::create(&dest), Err(Error::Conflict(_))));
        assert_eq!(fs::read(&dest).unwrap(), b"keep me");
    }
}
