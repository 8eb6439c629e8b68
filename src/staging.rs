//! Transient score files.
//!
//! The MEI text of a request is written to a uniquely named file
//! (`score-XXXXXX.mei`) in the scratch directory and loaded from there.
//! The file is removed when the [`StagedScore`] is released or dropped,
//! so every exit path of a request cleans up after itself.

use std::io::{self, Write};
use std::path::Path;

use log::debug;
use tempfile::NamedTempFile;

use crate::model::Score;
use crate::parser::{self, ScoreError};

/// A score written to a temporary file for the lifetime of one request.
#[derive(Debug)]
pub struct StagedScore {
    file: NamedTempFile,
}

impl StagedScore {
    /// Write `mei` as UTF-8 into a fresh file inside `dir`.
    pub fn stage(dir: &Path, mei: &str) -> io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("score-")
            .suffix(".mei")
            .tempfile_in(dir)?;
        file.write_all(mei.as_bytes())?;
        file.flush()?;
        debug!("staged {} bytes of MEI at {}", mei.len(), file.path().display());
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Load the staged file with the MEI parser.
    pub fn load(&self) -> Result<Score, ScoreError> {
        parser::parse_file(self.path())
    }

    /// Delete the file now, reporting any error. Dropping the guard also
    /// deletes it, but silently.
    pub fn release(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        self.file.close()?;
        debug!("released {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_files(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn stage_writes_text_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedScore::stage(dir.path(), "<mei/>").unwrap();
        let path = staged.path().to_path_buf();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<mei/>");
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("score-") && name.ends_with(".mei"), "{name}");

        staged.release().unwrap();
        assert!(!path.exists());
        assert_eq!(count_files(dir.path()), 0);
    }

    #[test]
    fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let staged = StagedScore::stage(dir.path(), "<mei/>").unwrap();
            staged.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn concurrent_stages_use_distinct_names() {
        let dir = tempfile::tempdir().unwrap();
        let a = StagedScore::stage(dir.path(), "a").unwrap();
        let b = StagedScore::stage(dir.path(), "b").unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(count_files(dir.path()), 2);
        drop(a);
        assert_eq!(std::fs::read_to_string(b.path()).unwrap(), "b");
        drop(b);
        assert_eq!(count_files(dir.path()), 0);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedScore::stage(dir.path(), "not xml").unwrap();
        assert!(matches!(staged.load(), Err(ScoreError::Xml(_))));
    }

    #[test]
    fn stage_fails_for_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(StagedScore::stage(&missing, "<mei/>").is_err());
    }
}
