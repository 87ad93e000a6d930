use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder as TempFileBuilder, NamedTempFile};

const TEMP_PREFIX: &str = "video-toolbox-";

/// A temp file owned by one job. Removed on drop, whatever way the job ended.
/// Removal failures are logged and otherwise ignored.
#[derive(Debug)]
pub struct TempFile {
    file: Option<NamedTempFile>,
    path: PathBuf,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        match file.close() {
            Ok(()) => log::debug!(
                target: "video_toolbox::ffmpeg::temp",
                "Removed temp file {}",
                self.path.display()
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                target: "video_toolbox::ffmpeg::temp",
                "Failed to remove temp file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Factory for job-scoped temp files. Defaults to the system temp directory.
#[derive(Debug, Clone)]
pub struct TempFileManager {
    dir: PathBuf,
}

impl Default for TempFileManager {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
        }
    }
}

impl TempFileManager {
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a temp file with `content`. The name is random and the file is
    /// created exclusively, so an existing path is never reused. The returned
    /// guard deletes it on drop.
    pub fn create(&self, suffix: &str, content: &[u8]) -> io::Result<TempFile> {
        let mut file = TempFileBuilder::new()
            .prefix(TEMP_PREFIX)
            .suffix(&format!("-{}", suffix))
            .tempfile_in(&self.dir)?;
        file.write_all(content)?;
        file.flush()?;
        let path = file.path().to_path_buf();
        Ok(TempFile {
            file: Some(file),
            path,
        })
    }
}
