use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Append-only `training.log` under the models directory. Every run
/// appends to the same file, so the log accumulates run history.
pub struct RunLog {
    file: File,
    path: PathBuf,
}

impl RunLog {
    pub fn open(models_dir: impl AsRef<Path>) -> Result<Self> {
        let models_dir = models_dir.as_ref();
        fs::create_dir_all(models_dir)
            .with_context(|| format!("create models dir failed: {}", models_dir.display()))?;
        let path = models_dir.join("training.log");
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .with_context(|| format!("open run log failed: {}", path.display()))?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")
            .with_context(|| format!("append to run log failed: {}", self.path.display()))?;
        self.file
            .flush()
            .with_context(|| format!("flush run log failed: {}", self.path.display()))
    }
}
