use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Read-only, fixed-width store of precomputed embedding vectors: `rows`
/// little-endian f32 vectors of `dim` components in one flat file,
/// addressed by row index.
///
/// The handle is held open for the store's lifetime and shared across
/// prefetch workers; reads are positional, so no locking is needed.
#[derive(Debug)]
pub struct EmbeddingStore {
    file: File,
    path: PathBuf,
    rows: usize,
    dim: usize,
}

impl EmbeddingStore {
    pub fn open(path: impl Into<PathBuf>, rows: usize, dim: usize) -> Result<Self> {
        let path = path.into();
        anyhow::ensure!(dim > 0, "embedding dim must be > 0");

        let file = File::open(&path)
            .with_context(|| format!("open embedding store failed: {}", path.display()))?;
        let len = file.metadata()?.len();
        let need = (rows as u64)
            .checked_mul(dim as u64)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| anyhow::anyhow!("store shape overflow ({rows} x {dim})"))?;
        anyhow::ensure!(
            len >= need,
            "embedding store too small: {} holds {} bytes, shape ({rows}, {dim}) needs {}",
            path.display(),
            len,
            need
        );

        Ok(Self {
            file,
            path,
            rows,
            dim,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads one embedding vector into `out`. An out-of-range row is fatal:
    /// it means the metadata tables and the physical store disagree.
    pub fn read_row_into(&self, row: u64, out: &mut [f32]) -> Result<()> {
        anyhow::ensure!(
            out.len() == self.dim,
            "output buffer holds {} components, store dim is {}",
            out.len(),
            self.dim
        );
        anyhow::ensure!(
            row < self.rows as u64,
            "embedding row {} out of range for store {} ({} rows)",
            row,
            self.path.display(),
            self.rows
        );

        let row_bytes = self.dim as u64 * 4;
        let offset = row * row_bytes;
        let mut buf = vec![0u8; self.dim * 4];
        self.file.read_exact_at(&mut buf, offset).with_context(|| {
            format!(
                "read embedding row {} failed: {}",
                row,
                self.path.display()
            )
        })?;

        for (component, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
            *component = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(())
    }
}
