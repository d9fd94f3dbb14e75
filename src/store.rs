//! Persisted table artifacts
//!
//! Each table lives in `<results>/<key>.parquet`. Writes go to a temporary
//! file that is renamed into place, so a reader never sees a partial artifact
//! and every write replaces the previous one wholesale.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use crate::error::AnalysisError;
use crate::table::Columnar;

/// Extension of every artifact file
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Name of the advisory lock file inside the results directory
pub const LOCK_FILE_NAME: &str = ".ecohab.lock";

/// Directory of parquet artifacts for one project
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", key, ARTIFACT_EXTENSION))
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_file()
    }

    /// Write a batch as the artifact for `key`, replacing any previous one.
    pub fn write_batch(&self, key: &str, batch: &RecordBatch) -> Result<PathBuf, AnalysisError> {
        fs::create_dir_all(&self.root)?;
        let path = self.path(key);
        let staging = self.root.join(format!(".{}.{}.tmp", key, ARTIFACT_EXTENSION));

        let props = WriterProperties::builder()
            .set_compression(Compression::LZ4_RAW)
            .build();
        let file = File::create(&staging)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
        fs::rename(&staging, &path)?;

        debug!(table = key, rows = batch.num_rows(), path = %path.display(), "artifact written");
        Ok(path)
    }

    /// Read the artifact for `key` as one batch, if it exists.
    pub fn read_batch(&self, key: &str) -> Result<Option<RecordBatch>, AnalysisError> {
        let path = self.path(key);
        if !path.is_file() {
            return Ok(None);
        }

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
        let schema = builder.schema().clone();
        let batches = builder
            .build()?
            .collect::<Result<Vec<RecordBatch>, _>>()?;
        Ok(Some(concat_batches(&schema, &batches)?))
    }

    pub fn save<T: Columnar>(&self, key: &str, rows: &[T]) -> Result<PathBuf, AnalysisError> {
        self.write_batch(key, &T::to_batch(rows)?)
    }

    pub fn load<T: Columnar>(&self, key: &str) -> Result<Option<Vec<T>>, AnalysisError> {
        match self.read_batch(key)? {
            Some(batch) => Ok(Some(T::from_batch(&batch)?)),
            None => Ok(None),
        }
    }

    /// Take the per-project advisory lock.
    pub fn lock(&self) -> Result<ProjectLock, AnalysisError> {
        ProjectLock::acquire(&self.root)
    }
}

/// Exclusive claim on a results directory; released on drop
#[derive(Debug)]
pub struct ProjectLock {
    path: PathBuf,
}

impl ProjectLock {
    pub fn acquire(results: &Path) -> Result<Self, AnalysisError> {
        fs::create_dir_all(results)?;
        let path = results.join(LOCK_FILE_NAME);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AnalysisError::ProjectLocked(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ProjectLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
