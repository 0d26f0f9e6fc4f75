//! Record store: the flat CSV dataset and its in-memory snapshot.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::record::COLUMNS;
use crate::{Dataset, DirectoryError, DoctorRecord, Result};

const BOM: &str = "\u{feff}";

/// Reads a dataset file.
///
/// The header row is discarded and columns are taken by position. A leading
/// byte-order mark is tolerated, extra columns are ignored, missing trailing
/// columns default to empty, and rows with no non-empty value are dropped.
pub fn read_dataset(path: impl AsRef<Path>) -> Result<Dataset> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    parse_dataset(&content)
}

/// Parses dataset CSV text. See [`read_dataset`].
pub fn parse_dataset(content: &str) -> Result<Dataset> {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut dataset = Vec::new();
    let mut dropped = 0usize;
    for row in reader.records() {
        let row = row?;
        let record = DoctorRecord::from_cells(row.iter());
        if record.cells().iter().all(|c| c.is_empty()) {
            dropped += 1;
            continue;
        }
        dataset.push(record);
    }

    if dropped > 0 {
        debug!("Dropped {} empty rows", dropped);
    }
    Ok(dataset)
}

/// Writes a dataset as UTF-8 CSV with a byte-order mark and a header row.
pub fn write_dataset(path: impl AsRef<Path>, records: &[DoctorRecord]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    file.write_all(BOM.as_bytes())?;

    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(COLUMNS)?;
    for record in records {
        writer.write_record(record.cells())?;
    }
    writer.flush()?;

    info!("Wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Process-wide, read-mostly dataset.
///
/// Readers take an [`Arc`] snapshot and never observe a half-built dataset;
/// [`reload`](Self::reload) builds the new dataset first and swaps it in.
#[derive(Debug, Default)]
pub struct RecordStore {
    path: Option<PathBuf>,
    data: RwLock<Arc<Dataset>>,
}

impl RecordStore {
    /// Loads the dataset at `path`, falling back to an empty store.
    ///
    /// A missing, unreadable or malformed file is logged and leaves the
    /// store empty; the caller keeps running in "no data" mode.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let dataset = match read_dataset(&path) {
            Ok(dataset) => {
                info!("Loaded {} records from {}", dataset.len(), path.display());
                dataset
            }
            Err(e) => {
                warn!("No data loaded from {}: {}", path.display(), e);
                Vec::new()
            }
        };
        Self {
            path: Some(path),
            data: RwLock::new(Arc::new(dataset)),
        }
    }

    /// Loads the dataset at `path`, failing if it cannot be read.
    pub fn try_load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dataset = read_dataset(&path)?;
        Ok(Self {
            path: Some(path),
            data: RwLock::new(Arc::new(dataset)),
        })
    }

    /// Wraps an in-memory dataset.
    pub fn from_records(records: Dataset) -> Self {
        Self {
            path: None,
            data: RwLock::new(Arc::new(records)),
        }
    }

    /// The file this store was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Current dataset.
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-reads the backing file and swaps it in. On error the current
    /// dataset is kept.
    pub fn reload(&self) -> Result<usize> {
        let path = self
            .path
            .as_ref()
            .ok_or_else(|| DirectoryError::Config("Store has no backing file".to_string()))?;
        let dataset = Arc::new(read_dataset(path)?);
        let count = dataset.len();
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = dataset;
        info!("Reloaded {} records from {}", count, path.display());
        Ok(count)
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// True when no record is loaded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when at least one record is loaded.
    pub fn is_loaded(&self) -> bool {
        !self.is_empty()
    }
}
