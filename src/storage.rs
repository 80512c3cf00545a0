use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};

use crate::constants::DUCKDB_FILE_NAME;
use crate::store::DuckDbStore;

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub data_dir: PathBuf,
    pub duckdb_path: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let duckdb_path = data_dir.join(DUCKDB_FILE_NAME);
        Self {
            data_dir,
            duckdb_path,
        }
    }

    /// Opens the database, which must already hold data.
    pub fn open_store(&self) -> anyhow::Result<DuckDbStore> {
        if !file_present_nonempty(&self.duckdb_path) {
            return Err(anyhow!(
                "DuckDB not found at {}. Run: practitioner-pipeline import --input <file>",
                self.duckdb_path.display()
            ));
        }
        DuckDbStore::open(&self.duckdb_path)
    }

    /// Opens the database, creating the data directory and schema if needed.
    pub fn open_or_create_store(&self) -> anyhow::Result<DuckDbStore> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!("Failed creating data directory {}", self.data_dir.display())
        })?;
        DuckDbStore::open(&self.duckdb_path)
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}
