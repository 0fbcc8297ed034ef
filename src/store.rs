use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::FileType;
use crate::error::SyncError;
use crate::metadata::FlatMetadata;

/// Local and remote layout of one run: a download folder per band type, an
/// Earth Engine folder per band type and the metadata table sidecar.
#[derive(Debug, Clone)]
pub struct Store {
    download_base: Utf8PathBuf,
    upload_base: String,
    metadata_path: Utf8PathBuf,
}

impl Store {
    pub fn new(
        download_base: Utf8PathBuf,
        upload_base: impl Into<String>,
        metadata_path: Utf8PathBuf,
    ) -> Self {
        Self {
            download_base,
            upload_base: upload_base.into().trim_end_matches('/').to_string(),
            metadata_path,
        }
    }

    pub fn download_base(&self) -> &Utf8Path {
        &self.download_base
    }

    pub fn metadata_path(&self) -> &Utf8Path {
        &self.metadata_path
    }

    pub fn download_dir(&self, file_type: &FileType) -> Utf8PathBuf {
        self.download_base.join(file_type.type_name())
    }

    pub fn download_dirs(&self, file_types: &[FileType]) -> Vec<(FileType, Utf8PathBuf)> {
        file_types
            .iter()
            .map(|file_type| (file_type.clone(), self.download_dir(file_type)))
            .collect()
    }

    pub fn upload_path(&self, type_name: &str) -> String {
        format!("{}/ecostress_{}", self.upload_base, type_name.to_lowercase())
    }

    pub fn upload_paths(&self, file_types: &[FileType]) -> BTreeMap<String, String> {
        file_types
            .iter()
            .map(|file_type| {
                let name = file_type.type_name().to_string();
                let path = self.upload_path(&name);
                (name, path)
            })
            .collect()
    }

    /// Per-folder copy of the metadata table: `meta.csv` becomes `meta_LST.csv`.
    pub fn folder_metadata_path(&self, folder_name: &str) -> Utf8PathBuf {
        let stem = self
            .metadata_path
            .file_stem()
            .unwrap_or("metadata");
        self.metadata_path
            .with_file_name(format!("{stem}_{folder_name}.csv"))
    }

    pub fn ensure_dir(path: &Utf8Path) -> Result<(), SyncError> {
        fs::create_dir_all(path.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    pub fn file_state(path: &Utf8Path) -> Result<FileState, SyncError> {
        match fs::metadata(path.as_std_path()) {
            Ok(meta) if meta.len() == 0 => Ok(FileState::Empty),
            Ok(meta) => Ok(FileState::Present(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(FileState::Missing),
            Err(err) => Err(SyncError::Filesystem(format!("stat {path}: {err}"))),
        }
    }

    pub fn has_files(dir: &Utf8Path) -> bool {
        fs::read_dir(dir.as_std_path())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Writes through a temporary file in the destination directory and
    /// renames it over `path` only once `write` succeeded.
    pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), SyncError>
    where
        F: FnOnce(&mut fs::File) -> Result<(), SyncError>,
    {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix(".ecosync-")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        write(temp.as_file_mut())?;
        temp.as_file_mut()
            .flush()
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        // The replacement keeps the mode of the file it overwrites.
        if let Ok(existing) = fs::metadata(path.as_std_path()) {
            temp.as_file()
                .set_permissions(existing.permissions())
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        }
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("replace {path}: {}", err.error)))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Missing,
    Empty,
    Present(u64),
}

/// A granule file that is on disk after the download stage, together with the
/// metadata of the granule it belongs to.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub filename: String,
    pub directory: Utf8PathBuf,
    pub file_type: String,
    pub metadata: Arc<FlatMetadata>,
}

pub fn organize_by_type(records: &[DownloadRecord]) -> BTreeMap<String, Vec<DownloadRecord>> {
    let mut by_type = BTreeMap::<String, Vec<DownloadRecord>>::new();
    for record in records {
        by_type
            .entry(record.file_type.clone())
            .or_default()
            .push(record.clone());
    }
    by_type
}
