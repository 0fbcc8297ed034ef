//! The per-folder metadata table that accompanies an Earth Engine upload.
//!
//! Rows are created by `geeup getmeta` and identified by `id_no`, which is a
//! substring of the uploaded file name. Reconciliation adds the canonical
//! granule columns, resets them, and fills them again from this run's download
//! records (or from a scan of the output folders when there are none).
//!
//! Every row is stored aligned to the header, so all rows always carry the
//! same columns. Each step returns a new table; the file on disk is replaced
//! atomically once the whole table has been serialized.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::filename::tile_from_filename;
use crate::granule::timestamp_millis;
use crate::metadata::{Field, FlatMetadata, TABLE_COLUMNS};
use crate::mgrs::epsg_from_mgrs;
use crate::store::{DownloadRecord, Store};

pub const JOIN_COLUMN: &str = "id_no";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub rows: usize,
    pub matched_rows: usize,
    pub matched_sources: usize,
    pub unmatched_sources: usize,
}

impl MetadataTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, SyncError> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != headers.len())
        {
            return Err(SyncError::MetadataTable(format!(
                "row {} has {} values, header has {}",
                index + 1,
                row.len(),
                headers.len()
            )));
        }
        Ok(Self { headers, rows })
    }

    pub fn load(path: &Utf8Path) -> Result<Self, SyncError> {
        if !path.as_std_path().exists() {
            return Err(SyncError::MetadataTableMissing(path.as_std_path().to_path_buf()));
        }
        let file = fs::File::open(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("open {path}: {err}")))?;
        Self::from_reader(file)
    }

    /// Short rows are padded with empty values; rows longer than the header
    /// are rejected.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SyncError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = csv_reader
            .headers()?
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for (index, record) in csv_reader.records().enumerate() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(SyncError::MetadataTable(format!(
                    "row {} has {} values, header has {}",
                    index + 1,
                    record.len(),
                    headers.len()
                )));
            }
            let mut row = record.iter().map(|value| value.to_string()).collect::<Vec<_>>();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        let table = Self { headers, rows };
        table.column_index(JOIN_COLUMN)?;
        Ok(table)
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let index = self.headers.iter().position(|header| header == column)?;
        self.rows.get(row).map(|values| values[index].as_str())
    }

    /// Appends missing canonical columns and blanks every canonical cell.
    /// Values from earlier runs are dropped, not accumulated.
    pub fn with_vocabulary(&self) -> MetadataTable {
        let mut headers = self.headers.clone();
        for column in TABLE_COLUMNS {
            if !headers.iter().any(|header| header == column) {
                headers.push(column.to_string());
            }
        }
        let vocabulary = headers
            .iter()
            .map(|header| TABLE_COLUMNS.contains(&header.as_str()))
            .collect::<Vec<_>>();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut next = row.clone();
                next.resize(headers.len(), String::new());
                for (cell, reset) in next.iter_mut().zip(&vocabulary) {
                    if *reset {
                        cell.clear();
                    }
                }
                next
            })
            .collect();

        MetadataTable { headers, rows }
    }

    /// Merges each record's granule metadata into every row whose `id_no`
    /// occurs in the record's file name.
    pub fn apply_download_records(
        &self,
        records: &[DownloadRecord],
    ) -> Result<(MetadataTable, ReconcileStats), SyncError> {
        let id_index = self.column_index(JOIN_COLUMN)?;
        let columns = self.column_lookup();
        let mut next = self.clone();
        let mut matched_rows = BTreeSet::new();
        let mut stats = ReconcileStats {
            rows: self.rows.len(),
            ..ReconcileStats::default()
        };

        for record in records {
            let mut matched = false;
            for (index, row) in next.rows.iter_mut().enumerate() {
                if !joins(&row[id_index], &record.filename) {
                    continue;
                }
                merge_record(row, &columns, record);
                matched_rows.insert(index);
                matched = true;
            }
            if matched {
                stats.matched_sources += 1;
            } else {
                debug!(file = %record.filename, "no metadata row for downloaded file");
                stats.unmatched_sources += 1;
            }
        }

        stats.matched_rows = matched_rows.len();
        Ok((next, stats))
    }

    /// Fallback when no download records exist: sets only `band_type`,
    /// `mgrs_tile` and `EPSG` from the `.tif` files found in each folder.
    pub fn apply_directory_scan(
        &self,
        folders: &[(String, Utf8PathBuf)],
    ) -> Result<(MetadataTable, ReconcileStats), SyncError> {
        let id_index = self.column_index(JOIN_COLUMN)?;
        let columns = self.column_lookup();
        let mut next = self.clone();
        let mut matched_rows = BTreeSet::new();
        let mut stats = ReconcileStats {
            rows: self.rows.len(),
            ..ReconcileStats::default()
        };

        for (band, folder) in folders {
            let band_type = band.replace(".tif", "");
            for filename in list_tif_files(folder)? {
                let tile = tile_from_filename(&filename);
                let mut matched = false;
                for (index, row) in next.rows.iter_mut().enumerate() {
                    if !joins(&row[id_index], &filename) {
                        continue;
                    }
                    set_cell(row, &columns, Field::BandType.column(), band_type.clone());
                    if let Some(tile) = &tile {
                        set_cell(row, &columns, Field::MgrsTile.column(), tile.clone());
                        let epsg = epsg_from_mgrs(tile);
                        if !epsg.is_empty() {
                            set_cell(row, &columns, Field::Epsg.column(), epsg);
                        }
                    }
                    matched_rows.insert(index);
                    matched = true;
                }
                if matched {
                    stats.matched_sources += 1;
                } else {
                    stats.unmatched_sources += 1;
                }
            }
        }

        stats.matched_rows = matched_rows.len();
        Ok((next, stats))
    }

    pub fn write_to<W: Write>(&self, writer: W) -> Result<(), SyncError> {
        let mut csv_writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::CRLF)
            .from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer
            .flush()
            .map_err(|err| SyncError::MetadataTable(err.to_string()))
    }

    /// Replaces `path` atomically; on failure the previous file is untouched.
    pub fn persist(&self, path: &Utf8Path) -> Result<(), SyncError> {
        Store::write_atomic(path, |file| self.write_to(file))
    }

    fn column_index(&self, column: &str) -> Result<usize, SyncError> {
        self.headers
            .iter()
            .position(|header| header == column)
            .ok_or_else(|| SyncError::MissingJoinColumn(column.to_string()))
    }

    fn column_lookup(&self) -> HashMap<String, usize> {
        self.headers
            .iter()
            .enumerate()
            .map(|(index, header)| (header.clone(), index))
            .collect()
    }
}

/// Loads the table at `path`, resets the canonical columns, fills them from
/// `records` (or from `folders` when `records` is empty) and writes it back.
pub fn enhance_metadata_table(
    path: &Utf8Path,
    folders: &[(String, Utf8PathBuf)],
    records: &[DownloadRecord],
) -> Result<ReconcileStats, SyncError> {
    info!(%path, "enhancing metadata table");
    let table = MetadataTable::load(path)?.with_vocabulary();
    let (table, stats) = if records.is_empty() {
        table.apply_directory_scan(folders)?
    } else {
        table.apply_download_records(records)?
    };
    table.persist(path)?;
    info!(
        %path,
        rows = stats.rows,
        matched_rows = stats.matched_rows,
        unmatched = stats.unmatched_sources,
        "metadata table saved"
    );
    Ok(stats)
}

// An empty id would match every file name.
fn joins(id: &str, filename: &str) -> bool {
    !id.is_empty() && filename.contains(id)
}

fn set_cell(row: &mut [String], columns: &HashMap<String, usize>, column: &str, value: String) {
    if let Some(&index) = columns.get(column) {
        row[index] = value;
    }
}

fn merge_record(row: &mut [String], columns: &HashMap<String, usize>, record: &DownloadRecord) {
    let metadata = record.metadata.as_ref();
    merge_system_time(row, columns, metadata);
    set_cell(row, columns, Field::BandType.column(), record.file_type.clone());

    for (column, value) in metadata.columns() {
        set_cell(row, columns, &column, value.to_cell());
    }

    if let Some(tile) = metadata.text(Field::MgrsTile).filter(|tile| !tile.is_empty()) {
        let epsg = epsg_from_mgrs(tile);
        if !epsg.is_empty() {
            set_cell(row, columns, Field::Epsg.column(), epsg);
        }
    }
}

fn merge_system_time(row: &mut [String], columns: &HashMap<String, usize>, metadata: &FlatMetadata) {
    if let Some(start) = metadata.get(Field::TimeStart).filter(|value| !value.is_empty()) {
        set_cell(row, columns, Field::SystemTimeStart.column(), start.to_cell());
        set_cell(row, columns, Field::SystemTimeEnd.column(), start.to_cell());
        return;
    }

    let Some(beginning) = metadata
        .text(Field::BeginningDateTime)
        .filter(|value| !value.is_empty())
    else {
        return;
    };
    let Some(start) = timestamp_millis(beginning) else {
        warn!(value = beginning, "failed to parse beginning_date_time");
        return;
    };
    set_cell(row, columns, Field::SystemTimeStart.column(), start.to_string());

    match metadata
        .text(Field::EndingDateTime)
        .filter(|value| !value.is_empty())
    {
        Some(ending) => match timestamp_millis(ending) {
            Some(end) => set_cell(row, columns, Field::SystemTimeEnd.column(), end.to_string()),
            None => warn!(value = ending, "failed to parse ending_date_time"),
        },
        None => set_cell(row, columns, Field::SystemTimeEnd.column(), start.to_string()),
    }
}

fn list_tif_files(folder: &Utf8Path) -> Result<Vec<String>, SyncError> {
    let entries = match fs::read_dir(folder.as_std_path()) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(%folder, "folder does not exist, skipping");
            return Ok(Vec::new());
        }
        Err(err) => return Err(SyncError::Filesystem(format!("read {folder}: {err}"))),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| SyncError::Filesystem(err.to_string()))?;
        if let Some(name) = entry.file_name().to_str() {
            if name.ends_with(".tif") {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}
