use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{Action, FileType};
use crate::earthdata::{EarthdataClient, SearchQuery};
use crate::error::SyncError;
use crate::granule::{GranuleRecord, extract_granule_metadata};
use crate::metadata::FlatMetadata;
use crate::store::{DownloadRecord, FileState, Store, organize_by_type};
use crate::table::{ReconcileStats, enhance_metadata_table};
use crate::upload::CatalogUploader;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub errors: usize,
    pub tracked: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DownloadOutcome {
    pub records: Vec<DownloadRecord>,
    pub summary: DownloadSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    NotRequested,
    Skipped { reason: String },
    Failed { reason: String },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FolderStatus {
    Uploaded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderUploadResult {
    pub band: String,
    pub folder: String,
    pub destination: String,
    pub metadata_path: String,
    pub status: FolderStatus,
    pub reconcile: Option<ReconcileStats>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub action: Action,
    pub download_stage: StageStatus,
    pub upload_stage: StageStatus,
    pub granules: usize,
    pub download: Option<DownloadSummary>,
    pub uploads: Vec<FolderUploadResult>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<E: EarthdataClient, U: CatalogUploader> {
    store: Store,
    config: ResolvedConfig,
    earthdata: E,
    uploader: U,
}

impl<E: EarthdataClient, U: CatalogUploader> App<E, U> {
    pub fn new(config: ResolvedConfig, earthdata: E, uploader: U) -> Self {
        let store = Store::new(
            config.download_base.clone(),
            config.gee_upload_base.clone(),
            config.metadata_path.clone(),
        );
        Self {
            store,
            config,
            earthdata,
            uploader,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs the stages `action` asks for. A stage whose side cannot
    /// authenticate is skipped; the run fails only when no requested side is
    /// usable.
    pub fn run(&self, action: Action, sink: &dyn ProgressSink) -> Result<RunReport, SyncError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Authenticate; action={action}"),
            elapsed: None,
        });

        let mut report = RunReport {
            action,
            download_stage: StageStatus::NotRequested,
            upload_stage: StageStatus::NotRequested,
            granules: 0,
            download: None,
            uploads: Vec::new(),
        };

        let download_auth = action.downloads().then(|| self.earthdata.authenticate());
        let upload_auth = action.uploads().then(|| self.uploader.check_ready());

        let mut failures = Vec::new();
        if let Some(Err(err)) = &download_auth {
            warn!(error = %err, "Earthdata authentication failed, skipping download stage");
            failures.push(format!("earthdata: {err}"));
            report.download_stage = StageStatus::Skipped {
                reason: err.to_string(),
            };
        }
        if let Some(Err(err)) = &upload_auth {
            warn!(error = %err, "catalog upload tool unavailable, skipping upload stage");
            failures.push(format!("upload: {err}"));
            report.upload_stage = StageStatus::Skipped {
                reason: err.to_string(),
            };
        }
        let download_ready = matches!(download_auth, Some(Ok(())));
        let upload_ready = matches!(upload_auth, Some(Ok(())));
        if !download_ready && !upload_ready {
            return Err(SyncError::AuthenticationFailed(failures.join("; ")));
        }

        let mut records = Vec::new();
        if download_ready {
            match self.search(sink) {
                Ok(granules) => {
                    report.granules = granules.len();
                    let outcome = self.download(&granules, sink);
                    info!(
                        downloaded = outcome.summary.downloaded,
                        skipped = outcome.summary.skipped,
                        errors = outcome.summary.errors,
                        tracked = outcome.summary.tracked,
                        "download stage finished"
                    );
                    report.download = Some(outcome.summary);
                    report.download_stage = StageStatus::Completed;
                    records = outcome.records;
                }
                Err(err) => {
                    error!(error = %err, "granule search failed");
                    report.download_stage = StageStatus::Failed {
                        reason: err.to_string(),
                    };
                }
            }
        }

        if upload_ready {
            report.uploads = self.upload(&records, sink);
            report.upload_stage = StageStatus::Completed;
        }

        sink.event(ProgressEvent {
            message: "phase=Done".to_string(),
            elapsed: Some(started.elapsed()),
        });
        Ok(report)
    }

    pub fn search(&self, sink: &dyn ProgressSink) -> Result<Vec<GranuleRecord>, SyncError> {
        let query = SearchQuery {
            short_name: self.config.short_name.clone(),
            tile: Some(self.config.tile.clone()),
            range: self.config.range,
            day_night: self.config.day_night,
        };
        sink.event(ProgressEvent {
            message: format!(
                "phase=Search; {} tile={} {}..{}",
                query.short_name, self.config.tile, query.range.start, query.range.end
            ),
            elapsed: None,
        });
        info!(
            short_name = %query.short_name,
            tile = %self.config.tile,
            start = %query.range.start,
            end = %query.range.end,
            "searching granules"
        );
        self.earthdata.search(&query)
    }

    /// Downloads every data file of `granules` whose name ends with a
    /// configured suffix. Files already on disk with content are kept and
    /// still recorded; zero-byte leftovers are fetched again. Failures are
    /// counted and never stop the stage.
    pub fn download(&self, granules: &[GranuleRecord], sink: &dyn ProgressSink) -> DownloadOutcome {
        let dirs = self.store.download_dirs(&self.config.file_types);
        let mut outcome = DownloadOutcome::default();

        for granule in granules {
            let metadata = Arc::new(extract_granule_metadata(granule));
            for url in granule.data_links() {
                let filename = url.rsplit('/').next().unwrap_or(url.as_str()).to_string();
                let Some((file_type, dir)) = dirs.iter().find(|(ft, _)| ft.matches(&filename))
                else {
                    debug!(file = %filename, "skipping unrelated file");
                    continue;
                };
                let target = dir.join(&filename);

                match Store::file_state(&target) {
                    Ok(FileState::Present(size)) => {
                        info!(file = %filename, bytes = size, "already present, skipping");
                        outcome.records.push(record(&filename, dir, file_type, &metadata));
                        outcome.summary.skipped += 1;
                        continue;
                    }
                    Ok(FileState::Empty) => {
                        warn!(file = %filename, "zero-byte file, downloading again");
                        if let Err(err) = fs::remove_file(target.as_std_path()) {
                            error!(file = %filename, error = %err, "cannot remove zero-byte file");
                            outcome.summary.errors += 1;
                            continue;
                        }
                    }
                    Ok(FileState::Missing) => {}
                    Err(err) => {
                        error!(file = %filename, error = %err, "cannot inspect target file");
                        outcome.summary.errors += 1;
                        continue;
                    }
                }

                sink.event(ProgressEvent {
                    message: format!("download {filename}"),
                    elapsed: None,
                });
                let started = Instant::now();
                match self.fetch_file(&url, dir, &target) {
                    Ok(bytes) => {
                        info!(file = %filename, bytes, "downloaded");
                        sink.event(ProgressEvent {
                            message: format!("downloaded {filename} bytes={bytes}"),
                            elapsed: Some(started.elapsed()),
                        });
                        outcome.records.push(record(&filename, dir, file_type, &metadata));
                        outcome.summary.downloaded += 1;
                    }
                    Err(err) => {
                        error!(file = %filename, error = %err, "download failed");
                        outcome.summary.errors += 1;
                    }
                }
            }
        }

        outcome.summary.tracked = outcome.records.len();
        outcome
    }

    /// Uploads every non-empty download folder. Each folder gets its own
    /// metadata table, reconciled against `records` of the same band.
    pub fn upload(
        &self,
        records: &[DownloadRecord],
        sink: &dyn ProgressSink,
    ) -> Vec<FolderUploadResult> {
        let by_type = organize_by_type(records);
        let mut results = Vec::new();

        for (file_type, folder) in self.store.download_dirs(&self.config.file_types) {
            if !Store::has_files(&folder) {
                debug!(%folder, "folder missing or empty, nothing to upload");
                continue;
            }
            let band = file_type.type_name().to_string();
            sink.event(ProgressEvent {
                message: format!("phase=Upload; {folder} -> {}", self.store.upload_path(&band)),
                elapsed: None,
            });
            let result = self.upload_folder(&band, &folder, &by_type);
            match result.status {
                FolderStatus::Uploaded => info!(band = %band, destination = %result.destination, "folder uploaded"),
                FolderStatus::Failed => error!(
                    band = %band,
                    error = result.error.as_deref().unwrap_or_default(),
                    "folder upload failed"
                ),
            }
            results.push(result);
        }

        results
    }

    fn upload_folder(
        &self,
        band: &str,
        folder: &Utf8Path,
        by_type: &BTreeMap<String, Vec<DownloadRecord>>,
    ) -> FolderUploadResult {
        let destination = self.store.upload_path(band);
        let folder_name = folder.file_name().unwrap_or(band);
        let metadata_path = self.store.folder_metadata_path(folder_name);
        let mut result = FolderUploadResult {
            band: band.to_string(),
            folder: folder.to_string(),
            destination: destination.clone(),
            metadata_path: metadata_path.to_string(),
            status: FolderStatus::Failed,
            reconcile: None,
            error: None,
        };

        if let Err(err) = self.uploader.generate_metadata(folder, &metadata_path) {
            result.error = Some(err.to_string());
            return result;
        }

        let folders = [(folder_name.to_string(), folder.to_path_buf())];
        let band_records = by_type.get(band).map(Vec::as_slice).unwrap_or_default();
        match enhance_metadata_table(&metadata_path, &folders, band_records) {
            Ok(stats) => result.reconcile = Some(stats),
            Err(err) => warn!(%metadata_path, error = %err, "metadata enhancement failed, uploading anyway"),
        }

        match self
            .uploader
            .upload(folder, &destination, &metadata_path, &self.config.gee_user)
        {
            Ok(()) => result.status = FolderStatus::Uploaded,
            Err(err) => result.error = Some(err.to_string()),
        }
        result
    }

    fn fetch_file(&self, url: &str, dir: &Utf8Path, target: &Utf8Path) -> Result<u64, SyncError> {
        Store::ensure_dir(dir)?;
        let bytes = self.earthdata.download(url, target.as_std_path())?;
        match Store::file_state(target)? {
            FileState::Present(_) => Ok(bytes),
            _ => Err(SyncError::DownloadVerification(target.to_string())),
        }
    }
}

fn record(
    filename: &str,
    dir: &Utf8Path,
    file_type: &FileType,
    metadata: &Arc<FlatMetadata>,
) -> DownloadRecord {
    DownloadRecord {
        filename: filename.to_string(),
        directory: dir.to_path_buf(),
        file_type: file_type.type_name().to_string(),
        metadata: Arc::clone(metadata),
    }
}
