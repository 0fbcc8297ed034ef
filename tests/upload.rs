use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use ecostress_sync::app::{App, StageStatus};
use ecostress_sync::config::ResolvedConfig;
use ecostress_sync::domain::{Action, DateRange, DayNight, default_file_types};
use ecostress_sync::earthdata::{EarthdataClient, SearchQuery};
use ecostress_sync::error::SyncError;
use ecostress_sync::granule::GranuleRecord;
use ecostress_sync::output::JsonOutput;
use ecostress_sync::upload::{
    CatalogUploader, CommandOutput, CommandRunner, CommandSpec, GeeupUploader,
};

struct RecordingRunner {
    installed: bool,
    status: i32,
    stderr: &'static str,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RecordingRunner {
    fn new(status: i32, stderr: &'static str) -> Self {
        Self {
            installed: true,
            status,
            stderr,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, SyncError> {
        self.calls.lock().unwrap().push(spec.clone());
        Ok(CommandOutput {
            status: self.status,
            stdout: String::new(),
            stderr: self.stderr.to_string(),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.installed
            .then(|| PathBuf::from("/usr/local/bin").join(program))
    }
}

impl CommandRunner for &RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, SyncError> {
        (**self).run(spec)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        (**self).locate(program)
    }
}

#[test]
fn getmeta_arguments() {
    let runner = RecordingRunner::new(0, "");
    let uploader = GeeupUploader::new(&runner, Duration::from_secs(5));

    uploader
        .generate_metadata(
            Utf8Path::new("/data/ecostress/LST"),
            Utf8Path::new("/data/meta_LST.csv"),
        )
        .unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].program, "geeup");
    assert_eq!(
        calls[0].args,
        vec!["getmeta", "--input", "/data/ecostress/LST", "--metadata", "/data/meta_LST.csv"]
    );
    assert_eq!(calls[0].timeout, Duration::from_secs(5));
}

#[test]
fn upload_arguments() {
    let runner = RecordingRunner::new(0, "");
    let uploader = GeeupUploader::new(&runner, Duration::from_secs(5));

    uploader
        .upload(
            Utf8Path::new("/data/ecostress/LST"),
            "projects/demo/Ecostress/ecostress_lst",
            Utf8Path::new("/data/meta_LST.csv"),
            "user@example.com",
        )
        .unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(
        calls[0].command_line(),
        "geeup upload --source /data/ecostress/LST --dest projects/demo/Ecostress/ecostress_lst \
         -m /data/meta_LST.csv -u user@example.com"
    );
}

#[test]
fn non_zero_exit_carries_stderr() {
    let runner = RecordingRunner::new(2, "quota exceeded\n");
    let uploader = GeeupUploader::new(&runner, Duration::from_secs(5));

    let err = uploader
        .generate_metadata(Utf8Path::new("/data/LST"), Utf8Path::new("/data/m.csv"))
        .unwrap_err();
    assert_matches!(
        err,
        SyncError::CommandFailed { status: 2, ref stderr, .. } if stderr == "quota exceeded"
    );
}

#[test]
fn readiness_requires_tool_on_path() {
    let mut runner = RecordingRunner::new(0, "");
    assert!(GeeupUploader::new(&runner, Duration::from_secs(1)).check_ready().is_ok());

    runner.installed = false;
    let err = GeeupUploader::new(&runner, Duration::from_secs(1))
        .check_ready()
        .unwrap_err();
    assert_matches!(err, SyncError::MissingTool(tool) if tool == "geeup");
}

#[test]
fn readiness_checks_project_credentials() {
    let runner = RecordingRunner::new(0, "");
    GeeupUploader::new(&runner, Duration::from_secs(600))
        .with_project(Some("ee-demo".to_string()))
        .check_ready()
        .unwrap();

    let calls = runner.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].command_line(),
        "earthengine --project ee-demo ls projects/ee-demo/assets"
    );
    assert_eq!(calls[0].timeout, Duration::from_secs(120));
}

#[test]
fn rejected_credentials_are_an_authentication_failure() {
    let runner = RecordingRunner::new(1, "Earth Engine client library not initialized\n");
    let err = GeeupUploader::new(&runner, Duration::from_secs(5))
        .with_project(Some("ee-demo".to_string()))
        .check_ready()
        .unwrap_err();
    assert_matches!(
        err,
        SyncError::AuthenticationFailed(message) if message.contains("not initialized")
    );
}

struct NoGranules;

impl EarthdataClient for NoGranules {
    fn authenticate(&self) -> Result<(), SyncError> {
        Ok(())
    }

    fn search(&self, _query: &SearchQuery) -> Result<Vec<GranuleRecord>, SyncError> {
        Ok(Vec::new())
    }

    fn download(&self, url: &str, _destination: &Path) -> Result<u64, SyncError> {
        panic!("unexpected download of {url}");
    }
}

#[test]
fn run_skips_upload_stage_when_credentials_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let config = ResolvedConfig {
        schema_version: 1,
        tile: "18TUN".parse().unwrap(),
        range: DateRange::parse("2025-01-01", "2025-01-31").unwrap(),
        day_night: DayNight::Day,
        file_types: default_file_types(),
        download_base: root.join("ecostress"),
        metadata_path: root.join("metadata_ecostress.csv"),
        gee_upload_base: "projects/ee-demo/Ecostress".to_string(),
        gee_project: Some("ee-demo".to_string()),
        gee_user: "user@example.com".to_string(),
        action: Action::Both,
        short_name: "ECO_L2T_LSTE".to_string(),
        command_timeout: Duration::from_secs(60),
        log_file: None,
    };
    let runner = RecordingRunner::new(1, "permission denied");
    let uploader =
        GeeupUploader::new(&runner, config.command_timeout).with_project(config.gee_project.clone());
    let app = App::new(config, NoGranules, uploader);

    let report = app.run(Action::Both, &JsonOutput).unwrap();

    assert_eq!(report.download_stage, StageStatus::Completed);
    assert_matches!(
        report.upload_stage,
        StageStatus::Skipped { ref reason } if reason.contains("permission denied")
    );
    assert!(report.uploads.is_empty());
    assert_eq!(runner.calls.lock().unwrap().len(), 1);
}
