use std::io::{self, Write};

use serde::Serialize;

use crate::app::{FolderStatus, ProgressEvent, ProgressSink, RunReport, StageStatus};
use crate::filename::FilenameFields;
use crate::table::ReconcileStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_reconcile(stats: &ReconcileStats) -> io::Result<()> {
        Self::print_json(stats)
    }

    pub fn print_fields(fields: &FilenameFields) -> io::Result<()> {
        Self::print_json(fields)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Progress lines on stderr, so stdout stays reserved for the summary.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_run_summary(report: &RunReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}ECOSTRESS sync summary ({}){reset}", report.action);
    print_stage("download", &report.download_stage);
    if let Some(summary) = &report.download {
        println!("  granules found:    {}", report.granules);
        println!("{green}  new downloads:     {}{reset}", summary.downloaded);
        println!("  skipped (present): {}", summary.skipped);
        let color = if summary.errors > 0 { red } else { reset };
        println!("{color}  errors:            {}{reset}", summary.errors);
        println!("  files tracked:     {}", summary.tracked);
    }

    print_stage("upload", &report.upload_stage);
    for upload in &report.uploads {
        match upload.status {
            FolderStatus::Uploaded => {
                println!("{green}  {} -> {}{reset}", upload.band, upload.destination);
                if let Some(stats) = &upload.reconcile {
                    println!(
                        "    rows {} matched {} unmatched files {}",
                        stats.rows, stats.matched_rows, stats.unmatched_sources
                    );
                } else {
                    println!("{yellow}    metadata table not enhanced{reset}");
                }
            }
            FolderStatus::Failed => println!(
                "{red}  {} failed: {}{reset}",
                upload.band,
                upload.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

fn print_stage(name: &str, status: &StageStatus) {
    let yellow = "\x1b[33m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";
    match status {
        StageStatus::NotRequested => {}
        StageStatus::Completed => println!("{name}: completed"),
        StageStatus::Skipped { reason } => println!("{yellow}{name}: skipped ({reason}){reset}"),
        StageStatus::Failed { reason } => println!("{red}{name}: failed ({reason}){reset}"),
    }
}
