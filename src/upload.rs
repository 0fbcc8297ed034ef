use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use tracing::{debug, info, warn};

use crate::error::SyncError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const EARTHENGINE: &str = "earthengine";
const AUTH_CHECK_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external programs. The upload stage only ever talks to this trait.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, SyncError>;
    fn locate(&self, program: &str) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, SyncError> {
        debug!(command = %spec.command_line(), "spawning");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SyncError::CommandFailed {
                program: spec.program.clone(),
                status: -1,
                stderr: err.to_string(),
            })?;

        // Pipes are drained on their own threads while the child is polled.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + spec.timeout;
        let status = loop {
            let polled = child
                .try_wait()
                .map_err(|err| SyncError::Filesystem(err.to_string()))?;
            if let Some(status) = polled {
                break status;
            }
            if Instant::now() >= deadline {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SyncError::CommandTimeout {
                    program: spec.program.clone(),
                    seconds: spec.timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A grandchild may keep the pipes open after the child exits.
        Ok(CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: stdout
                .map(|pipe| join_output(pipe, deadline))
                .unwrap_or_default(),
            stderr: stderr
                .map(|pipe| join_output(pipe, deadline))
                .unwrap_or_default(),
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        find_in_path(program)
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        let _ = pipe.read_to_end(&mut buffer);
        let _ = tx.send(String::from_utf8_lossy(&buffer).into_owned());
    });
    rx
}

fn join_output(pipe: Receiver<String>, deadline: Instant) -> String {
    let wait = deadline
        .saturating_duration_since(Instant::now())
        .max(POLL_INTERVAL);
    pipe.recv_timeout(wait).unwrap_or_else(|_| {
        warn!("output pipe still open after the command exited, dropping it");
        String::new()
    })
}

pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.is_file() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.is_file() {
            return Some(plain);
        }
    }
    None
}

/// Publishing side of a run: builds a metadata table for a folder and pushes
/// the folder into the remote catalog.
pub trait CatalogUploader: Send + Sync {
    fn check_ready(&self) -> Result<(), SyncError>;
    fn generate_metadata(&self, folder: &Utf8Path, metadata_path: &Utf8Path)
    -> Result<(), SyncError>;
    fn upload(
        &self,
        folder: &Utf8Path,
        destination: &str,
        metadata_path: &Utf8Path,
        user: &str,
    ) -> Result<(), SyncError>;
}

pub struct GeeupUploader<R> {
    runner: R,
    program: String,
    project: Option<String>,
    timeout: Duration,
}

impl<R: CommandRunner> GeeupUploader<R> {
    pub fn new(runner: R, timeout: Duration) -> Self {
        Self {
            runner,
            program: "geeup".to_string(),
            project: None,
            timeout,
        }
    }

    /// Earth Engine project whose credentials `check_ready` verifies.
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    fn check_credentials(&self, project: &str) -> Result<(), SyncError> {
        self.runner
            .locate(EARTHENGINE)
            .ok_or_else(|| SyncError::MissingTool(EARTHENGINE.to_string()))?;
        let spec = CommandSpec::new(EARTHENGINE, self.timeout.min(AUTH_CHECK_TIMEOUT))
            .arg("--project")
            .arg(project)
            .arg("ls")
            .arg(format!("projects/{project}/assets"));
        let output = self.runner.run(&spec)?;
        if output.success() {
            info!(project, "Earth Engine credentials accepted");
            return Ok(());
        }
        let detail = match output.stderr.trim() {
            "" => output.stdout.trim(),
            stderr => stderr,
        };
        Err(SyncError::AuthenticationFailed(format!(
            "Earth Engine project {project}: {detail}"
        )))
    }

    fn execute(&self, spec: CommandSpec) -> Result<CommandOutput, SyncError> {
        let output = self.runner.run(&spec)?;
        if output.success() {
            return Ok(output);
        }
        let stderr = output.stderr.trim();
        Err(SyncError::CommandFailed {
            program: spec.command_line(),
            status: output.status,
            stderr: if stderr.is_empty() {
                output.stdout.trim().to_string()
            } else {
                stderr.to_string()
            },
        })
    }
}

impl<R: CommandRunner> CatalogUploader for GeeupUploader<R> {
    fn check_ready(&self) -> Result<(), SyncError> {
        self.runner
            .locate(&self.program)
            .ok_or_else(|| SyncError::MissingTool(self.program.clone()))?;
        match &self.project {
            Some(project) => self.check_credentials(project),
            None => {
                debug!("no Earth Engine project configured, skipping credential check");
                Ok(())
            }
        }
    }

    fn generate_metadata(
        &self,
        folder: &Utf8Path,
        metadata_path: &Utf8Path,
    ) -> Result<(), SyncError> {
        let spec = CommandSpec::new(&self.program, self.timeout)
            .arg("getmeta")
            .arg("--input")
            .arg(folder.as_str())
            .arg("--metadata")
            .arg(metadata_path.as_str());
        self.execute(spec)?;
        info!(%folder, %metadata_path, "metadata table generated");
        Ok(())
    }

    fn upload(
        &self,
        folder: &Utf8Path,
        destination: &str,
        metadata_path: &Utf8Path,
        user: &str,
    ) -> Result<(), SyncError> {
        let spec = CommandSpec::new(&self.program, self.timeout)
            .arg("upload")
            .arg("--source")
            .arg(folder.as_str())
            .arg("--dest")
            .arg(destination)
            .arg("-m")
            .arg(metadata_path.as_str())
            .arg("-u")
            .arg(user);
        let output = self.execute(spec)?;
        let stdout = output.stdout.trim();
        if !stdout.is_empty() {
            debug!(output = stdout, "geeup upload output");
        }
        info!(%folder, destination, "upload submitted");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn shell(script: &str, timeout: Duration) -> CommandSpec {
        CommandSpec::new("sh", timeout).arg("-c").arg(script)
    }

    #[test]
    fn captures_exit_code_and_streams() {
        let output = SystemCommandRunner
            .run(&shell("echo out; echo err >&2; exit 3", Duration::from_secs(10)))
            .unwrap();
        assert_eq!(output.status, 3);
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[test]
    fn kills_on_timeout() {
        let err = SystemCommandRunner
            .run(&shell("sleep 5", Duration::from_millis(300)))
            .unwrap_err();
        assert_matches!(err, SyncError::CommandTimeout { .. });
    }

    #[test]
    fn lingering_grandchild_does_not_block_past_deadline() {
        let started = Instant::now();
        let output = SystemCommandRunner
            .run(&shell("sleep 5 & exit 0", Duration::from_millis(500)))
            .unwrap();
        assert!(output.success());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn locates_shell() {
        assert!(SystemCommandRunner.locate("sh").is_some());
    }
}
