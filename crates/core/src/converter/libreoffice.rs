//! LibreOffice-based converter implementation.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::config::ConverterConfig;
use super::error::ConverterError;
use super::traits::Converter;
use super::types::{ConversionJob, ConversionResult};

/// How long to keep draining stderr after the process has exited. Helper
/// processes may inherit the pipe and keep it open.
const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Stderr kept on a failed conversion.
const STDERR_LIMIT: usize = 4096;

/// Runs a headless LibreOffice (or compatible) binary per conversion.
pub struct LibreOfficeConverter {
    config: ConverterConfig,
}

impl LibreOfficeConverter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConverterConfig::default())
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Builds the argument list:
    /// `<launcher..> --headless -env:UserInstallation=file://<profile> <extra..>
    /// --convert-to <format> <input> --outdir <output_dir>`.
    fn build_args(&self, job: &ConversionJob) -> Vec<OsString> {
        let profile =
            std::path::absolute(&job.profile_dir).unwrap_or_else(|_| job.profile_dir.clone());

        let mut args: Vec<OsString> = self.config.launcher_args.iter().map(OsString::from).collect();
        args.push("--headless".into());

        let mut profile_arg = OsString::from("-env:UserInstallation=file://");
        profile_arg.push(profile.as_os_str());
        args.push(profile_arg);

        args.extend(self.config.extra_args.iter().map(OsString::from));
        args.push("--convert-to".into());
        args.push(self.config.target_format.as_str().into());
        args.push(job.input_path.as_os_str().to_os_string());
        args.push("--outdir".into());
        args.push(job.output_dir.as_os_str().to_os_string());
        args
    }

    fn launch_error(&self, e: std::io::Error) -> ConverterError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConverterError::BinaryNotFound {
                path: self.config.binary.clone(),
            }
        } else {
            ConverterError::Launch(e)
        }
    }

    async fn run_conversion(&self, job: &ConversionJob) -> Result<ConversionResult, ConverterError> {
        let start = Instant::now();

        if !tokio::fs::try_exists(&job.input_path).await.unwrap_or(false) {
            return Err(ConverterError::InputNotFound {
                path: job.input_path.clone(),
            });
        }
        tokio::fs::create_dir_all(&job.output_dir).await?;
        tokio::fs::create_dir_all(&job.profile_dir).await?;

        let home: &Path = self.config.home_dir.as_deref().unwrap_or(&job.profile_dir);
        let args = self.build_args(job);
        debug!(
            job_id = %job.job_id,
            unit_id = job.unit_id,
            binary = %self.config.binary.display(),
            ?args,
            "Starting converter"
        );

        let mut command = std::process::Command::new(&self.config.binary);
        command
            .args(&args)
            .env("HOME", home)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        // The office launcher forks the real converter; a group of its own
        // lets the whole tree be killed at once.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = Command::from(command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.launch_error(e))?;
        let mut group = ProcessGroup::new(child.id());

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let waited = timeout(job.timeout, child.wait()).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                group.kill();
                // kill() also reaps the launcher itself.
                if let Err(e) = child.kill().await {
                    warn!(job_id = %job.job_id, unit_id = job.unit_id, error = %e, "Failed to kill timed out converter");
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                return Err(ConverterError::Timeout {
                    timeout: job.timeout,
                });
            }
        };
        // Helpers left behind by the launcher would keep the profile busy.
        group.kill();

        if !status.success() {
            let stderr = match stderr_task {
                Some(task) => match timeout(STDERR_GRACE, task).await {
                    Ok(Ok(buf)) => Some(truncate_stderr(&buf)),
                    _ => None,
                },
                None => None,
            };
            return Err(ConverterError::ConversionFailed {
                exit_code: status.code(),
                stderr: stderr.filter(|s| !s.is_empty()),
            });
        }
        if let Some(task) = stderr_task {
            task.abort();
        }

        let output_path = job.expected_output(&self.config.target_format);
        let output_meta = match tokio::fs::metadata(&output_path).await {
            Ok(meta) if meta.is_file() => meta,
            _ => return Err(ConverterError::OutputMissing { path: output_path }),
        };

        Ok(ConversionResult {
            job_id: job.job_id.clone(),
            unit_id: job.unit_id,
            output_path,
            output_size_bytes: output_meta.len(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// The process group of one converter run. Dropping it kills whatever is
/// still in the group, so a cancelled conversion leaves nothing running.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn new(pgid: Option<u32>) -> Self {
        Self { pgid }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pgid, error = %e, "Failed to kill converter process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

fn truncate_stderr(buf: &[u8]) -> String {
    let text = String::from_utf8_lossy(buf);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[async_trait]
impl Converter for LibreOfficeConverter {
    fn name(&self) -> &str {
        "libreoffice"
    }

    fn target_format(&self) -> &str {
        &self.config.target_format
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        self.run_conversion(&job).await
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        let output = timeout(
            Duration::from_secs(30),
            Command::new(&self.config.binary)
                .args(&self.config.launcher_args)
                .arg("--version")
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ConverterError::Timeout {
            timeout: Duration::from_secs(30),
        })?
        .map_err(|e| self.launch_error(e))?;

        if !output.status.success() {
            return Err(ConverterError::ConversionFailed {
                exit_code: output.status.code(),
                stderr: Some(truncate_stderr(&output.stderr)),
            });
        }

        debug!(
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "Converter available"
        );
        Ok(())
    }
}
