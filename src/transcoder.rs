use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
};

use async_trait::async_trait;
use tokio::{
    process::Command,
    sync::OnceCell,
    time::{Duration, timeout},
};
use tracing::{debug, info, warn};

use crate::error::PipelineError;

const VERSION_CHECK_TIMEOUT_SECONDS: u64 = 10;
const CONVERSION_TIMEOUT_SECONDS: u64 = 300;
const DIAGNOSTIC_LINES: usize = 20;

const COMMAND_NAMES: &[&str] = &["ffmpeg", "ffmpeg.exe"];
const KNOWN_PATHS: &[&str] = &[
    "/usr/bin/ffmpeg",
    "/usr/local/bin/ffmpeg",
    "/opt/homebrew/bin/ffmpeg",
    "/opt/local/bin/ffmpeg",
    r"C:\ffmpeg\bin\ffmpeg.exe",
    r"C:\Program Files\ffmpeg\bin\ffmpeg.exe",
];

#[async_trait]
pub trait Transcoder: Send + Sync {
    // Ok only means the process exited cleanly; callers check `output` themselves.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), PipelineError>;
}

pub struct FfmpegTranscoder {
    command_names: Vec<String>,
    known_paths: Vec<PathBuf>,
    binary: OnceCell<PathBuf>,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::with_candidates(
            COMMAND_NAMES.iter().map(ToString::to_string).collect(),
            KNOWN_PATHS.iter().map(PathBuf::from).collect(),
        )
    }
}

impl FfmpegTranscoder {
    pub fn with_candidates(command_names: Vec<String>, known_paths: Vec<PathBuf>) -> Self {
        Self {
            command_names,
            known_paths,
            binary: OnceCell::new(),
        }
    }

    // Only a successful lookup is cached.
    pub async fn locate(&self) -> Result<&Path, PipelineError> {
        self.binary
            .get_or_try_init(|| async {
                for candidate in self.candidates().await {
                    if answers_version_query(&candidate).await {
                        info!("Using transcoder at {candidate:?}");
                        return Ok(candidate);
                    }
                }
                warn!(
                    "No transcoder found; tried {:?} and {:?}",
                    self.command_names, self.known_paths
                );
                Err(PipelineError::TranscoderNotFound)
            })
            .await
            .map(PathBuf::as_path)
    }

    async fn candidates(&self) -> Vec<PathBuf> {
        let command_names = self.command_names.clone();
        let known_paths = self.known_paths.clone();

        let search = tokio::task::spawn_blocking(move || {
            let from_path = command_names
                .iter()
                .filter_map(|name| which::which(name).ok());
            let installed = known_paths.into_iter().filter(|path| path.is_file());

            let mut candidates: Vec<PathBuf> = Vec::new();
            for candidate in from_path.chain(installed) {
                if !candidates.contains(&candidate) {
                    candidates.push(candidate);
                }
            }
            candidates
        });

        match search.await {
            Ok(candidates) => candidates,
            Err(error) => {
                warn!("Transcoder search task failed: {error}");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), PipelineError> {
        let binary = self.locate().await?;
        run_conversion(
            binary,
            input,
            output,
            Duration::from_secs(CONVERSION_TIMEOUT_SECONDS),
        )
        .await
    }
}

async fn answers_version_query(binary: &Path) -> bool {
    let status = Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match timeout(Duration::from_secs(VERSION_CHECK_TIMEOUT_SECONDS), status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(error)) => {
            debug!("Version check of {binary:?} failed: {error}");
            false
        }
        Err(_) => {
            debug!("Version check of {binary:?} timed out");
            false
        }
    }
}

fn conversion_args(input: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    args.extend(
        [
            "-vn",
            "-acodec",
            "libmp3lame",
            "-b:a",
            "192k",
            "-ac",
            "2",
            "-ar",
            "44100",
            "-y",
        ]
        .map(OsString::from),
    );
    args.push(output.into());
    args
}

async fn run_conversion(
    binary: &Path,
    input: &Path,
    output: &Path,
    limit: Duration,
) -> Result<(), PipelineError> {
    info!("Converting {input:?} to {output:?}");

    let command_future = Command::new(binary)
        .args(conversion_args(input, output))
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let result = timeout(limit, command_future)
        .await
        .map_err(|_| PipelineError::ConversionFailed {
            reason: format!("timed out after {limit:?}"),
            diagnostics: String::new(),
        })?
        .map_err(|error| PipelineError::ConversionFailed {
            reason: format!("could not launch {binary:?}"),
            diagnostics: error.to_string(),
        })?;

    if !result.status.success() {
        return Err(PipelineError::ConversionFailed {
            reason: format!("transcoder exited with {}", result.status),
            diagnostics: stderr_tail(&result.stderr),
        });
    }

    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..].join("\n")
}
