use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::{Duration, SystemTime},
};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;

pub const RETENTION_SECONDS: u64 = 60 * 60;
pub const SCRATCH_RETENTION_SECONDS: u64 = 5 * 60;
pub const SCRATCH_PREFIX: &str = "audio-fetch-";

const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const MAX_TITLE_CHARS: usize = 100;
// Leaves room for the extension under the usual 255-byte NAME_MAX.
const MAX_TITLE_BYTES: usize = 200;
const DEFAULT_TITLE: &str = "audio";

pub fn sanitize_title(raw: &str) -> String {
    let mut cleaned: String = raw
        .chars()
        .filter(|character| !INVALID_FILENAME_CHARS.contains(character))
        .take(MAX_TITLE_CHARS)
        .collect();

    if cleaned.len() > MAX_TITLE_BYTES {
        let mut end = MAX_TITLE_BYTES;
        while !cleaned.is_char_boundary(end) {
            end -= 1;
        }
        cleaned.truncate(end);
    }

    if cleaned.trim().is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        cleaned
    }
}

pub fn output_file_name(sanitized_title: &str, extension: &str) -> String {
    format!("{sanitized_title}.{extension}")
}

#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(scratch_dir: &Path, extension: &str) -> Self {
        let extension = if extension.is_empty() { "bin" } else { extension };
        let path = scratch_dir.join(format!("{SCRATCH_PREFIX}{}.{extension}", Uuid::new_v4()));
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed scratch file {:?}", self.path),
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not remove scratch file {:?}: {error}", self.path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Storage {
    download_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl Storage {
    pub fn new(download_dir: PathBuf, scratch_dir: PathBuf) -> Self {
        Self {
            download_dir,
            scratch_dir,
        }
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.download_dir.join(file_name)
    }

    pub fn scratch_file(&self, extension: &str) -> ScratchFile {
        ScratchFile::new(&self.scratch_dir, extension)
    }

    pub async fn ensure_dirs(&self) -> Result<(), PipelineError> {
        for dir in [&self.download_dir, &self.scratch_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|error| PipelineError::internal(&format!("creating {dir:?}"), error))?;
        }
        Ok(())
    }

    // Only plain names directly under the retention directory are served.
    pub async fn locate(&self, file_name: &str) -> Result<(PathBuf, u64), PipelineError> {
        let not_found = || PipelineError::FileNotFound(file_name.to_string());

        let mut components = Path::new(file_name).components();
        let is_plain_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) && !file_name.contains(['/', '\\']);
        if !is_plain_name {
            warn!("Rejected download request for suspicious name {file_name:?}");
            return Err(not_found());
        }

        let path = self.download_dir.join(file_name);
        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok((path, metadata.len())),
            Ok(_) => Err(not_found()),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                warn!("Download requested for non-existent file: {path:?}");
                Err(not_found())
            }
            Err(error) => Err(PipelineError::internal("reading stored file", error)),
        }
    }

    pub async fn sweep_expired(&self) -> Result<usize, PipelineError> {
        let removed = sweep_directory(
            &self.download_dir,
            Duration::from_secs(RETENTION_SECONDS),
            |_| true,
        )
        .await?;
        info!("Retention sweep removed {removed} file(s) from {:?}", self.download_dir);
        Ok(removed)
    }

    pub async fn sweep_scratch(&self) {
        let result = sweep_directory(
            &self.scratch_dir,
            Duration::from_secs(SCRATCH_RETENTION_SECONDS),
            |name| name.starts_with(SCRATCH_PREFIX),
        )
        .await;

        match result {
            Ok(0) => {}
            Ok(removed) => info!("Removed {removed} orphaned scratch file(s)"),
            Err(error) => warn!("Scratch sweep failed: {error}"),
        }
    }
}

// Files that vanish mid-sweep (a concurrent sweep got there first) are not errors.
pub async fn sweep_directory(
    dir: &Path,
    max_age: Duration,
    matches_name: impl Fn(&str) -> bool,
) -> Result<usize, PipelineError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(PipelineError::internal("opening directory for sweep", error)),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(error) => {
                warn!("Could not iterate {:?} during sweep: {error}", dir);
                break;
            }
        };

        let path = entry.path();
        let name = entry.file_name();
        if !matches_name(&*name.to_string_lossy()) {
            continue;
        }

        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => continue,
            Err(error) => {
                warn!("Could not read metadata of {:?}: {error}", path);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified_at = match metadata.modified() {
            Ok(value) => value,
            Err(error) => {
                warn!("Could not read modification time of {:?}: {error}", path);
                continue;
            }
        };
        let age = now.duration_since(modified_at).unwrap_or_default();
        if age <= max_age {
            continue;
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted old file: {}", name.to_string_lossy());
                removed += 1;
            }
            Err(error) if error.kind() == ErrorKind::NotFound => {}
            Err(error) => warn!("Could not delete {:?}: {error}", path),
        }
    }

    Ok(removed)
}

/// Replaces `to` with `from` in one step. Across filesystems the bytes are copied
/// next to `to` first, so readers never see a half-written file.
pub async fn relocate(from: &Path, to: &Path) -> Result<(), PipelineError> {
    let Err(rename_error) = tokio::fs::rename(from, to).await else {
        return Ok(());
    };
    debug!("rename {from:?} -> {to:?} failed ({rename_error}); copying instead");

    let staging = ScratchFile::new(to.parent().unwrap_or(Path::new(".")), "part");
    tokio::fs::copy(from, staging.path())
        .await
        .map_err(|error| PipelineError::internal("copying into retention directory", error))?;
    tokio::fs::rename(staging.path(), to)
        .await
        .map_err(|error| PipelineError::internal("moving file into retention directory", error))?;

    if let Err(error) = tokio::fs::remove_file(from).await
        && error.kind() != ErrorKind::NotFound
    {
        warn!("Could not remove {from:?} after copying: {error}");
    }
    Ok(())
}
