//! Filesystem storage for extracted demo sites.
//!
//! Layout under the demos root:
//!
//! ```text
//! {root}/{project_id}/index.html   extracted upload
//! {root}/{local_path}/index.html   registered by deploy
//! {root}/.staging/                 in-flight archives and extractions
//! ```
//!
//! An upload is streamed to `.staging`, extracted next to it and only then
//! renamed over the live tree, so a failed upload never clobbers a working
//! demo.

use std::collections::HashSet;
use std::error::Error as StdError;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt, task};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::demos::INDEX_FILE;
use crate::util::bytes::format_bytes;

pub const STAGING_DIR: &str = ".staging";
const MACOS_METADATA_DIR: &str = "__MACOSX";
const SYMLINK_MODE: u32 = 0o120000;
const FILE_TYPE_MASK: u32 = 0o170000;

#[derive(Debug, Error)]
pub enum DemoStorageError {
    #[error("invalid demo path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("archive exceeds the upload limit of {}", format_bytes(.limit.to_owned()))]
    PayloadTooLarge { limit: u64 },
    #[error("archive upload stream failed")]
    PayloadStream {
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("uploaded archive is empty")]
    EmptyPayload,
    #[error("uploaded file is not a valid zip archive: {0}")]
    InvalidArchive(String),
    #[error("archive entry `{name}` escapes the extraction root")]
    UnsafeEntry { name: String },
    #[error("archive holds more than {limit} entries")]
    TooManyEntries { limit: usize },
    #[error("archive expands beyond {}", format_bytes(.limit.to_owned()))]
    ExtractedTooLarge { limit: u64 },
    #[error("archive does not contain an `index.html` at its root")]
    MissingIndex,
    #[error("extraction task failed: {0}")]
    Task(#[from] task::JoinError),
}

impl DemoStorageError {
    /// Whether the failure is caused by the uploaded content rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath
                | Self::PayloadTooLarge { .. }
                | Self::EmptyPayload
                | Self::InvalidArchive(_)
                | Self::UnsafeEntry { .. }
                | Self::TooManyEntries { .. }
                | Self::ExtractedTooLarge { .. }
                | Self::MissingIndex
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExtractLimits {
    pub max_upload_bytes: u64,
    pub max_extracted_bytes: u64,
    pub max_entries: usize,
}

/// An archive written to the staging area, awaiting extraction.
#[derive(Debug)]
pub struct StagedArchive {
    path: PathBuf,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledSite {
    /// Directory relative to the demos root.
    pub local_path: String,
    pub files: u64,
    pub extracted_bytes: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug)]
pub struct DemoStorage {
    root: PathBuf,
    limits: ExtractLimits,
}

impl DemoStorage {
    /// Initialise storage rooted at the provided directory, creating it and
    /// the staging area if necessary.
    pub fn new(root: PathBuf, limits: ExtractLimits) -> Result<Self, io::Error> {
        std::fs::create_dir_all(root.join(STAGING_DIR))?;
        Ok(Self { root, limits })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> ExtractLimits {
        self.limits
    }

    /// Stream an uploaded archive into the staging area, enforcing the upload
    /// size limit as bytes arrive.
    pub async fn stage_archive<S>(&self, stream: S) -> Result<StagedArchive, DemoStorageError>
    where
        S: Stream<Item = Result<Bytes, DemoStorageError>>,
    {
        let path = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.zip", Uuid::new_v4()));
        let mut file = fs::File::create(&path).await?;
        let mut total: u64 = 0;

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    let _ = fs::remove_file(&path).await;
                    return Err(err);
                }
            };
            if chunk.is_empty() {
                continue;
            }

            total = total.saturating_add(chunk.len() as u64);
            if total > self.limits.max_upload_bytes {
                drop(file);
                let _ = fs::remove_file(&path).await;
                return Err(DemoStorageError::PayloadTooLarge {
                    limit: self.limits.max_upload_bytes,
                });
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        if total == 0 {
            let _ = fs::remove_file(&path).await;
            return Err(DemoStorageError::EmptyPayload);
        }

        Ok(StagedArchive {
            path,
            size_bytes: total,
        })
    }

    /// Extract a staged archive and swap it into `{root}/{project_id}`.
    ///
    /// The staged archive is consumed whatever the outcome. On failure the
    /// previously installed tree is left in place.
    pub async fn install_archive(
        &self,
        staged: StagedArchive,
        project_id: Uuid,
    ) -> Result<InstalledSite, DemoStorageError> {
        let root = self.root.clone();
        let limits = self.limits;
        let archive_path = staged.path.clone();

        let outcome =
            task::spawn_blocking(move || install_blocking(&root, &archive_path, project_id, limits))
                .await;

        self.discard(staged).await;

        outcome?
    }

    /// Drop a staged archive that will not be installed.
    pub async fn discard(&self, staged: StagedArchive) {
        if let Err(err) = fs::remove_file(&staged.path).await
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(
                target = "vetrina::demo_storage",
                path = %staged.path.display(),
                error = %err,
                "failed to discard staged archive"
            );
        }
    }

    /// Whether `{root}/{local_path}/index.html` exists.
    pub async fn has_index(&self, local_path: &str) -> Result<bool, DemoStorageError> {
        let index = self.resolve(local_path)?.join(INDEX_FILE);
        match fs::metadata(&index).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Read a file from a demo tree. Returns `None` for anything that is not a
    /// regular file inside the tree.
    pub async fn read_asset(
        &self,
        local_path: &str,
        relative: &str,
    ) -> Result<Option<Bytes>, DemoStorageError> {
        let site_root = self.resolve(local_path)?;
        let relative = sanitize_relative(relative).ok_or(DemoStorageError::InvalidPath)?;
        let candidate = site_root.join(relative);

        let Some(canonical_root) = canonicalize_existing(&site_root).await? else {
            return Ok(None);
        };
        let Some(canonical) = canonicalize_existing(&candidate).await? else {
            return Ok(None);
        };
        if !canonical.starts_with(&canonical_root) {
            debug!(
                target = "vetrina::demo_storage",
                path = %candidate.display(),
                "asset resolves outside of its demo tree"
            );
            return Ok(None);
        }

        let meta = fs::metadata(&canonical).await?;
        if !meta.is_file() {
            return Ok(None);
        }

        Ok(Some(Bytes::from(fs::read(&canonical).await?)))
    }

    /// Remove a demo tree. Missing trees are treated as success; returns
    /// whether anything was deleted.
    pub async fn remove_site(&self, local_path: &str) -> Result<bool, DemoStorageError> {
        let absolute = self.resolve(local_path)?;
        match fs::remove_dir_all(&absolute).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DemoStorageError::Io(err)),
        }
    }

    /// Top-level entries of the demos root that no referenced local path
    /// lives under, plus everything left in the staging area.
    pub async fn orphans(&self, referenced: &[String]) -> Result<Vec<PathBuf>, DemoStorageError> {
        let referenced: HashSet<&str> = referenced
            .iter()
            .filter_map(|path| path.split('/').find(|part| !part.is_empty() && *part != "."))
            .collect();

        let mut orphans = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == STAGING_DIR {
                let mut staged = fs::read_dir(entry.path()).await?;
                while let Some(leftover) = staged.next_entry().await? {
                    orphans.push(leftover.path());
                }
                continue;
            }
            if !referenced.contains(name.as_ref()) {
                orphans.push(entry.path());
            }
        }

        orphans.sort();
        Ok(orphans)
    }

    /// Delete a path returned by [`DemoStorage::orphans`].
    pub async fn remove_orphan(&self, path: &Path) -> Result<(), DemoStorageError> {
        if !path.starts_with(&self.root) || path == self.root {
            return Err(DemoStorageError::InvalidPath);
        }
        let meta = fs::symlink_metadata(path).await?;
        if meta.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    fn resolve(&self, local_path: &str) -> Result<PathBuf, DemoStorageError> {
        let relative = sanitize_relative(local_path).ok_or(DemoStorageError::InvalidPath)?;
        if relative.as_os_str().is_empty() {
            return Err(DemoStorageError::InvalidPath);
        }
        Ok(self.root.join(relative))
    }
}

async fn canonicalize_existing(path: &Path) -> Result<Option<PathBuf>, DemoStorageError> {
    match fs::canonicalize(path).await {
        Ok(resolved) => Ok(Some(resolved)),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
            ) =>
        {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Whether a request path inside a demo names its root document, after `.`
/// segments and trailing slashes are dropped.
pub fn is_site_index(relative: &str) -> bool {
    sanitize_relative(relative)
        .is_some_and(|path| path.as_os_str().is_empty() || path == Path::new(INDEX_FILE))
}

/// Normal components only; `.` is dropped, anything else rejects the path.
fn sanitize_relative(raw: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in Path::new(raw).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

#[derive(Debug, Default, Clone, Copy)]
struct ExtractStats {
    files: u64,
    bytes: u64,
}

fn install_blocking(
    root: &Path,
    archive_path: &Path,
    project_id: Uuid,
    limits: ExtractLimits,
) -> Result<InstalledSite, DemoStorageError> {
    let started = Instant::now();
    let work_dir = root.join(STAGING_DIR).join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&work_dir)?;

    let result = extract_archive(archive_path, &work_dir, limits).and_then(|stats| {
        let site_root = flattened_root(&work_dir)?;
        if !site_root.join(INDEX_FILE).is_file() {
            return Err(DemoStorageError::MissingIndex);
        }
        swap_into_place(root, &site_root, &project_id.to_string())?;
        Ok(stats)
    });

    if let Err(err) = std::fs::remove_dir_all(&work_dir)
        && err.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target = "vetrina::demo_storage",
            path = %work_dir.display(),
            error = %err,
            "failed to clean extraction directory"
        );
    }

    let stats = result?;
    Ok(InstalledSite {
        local_path: project_id.to_string(),
        files: stats.files,
        extracted_bytes: stats.bytes,
        elapsed_ms: started.elapsed().as_millis(),
    })
}

fn extract_archive(
    archive_path: &Path,
    dest: &Path,
    limits: ExtractLimits,
) -> Result<ExtractStats, DemoStorageError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| DemoStorageError::InvalidArchive(err.to_string()))?;

    if archive.len() > limits.max_entries {
        return Err(DemoStorageError::TooManyEntries {
            limit: limits.max_entries,
        });
    }

    let mut stats = ExtractStats::default();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| DemoStorageError::InvalidArchive(err.to_string()))?;
        let name = entry.name().to_string();

        let relative = entry
            .enclosed_name()
            .and_then(|path| sanitize_relative(&path.to_string_lossy()))
            .ok_or_else(|| DemoStorageError::UnsafeEntry { name: name.clone() })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        if relative
            .components()
            .next()
            .is_some_and(|first| first.as_os_str() == MACOS_METADATA_DIR)
        {
            continue;
        }
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & FILE_TYPE_MASK == SYMLINK_MODE)
        {
            debug!(target = "vetrina::demo_storage", entry = %name, "skipping symlink entry");
            continue;
        }

        let target = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let remaining = limits.max_extracted_bytes.saturating_sub(stats.bytes);
        let mut output = File::create(&target)?;
        let written = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut output)?;
        stats.bytes = stats.bytes.saturating_add(written);
        if stats.bytes > limits.max_extracted_bytes {
            return Err(DemoStorageError::ExtractedTooLarge {
                limit: limits.max_extracted_bytes,
            });
        }
        stats.files += 1;
    }

    Ok(stats)
}

/// Archives zipped from a parent folder carry a single top-level directory;
/// use it as the site root unless `index.html` already sits at the top.
fn flattened_root(work_dir: &Path) -> Result<PathBuf, DemoStorageError> {
    if work_dir.join(INDEX_FILE).is_file() {
        return Ok(work_dir.to_path_buf());
    }

    let mut entries = std::fs::read_dir(work_dir)?
        .collect::<Result<Vec<_>, io::Error>>()?;
    if entries.len() == 1 {
        let only = entries.remove(0);
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }

    Ok(work_dir.to_path_buf())
}

fn swap_into_place(root: &Path, site_root: &Path, name: &str) -> Result<(), DemoStorageError> {
    let target = root.join(name);
    let retired = root
        .join(STAGING_DIR)
        .join(format!("{}-retired", Uuid::new_v4()));

    let had_previous = match std::fs::rename(&target, &retired) {
        Ok(()) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = std::fs::rename(site_root, &target) {
        if had_previous && let Err(restore) = std::fs::rename(&retired, &target) {
            warn!(
                target = "vetrina::demo_storage",
                path = %target.display(),
                error = %restore,
                "failed to restore previous demo tree"
            );
        }
        return Err(err.into());
    }

    if had_previous && let Err(err) = std::fs::remove_dir_all(&retired) {
        warn!(
            target = "vetrina::demo_storage",
            path = %retired.display(),
            error = %err,
            "failed to remove replaced demo tree"
        );
    }

    Ok(())
}
