//! On-disk layout of generated artifacts and uploads.

use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use bytes::Bytes;
use tokio::{fs, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::RetentionConfig,
    errors::{AppError, Result},
};

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    videos: PathBuf,
    audio: PathBuf,
    temp: PathBuf,
    uploads: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            videos: root.join("videos"),
            audio: root.join("audio"),
            temp: root.join("temp"),
            uploads: root.join("uploads"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn videos_dir(&self) -> &Path {
        &self.videos
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.videos, &self.audio, &self.temp, &self.uploads] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Public URL of a file in `videos/`.
    pub fn video_url(&self, path: &Path) -> String {
        format!("/videos/{}", file_name(path))
    }

    /// Public URL of a file in `audio/`.
    pub fn audio_url(&self, path: &Path) -> String {
        format!("/audio/{}", file_name(path))
    }

    pub fn video_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.videos.join(checked_file_name(name)?))
    }

    /// Write an upload under `uploads/` with a generated name.
    pub async fn persist_upload(&self, upload: &ImageUpload) -> Result<PathBuf> {
        fs::create_dir_all(&self.uploads).await?;
        let path = self
            .uploads
            .join(format!("{}.{}", Uuid::new_v4(), upload.extension()));
        fs::write(&path, &upload.data).await?;
        debug!(target: "store", path = ?path, bytes = upload.data.len(), "upload stored");
        Ok(path)
    }

    pub async fn discard_upload(&self, path: &Path) {
        if let Err(err) = fs::remove_file(path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "store", path = ?path, error = %err, "failed to remove upload");
            }
        }
    }

    /// `.mp4` file names directly under `videos/`, sorted.
    pub async fn list_videos(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.videos).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".mp4") {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    pub async fn delete_video(&self, name: &str) -> Result<()> {
        let path = self.video_path(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!(target: "store", file = name, "video deleted");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Remove files under `videos/` and `audio/` last modified more than
    /// `ttl` ago. Files whose name is in `protected` are kept.
    pub async fn sweep_expired(&self, ttl: Duration, protected: &HashSet<String>) -> Result<usize> {
        let Some(cutoff) = SystemTime::now().checked_sub(ttl) else {
            return Ok(0);
        };

        let mut removed = 0;
        let mut pending = vec![self.videos.clone(), self.audio.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    pending.push(entry.path());
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if protected.contains(&name) {
                    continue;
                }

                let expired = metadata
                    .modified()
                    .map(|modified| modified < cutoff)
                    .unwrap_or(false);
                if expired {
                    fs::remove_file(entry.path()).await?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Accept a bare file name only: one normal component, no separators.
fn checked_file_name(name: &str) -> Result<&str> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.trim().is_empty() || !single || name.contains(['/', '\\']) {
        return Err(AppError::invalid(format!("invalid file name: {name:?}")));
    }
    Ok(name)
}

/// Periodically sweep expired artifacts. Returns `None` when no TTL is set.
pub fn spawn_retention(
    store: Arc<ArtifactStore>,
    config: &RetentionConfig,
    protected: HashSet<String>,
) -> Option<JoinHandle<()>> {
    let ttl = config.ttl?;
    let every = config.sweep_interval;

    info!(
        target: "retention",
        ttl_secs = ttl.as_secs(),
        interval_secs = every.as_secs(),
        protected = protected.len(),
        "retention sweeper started"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match store.sweep_expired(ttl, &protected).await {
                Ok(0) => debug!(target: "retention", "nothing expired"),
                Ok(removed) => info!(target: "retention", removed, "expired artifacts removed"),
                Err(err) => warn!(target: "retention", error = %err, "retention sweep failed"),
            }
        }
    }))
}

/// An image received over multipart, not yet written to disk.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl ImageUpload {
    pub fn validate(&self, max_bytes: usize) -> Result<()> {
        let content_type = self.content_type.as_deref().unwrap_or("");
        if !content_type.starts_with("image/") {
            let shown = if content_type.is_empty() {
                "unknown type"
            } else {
                content_type
            };
            return Err(AppError::FileType(shown.to_string()));
        }
        if self.data.len() > max_bytes {
            return Err(AppError::FileSize { limit: max_bytes });
        }
        if self.data.is_empty() {
            return Err(AppError::invalid("Image file is empty"));
        }
        Ok(())
    }

    fn extension(&self) -> String {
        self.file_name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .or_else(|| {
                self.content_type
                    .as_deref()
                    .and_then(|ct| ct.strip_prefix("image/"))
                    .map(|sub| sub.split(['+', ';']).next().unwrap_or(sub).to_string())
            })
            .unwrap_or_else(|| "img".to_string())
    }
}
