//! Scene rendering through the external Manim CLI.
//!
//! Manim decides where the finished video lands based on the script name,
//! scene name and quality profile, and that layout has shifted between
//! releases. [`RenderInvoker`] probes the known layouts first, falls back to a
//! recursive search keyed by the output id, and copies whatever it finds to a
//! flat `videos/<id>.<format>` path.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{fs, process::Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::RendererConfig,
    errors::{AppError, Result},
    pipeline::{
        parser::ParsedScript,
        process::{ToolError, ToolOutput, run_tool},
    },
};

/// Quality-profile directories probed when the profile is unknown.
const LEGACY_QUALITY_DIRS: [&str; 2] = ["720p30", "1080p60"];

#[derive(Debug, Clone)]
pub struct RenderJob<'a> {
    pub script: &'a Path,
    pub scene: &'a str,
    pub output_id: &'a str,
    pub media_dir: &'a Path,
    pub format: &'a str,
    pub quality: &'a str,
}

#[async_trait]
pub trait SceneRenderer: Send + Sync {
    async fn render(&self, job: &RenderJob<'_>) -> std::result::Result<ToolOutput, ToolError>;
}

pub struct ManimCli {
    program: String,
    timeout: Option<Duration>,
}

impl ManimCli {
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl SceneRenderer for ManimCli {
    async fn render(&self, job: &RenderJob<'_>) -> std::result::Result<ToolOutput, ToolError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(job.script)
            .arg(job.scene)
            .arg("--output_file")
            .arg(job.output_id)
            .arg("--media_dir")
            .arg(job.media_dir)
            .arg("--format")
            .arg(job.format)
            .arg("-q")
            .arg(job.quality);
        run_tool(&mut cmd, self.timeout).await
    }
}

/// Directory Manim uses for a `-q` profile flag.
pub fn quality_dir(quality: &str) -> Option<&'static str> {
    match quality {
        "l" | "low_quality" => Some("480p15"),
        "m" | "medium_quality" => Some("720p30"),
        "h" | "high_quality" => Some("1080p60"),
        "p" | "production_quality" => Some("1440p60"),
        "k" | "fourk_quality" => Some("2160p60"),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderArtifact {
    pub id: String,
    pub path: PathBuf,
}

pub struct RenderInvoker {
    renderer: Arc<dyn SceneRenderer>,
    temp_dir: PathBuf,
    videos_dir: PathBuf,
    format: String,
    quality: String,
    prune_superseded: bool,
}

impl RenderInvoker {
    pub fn new(
        renderer: Arc<dyn SceneRenderer>,
        temp_dir: PathBuf,
        videos_dir: PathBuf,
        format: impl Into<String>,
        quality: impl Into<String>,
        prune_superseded: bool,
    ) -> Self {
        Self {
            renderer,
            temp_dir,
            videos_dir,
            format: format.into(),
            quality: quality.into(),
            prune_superseded,
        }
    }

    pub async fn render(&self, script: &ParsedScript) -> Result<RenderArtifact> {
        let id = Uuid::new_v4().to_string();
        let script_path = self.temp_dir.join(format!("{id}.py"));

        let result = async {
            fs::create_dir_all(&self.temp_dir).await?;
            fs::create_dir_all(&self.videos_dir).await?;
            fs::write(&script_path, &script.code).await?;
            debug!(target: "render", %id, path = ?script_path, "scene script written");
            self.render_and_locate(&script_path, &script.scene_name, &id)
                .await
        }
        .await;

        if let Err(err) = fs::remove_file(&script_path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "render", %id, error = %err, "failed to remove scene script");
            }
        }

        result
    }

    async fn render_and_locate(
        &self,
        script_path: &Path,
        scene: &str,
        id: &str,
    ) -> Result<RenderArtifact> {
        let job = RenderJob {
            script: script_path,
            scene,
            output_id: id,
            media_dir: &self.videos_dir,
            format: &self.format,
            quality: &self.quality,
        };

        info!(target: "render", %id, scene, quality = %self.quality, "rendering scene");
        let output = self.renderer.render(&job).await.map_err(|err| {
            warn!(target: "render", %id, error = %err, "renderer failed");
            AppError::render(err)
        })?;

        let diagnostics = output.stderr.trim();
        if !diagnostics.is_empty() {
            let tail: String = diagnostics
                .chars()
                .rev()
                .take(300)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            warn!(target: "render", %id, stderr = %tail, "renderer wrote diagnostics");
        }

        let script_stem = script_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());

        let found = match self.probe_candidates(id, scene, &script_stem).await {
            Some(path) => path,
            None => {
                debug!(target: "render", %id, "no conventional path matched, searching media tree");
                search_media_tree(&self.videos_dir, id, &self.format)
                    .await
                    .ok_or_else(|| AppError::RenderArtifactMissing(id.to_string()))?
            }
        };

        let canonical = self.canonical_path(id);
        if found != canonical {
            fs::copy(&found, &canonical).await?;
            info!(target: "render", %id, from = ?found, "render normalized to flat path");

            if self.prune_superseded {
                if let Err(err) = fs::remove_file(&found).await {
                    warn!(target: "render", %id, error = %err, "failed to prune nested render");
                }
            }
        }

        Ok(RenderArtifact {
            id: id.to_string(),
            path: canonical,
        })
    }

    fn canonical_path(&self, id: &str) -> PathBuf {
        self.videos_dir.join(format!("{id}.{}", self.format))
    }

    /// Locations Manim is known to write to, most likely first.
    pub fn candidate_paths(&self, id: &str, scene: &str, script_stem: &str) -> Vec<PathBuf> {
        let file_name = format!("{id}.{}", self.format);
        let nested = self.videos_dir.join("videos");
        let profile = quality_dir(&self.quality);

        let mut candidates = vec![self.canonical_path(id)];
        if let Some(dir) = profile {
            candidates.push(nested.join(scene).join(dir).join(&file_name));
        }
        for dir in LEGACY_QUALITY_DIRS {
            let path = nested.join(scene).join(dir).join(&file_name);
            if !candidates.contains(&path) {
                candidates.push(path);
            }
        }
        candidates.push(nested.join(&file_name));
        if let Some(dir) = profile {
            candidates.push(nested.join(script_stem).join(dir).join(&file_name));
        }
        candidates
    }

    async fn probe_candidates(&self, id: &str, scene: &str, script_stem: &str) -> Option<PathBuf> {
        for candidate in self.candidate_paths(id, scene, script_stem) {
            if fs::try_exists(&candidate).await.unwrap_or(false) {
                debug!(target: "render", %id, path = ?candidate, "render found at conventional path");
                return Some(candidate);
            }
        }
        None
    }
}

/// Depth-first search for a file whose name contains `id` and ends in
/// `.<extension>`. Entries are visited in name order; unreadable directories
/// are skipped.
pub async fn search_media_tree(root: &Path, id: &str, extension: &str) -> Option<PathBuf> {
    let suffix = format!(".{extension}");
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(target: "render", dir = ?dir, error = %err, "skipping unreadable directory");
                continue;
            }
        };

        let mut children = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            children.push(entry);
        }
        children.sort_by_key(|entry| entry.file_name());

        let mut subdirs = Vec::new();
        for entry in children {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if file_type.is_dir() {
                subdirs.push(entry.path());
            } else if file_type.is_file() && name.contains(id) && name.ends_with(&suffix) {
                return Some(entry.path());
            }
        }

        pending.extend(subdirs.into_iter().rev());
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Placement, StubRenderer};

    fn invoker(root: &Path, renderer: StubRenderer, prune: bool) -> (RenderInvoker, Arc<StubRenderer>) {
        let renderer = Arc::new(renderer);
        let invoker = RenderInvoker::new(
            renderer.clone(),
            root.join("temp"),
            root.join("videos"),
            "mp4",
            "m",
            prune,
        );
        (invoker, renderer)
    }

    fn script() -> ParsedScript {
        ParsedScript::from_code("from manim import *\n\nclass Demo(Scene):\n    def construct(self):\n        pass")
    }

    #[tokio::test]
    async fn legacy_nested_output_is_copied_to_flat_path() {
        let dir = tempfile::tempdir().unwrap();
        let (invoker, renderer) = invoker(dir.path(), StubRenderer::new(Placement::LegacyNested), false);

        let artifact = invoker.render(&script()).await.unwrap();

        assert_eq!(artifact.path, dir.path().join("videos").join(format!("{}.mp4", artifact.id)));
        assert_eq!(fs::read(&artifact.path).await.unwrap(), renderer.payload());
        let nested = dir
            .path()
            .join("videos/videos/Demo/720p30")
            .join(format!("{}.mp4", artifact.id));
        assert!(nested.exists(), "nested copy is kept without pruning");
        assert_eq!(renderer.scenes(), vec!["Demo".to_string()]);
    }

    #[tokio::test]
    async fn pruning_removes_the_nested_copy() {
        let dir = tempfile::tempdir().unwrap();
        let (invoker, _) = invoker(dir.path(), StubRenderer::new(Placement::LegacyNested), true);

        let artifact = invoker.render(&script()).await.unwrap();

        assert!(artifact.path.exists());
        let nested = dir
            .path()
            .join("videos/videos/Demo/720p30")
            .join(format!("{}.mp4", artifact.id));
        assert!(!nested.exists());
    }

    #[tokio::test]
    async fn unconventional_location_is_found_by_search() {
        let dir = tempfile::tempdir().unwrap();
        let (invoker, renderer) = invoker(dir.path(), StubRenderer::new(Placement::Elsewhere), false);

        let artifact = invoker.render(&script()).await.unwrap();

        assert_eq!(fs::read(&artifact.path).await.unwrap(), renderer.payload());
    }

    #[tokio::test]
    async fn missing_output_is_reported_and_script_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (invoker, _) = invoker(dir.path(), StubRenderer::new(Placement::Nowhere), false);

        let err = invoker.render(&script()).await.unwrap_err();

        assert!(matches!(err, AppError::RenderArtifactMissing(_)));
        assert_eq!(std::fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn renderer_failure_is_fatal_and_script_removed() {
        let dir = tempfile::tempdir().unwrap();
        let (invoker, _) = invoker(dir.path(), StubRenderer::new(Placement::Fail), false);

        let err = invoker.render(&script()).await.unwrap_err();

        assert!(matches!(err, AppError::RenderFailed(_)));
        assert_eq!(std::fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn stderr_output_is_only_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = StubRenderer::new(Placement::Flat).with_stderr("Manim Community v0.19.0");
        let (invoker, _) = invoker(dir.path(), renderer, false);

        assert!(invoker.render(&script()).await.is_ok());
    }

    #[test]
    fn candidate_order_follows_quality_profile() {
        let renderer: Arc<dyn SceneRenderer> = Arc::new(StubRenderer::new(Placement::Flat));
        let invoker = RenderInvoker::new(renderer, "t".into(), "v".into(), "mp4", "h", false);

        let candidates = invoker.candidate_paths("abc", "Demo", "abc");

        assert_eq!(
            candidates,
            vec![
                PathBuf::from("v/abc.mp4"),
                PathBuf::from("v/videos/Demo/1080p60/abc.mp4"),
                PathBuf::from("v/videos/Demo/720p30/abc.mp4"),
                PathBuf::from("v/videos/abc.mp4"),
                PathBuf::from("v/videos/abc/1080p60/abc.mp4"),
            ]
        );
    }

    #[tokio::test]
    async fn search_ignores_other_ids_and_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(deep.join("other.mp4"), b"x").unwrap();
        std::fs::write(deep.join("target-id.png"), b"x").unwrap();
        std::fs::write(deep.join("target-id.mp4"), b"x").unwrap();

        let found = search_media_tree(dir.path(), "target-id", "mp4").await;

        assert_eq!(found, Some(deep.join("target-id.mp4")));
        assert_eq!(search_media_tree(dir.path(), "absent", "mp4").await, None);
    }
}
