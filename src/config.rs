use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, anyhow};
use serde::Deserialize;

use crate::shortcuts::{Shortcut, ShortcutTable};

const DEFAULT_CONFIG_PATH: &str = "config/app_config.toml";
const DEFAULT_INSTRUCTIONS: &str = include_str!("../prompts/manim_instructions.md");
const DEFAULT_DEEPGRAM_SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_SHORTCUT_DELAY_MS: u64 = 60_000;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub public_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    /// Parent of the `videos/`, `audio/`, `temp/` and `uploads/` directories.
    pub root: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct RetentionConfig {
    /// Files in `videos/` and `audio/` older than this are swept. `None` keeps everything.
    pub ttl: Option<Duration>,
    pub sweep_interval: Duration,
    /// Remove nested render copies and audio-less videos once a newer artifact replaces them.
    pub prune_superseded: bool,
}

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub provider: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub instructions: String,
}

#[derive(Clone, Debug)]
pub struct SpeechConfig {
    pub api_key: String,
    pub endpoint: String,
    pub voice: String,
    pub encoding: String,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct RendererConfig {
    pub program: String,
    pub quality: String,
    pub format: String,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub ffmpeg: String,
    pub silence_seconds: f64,
    pub pad_segment_gaps: bool,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct OcrConfig {
    pub program: String,
    pub language: String,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub model: Option<ModelConfig>,
    pub speech: Option<SpeechConfig>,
    pub renderer: RendererConfig,
    pub media: MediaConfig,
    pub ocr: OcrConfig,
    pub shortcuts: ShortcutTable,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            env::var("APP_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let config_path = Path::new(&config_path);

        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read config file {:?}", config_path))?;

        Self::from_toml(&contents)
            .with_context(|| format!("failed to parse config file {:?}", config_path))
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let file_config: FileConfig = toml::from_str(contents)?;

        let server = file_config.server.unwrap_or_default().into_domain()?;
        let storage = file_config.storage.unwrap_or_default().into_domain()?;
        let retention = file_config.retention.unwrap_or_default().into_domain();
        let model = match file_config.model {
            Some(section) => section.into_domain()?,
            None => FileModelConfig::default().into_domain()?,
        };
        let speech = file_config.speech.unwrap_or_default().into_domain()?;
        let renderer = file_config.renderer.unwrap_or_default().into_domain();
        let media = file_config.media.unwrap_or_default().into_domain()?;
        let ocr = file_config.ocr.unwrap_or_default().into_domain();
        let shortcuts = ShortcutTable::new(
            file_config
                .shortcuts
                .into_iter()
                .map(FileShortcutConfig::into_domain)
                .collect(),
        );

        Ok(Self {
            server,
            storage,
            retention,
            model,
            speech,
            renderer,
            media,
            ocr,
            shortcuts,
        })
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|secs| *secs > 0).map(Duration::from_secs)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: Option<FileServerConfig>,
    #[serde(default)]
    storage: Option<FileStorageConfig>,
    #[serde(default)]
    retention: Option<FileRetentionConfig>,
    #[serde(default)]
    model: Option<FileModelConfig>,
    #[serde(default)]
    speech: Option<FileSpeechConfig>,
    #[serde(default)]
    renderer: Option<FileRendererConfig>,
    #[serde(default)]
    media: Option<FileMediaConfig>,
    #[serde(default)]
    ocr: Option<FileOcrConfig>,
    #[serde(default)]
    shortcuts: Vec<FileShortcutConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct FileServerConfig {
    #[serde(default)]
    bind_addr: Option<String>,
    #[serde(default)]
    public_dir: Option<String>,
}

impl FileServerConfig {
    fn into_domain(self) -> anyhow::Result<ServerConfig> {
        let bind_addr_str = self
            .bind_addr
            .or_else(|| env::var("PORT").ok().map(|port| format!("0.0.0.0:{port}")))
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid server.bind_addr: {}", bind_addr_str))?;

        Ok(ServerConfig {
            bind_addr,
            public_dir: PathBuf::from(self.public_dir.unwrap_or_else(|| "public".to_string())),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileStorageConfig {
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    max_upload_bytes: Option<usize>,
}

impl FileStorageConfig {
    fn into_domain(self) -> anyhow::Result<StorageConfig> {
        let root = if let Some(dir) = self.root {
            PathBuf::from(dir)
        } else if let Ok(dir) = env::var("STORAGE_ROOT") {
            PathBuf::from(dir)
        } else {
            env::current_dir()?
        };

        Ok(StorageConfig {
            root,
            max_upload_bytes: self
                .max_upload_bytes
                .filter(|limit| *limit > 0)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileRetentionConfig {
    #[serde(default)]
    ttl_hours: Option<u64>,
    #[serde(default)]
    sweep_interval_minutes: Option<u64>,
    #[serde(default)]
    prune_superseded: Option<bool>,
}

impl FileRetentionConfig {
    fn into_domain(self) -> RetentionConfig {
        RetentionConfig {
            ttl: seconds(self.ttl_hours.map(|hours| hours * 3600)),
            sweep_interval: Duration::from_secs(
                self.sweep_interval_minutes.unwrap_or(60).max(1) * 60,
            ),
            prune_superseded: self.prune_superseded.unwrap_or(true),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileModelConfig {
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    instructions_path: Option<String>,
}

impl FileModelConfig {
    fn into_domain(self) -> anyhow::Result<Option<ModelConfig>> {
        let provider = self
            .provider
            .unwrap_or_else(|| "gemini".to_string())
            .trim()
            .to_lowercase();

        let (key_var, default_model) = match provider.as_str() {
            "gemini" => ("GEMINI_API_KEY", "gemini-2.5-flash"),
            "openai" => ("OPENAI_API_KEY", "gpt-4o-mini"),
            other => return Err(anyhow!("unsupported model.provider: {other}")),
        };

        let Some(api_key) = non_empty(self.api_key).or_else(|| non_empty(env::var(key_var).ok()))
        else {
            return Ok(None);
        };

        let instructions = match self.instructions_path {
            Some(path) => fs::read_to_string(&path)
                .with_context(|| format!("failed to read model.instructions_path {path}"))?,
            None => DEFAULT_INSTRUCTIONS.to_string(),
        };

        Ok(Some(ModelConfig {
            provider,
            api_key,
            model: self.model.unwrap_or_else(|| default_model.to_string()),
            temperature: self.temperature.unwrap_or(0.5),
            instructions,
        }))
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileSpeechConfig {
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileSpeechConfig {
    /// Segment clips are joined with the mp3 silence clip by stream copy, so
    /// only mp3 output can be concatenated.
    fn into_domain(self) -> anyhow::Result<Option<SpeechConfig>> {
        let encoding = self.encoding.unwrap_or_else(|| "mp3".to_string());
        if !encoding.eq_ignore_ascii_case("mp3") {
            return Err(anyhow!("unsupported speech.encoding: {encoding}, only mp3 is supported"));
        }

        let Some(api_key) =
            non_empty(self.api_key).or_else(|| non_empty(env::var("DEEPGRAM_TTS_KEY").ok()))
        else {
            return Ok(None);
        };

        Ok(Some(SpeechConfig {
            api_key,
            endpoint: self
                .endpoint
                .unwrap_or_else(|| DEFAULT_DEEPGRAM_SPEAK_URL.to_string()),
            voice: self.voice.unwrap_or_else(|| "aura-asteria-en".to_string()),
            encoding: encoding.to_ascii_lowercase(),
            timeout: seconds(self.timeout_seconds),
        }))
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileRendererConfig {
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileRendererConfig {
    fn into_domain(self) -> RendererConfig {
        RendererConfig {
            program: self.program.unwrap_or_else(|| "manim".to_string()),
            quality: self.quality.unwrap_or_else(|| "m".to_string()),
            format: self.format.unwrap_or_else(|| "mp4".to_string()),
            timeout: seconds(self.timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileMediaConfig {
    #[serde(default)]
    ffmpeg: Option<String>,
    #[serde(default)]
    silence_seconds: Option<f64>,
    #[serde(default)]
    pad_segment_gaps: Option<bool>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileMediaConfig {
    fn into_domain(self) -> anyhow::Result<MediaConfig> {
        let silence_seconds = self.silence_seconds.unwrap_or(1.0);
        if silence_seconds.is_nan() || silence_seconds <= 0.0 {
            return Err(anyhow!("media.silence_seconds must be positive"));
        }

        Ok(MediaConfig {
            ffmpeg: self.ffmpeg.unwrap_or_else(|| "ffmpeg".to_string()),
            silence_seconds,
            pad_segment_gaps: self.pad_segment_gaps.unwrap_or(false),
            timeout: seconds(self.timeout_seconds),
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct FileOcrConfig {
    #[serde(default)]
    program: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    timeout_seconds: Option<u64>,
}

impl FileOcrConfig {
    fn into_domain(self) -> OcrConfig {
        OcrConfig {
            program: self.program.unwrap_or_else(|| "tesseract".to_string()),
            language: self.language.unwrap_or_else(|| "eng".to_string()),
            timeout: seconds(self.timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FileShortcutConfig {
    prompt: String,
    video_file: String,
    #[serde(default)]
    delay_ms: Option<u64>,
}

impl FileShortcutConfig {
    fn into_domain(self) -> Shortcut {
        Shortcut::new(
            self.prompt,
            self.video_file,
            Duration::from_millis(self.delay_ms.unwrap_or(DEFAULT_SHORTCUT_DELAY_MS)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_file_is_converted() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            bind_addr = "0.0.0.0:8080"

            [storage]
            root = "/srv/manim"

            [retention]
            ttl_hours = 24
            prune_superseded = false

            [model]
            provider = "OpenAI"
            api_key = "sk-test"

            [speech]
            api_key = "dg-test"

            [renderer]
            quality = "h"
            timeout_seconds = 600

            [media]
            pad_segment_gaps = true

            [[shortcuts]]
            prompt = "How do I solve quadratic equations?"
            video_file = "93837730-945a-47ab-a12b-3ad5929070dd_with_audio.mp4"
            delay_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind_addr.port(), 8080);
        assert_eq!(config.storage.root, PathBuf::from("/srv/manim"));
        assert_eq!(config.storage.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.retention.ttl, Some(Duration::from_secs(24 * 3600)));
        assert!(!config.retention.prune_superseded);

        let model = config.model.unwrap();
        assert_eq!(model.provider, "openai");
        assert_eq!(model.model, "gpt-4o-mini");
        assert_eq!(model.temperature, 0.5);
        assert!(model.instructions.contains("NARRATION_DATA"));

        let speech = config.speech.unwrap();
        assert_eq!(speech.voice, "aura-asteria-en");
        assert_eq!(speech.encoding, "mp3");
        assert_eq!(speech.timeout, None);

        assert_eq!(config.renderer.quality, "h");
        assert_eq!(config.renderer.timeout, Some(Duration::from_secs(600)));
        assert!(config.media.pad_segment_gaps);
        assert_eq!(config.shortcuts.len(), 1);
    }

    #[test]
    fn shipped_config_parses() {
        let config = AppConfig::from_toml(include_str!("../config/app_config.toml")).unwrap();
        assert_eq!(config.shortcuts.len(), 6);
        assert_eq!(config.renderer.quality, "m");
        assert!(!config.media.pad_segment_gaps);
        assert!(config.retention.ttl.is_none());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = AppConfig::from_toml("[model]\nprovider = \"mystery\"\napi_key = \"k\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn non_mp3_speech_encoding_is_rejected() {
        let err = AppConfig::from_toml("[speech]\napi_key = \"k\"\nencoding = \"linear16\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("linear16"));
        assert!(AppConfig::from_toml("[speech]\nencoding = \"MP3\"\n").is_ok());
    }

    #[test]
    fn zero_silence_is_rejected() {
        assert!(AppConfig::from_toml("[media]\nsilence_seconds = 0.0\n").is_err());
    }

    #[test]
    fn shortcut_delay_defaults_to_a_minute() {
        let config = AppConfig::from_toml(
            "[storage]\nroot = \"/tmp\"\n[[shortcuts]]\nprompt = \"explain neural networks\"\nvideo_file = \"n.mp4\"\n",
        )
        .unwrap();
        let shortcut = config.shortcuts.lookup("Explain Neural Networks").unwrap();
        assert_eq!(shortcut.delay, Duration::from_millis(DEFAULT_SHORTCUT_DELAY_MS));
    }
}
