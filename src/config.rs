use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "IMAGE_TAGGER_";

/// Top-level configuration, read from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Only objects directly inside this folder are processed on create.
    pub upload_folder: String,
    /// Folder thumbnails are uploaded to, in the source bucket.
    pub thumbnail_prefix: String,
    /// Square bounding box passed to the resize tool.
    pub thumbnail_size: u32,
    /// Executable used for resizing (ImageMagick `convert` by default).
    pub resize_program: String,
    /// Minimum label score kept as a tag.
    pub confidence_threshold: f32,
    /// Scratch directory for in-flight downloads.
    pub scratch_root: String,
    /// Upper bound for every external call, in seconds.
    pub call_timeout_secs: u64,
    pub storage: StorageConfig,
    pub repository: RepositoryConfig,
    pub vision: VisionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one subdirectory per bucket.
    pub root: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    /// SQLite database file.
    pub path: String,
    pub collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct VisionConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub max_results: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            upload_folder: "uploads".into(),
            thumbnail_prefix: "thumbnails".into(),
            thumbnail_size: 200,
            resize_program: "convert".into(),
            confidence_threshold: 0.65,
            scratch_root: std::env::temp_dir()
                .join("image-tagger")
                .to_string_lossy()
                .into_owned(),
            call_timeout_secs: 60,
            storage: StorageConfig::default(),
            repository: RepositoryConfig::default(),
            vision: VisionConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "~/.image-tagger/buckets".into(),
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: "~/.image-tagger/records.db".into(),
            collection: "Images".into(),
        }
    }
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://vision.googleapis.com/v1/images:annotate".into(),
            api_key: None,
            max_results: 50,
        }
    }
}

/// The subset of [`Config`] the pipeline itself needs, with paths resolved.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub upload_folder: String,
    pub thumbnail_prefix: String,
    pub thumbnail_size: u32,
    pub resize_program: String,
    pub confidence_threshold: f32,
    pub scratch_root: PathBuf,
    pub call_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Config::default().pipeline_settings()
    }
}

impl Config {
    /// Default location: `<config dir>/image-tagger/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "image-tagger").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path` (or the default location, if it exists), apply
    /// `IMAGE_TAGGER_*` overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(file) if path.is_some() || file.exists() => Self::from_file(&file)?,
            _ => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Failed to parse config {}", path.display()))
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("UPLOAD_FOLDER") {
            self.upload_folder = v;
        }
        if let Some(v) = var("THUMBNAIL_PREFIX") {
            self.thumbnail_prefix = v;
        }
        if let Some(v) = var("RESIZE_PROGRAM") {
            self.resize_program = v;
        }
        if let Some(v) = var("SCRATCH_ROOT") {
            self.scratch_root = v;
        }
        if let Some(v) = var("STORAGE_ROOT") {
            self.storage.root = v;
        }
        if let Some(v) = var("DB_PATH") {
            self.repository.path = v;
        }
        if let Some(v) = var("VISION_ENDPOINT") {
            self.vision.endpoint = v;
        }
        if let Some(v) = var("VISION_API_KEY") {
            self.vision.api_key = Some(v);
        }
        if let Some(v) = var("CALL_TIMEOUT_SECS") {
            self.call_timeout_secs = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}CALL_TIMEOUT_SECS is not a number: {v}"))?;
        }
        if let Some(v) = var("CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = v
                .parse()
                .with_context(|| format!("{ENV_PREFIX}CONFIDENCE_THRESHOLD is not a number: {v}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            );
        }
        if self.thumbnail_size == 0 {
            bail!("thumbnail_size must be greater than zero");
        }
        if self.call_timeout_secs == 0 {
            bail!("call_timeout_secs must be greater than zero");
        }
        if self.upload_folder.trim_matches('/').is_empty() {
            bail!("upload_folder must not be empty");
        }
        if self.thumbnail_prefix.trim_matches('/').is_empty() {
            bail!("thumbnail_prefix must not be empty");
        }
        if self.resize_program.trim().is_empty() {
            bail!("resize_program must not be empty");
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            upload_folder: self.upload_folder.clone(),
            thumbnail_prefix: self.thumbnail_prefix.clone(),
            thumbnail_size: self.thumbnail_size,
            resize_program: self.resize_program.clone(),
            confidence_threshold: self.confidence_threshold,
            scratch_root: expand_path(&self.scratch_root),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
        }
    }

    pub fn repository_path(&self) -> PathBuf {
        expand_path(&self.repository.path)
    }

    /// JSON schema of the config file, pretty-printed.
    pub fn schema_json() -> Result<String> {
        let schema = schemars::schema_for!(Config);
        serde_json::to_string_pretty(&schema).context("Failed to render config schema")
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).to_string())
}
