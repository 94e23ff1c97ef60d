use mien_core::similarity::DEFAULT_THRESHOLD;
use mien_core::pipeline::DEFAULT_TOP_K;
use mien_core::EnrollPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Upper bound for per-request top-k.
pub const MAX_TOP_K: usize = 10;

/// Which message bus the daemon registers on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Session,
    System,
}

impl FromStr for BusKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(BusKind::Session),
            "system" => Ok(BusKind::System),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Daemon configuration: optional TOML file (`MIEN_CONFIG`), then
/// `MIEN_*` environment overrides, then defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`.
    pub db_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Cosine similarity threshold for a match, in [0, 1].
    pub similarity_threshold: f32,
    /// Candidates requested per face when the caller does not say.
    pub top_k: usize,
    /// Averaged or per-sample enrollment records.
    pub enroll_policy: EnrollPolicy,
    pub bus: BusKind,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("mien");

        Self {
            db_path: data_dir.join("faces.db"),
            model_dir: PathBuf::from("/usr/share/mien/models"),
            similarity_threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
            enroll_policy: EnrollPolicy::default(),
            bus: BusKind::default(),
        }
    }
}

impl Config {
    /// Load from `MIEN_CONFIG` (if set) and the process environment.
    pub fn load() -> anyhow::Result<Self> {
        let base = match std::env::var("MIEN_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config: Config = toml::from_str(&raw)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `MIEN_*` overrides from `lookup`. Unparseable values are
    /// ignored with a warning.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("MIEN_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MIEN_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        override_parsed(&lookup, "MIEN_SIMILARITY_THRESHOLD", &mut self.similarity_threshold);
        override_parsed(&lookup, "MIEN_TOP_K", &mut self.top_k);
        override_parsed(&lookup, "MIEN_ENROLL_POLICY", &mut self.enroll_policy);
        override_parsed(&lookup, "MIEN_BUS", &mut self.bus);

        let top_k = self.top_k.clamp(1, MAX_TOP_K);
        if top_k != self.top_k {
            tracing::warn!(top_k = self.top_k, clamped = top_k, "top_k outside [1, 10]; clamped");
            self.top_k = top_k;
        }
        self
    }

    /// Path to the SCRFD face detection model.
    #[cfg(feature = "onnx")]
    pub fn detection_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the identity embedding model.
    #[cfg(feature = "onnx")]
    pub fn embedding_model_path(&self) -> PathBuf {
        self.model_dir.join("arcface.onnx")
    }

    /// Path to the emotion classification model.
    #[cfg(feature = "onnx")]
    pub fn emotion_model_path(&self) -> PathBuf {
        self.model_dir.join("emotion.onnx")
    }

    pub fn in_memory_db(&self) -> bool {
        self.db_path.as_os_str() == ":memory:"
    }
}

fn override_parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(e) => tracing::warn!(key, value = %raw, error = %e, "ignoring invalid config override"),
    }
}
