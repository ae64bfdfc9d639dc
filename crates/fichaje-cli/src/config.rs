use anyhow::{Context, Result};
use fichaje_core::{ModelPaths, ModelSettings, PipelineSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML file named by `FICHAJE_CONFIG`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub db_path: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    pub models: ModelSettings,
}

/// CLI configuration: TOML file values, overridden by `FICHAJE_*` environment variables.
pub struct Config {
    /// Directory containing the three ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub pipeline: PipelineSettings,
    pub models: ModelSettings,
}

impl Config {
    pub fn load() -> Result<Self> {
        let file = match std::env::var("FICHAJE_CONFIG") {
            Ok(path) => read_file(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("fichaje");

        let model_dir = env("FICHAJE_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(|| data_dir.join("models"));
        let db_path = env("FICHAJE_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("fichaje.db"));

        let mut pipeline = file.pipeline;
        let mut models = file.models;
        override_parsed(&env, "FICHAJE_SIMILARITY_THRESHOLD", &mut pipeline.similarity_threshold);
        override_parsed(&env, "FICHAJE_SCORE_THRESHOLD", &mut models.detector.score_threshold);
        override_parsed(&env, "FICHAJE_NMS_THRESHOLD", &mut models.detector.nms_threshold);
        override_parsed(&env, "FICHAJE_INFERENCE_TIMEOUT_SECS", &mut models.inference_timeout_secs);
        override_parsed(&env, "FICHAJE_INTRA_THREADS", &mut models.intra_threads);

        Self {
            model_dir,
            db_path,
            pipeline,
            models,
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Unparseable values are ignored with a warning, keeping the previous value.
fn override_parsed<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = env(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(FileConfig::default(), env_from(&[("HOME", "/home/kiosk")]));
        assert_eq!(config.model_dir, PathBuf::from("/home/kiosk/.local/share/fichaje/models"));
        assert_eq!(config.db_path, PathBuf::from("/home/kiosk/.local/share/fichaje/fichaje.db"));
        assert_eq!(config.pipeline.similarity_threshold, 0.6);
        assert_eq!(config.models.detector.score_threshold, 0.5);
        assert_eq!(config.models.detector.nms_threshold, 0.4);
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            model_dir = "/opt/models"
            db_path = "/var/lib/fichaje.db"

            [pipeline]
            similarity_threshold = 0.7

            [models]
            intra_threads = 4

            [models.detector]
            score_threshold = 0.45
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            file,
            env_from(&[("FICHAJE_SIMILARITY_THRESHOLD", "0.65"), ("FICHAJE_DB_PATH", "/tmp/x.db")]),
        );
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.pipeline.similarity_threshold, 0.65);
        assert_eq!(config.models.intra_threads, 4);
        assert_eq!(config.models.detector.score_threshold, 0.45);
        // Untouched nested defaults survive a partial table.
        assert_eq!(config.models.detector.nms_threshold, 0.4);
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let config = Config::resolve(
            FileConfig::default(),
            env_from(&[("HOME", "/h"), ("FICHAJE_INFERENCE_TIMEOUT_SECS", "soon")]),
        );
        assert_eq!(config.models.inference_timeout_secs, 10);
    }

    #[test]
    fn test_detector_output_names_from_toml() {
        let file: FileConfig = toml::from_str(
            r#"
            [[models.detector.outputs]]
            stride = 8
            score = "448"
            bbox = "451"
            "#,
        )
        .unwrap();
        let outputs = file.models.detector.outputs.unwrap();
        assert_eq!(outputs[0].stride, 8);
        assert_eq!(outputs[0].score, "448");
    }
}
