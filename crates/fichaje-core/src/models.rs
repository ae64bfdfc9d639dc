//! Model loading and inference runtime.
//!
//! Every network sits behind [`InferenceModel`], so pipeline stages never see
//! ONNX Runtime directly and tests can substitute fakes. [`ModelRegistry`]
//! owns the three stages and builds each one at most once, on first use.

use crate::detector::{DetectorError, DetectorSettings, FaceDetector};
use crate::landmarks::{LandmarkDetector, LandmarkError, LandmarkSettings};
use crate::recognizer::{EmbeddingExtractor, EmbeddingSettings, RecognizerError};
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

pub const DETECTOR_MODEL_FILE: &str = "scrfd_10g_bnkps.onnx";
pub const LANDMARK_MODEL_FILE: &str = "2d106det.onnx";
pub const EMBEDDING_MODEL_FILE: &str = "glintr100.onnx";

const DEFAULT_INTRA_THREADS: usize = 2;
const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0} (download from insightface and place in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("inference on {model} timed out after {after:?}")]
    Timeout { model: String, after: Duration },
    #[error("invalid input size {width}x{height} for {model}")]
    InvalidInputSize { model: String, width: u32, height: u32 },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Declared name and shape of one model output. Dynamic dimensions are `-1`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputInfo {
    pub name: String,
    pub shape: Option<Vec<i64>>,
}

impl OutputInfo {
    pub fn new(name: impl Into<String>, shape: Option<Vec<i64>>) -> Self {
        Self { name: name.into(), shape }
    }
}

/// One output tensor, copied out of the runtime.
#[derive(Debug, Clone)]
pub struct ModelOutput {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// A loaded, read-only neural network taking one `[1, 3, H, W]` input.
pub trait InferenceModel: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Declared input `(height, width)`, if the model carries concrete shape metadata.
    fn input_size(&self) -> Option<(u32, u32)>;

    /// Declared outputs, in runtime order.
    fn outputs(&self) -> &[OutputInfo];

    fn run(&self, input: Array4<f32>) -> Result<Vec<ModelOutput>, ModelError>;
}

/// [`InferenceModel`] backed by an ONNX Runtime session.
pub struct OnnxModel {
    name: String,
    // Session::run needs exclusive access.
    session: Mutex<Session>,
    input_size: Option<(u32, u32)>,
    outputs: Vec<OutputInfo>,
}

impl OnnxModel {
    /// Load an ONNX model from the given path.
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, ModelError> {
        if !model_path.exists() {
            return Err(ModelError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());

        let input_size = session
            .inputs()
            .first()
            .and_then(|input| declared_shape(input.dtype()))
            .and_then(|dims| input_hw(&dims));

        let outputs: Vec<OutputInfo> = session
            .outputs()
            .iter()
            .map(|o| OutputInfo::new(o.name(), declared_shape(o.dtype())))
            .collect();

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?outputs.iter().map(|o| &o.name).collect::<Vec<_>>(),
            ?input_size,
            "loaded ONNX model"
        );

        Ok(Self {
            name,
            session: Mutex::new(session),
            input_size,
            outputs,
        })
    }
}

impl InferenceModel for OnnxModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_size(&self) -> Option<(u32, u32)> {
        self.input_size
    }

    fn outputs(&self) -> &[OutputInfo] {
        &self.outputs
    }

    fn run(&self, input: Array4<f32>) -> Result<Vec<ModelOutput>, ModelError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| ModelError::InferenceFailed(format!("{}: session lock poisoned", self.name)))?;

        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut result = Vec::with_capacity(self.outputs.len());
        for (idx, info) in self.outputs.iter().enumerate() {
            let (shape, data) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| ModelError::InferenceFailed(format!("{} output {}: {e}", self.name, info.name)))?;
            result.push(ModelOutput {
                name: info.name.clone(),
                shape: shape.iter().map(|&d| d.max(0) as usize).collect(),
                data: data.to_vec(),
            });
        }

        Ok(result)
    }
}

fn declared_shape(dtype: &ValueType) -> Option<Vec<i64>> {
    match dtype {
        ValueType::Tensor { shape, .. } => Some(shape.iter().copied().collect()),
        _ => None,
    }
}

/// `[N, C, H, W]` → `(H, W)` when both spatial dimensions are concrete.
fn input_hw(dims: &[i64]) -> Option<(u32, u32)> {
    match dims {
        [_, _, h, w] if *h > 0 && *w > 0 => Some((*h as u32, *w as u32)),
        _ => None,
    }
}

/// The model's declared input `(height, width)`, or `fallback` given as `(width, height)`.
///
/// Zero dimensions are rejected here so letterboxing never sees an empty target.
pub fn resolve_input_size(
    model: &dyn InferenceModel,
    fallback: (u32, u32),
) -> Result<(u32, u32), ModelError> {
    let (height, width) = match model.input_size() {
        Some(hw) => hw,
        None => {
            tracing::info!(
                model = model.name(),
                ?fallback,
                "no concrete input shape declared, using fallback"
            );
            (fallback.1, fallback.0)
        }
    };
    if width == 0 || height == 0 {
        return Err(ModelError::InvalidInputSize {
            model: model.name().to_string(),
            width,
            height,
        });
    }
    Ok((height, width))
}

/// Run `model` on a worker thread and wait at most `timeout` for the result.
///
/// A hung runtime surfaces as [`ModelError::Timeout`]; the worker is detached.
pub fn run_with_timeout(
    model: &Arc<dyn InferenceModel>,
    input: Array4<f32>,
    timeout: Duration,
) -> Result<Vec<ModelOutput>, ModelError> {
    let (tx, rx) = mpsc::channel();
    let worker = Arc::clone(model);

    std::thread::Builder::new()
        .name(format!("fichaje-infer-{}", model.name()))
        .spawn(move || {
            let _ = tx.send(worker.run(input));
        })
        .map_err(|e| ModelError::InferenceFailed(format!("spawn inference worker: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(model = model.name(), ?timeout, "inference timed out");
            Err(ModelError::Timeout {
                model: model.name().to_string(),
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(ModelError::InferenceFailed(format!(
            "{}: inference worker exited without a result",
            model.name()
        ))),
    }
}

/// Paths to the three ONNX artifacts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks: PathBuf,
    pub embedding: PathBuf,
}

impl ModelPaths {
    /// Standard file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_MODEL_FILE),
            landmarks: dir.join(LANDMARK_MODEL_FILE),
            embedding: dir.join(EMBEDDING_MODEL_FILE),
        }
    }
}

/// Per-stage settings shared by every request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub detector: DetectorSettings,
    pub landmarks: LandmarkSettings,
    pub embedding: EmbeddingSettings,
    pub intra_threads: usize,
    pub inference_timeout_secs: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            detector: DetectorSettings::default(),
            landmarks: LandmarkSettings::default(),
            embedding: EmbeddingSettings::default(),
            intra_threads: DEFAULT_INTRA_THREADS,
            inference_timeout_secs: DEFAULT_INFERENCE_TIMEOUT_SECS,
        }
    }
}

impl ModelSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference_timeout_secs.max(1))
    }
}

enum ModelSource {
    Files(ModelPaths),
    Preloaded {
        detector: Arc<dyn InferenceModel>,
        landmarks: Arc<dyn InferenceModel>,
        embedding: Arc<dyn InferenceModel>,
    },
}

/// Explicitly constructed holder for the long-lived pipeline stages.
///
/// Each stage is initialized at most once, even when several requests race
/// on first use. A failed load leaves the slot empty, so a later call retries.
pub struct ModelRegistry {
    source: ModelSource,
    settings: ModelSettings,
    detector: OnceCell<Arc<FaceDetector>>,
    landmarks: OnceCell<Arc<LandmarkDetector>>,
    embedding: OnceCell<Arc<EmbeddingExtractor>>,
}

impl ModelRegistry {
    /// Registry that lazily loads models from disk.
    pub fn from_paths(paths: ModelPaths, settings: ModelSettings) -> Self {
        Self::with_source(ModelSource::Files(paths), settings)
    }

    /// Registry over already-loaded models (used to inject fakes).
    pub fn preloaded(
        detector: Arc<dyn InferenceModel>,
        landmarks: Arc<dyn InferenceModel>,
        embedding: Arc<dyn InferenceModel>,
        settings: ModelSettings,
    ) -> Self {
        Self::with_source(
            ModelSource::Preloaded {
                detector,
                landmarks,
                embedding,
            },
            settings,
        )
    }

    fn with_source(source: ModelSource, settings: ModelSettings) -> Self {
        Self {
            source,
            settings,
            detector: OnceCell::new(),
            landmarks: OnceCell::new(),
            embedding: OnceCell::new(),
        }
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    pub fn detector(&self) -> Result<Arc<FaceDetector>, DetectorError> {
        self.detector
            .get_or_try_init(|| -> Result<_, DetectorError> {
                let model = match &self.source {
                    ModelSource::Files(paths) => self.load(&paths.detector)?,
                    ModelSource::Preloaded { detector, .. } => Arc::clone(detector),
                };
                let detector = FaceDetector::new(
                    model,
                    self.settings.detector.clone(),
                    self.settings.inference_timeout(),
                )?;
                Ok(Arc::new(detector))
            })
            .cloned()
    }

    pub fn landmarks(&self) -> Result<Arc<LandmarkDetector>, LandmarkError> {
        self.landmarks
            .get_or_try_init(|| -> Result<_, LandmarkError> {
                let model = match &self.source {
                    ModelSource::Files(paths) => self.load(&paths.landmarks)?,
                    ModelSource::Preloaded { landmarks, .. } => Arc::clone(landmarks),
                };
                Ok(Arc::new(LandmarkDetector::new(
                    model,
                    self.settings.landmarks.clone(),
                    self.settings.inference_timeout(),
                )?))
            })
            .cloned()
    }

    pub fn embedding(&self) -> Result<Arc<EmbeddingExtractor>, RecognizerError> {
        self.embedding
            .get_or_try_init(|| -> Result<_, RecognizerError> {
                let model = match &self.source {
                    ModelSource::Files(paths) => self.load(&paths.embedding)?,
                    ModelSource::Preloaded { embedding, .. } => Arc::clone(embedding),
                };
                Ok(Arc::new(EmbeddingExtractor::new(
                    model,
                    self.settings.embedding.clone(),
                    self.settings.inference_timeout(),
                )?))
            })
            .cloned()
    }

    /// Force all three stages to load, failing on the first one that cannot.
    pub fn ensure_loaded(&self) -> Result<(), crate::pipeline::PipelineError> {
        self.detector()?;
        self.landmarks()?;
        self.embedding()?;
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn InferenceModel>, ModelError> {
        let model = OnnxModel::load(path, self.settings.intra_threads)?;
        Ok(Arc::new(model))
    }
}
