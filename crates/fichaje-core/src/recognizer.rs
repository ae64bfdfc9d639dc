//! ArcFace embedding extractor.
//!
//! Extracts 512-dimensional face embeddings from aligned 112×112 face images
//! using the glintr100 ArcFace model, and L2-normalizes them.

use crate::models::{resolve_input_size, run_with_timeout, InferenceModel, ModelError};
use crate::preprocess::{self, PreprocessError};
use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// --- Named constants ---
const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_EMBEDDING_DIM: usize = 512;
pub const ARCFACE_MODEL_NAME: &str = "arcface-glintr100";
pub const ARCFACE_MODEL_VERSION: &str = "1.0";

/// Guard against division by an exactly-zero norm.
const NORM_EPSILON: f32 = 1e-12;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error("invalid embedding output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub dim: usize,
    /// Input size used when the model does not declare a concrete shape.
    pub input_fallback: (u32, u32),
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            dim: ARCFACE_EMBEDDING_DIM,
            input_fallback: (ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE),
        }
    }
}

/// ArcFace-based embedding extractor.
pub struct EmbeddingExtractor {
    model: Arc<dyn InferenceModel>,
    input_height: u32,
    input_width: u32,
    settings: EmbeddingSettings,
    timeout: Duration,
}

impl EmbeddingExtractor {
    pub fn new(
        model: Arc<dyn InferenceModel>,
        settings: EmbeddingSettings,
        timeout: Duration,
    ) -> Result<Self, ModelError> {
        let (input_height, input_width) = resolve_input_size(model.as_ref(), settings.input_fallback)?;
        Ok(Self {
            model,
            input_height,
            input_width,
            settings,
            timeout,
        })
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    /// Extract an embedding from an encoded aligned face (e.g. read back from storage).
    pub fn extract_encoded(&self, bytes: &[u8]) -> Result<Embedding, RecognizerError> {
        let face = preprocess::decode_image(bytes)?;
        self.extract(&face)
    }

    /// Extract an L2-normalized embedding from an aligned face image.
    pub fn extract(&self, aligned_face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = preprocess::to_nchw(&self.fit_input(aligned_face));
        let outputs = run_with_timeout(&self.model, input, self.timeout)?;

        let raw = outputs
            .into_iter()
            .next()
            .ok_or_else(|| RecognizerError::InvalidOutput("model returned no outputs".into()))?
            .data;

        if raw.len() != self.settings.dim {
            return Err(RecognizerError::InvalidOutput(format!(
                "expected {}-dim embedding, got {}",
                self.settings.dim,
                raw.len()
            )));
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(RecognizerError::InvalidOutput("embedding contains non-finite values".into()));
        }

        Ok(Embedding::new(l2_normalize(&raw)))
    }

    /// Aligned faces should already match the model input; anything else is stretched.
    fn fit_input(&self, face: &RgbImage) -> RgbImage {
        if face.dimensions() == (self.input_width, self.input_height) {
            face.clone()
        } else {
            imageops::resize(face, self.input_width, self.input_height, FilterType::Triangle)
        }
    }
}

/// `v / max(‖v‖₂, ε)`. A zero vector maps to itself.
pub fn l2_normalize(values: &[f32]) -> Vec<f32> {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    let denom = norm.max(NORM_EPSILON);
    values.iter().map(|x| x / denom).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelOutput, OutputInfo};
    use image::Rgb;
    use ndarray::Array4;
    use std::sync::Mutex;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[test]
    fn test_l2_normalize_unit_norm() {
        let v = l2_normalize(&[3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert!((norm(&v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_idempotent() {
        let inputs: [&[f32]; 4] = [
            &[3.0, 4.0],
            &[1e-3, -2e-3, 5e-4],
            &[100.0, 0.0, -100.0, 42.0],
            &[0.0, 0.0, 0.0],
        ];
        for v in inputs {
            let once = l2_normalize(v);
            let twice = l2_normalize(&once);
            for (a, b) in once.iter().zip(twice.iter()) {
                assert!((a - b).abs() < 1e-6, "{once:?} vs {twice:?}");
            }
        }
    }

    #[test]
    fn test_l2_normalize_zero_vector() {
        let v = l2_normalize(&[0.0, 0.0, 0.0]);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
        assert!(v.iter().all(|x| !x.is_nan()));
    }

    /// Records the input tensor and returns a fixed raw vector.
    struct FakeArcFace {
        raw: Vec<f32>,
        seen: Mutex<Option<Vec<usize>>>,
    }

    impl InferenceModel for FakeArcFace {
        fn name(&self) -> &str {
            "fake-arcface"
        }
        fn input_size(&self) -> Option<(u32, u32)> {
            None
        }
        fn outputs(&self) -> &[OutputInfo] {
            &[]
        }
        fn run(&self, input: Array4<f32>) -> Result<Vec<ModelOutput>, ModelError> {
            *self.seen.lock().unwrap() = Some(input.shape().to_vec());
            Ok(vec![ModelOutput {
                name: "683".into(),
                shape: vec![1, self.raw.len()],
                data: self.raw.clone(),
            }])
        }
    }

    fn extractor(raw: Vec<f32>) -> (EmbeddingExtractor, Arc<FakeArcFace>) {
        let fake = Arc::new(FakeArcFace { raw, seen: Mutex::new(None) });
        let model: Arc<dyn InferenceModel> = fake.clone();
        let ex = EmbeddingExtractor::new(model, EmbeddingSettings::default(), Duration::from_secs(5)).unwrap();
        (ex, fake)
    }

    #[test]
    fn test_extract_normalizes_output() {
        let raw: Vec<f32> = (0..512).map(|i| (i as f32 - 256.0) * 0.1).collect();
        let (ex, fake) = extractor(raw);
        let face = RgbImage::from_pixel(112, 112, Rgb([128, 128, 128]));
        let embedding = ex.extract(&face).unwrap();
        assert_eq!(embedding.values.len(), 512);
        assert!((embedding.norm() - 1.0).abs() < 1e-5);
        assert_eq!(fake.seen.lock().unwrap().as_deref(), Some(&[1, 3, 112, 112][..]));
    }

    #[test]
    fn test_extract_resizes_non_canonical_input() {
        let (ex, fake) = extractor(vec![1.0; 512]);
        let face = RgbImage::new(200, 150);
        ex.extract(&face).unwrap();
        assert_eq!(fake.seen.lock().unwrap().as_deref(), Some(&[1, 3, 112, 112][..]));
    }

    #[test]
    fn test_extract_rejects_wrong_dimension() {
        let (ex, _) = extractor(vec![1.0; 128]);
        let result = ex.extract(&RgbImage::new(112, 112));
        assert!(matches!(result, Err(RecognizerError::InvalidOutput(_))));
    }

    #[test]
    fn test_extract_encoded_rejects_garbage() {
        let (ex, _) = extractor(vec![1.0; 512]);
        let result = ex.extract_encoded(b"not an image");
        assert!(matches!(result, Err(RecognizerError::Preprocess(_))));
    }
}
