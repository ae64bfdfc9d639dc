//! 106-point facial landmark model (InsightFace 2d106det).

use crate::models::{resolve_input_size, run_with_timeout, InferenceModel, ModelError};
use crate::preprocess;
use crate::types::Landmark;
use image::RgbImage;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 192;
const LANDMARK_POINTS: usize = 106;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("landmark model returned no output")]
    MissingOutput,
    #[error("unexpected landmark output length {actual}, expected {expected}")]
    UnexpectedLength { expected: usize, actual: usize },
}

/// How the landmark model lays out its flat output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandmarkLayout {
    /// `[x1..xN, y1..yN]`
    ByAxis,
    /// `[x1, y1, x2, y2, ...]`
    ByPoint,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LandmarkSettings {
    pub points: usize,
    /// Input size used when the model does not declare a concrete shape.
    pub input_fallback: (u32, u32),
    /// Forced output layout; inferred from the output shape when absent.
    pub layout: Option<LandmarkLayout>,
}

impl Default for LandmarkSettings {
    fn default() -> Self {
        Self {
            points: LANDMARK_POINTS,
            input_fallback: (LANDMARK_INPUT_SIZE, LANDMARK_INPUT_SIZE),
            layout: None,
        }
    }
}

/// Runs the landmark model over a face crop.
pub struct LandmarkDetector {
    model: Arc<dyn InferenceModel>,
    input_height: u32,
    input_width: u32,
    settings: LandmarkSettings,
    timeout: Duration,
}

impl LandmarkDetector {
    pub fn new(
        model: Arc<dyn InferenceModel>,
        settings: LandmarkSettings,
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

    /// Landmarks for a face crop, in the crop's pixel coordinates.
    pub fn detect(&self, crop: &RgbImage) -> Result<Vec<Landmark>, LandmarkError> {
        let (input, letterbox) = preprocess::preprocess(crop, self.input_width, self.input_height);
        let outputs = run_with_timeout(&self.model, input, self.timeout)?;
        let output = outputs.first().ok_or(LandmarkError::MissingOutput)?;

        let layout = self
            .settings
            .layout
            .unwrap_or_else(|| infer_layout(&output.shape, self.settings.points));
        let normalized = decode_landmarks(&output.data, self.settings.points, layout)?;

        Ok(normalized
            .into_iter()
            .map(|(nx, ny)| Landmark {
                x: letterbox.x_to_original(nx * self.input_width as f32),
                y: letterbox.y_to_original(ny * self.input_height as f32),
            })
            .collect())
    }
}

/// `[.., N, 2]` shapes are per-point; everything else is treated as per-axis.
pub fn infer_layout(shape: &[usize], points: usize) -> LandmarkLayout {
    match shape {
        [.., n, 2] if *n == points => LandmarkLayout::ByPoint,
        _ => LandmarkLayout::ByAxis,
    }
}

/// Split a flat landmark output into normalized `(x, y)` pairs.
pub fn decode_landmarks(
    data: &[f32],
    points: usize,
    layout: LandmarkLayout,
) -> Result<Vec<(f32, f32)>, LandmarkError> {
    if data.len() != points * 2 {
        return Err(LandmarkError::UnexpectedLength {
            expected: points * 2,
            actual: data.len(),
        });
    }

    let pairs = match layout {
        LandmarkLayout::ByAxis => (0..points).map(|i| (data[i], data[points + i])).collect(),
        LandmarkLayout::ByPoint => data.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
    };
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelOutput, OutputInfo};
    use ndarray::Array4;

    #[test]
    fn test_decode_by_axis() {
        let data = [0.1, 0.2, 0.3, 0.7, 0.8, 0.9];
        let pts = decode_landmarks(&data, 3, LandmarkLayout::ByAxis).unwrap();
        assert_eq!(pts, vec![(0.1, 0.7), (0.2, 0.8), (0.3, 0.9)]);
    }

    #[test]
    fn test_decode_by_point() {
        let data = [0.1, 0.7, 0.2, 0.8, 0.3, 0.9];
        let pts = decode_landmarks(&data, 3, LandmarkLayout::ByPoint).unwrap();
        assert_eq!(pts, vec![(0.1, 0.7), (0.2, 0.8), (0.3, 0.9)]);
    }

    #[test]
    fn test_decode_rejects_other_lengths() {
        let data = vec![0.5f32; 211];
        let result = decode_landmarks(&data, 106, LandmarkLayout::ByAxis);
        assert!(matches!(
            result,
            Err(LandmarkError::UnexpectedLength { expected: 212, actual: 211 })
        ));
    }

    #[test]
    fn test_infer_layout() {
        assert_eq!(infer_layout(&[1, 212], 106), LandmarkLayout::ByAxis);
        assert_eq!(infer_layout(&[1, 106, 2], 106), LandmarkLayout::ByPoint);
        assert_eq!(infer_layout(&[1, 1, 106, 2], 106), LandmarkLayout::ByPoint);
        assert_eq!(infer_layout(&[212], 106), LandmarkLayout::ByAxis);
    }

    struct FixedLandmarks;

    impl InferenceModel for FixedLandmarks {
        fn name(&self) -> &str {
            "fixed-landmarks"
        }
        fn input_size(&self) -> Option<(u32, u32)> {
            Some((100, 100))
        }
        fn outputs(&self) -> &[OutputInfo] {
            &[]
        }
        fn run(&self, _input: Array4<f32>) -> Result<Vec<ModelOutput>, ModelError> {
            // Two points, per-axis: (0.5, 0.5) and (1.0, 0.25)
            Ok(vec![ModelOutput {
                name: "fc1".into(),
                shape: vec![1, 4],
                data: vec![0.5, 1.0, 0.5, 0.25],
            }])
        }
    }

    #[test]
    fn test_detect_maps_into_crop_coordinates() {
        let settings = LandmarkSettings {
            points: 2,
            ..LandmarkSettings::default()
        };
        let detector = LandmarkDetector::new(Arc::new(FixedLandmarks), settings, Duration::from_secs(5)).unwrap();
        // 50x25 crop letterboxed into 100x100: scale 2, pad_y = 25
        let crop = RgbImage::new(50, 25);
        let pts = detector.detect(&crop).unwrap();
        assert_eq!(pts.len(), 2);
        // (50, 50) in tensor → (25, 12.5) in crop
        assert!((pts[0].x - 25.0).abs() < 1e-4);
        assert!((pts[0].y - 12.5).abs() < 1e-4);
        // (100, 25) in tensor → (50, 0) in crop (clamped)
        assert!((pts[1].x - 50.0).abs() < 1e-4);
        assert!(pts[1].y.abs() < 1e-4);
    }
}
