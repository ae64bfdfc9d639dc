//! SCRFD face detector.
//!
//! Implements the SCRFD (Sample and Computation Redistribution for Efficient Face
//! Detection) decoding: 3-stride anchor-free box regression, sigmoid scoring and
//! NMS post-processing.

use crate::models::{resolve_input_size, run_with_timeout, InferenceModel, ModelError, ModelOutput, OutputInfo};
use crate::preprocess::{self, Letterbox};
use crate::types::BoundingBox;
use image::RgbImage;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// --- Named constants (no magic numbers) ---
const SCRFD_INPUT_SIZE: u32 = 640;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
pub const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
pub const SCRFD_ANCHORS_PER_CELL: usize = 2;

/// Positional fallback: `[0-2]` = scores, `[3-5]` = boxes for strides 8/16/32.
const POSITIONAL_MAPPING: [StrideOutputs; 3] = [
    StrideOutputs { score: 0, bbox: 3 },
    StrideOutputs { score: 1, bbox: 4 },
    StrideOutputs { score: 2, bbox: 5 },
];

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("output mapping: {0}")]
    OutputMapping(String),
    #[error("malformed detector output for stride {stride}: {reason}")]
    MalformedOutput { stride: usize, reason: String },
}

/// Output names for one stride, as given in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrideOutputNames {
    pub stride: usize,
    pub score: String,
    pub bbox: String,
}

/// Detector configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorSettings {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Input size used when the model does not declare a concrete shape.
    pub input_fallback: (u32, u32),
    /// Explicit per-stride output names; discovered at load time when absent.
    pub outputs: Option<Vec<StrideOutputNames>>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            score_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            nms_threshold: SCRFD_NMS_THRESHOLD,
            input_fallback: (SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE),
            outputs: None,
        }
    }
}

/// Output tensor indices for one stride.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideOutputs {
    pub score: usize,
    pub bbox: usize,
}

/// Faces found in one frame, plus what is needed to map them back.
#[derive(Debug, Clone)]
pub struct Detections {
    /// Kept boxes in tensor space, highest score first. Never empty.
    pub faces: Vec<BoundingBox>,
    pub letterbox: Letterbox,
}

impl Detections {
    /// The "main face": the highest-scoring kept box, in tensor space.
    pub fn main_face(&self) -> &BoundingBox {
        &self.faces[0]
    }

    /// The main face mapped to original-image coordinates.
    pub fn main_face_in_image(&self) -> BoundingBox {
        self.letterbox.box_to_original(self.main_face())
    }
}

/// SCRFD-based face detector.
pub struct FaceDetector {
    model: Arc<dyn InferenceModel>,
    input_height: u32,
    input_width: u32,
    /// Per-stride output indices for strides [8, 16, 32], resolved at load time.
    stride_outputs: [StrideOutputs; 3],
    settings: DetectorSettings,
    timeout: Duration,
}

impl FaceDetector {
    /// Wrap a loaded SCRFD model, resolving its input size and output mapping.
    pub fn new(
        model: Arc<dyn InferenceModel>,
        settings: DetectorSettings,
        timeout: Duration,
    ) -> Result<Self, DetectorError> {
        let (input_height, input_width) = resolve_input_size(model.as_ref(), settings.input_fallback)?;

        let stride_outputs = resolve_output_mapping(
            model.outputs(),
            settings.outputs.as_deref(),
            input_width,
            input_height,
        )?;
        tracing::debug!(?stride_outputs, "SCRFD output tensor mapping");

        Ok(Self {
            model,
            input_height,
            input_width,
            stride_outputs,
            settings,
            timeout,
        })
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn settings(&self) -> &DetectorSettings {
        &self.settings
    }

    /// Detect faces in an RGB image.
    ///
    /// Returns `Ok(None)` when no candidate clears the score threshold.
    pub fn detect(&self, image: &RgbImage) -> Result<Option<Detections>, DetectorError> {
        let (input, letterbox) = preprocess::preprocess(image, self.input_width, self.input_height);
        let outputs = run_with_timeout(&self.model, input, self.timeout)?;

        let candidates = self.decode(&outputs)?;
        tracing::debug!(candidates = candidates.len(), "SCRFD raw detections");

        if candidates.is_empty() {
            return Ok(None);
        }

        let faces = nms(candidates, self.settings.nms_threshold);
        Ok(Some(Detections { faces, letterbox }))
    }

    /// Pool decoded candidates from all three strides, in tensor space.
    fn decode(&self, outputs: &[ModelOutput]) -> Result<Vec<BoundingBox>, DetectorError> {
        let mut all_detections = Vec::new();

        for (stride_pos, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let mapping = self.stride_outputs[stride_pos];
            let output = |idx: usize| {
                outputs.get(idx).ok_or_else(|| DetectorError::MalformedOutput {
                    stride,
                    reason: format!("missing output #{idx} (model returned {})", outputs.len()),
                })
            };
            let scores = &output(mapping.score)?.data;
            let bboxes = &output(mapping.bbox)?.data;

            let dets = decode_stride(
                scores,
                bboxes,
                stride,
                self.input_width as usize,
                self.input_height as usize,
                self.settings.score_threshold,
            )?;
            all_detections.extend(dets);
        }

        Ok(all_detections)
    }
}

/// Resolve which model outputs carry the score and box tensors for each stride.
///
/// Order of precedence:
///   1. explicit names from configuration;
///   2. outputs named `score_<stride>` / `bbox_<stride>`;
///   3. declared shapes: last dim 1 = score, 4 = box, anchor count picks the stride;
///   4. the standard positional ordering `[0-2]` = scores, `[3-5]` = boxes.
pub fn resolve_output_mapping(
    outputs: &[OutputInfo],
    configured: Option<&[StrideOutputNames]>,
    input_width: u32,
    input_height: u32,
) -> Result<[StrideOutputs; 3], DetectorError> {
    let position = |name: &str| outputs.iter().position(|o| o.name == name);

    if let Some(configured) = configured {
        let mut mapping = POSITIONAL_MAPPING;
        for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
            let names = configured.iter().find(|n| n.stride == stride).ok_or_else(|| {
                DetectorError::OutputMapping(format!("no configured outputs for stride {stride}"))
            })?;
            let lookup = |name: &str| {
                position(name).ok_or_else(|| {
                    DetectorError::OutputMapping(format!("configured output {name:?} not found in model"))
                })
            };
            mapping[slot] = StrideOutputs {
                score: lookup(&names.score)?,
                bbox: lookup(&names.bbox)?,
            };
        }
        tracing::info!("SCRFD: using configured output tensor mapping");
        return Ok(mapping);
    }

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|stride| {
            Some(StrideOutputs {
                score: position(&format!("score_{stride}"))?,
                bbox: position(&format!("bbox_{stride}"))?,
            })
        })
        .collect();
    if let Some(named) = named {
        tracing::info!("SCRFD: using name-based output tensor mapping");
        return Ok([named[0], named[1], named[2]]);
    }

    if let Some(by_shape) = mapping_from_shapes(outputs, input_width, input_height) {
        tracing::info!("SCRFD: using shape-based output tensor mapping");
        return Ok(by_shape);
    }

    if outputs.len() < 6 {
        return Err(DetectorError::OutputMapping(format!(
            "SCRFD model requires at least 6 outputs (3 strides × score/bbox), got {}",
            outputs.len()
        )));
    }

    tracing::info!(
        names = ?outputs.iter().map(|o| &o.name).collect::<Vec<_>>(),
        "SCRFD: output names not recognized, using positional mapping [0-2]=scores, [3-5]=bboxes"
    );
    Ok(POSITIONAL_MAPPING)
}

fn mapping_from_shapes(
    outputs: &[OutputInfo],
    input_width: u32,
    input_height: u32,
) -> Option<[StrideOutputs; 3]> {
    let find = |stride: usize, last_dim: i64| {
        let anchors = anchor_count(stride, input_width as usize, input_height as usize) as i64;
        outputs.iter().position(|o| match o.shape.as_deref() {
            Some([.., rows, last]) if *last == last_dim => *rows == anchors,
            _ => false,
        })
    };

    let mut mapping = POSITIONAL_MAPPING;
    for (slot, &stride) in SCRFD_STRIDES.iter().enumerate() {
        mapping[slot] = StrideOutputs {
            score: find(stride, 1)?,
            bbox: find(stride, 4)?,
        };
    }
    Some(mapping)
}

/// Number of anchors emitted for one stride: `(H/s) × (W/s) × anchors_per_cell`.
pub fn anchor_count(stride: usize, input_width: usize, input_height: usize) -> usize {
    (input_height / stride) * (input_width / stride) * SCRFD_ANCHORS_PER_CELL
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode detections for a single stride level, in input-tensor coordinates.
pub fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    input_width: usize,
    input_height: usize,
    threshold: f32,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let grid_w = input_width / stride;
    let num_anchors = anchor_count(stride, input_width, input_height);

    if scores.len() < num_anchors {
        return Err(DetectorError::MalformedOutput {
            stride,
            reason: format!("expected {num_anchors} scores, got {}", scores.len()),
        });
    }
    if bboxes.len() < num_anchors * 4 {
        return Err(DetectorError::MalformedOutput {
            stride,
            reason: format!("expected {} box values, got {}", num_anchors * 4, bboxes.len()),
        });
    }

    let s = stride as f32;
    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = sigmoid(scores[idx]);
        if !score.is_finite() || score < threshold {
            continue;
        }

        // Both anchors of a cell share its center.
        let cell = idx / SCRFD_ANCHORS_PER_CELL;
        let cx = (cell % grid_w) as f32 * s + s / 2.0;
        let cy = (cell / grid_w) as f32 * s + s / 2.0;

        // Decode bbox: [left, top, right, bottom] distances * stride
        let off = idx * 4;
        detections.push(BoundingBox {
            x1: cx - bboxes[off] * s,
            y1: cy - bboxes[off + 1] * s,
            x2: cx + bboxes[off + 2] * s,
            y2: cy + bboxes[off + 3] * s,
            confidence: score,
        });
    }

    Ok(detections)
}

/// Non-Maximum Suppression: remove overlapping detections.
///
/// Output is sorted by descending confidence.
pub fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i]);

        for j in (i + 1)..detections.len() {
            if suppressed[j] {
                continue;
            }
            if iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
