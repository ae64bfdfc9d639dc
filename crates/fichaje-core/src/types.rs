use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned face box `(x1, y1, x2, y2)` with a detector score in `[0, 1]`.
///
/// The coordinate space is not encoded in the type: boxes coming out of the
/// detector are in input-tensor space until mapped with
/// [`Letterbox::box_to_original`](crate::preprocess::Letterbox::box_to_original).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Area, with degenerate (inverted) boxes counted as zero.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

/// A facial keypoint in pixel coordinates of the face crop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// Face embedding vector (512-dimensional for ArcFace glintr100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Cosine similarity in [-1, 1]. Higher = more similar.
    ///
    /// Zero-norm operands and length mismatches yield 0.0 instead of NaN.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return 0.0;
        }

        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// An employee as seen by the pipeline. Only `active` employees are matchable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub area: Option<String>,
    pub active: bool,
    pub hired_at: DateTime<Utc>,
}

/// A reference photo registered for an employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceImage {
    pub id: String,
    pub employee_id: String,
    /// Where the encoded bytes live (a file path for on-disk stores).
    pub uri: String,
    pub format: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sha256: Option<String>,
}

/// A stored identity vector, tied to exactly one reference image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: String,
    pub image_id: String,
    pub employee_id: String,
    pub model: String,
    pub version: Option<String>,
    pub embedding: Embedding,
}

/// Identity vector about to be persisted.
#[derive(Debug, Clone)]
pub struct NewVector {
    pub image_id: String,
    pub model: String,
    pub version: Option<String>,
    pub embedding: Embedding,
}

/// The two attendance event types. Serialized with their original labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceKind {
    #[serde(rename = "ENTRADA")]
    CheckIn,
    #[serde(rename = "SALIDA")]
    CheckOut,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceKind::CheckIn => "ENTRADA",
            AttendanceKind::CheckOut => "SALIDA",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRADA" => Some(AttendanceKind::CheckIn),
            "SALIDA" => Some(AttendanceKind::CheckOut),
            _ => None,
        }
    }
}

impl fmt::Display for AttendanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted attendance event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub id: String,
    pub employee_id: String,
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
}

/// Attendance event about to be persisted.
#[derive(Debug, Clone)]
pub struct NewAttendanceEvent {
    pub employee_id: String,
    pub kind: AttendanceKind,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
}
