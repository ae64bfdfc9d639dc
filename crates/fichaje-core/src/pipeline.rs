//! End-to-end identification: image bytes in, attendance outcome out.

use crate::alignment::{self, AlignedFace};
use crate::attendance::{AttendanceDecider, Decision, Ineligible};
use crate::detector::DetectorError;
use crate::landmarks::LandmarkError;
use crate::matcher::{CosineMatcher, MatchResult, Matcher, DEFAULT_SIMILARITY_THRESHOLD};
use crate::models::ModelRegistry;
use crate::preprocess::{self, PreprocessError};
use crate::recognizer::RecognizerError;
use crate::store::{Store, StoreError};
use crate::types::{AttendanceEvent, BoundingBox, Embedding, Landmark};
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

/// Failures that abort a single request. Non-matches are not errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Landmark(#[from] LandmarkError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub similarity_threshold: f32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

/// Why an identification request produced no attendance event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NoFaceDetected,
    FaceNotRecognized,
    EmployeeInactive,
    EmployeeNotFound,
}

impl RejectReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::NoFaceDetected => "no_face_detected",
            RejectReason::FaceNotRecognized => "face_not_recognized",
            RejectReason::EmployeeInactive => "employee_inactive",
            RejectReason::EmployeeNotFound => "employee_not_found",
        }
    }

    /// Message shown at the kiosk.
    pub fn message(&self) -> &'static str {
        match self {
            RejectReason::NoFaceDetected => "No se detectó rostro",
            RejectReason::FaceNotRecognized => "Rostro no reconocido",
            RejectReason::EmployeeInactive => "Empleado inactivo",
            RejectReason::EmployeeNotFound => "Empleado no encontrado",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdentifyOutcome {
    Rejected(RejectReason),
    /// `confidence` is the match similarity; `event` is what was persisted.
    Recorded { confidence: f32, event: AttendanceEvent },
}

impl IdentifyOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, IdentifyOutcome::Recorded { .. })
    }
}

impl Serialize for IdentifyOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            IdentifyOutcome::Rejected(reason) => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("matched", &false)?;
                map.serialize_entry("reason", reason.code())?;
                map.serialize_entry("message", reason.message())?;
                map.end()
            }
            IdentifyOutcome::Recorded { confidence, event } => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("matched", &true)?;
                map.serialize_entry("employee_id", &event.employee_id)?;
                map.serialize_entry("confidence", confidence)?;
                map.serialize_entry("event_type", &event.kind)?;
                map.serialize_entry("timestamp", &event.timestamp)?;
                map.end()
            }
        }
    }
}

/// The single face a request is about.
#[derive(Debug, Clone)]
pub struct MainFace {
    /// Original-image coordinates.
    pub bbox: BoundingBox,
    /// Crop coordinates.
    pub landmarks: Vec<Landmark>,
    pub aligned: AlignedFace,
}

pub struct Pipeline {
    models: Arc<ModelRegistry>,
    store: Arc<dyn Store>,
    decider: AttendanceDecider,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(models: Arc<ModelRegistry>, store: Arc<dyn Store>, settings: PipelineSettings) -> Self {
        Self {
            models,
            store,
            decider: AttendanceDecider::new(),
            settings,
        }
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Detect, crop, landmark and align the highest-scoring face.
    ///
    /// Returns `Ok(None)` when the detector finds nothing; further faces are ignored.
    pub fn detect_main_face(&self, image: &RgbImage) -> Result<Option<MainFace>, PipelineError> {
        let detector = self.models.detector()?;
        let Some(detections) = detector.detect(image)? else {
            return Ok(None);
        };
        if detections.faces.len() > 1 {
            tracing::debug!(faces = detections.faces.len(), "multiple faces, using the top-scoring one");
        }

        let bbox = detections.main_face_in_image();
        let crop = alignment::crop_face(image, &bbox);
        let landmarks = self.models.landmarks()?.detect(&crop)?;
        let aligned = alignment::align_face(&crop);

        Ok(Some(MainFace { bbox, landmarks, aligned }))
    }

    /// Embedding of the main face in `image`, or `None` when no face is found.
    pub fn embed_image(&self, image: &RgbImage) -> Result<Option<Embedding>, PipelineError> {
        let Some(face) = self.detect_main_face(image)? else {
            return Ok(None);
        };
        let embedding = self.models.embedding()?.extract(&face.aligned.image)?;
        Ok(Some(embedding))
    }

    /// Identify the person in an encoded image and record their attendance.
    pub fn identify(&self, bytes: &[u8]) -> Result<IdentifyOutcome, PipelineError> {
        self.identify_at(bytes, Utc::now())
    }

    /// [`identify`](Self::identify) with an explicit event timestamp.
    pub fn identify_at(&self, bytes: &[u8], now: DateTime<Utc>) -> Result<IdentifyOutcome, PipelineError> {
        let image = preprocess::decode_image(bytes)?;

        let Some(probe) = self.embed_image(&image)? else {
            tracing::info!("no face detected");
            return Ok(IdentifyOutcome::Rejected(RejectReason::NoFaceDetected));
        };

        let corpus = self.store.active_vectors()?;
        let result = CosineMatcher.compare(&probe, &corpus, self.settings.similarity_threshold);
        tracing::debug!(corpus = corpus.len(), ?result, "match result");

        let (employee_id, similarity) = match result {
            MatchResult::Matched {
                employee_id,
                similarity,
                ..
            } => (employee_id, similarity),
            MatchResult::NoMatch { best_similarity } => {
                tracing::info!(?best_similarity, threshold = self.settings.similarity_threshold, "face not recognized");
                return Ok(IdentifyOutcome::Rejected(RejectReason::FaceNotRecognized));
            }
        };

        let outcome = match self.decider.decide(self.store.as_ref(), &employee_id, similarity, now)? {
            Decision::Recorded(event) => IdentifyOutcome::Recorded {
                confidence: similarity,
                event,
            },
            Decision::NotEligible(Ineligible::Inactive) => IdentifyOutcome::Rejected(RejectReason::EmployeeInactive),
            Decision::NotEligible(Ineligible::Missing) => IdentifyOutcome::Rejected(RejectReason::EmployeeNotFound),
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttendanceKind;

    #[test]
    fn test_rejected_outcome_json() {
        let json = serde_json::to_value(IdentifyOutcome::Rejected(RejectReason::NoFaceDetected)).unwrap();
        assert_eq!(json["matched"], false);
        assert_eq!(json["reason"], "no_face_detected");
        assert_eq!(json["message"], "No se detectó rostro");
    }

    #[test]
    fn test_recorded_outcome_json() {
        let event = AttendanceEvent {
            id: "att-1".into(),
            employee_id: "emp-1".into(),
            kind: AttendanceKind::CheckIn,
            timestamp: Utc::now(),
            confidence: 1.0,
        };
        let json = serde_json::to_value(IdentifyOutcome::Recorded { confidence: 1.0, event }).unwrap();
        assert_eq!(json["matched"], true);
        assert_eq!(json["employee_id"], "emp-1");
        assert_eq!(json["event_type"], "ENTRADA");
        assert_eq!(json["confidence"], 1.0);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_reject_codes_are_distinct() {
        let reasons = [
            RejectReason::NoFaceDetected,
            RejectReason::FaceNotRecognized,
            RejectReason::EmployeeInactive,
            RejectReason::EmployeeNotFound,
        ];
        let codes: std::collections::HashSet<_> = reasons.iter().map(|r| r.code()).collect();
        assert_eq!(codes.len(), reasons.len());
    }
}
