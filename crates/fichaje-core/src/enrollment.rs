//! Bulk embedding generation for an employee's reference photos.

use crate::pipeline::{Pipeline, PipelineError};
use crate::preprocess;
use crate::recognizer::{ARCFACE_MODEL_NAME, ARCFACE_MODEL_VERSION};
use crate::store::StoreError;
use crate::types::{NewVector, ReferenceImage};
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("employee not found: {0}")]
    EmployeeNotFound(String),
    #[error("employee {0} has no reference images")]
    NoImages(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single reference image produced no vector. Never aborts the batch.
#[derive(Error, Debug)]
pub enum ImageEnrollError {
    #[error("cannot read image: {0}")]
    Unreadable(#[source] StoreError),
    #[error("no face detected")]
    NoFace,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// One reference image that could not be embedded.
#[derive(Debug, Serialize)]
pub struct FailedImage {
    pub image_id: String,
    #[serde(serialize_with = "as_message")]
    pub error: ImageEnrollError,
}

fn as_message<S: Serializer>(error: &ImageEnrollError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

#[derive(Debug, Serialize)]
pub struct EnrollmentReport {
    pub employee_id: String,
    pub images_found: usize,
    /// Images that already had a stored vector.
    pub skipped: usize,
    pub embeddings_created: usize,
    pub failed_images: Vec<FailedImage>,
}

pub struct Enroller<'a> {
    pipeline: &'a Pipeline,
}

impl<'a> Enroller<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        Self { pipeline }
    }

    /// Embed every not-yet-embedded reference image of `employee_id`.
    ///
    /// Per-image failures are collected in the report; only a missing
    /// employee, an empty photo set or a storage failure abort the batch.
    pub fn enroll(&self, employee_id: &str) -> Result<EnrollmentReport, EnrollError> {
        let store = self.pipeline.store();
        if store.employee(employee_id)?.is_none() {
            return Err(EnrollError::EmployeeNotFound(employee_id.to_string()));
        }

        let images = store.reference_images(employee_id)?;
        if images.is_empty() {
            return Err(EnrollError::NoImages(employee_id.to_string()));
        }
        let embedded = store.embedded_image_ids(employee_id)?;

        let mut report = EnrollmentReport {
            employee_id: employee_id.to_string(),
            images_found: images.len(),
            skipped: 0,
            embeddings_created: 0,
            failed_images: Vec::new(),
        };

        for image in &images {
            if embedded.contains(&image.id) {
                report.skipped += 1;
                continue;
            }

            match self.embed(image) {
                Ok(vector) => {
                    store.insert_vector(vector)?;
                    report.embeddings_created += 1;
                }
                Err(error) => {
                    tracing::warn!(image_id = %image.id, %error, "enrollment failed for image");
                    report.failed_images.push(FailedImage {
                        image_id: image.id.clone(),
                        error,
                    });
                }
            }
        }

        tracing::info!(
            employee_id,
            found = report.images_found,
            skipped = report.skipped,
            created = report.embeddings_created,
            failed = report.failed_images.len(),
            "enrollment finished"
        );
        Ok(report)
    }

    fn embed(&self, image: &ReferenceImage) -> Result<NewVector, ImageEnrollError> {
        let bytes = self
            .pipeline
            .store()
            .read_image(image)
            .map_err(ImageEnrollError::Unreadable)?;
        let decoded = preprocess::decode_image(&bytes).map_err(PipelineError::from)?;
        let embedding = self
            .pipeline
            .embed_image(&decoded)?
            .ok_or(ImageEnrollError::NoFace)?;

        Ok(NewVector {
            image_id: image.id.clone(),
            model: ARCFACE_MODEL_NAME.to_string(),
            version: Some(ARCFACE_MODEL_VERSION.to_string()),
            embedding,
        })
    }
}
