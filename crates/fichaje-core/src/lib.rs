//! fichaje-core: face identification and attendance decisions.
//!
//! Uses SCRFD for face detection, the 2d106det landmark model and ArcFace
//! for face recognition, all running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod enrollment;
pub mod landmarks;
pub mod matcher;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod recognizer;
pub mod store;
pub mod types;

pub use enrollment::{EnrollError, Enroller, EnrollmentReport, ImageEnrollError};
pub use models::{ModelPaths, ModelRegistry, ModelSettings};
pub use pipeline::{IdentifyOutcome, Pipeline, PipelineError, PipelineSettings, RejectReason};
pub use store::{MemoryStore, Store, StoreError};
pub use types::{AttendanceEvent, AttendanceKind, BoundingBox, Embedding, Employee};
