//! Storage collaborator interface, plus an in-memory implementation.
//!
//! The pipeline only needs the operations on [`Store`]; administration
//! (creating employees, registering photos) lives on the implementations.

use crate::types::{
    AttendanceEvent, Employee, NewAttendanceEvent, NewVector, ReferenceImage, StoredVector,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("employee not found: {0}")]
    EmployeeNotFound(String),
    #[error("image not found: {0}")]
    ImageNotFound(String),
    #[error("duplicate: {0}")]
    Duplicate(String),
    #[error("invalid image {path}: {reason}")]
    InvalidImage { path: String, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("database: {0}")]
    Database(String),
}

/// What the identification pipeline and enrollment read and write.
pub trait Store: Send + Sync {
    fn employee(&self, employee_id: &str) -> Result<Option<Employee>, StoreError>;

    /// Stored vectors of active employees only, ordered by vector id ascending.
    fn active_vectors(&self) -> Result<Vec<StoredVector>, StoreError>;

    fn reference_images(&self, employee_id: &str) -> Result<Vec<ReferenceImage>, StoreError>;

    /// Encoded bytes of a reference image.
    fn read_image(&self, image: &ReferenceImage) -> Result<Vec<u8>, StoreError>;

    /// Ids of the employee's images that already have a stored vector.
    fn embedded_image_ids(&self, employee_id: &str) -> Result<HashSet<String>, StoreError>;

    fn insert_vector(&self, vector: NewVector) -> Result<StoredVector, StoreError>;

    /// Most recent event by timestamp; ties go to the most recently inserted.
    fn latest_event(&self, employee_id: &str) -> Result<Option<AttendanceEvent>, StoreError>;

    fn insert_event(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError>;
}

#[derive(Default)]
struct MemoryState {
    employees: HashMap<String, Employee>,
    images: Vec<ReferenceImage>,
    image_bytes: HashMap<String, Vec<u8>>,
    vectors: Vec<StoredVector>,
    events: Vec<AttendanceEvent>,
    next_id: u64,
}

impl MemoryState {
    /// Zero-padded sequential ids, so lexical order is insertion order.
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:010}", self.next_id)
    }
}

/// Process-local [`Store`], used in tests and for throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("memory store lock poisoned".into()))
    }

    pub fn add_employee(&self, name: &str, active: bool) -> Result<Employee, StoreError> {
        let mut state = self.state()?;
        let employee = Employee {
            id: state.next_id("emp"),
            name: name.to_string(),
            phone: None,
            position: None,
            area: None,
            active,
            hired_at: Utc::now(),
        };
        state.employees.insert(employee.id.clone(), employee.clone());
        Ok(employee)
    }

    pub fn set_active(&self, employee_id: &str, active: bool) -> Result<Employee, StoreError> {
        let mut state = self.state()?;
        let employee = state
            .employees
            .get_mut(employee_id)
            .ok_or_else(|| StoreError::EmployeeNotFound(employee_id.to_string()))?;
        employee.active = active;
        Ok(employee.clone())
    }

    pub fn remove_employee(&self, employee_id: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        state
            .employees
            .remove(employee_id)
            .ok_or_else(|| StoreError::EmployeeNotFound(employee_id.to_string()))?;
        let removed: HashSet<String> = state
            .images
            .iter()
            .filter(|img| img.employee_id == employee_id)
            .map(|img| img.id.clone())
            .collect();
        state.images.retain(|img| img.employee_id != employee_id);
        state.vectors.retain(|v| !removed.contains(&v.image_id));
        state.events.retain(|e| e.employee_id != employee_id);
        for id in &removed {
            state.image_bytes.remove(id);
        }
        Ok(())
    }

    /// Register an encoded reference photo held in memory.
    pub fn add_image(&self, employee_id: &str, bytes: Vec<u8>) -> Result<ReferenceImage, StoreError> {
        let mut state = self.state()?;
        if !state.employees.contains_key(employee_id) {
            return Err(StoreError::EmployeeNotFound(employee_id.to_string()));
        }
        let id = state.next_id("img");
        let image = ReferenceImage {
            id: id.clone(),
            employee_id: employee_id.to_string(),
            uri: format!("memory://{id}"),
            format: None,
            width: None,
            height: None,
            sha256: None,
        };
        state.images.push(image.clone());
        state.image_bytes.insert(id, bytes);
        Ok(image)
    }

    /// Insert an event as-is, bypassing the attendance decider.
    pub fn add_event(
        &self,
        employee_id: &str,
        kind: crate::types::AttendanceKind,
        timestamp: DateTime<Utc>,
    ) -> Result<AttendanceEvent, StoreError> {
        self.insert_event(NewAttendanceEvent {
            employee_id: employee_id.to_string(),
            kind,
            timestamp,
            confidence: 1.0,
        })
    }

    pub fn events(&self, employee_id: &str) -> Result<Vec<AttendanceEvent>, StoreError> {
        let state = self.state()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.employee_id == employee_id)
            .cloned()
            .collect())
    }
}

impl Store for MemoryStore {
    fn employee(&self, employee_id: &str) -> Result<Option<Employee>, StoreError> {
        Ok(self.state()?.employees.get(employee_id).cloned())
    }

    fn active_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        let state = self.state()?;
        let mut vectors: Vec<StoredVector> = state
            .vectors
            .iter()
            .filter(|v| state.employees.get(&v.employee_id).is_some_and(|e| e.active))
            .cloned()
            .collect();
        vectors.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(vectors)
    }

    fn reference_images(&self, employee_id: &str) -> Result<Vec<ReferenceImage>, StoreError> {
        Ok(self
            .state()?
            .images
            .iter()
            .filter(|img| img.employee_id == employee_id)
            .cloned()
            .collect())
    }

    fn read_image(&self, image: &ReferenceImage) -> Result<Vec<u8>, StoreError> {
        self.state()?
            .image_bytes
            .get(&image.id)
            .cloned()
            .ok_or_else(|| StoreError::ImageNotFound(image.id.clone()))
    }

    fn embedded_image_ids(&self, employee_id: &str) -> Result<HashSet<String>, StoreError> {
        Ok(self
            .state()?
            .vectors
            .iter()
            .filter(|v| v.employee_id == employee_id)
            .map(|v| v.image_id.clone())
            .collect())
    }

    fn insert_vector(&self, vector: NewVector) -> Result<StoredVector, StoreError> {
        let mut state = self.state()?;
        let employee_id = state
            .images
            .iter()
            .find(|img| img.id == vector.image_id)
            .map(|img| img.employee_id.clone())
            .ok_or_else(|| StoreError::ImageNotFound(vector.image_id.clone()))?;
        let stored = StoredVector {
            id: state.next_id("vec"),
            image_id: vector.image_id,
            employee_id,
            model: vector.model,
            version: vector.version,
            embedding: vector.embedding,
        };
        state.vectors.push(stored.clone());
        Ok(stored)
    }

    fn latest_event(&self, employee_id: &str) -> Result<Option<AttendanceEvent>, StoreError> {
        let state = self.state()?;
        // max_by_key keeps the last of equal keys, i.e. the latest insert.
        Ok(state
            .events
            .iter()
            .filter(|e| e.employee_id == employee_id)
            .max_by_key(|e| e.timestamp)
            .cloned())
    }

    fn insert_event(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        let mut state = self.state()?;
        if !state.employees.contains_key(&event.employee_id) {
            return Err(StoreError::EmployeeNotFound(event.employee_id));
        }
        let stored = AttendanceEvent {
            id: state.next_id("att"),
            employee_id: event.employee_id,
            kind: event.kind,
            timestamp: event.timestamp,
            confidence: event.confidence,
        };
        state.events.push(stored.clone());
        Ok(stored)
    }
}
