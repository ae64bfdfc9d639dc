//! Check-in/check-out alternation.

use crate::store::{Store, StoreError};
use crate::types::{AttendanceEvent, AttendanceKind, NewAttendanceEvent};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Next event type given the employee's most recent event.
///
/// Only the latest event is inspected; earlier history is not re-validated.
pub fn next_kind(latest: Option<&AttendanceEvent>) -> AttendanceKind {
    match latest.map(|e| e.kind) {
        Some(AttendanceKind::CheckIn) => AttendanceKind::CheckOut,
        Some(AttendanceKind::CheckOut) | None => AttendanceKind::CheckIn,
    }
}

/// Why a matched employee cannot be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligible {
    Inactive,
    Missing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Recorded(AttendanceEvent),
    NotEligible(Ineligible),
}

/// Decides and persists attendance events.
///
/// The latest-event read and the insert for one employee run under that
/// employee's lock, so a process has at most one attendance write in flight
/// per employee.
#[derive(Default)]
pub struct AttendanceDecider {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AttendanceDecider {
    pub fn new() -> Self {
        Self::default()
    }

    fn employee_lock(&self, employee_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(employee_id.to_string()).or_default())
    }

    /// Record the next event for `employee_id`, re-checking eligibility first.
    pub fn decide(
        &self,
        store: &dyn Store,
        employee_id: &str,
        confidence: f32,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        let lock = self.employee_lock(employee_id);
        // The guarded section holds no state of its own, so a poisoned lock is still usable.
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        match store.employee(employee_id)? {
            None => {
                tracing::info!(employee_id, "matched employee no longer exists");
                return Ok(Decision::NotEligible(Ineligible::Missing));
            }
            Some(employee) if !employee.active => {
                tracing::info!(employee_id, "matched employee is inactive");
                return Ok(Decision::NotEligible(Ineligible::Inactive));
            }
            Some(_) => {}
        }

        let latest = store.latest_event(employee_id)?;
        let kind = next_kind(latest.as_ref());
        let event = store.insert_event(NewAttendanceEvent {
            employee_id: employee_id.to_string(),
            kind,
            timestamp: now,
            confidence,
        })?;

        tracing::info!(employee_id, kind = %event.kind, confidence, "attendance recorded");
        Ok(Decision::Recorded(event))
    }
}
