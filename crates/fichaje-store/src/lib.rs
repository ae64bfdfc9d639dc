//! SQLite-backed [`Store`] for fichaje.
//!
//! Employees, reference photos (by path, with a SHA-256 fingerprint), face
//! vectors as little-endian `f32` blobs, and attendance events.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use fichaje_core::store::{Store, StoreError};
use fichaje_core::types::{
    AttendanceEvent, AttendanceKind, Employee, NewAttendanceEvent, NewVector, ReferenceImage,
    StoredVector,
};
use fichaje_core::Embedding;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA_VERSION: i32 = 1;

/// Fields for a new employee.
#[derive(Debug, Clone, Default)]
pub struct NewEmployee {
    pub name: String,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub area: Option<String>,
    pub active: bool,
}

/// Attendance listing filter. Bounds are inclusive.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Case-insensitive substring of the employee name.
    pub name: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub employee_name: String,
    #[serde(flatten)]
    pub event: AttendanceEvent,
}

trait SqlResultExt<T> {
    fn db(self) -> Result<T, StoreError>;
}

impl<T> SqlResultExt<T> for rusqlite::Result<T> {
    fn db(self) -> Result<T, StoreError> {
        self.map_err(|e| StoreError::Database(e.to_string()))
    }
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).db()?;
        tracing::info!(path = %path.as_ref().display(), "opened attendance database");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().db()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;").db()?;
        Self::migrate(&conn).db()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn migrate(conn: &Connection) -> rusqlite::Result<()> {
        let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        tracing::debug!(version, "database schema version");

        if version < 1 {
            conn.execute_batch(&format!(
                "BEGIN;\n{}\nPRAGMA user_version = 1;\nCOMMIT;",
                include_str!("sql/001_initial.sql")
            ))?;
            tracing::info!(to = SCHEMA_VERSION, "migrated database schema");
        }
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".into()))
    }

    pub fn create_employee(&self, new: NewEmployee) -> Result<Employee, StoreError> {
        let employee = Employee {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name,
            phone: new.phone,
            position: new.position,
            area: new.area,
            active: new.active,
            hired_at: Utc::now().trunc_subsecs(6),
        };
        self.conn()?
            .execute(
                "INSERT INTO employees (id, name, phone, position, area, active, hired_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    employee.id,
                    employee.name,
                    employee.phone,
                    employee.position,
                    employee.area,
                    employee.active,
                    format_ts(&employee.hired_at),
                ],
            )
            .db()?;
        tracing::info!(employee_id = %employee.id, name = %employee.name, "employee created");
        Ok(employee)
    }

    pub fn list_employees(&self) -> Result<Vec<Employee>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, name, phone, position, area, active, hired_at FROM employees ORDER BY name, id")
            .db()?;
        let rows = stmt.query_map([], employee_from_row).db()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().db()
    }

    /// Activate or deactivate an employee. Inactive employees are never matched.
    pub fn set_active(&self, employee_id: &str, active: bool) -> Result<Employee, StoreError> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE employees SET active = ?1 WHERE id = ?2",
                params![active, employee_id],
            )
            .db()?;
        if changed == 0 {
            return Err(StoreError::EmployeeNotFound(employee_id.to_string()));
        }
        tracing::info!(employee_id, active, "employee status changed");
        self.employee(employee_id)?
            .ok_or_else(|| StoreError::EmployeeNotFound(employee_id.to_string()))
    }

    /// Register a photo file as a reference image of `employee_id`.
    ///
    /// The file must decode as an image. The same content registered twice for
    /// one employee is rejected with [`StoreError::Duplicate`].
    pub fn add_image(&self, employee_id: &str, path: &Path) -> Result<ReferenceImage, StoreError> {
        let bytes = std::fs::read(path)?;
        let sha256 = format!("{:x}", Sha256::digest(&bytes));

        let invalid = |reason: String| StoreError::InvalidImage {
            path: path.display().to_string(),
            reason,
        };
        let reader = image::ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()
            .map_err(|e| invalid(e.to_string()))?;
        let format = reader
            .format()
            .and_then(|f| f.extensions_str().first().copied())
            .map(str::to_string);
        let (width, height) = reader.into_dimensions().map_err(|e| invalid(e.to_string()))?;

        let stored_path = std::fs::canonicalize(path)?;
        let image = ReferenceImage {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: employee_id.to_string(),
            uri: stored_path.display().to_string(),
            format,
            width: Some(width),
            height: Some(height),
            sha256: Some(sha256),
        };

        let conn = self.conn()?;
        if !employee_exists(&conn, employee_id)? {
            return Err(StoreError::EmployeeNotFound(employee_id.to_string()));
        }
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM reference_images WHERE employee_id = ?1 AND sha256 = ?2",
                params![employee_id, image.sha256],
                |row| row.get(0),
            )
            .optional()
            .db()?;
        if let Some(existing) = existing {
            return Err(StoreError::Duplicate(format!(
                "{} is already registered as image {existing}",
                path.display()
            )));
        }

        conn.execute(
            "INSERT INTO reference_images (id, employee_id, path, format, width, height, sha256, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                image.id,
                image.employee_id,
                image.uri,
                image.format,
                image.width,
                image.height,
                image.sha256,
                format_ts(&Utc::now()),
            ],
        )
        .db()?;
        tracing::info!(employee_id, image_id = %image.id, path = %image.uri, "reference image registered");
        Ok(image)
    }

    /// Attendance events with employee names, newest first.
    ///
    /// The name filter is a case-insensitive substring match with full Unicode
    /// folding, applied after the date range query.
    pub fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventRecord>, StoreError> {
        let needle = filter.name.as_ref().map(|n| n.to_lowercase());
        let from = filter.from.as_ref().map(format_ts);
        let to = filter.to.as_ref().map(format_ts);

        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT a.id, a.employee_id, a.kind, a.timestamp, a.confidence, e.name
                 FROM attendance a JOIN employees e ON e.id = a.employee_id
                 WHERE (?1 IS NULL OR a.timestamp >= ?1)
                   AND (?2 IS NULL OR a.timestamp <= ?2)
                 ORDER BY a.timestamp DESC, a.rowid DESC",
            )
            .db()?;
        let rows = stmt
            .query_map(params![from, to], |row| {
                Ok(EventRecord {
                    event: event_from_row(row)?,
                    employee_name: row.get(5)?,
                })
            })
            .db()?;

        let mut records = Vec::new();
        for record in rows {
            let record = record.db()?;
            let wanted = needle
                .as_deref()
                .map_or(true, |n| record.employee_name.to_lowercase().contains(n));
            if wanted {
                records.push(record);
            }
        }
        Ok(records)
    }
}

impl Store for SqliteStore {
    fn employee(&self, employee_id: &str) -> Result<Option<Employee>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, name, phone, position, area, active, hired_at FROM employees WHERE id = ?1",
                params![employee_id],
                employee_from_row,
            )
            .optional()
            .db()
    }

    fn active_vectors(&self) -> Result<Vec<StoredVector>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT v.id, v.image_id, i.employee_id, v.model, v.version, v.vector
                 FROM face_vectors v
                 JOIN reference_images i ON i.id = v.image_id
                 JOIN employees e ON e.id = i.employee_id
                 WHERE e.active = 1
                 ORDER BY v.id",
            )
            .db()?;
        let rows = stmt.query_map([], vector_from_row).db()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().db()
    }

    fn reference_images(&self, employee_id: &str) -> Result<Vec<ReferenceImage>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, employee_id, path, format, width, height, sha256
                 FROM reference_images WHERE employee_id = ?1
                 ORDER BY created_at, rowid",
            )
            .db()?;
        let rows = stmt
            .query_map(params![employee_id], |row| {
                Ok(ReferenceImage {
                    id: row.get(0)?,
                    employee_id: row.get(1)?,
                    uri: row.get(2)?,
                    format: row.get(3)?,
                    width: row.get(4)?,
                    height: row.get(5)?,
                    sha256: row.get(6)?,
                })
            })
            .db()?;
        rows.collect::<rusqlite::Result<Vec<_>>>().db()
    }

    fn read_image(&self, image: &ReferenceImage) -> Result<Vec<u8>, StoreError> {
        Ok(std::fs::read(&image.uri)?)
    }

    fn embedded_image_ids(&self, employee_id: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT v.image_id FROM face_vectors v
                 JOIN reference_images i ON i.id = v.image_id
                 WHERE i.employee_id = ?1",
            )
            .db()?;
        let rows = stmt.query_map(params![employee_id], |row| row.get(0)).db()?;
        rows.collect::<rusqlite::Result<HashSet<String>>>().db()
    }

    fn insert_vector(&self, vector: NewVector) -> Result<StoredVector, StoreError> {
        let conn = self.conn()?;
        let employee_id: String = conn
            .query_row(
                "SELECT employee_id FROM reference_images WHERE id = ?1",
                params![vector.image_id],
                |row| row.get(0),
            )
            .optional()
            .db()?
            .ok_or_else(|| StoreError::ImageNotFound(vector.image_id.clone()))?;

        let stored = StoredVector {
            id: uuid::Uuid::new_v4().to_string(),
            image_id: vector.image_id,
            employee_id,
            model: vector.model,
            version: vector.version,
            embedding: vector.embedding,
        };
        let values = &stored.embedding.values;
        conn.execute(
            "INSERT INTO face_vectors (id, image_id, model, version, dim, norm, vector, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                stored.id,
                stored.image_id,
                stored.model,
                stored.version,
                values.len() as i64,
                stored.embedding.norm() as f64,
                encode_vector(values),
                format_ts(&Utc::now()),
            ],
        )
        .db()?;
        Ok(stored)
    }

    fn latest_event(&self, employee_id: &str) -> Result<Option<AttendanceEvent>, StoreError> {
        self.conn()?
            .query_row(
                "SELECT id, employee_id, kind, timestamp, confidence FROM attendance
                 WHERE employee_id = ?1
                 ORDER BY timestamp DESC, rowid DESC
                 LIMIT 1",
                params![employee_id],
                event_from_row,
            )
            .optional()
            .db()
    }

    fn insert_event(&self, event: NewAttendanceEvent) -> Result<AttendanceEvent, StoreError> {
        let conn = self.conn()?;
        if !employee_exists(&conn, &event.employee_id)? {
            return Err(StoreError::EmployeeNotFound(event.employee_id));
        }
        let stored = AttendanceEvent {
            id: uuid::Uuid::new_v4().to_string(),
            employee_id: event.employee_id,
            kind: event.kind,
            timestamp: event.timestamp.trunc_subsecs(6),
            confidence: event.confidence,
        };
        conn.execute(
            "INSERT INTO attendance (id, employee_id, kind, timestamp, confidence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stored.id,
                stored.employee_id,
                stored.kind.as_str(),
                format_ts(&stored.timestamp),
                stored.confidence as f64,
            ],
        )
        .db()?;
        Ok(stored)
    }
}

fn employee_exists(conn: &Connection, employee_id: &str) -> Result<bool, StoreError> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM employees WHERE id = ?1)",
        params![employee_id],
        |row| row.get(0),
    )
    .db()
}

/// Fixed-width RFC 3339 in UTC, so lexical order is chronological order.
fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_vector(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(idx: usize, bytes: &[u8]) -> rusqlite::Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("vector blob length {} is not a multiple of 4", bytes.len()).into(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn employee_from_row(row: &Row<'_>) -> rusqlite::Result<Employee> {
    let hired_at: String = row.get(6)?;
    Ok(Employee {
        id: row.get(0)?,
        name: row.get(1)?,
        phone: row.get(2)?,
        position: row.get(3)?,
        area: row.get(4)?,
        active: row.get(5)?,
        hired_at: parse_ts(6, &hired_at)?,
    })
}

fn vector_from_row(row: &Row<'_>) -> rusqlite::Result<StoredVector> {
    let blob: Vec<u8> = row.get(5)?;
    Ok(StoredVector {
        id: row.get(0)?,
        image_id: row.get(1)?,
        employee_id: row.get(2)?,
        model: row.get(3)?,
        version: row.get(4)?,
        embedding: Embedding::new(decode_vector(5, &blob)?),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceEvent> {
    let kind: String = row.get(2)?;
    let timestamp: String = row.get(3)?;
    let confidence: f64 = row.get(4)?;
    Ok(AttendanceEvent {
        id: row.get(0)?,
        employee_id: row.get(1)?,
        kind: AttendanceKind::parse(&kind).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("unknown event type {kind:?}").into())
        })?,
        timestamp: parse_ts(3, &timestamp)?,
        confidence: confidence as f32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn store_with_employee(active: bool) -> (SqliteStore, Employee) {
        let store = SqliteStore::open_in_memory().unwrap();
        let employee = store
            .create_employee(NewEmployee {
                name: "Ana Pérez".into(),
                area: Some("Almacén".into()),
                active,
                ..NewEmployee::default()
            })
            .unwrap();
        (store, employee)
    }

    fn photo(dir: &Path, color: [u8; 3]) -> PathBuf {
        let path = dir.join(format!("face-{}-{}-{}.png", color[0], color[1], color[2]));
        RgbImage::from_pixel(32, 24, Rgb(color)).save(&path).unwrap();
        path
    }

    fn vector(store: &SqliteStore, dir: &Path, employee: &Employee, values: Vec<f32>) -> StoredVector {
        let image = store
            .add_image(&employee.id, &photo(dir, [values.len() as u8, 1, 2]))
            .unwrap();
        store
            .insert_vector(NewVector {
                image_id: image.id,
                model: "arcface-glintr100".into(),
                version: Some("1.0".into()),
                embedding: Embedding::new(values),
            })
            .unwrap()
    }

    #[test]
    fn test_migration_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        SqliteStore::migrate(&conn).unwrap();
        SqliteStore::migrate(&conn).unwrap();
        let version: i32 = conn.query_row("PRAGMA user_version;", [], |r| r.get(0)).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_employee_roundtrip_and_status() {
        let (store, employee) = store_with_employee(true);
        assert_eq!(store.employee(&employee.id).unwrap(), Some(employee.clone()));

        let updated = store.set_active(&employee.id, false).unwrap();
        assert!(!updated.active);
        assert!(matches!(
            store.set_active("missing", true),
            Err(StoreError::EmployeeNotFound(_))
        ));
        assert_eq!(store.list_employees().unwrap().len(), 1);
    }

    #[test]
    fn test_add_image_records_metadata_and_rejects_duplicates() {
        let (store, employee) = store_with_employee(true);
        let dir = tempdir().unwrap();
        let path = photo(dir.path(), [200, 10, 10]);
        let image = store.add_image(&employee.id, &path).unwrap();
        assert_eq!(image.format.as_deref(), Some("png"));
        assert_eq!((image.width, image.height), (Some(32), Some(24)));
        assert_eq!(image.sha256.as_ref().map(String::len), Some(64));

        let again = store.add_image(&employee.id, &path);
        assert!(matches!(again, Err(StoreError::Duplicate(_))));

        let bytes = store.read_image(&image).unwrap();
        assert_eq!(bytes, std::fs::read(&path).unwrap());
    }

    #[test]
    fn test_add_image_rejects_non_images() {
        let (store, employee) = store_with_employee(true);
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"not a photo").unwrap();
        let result = store.add_image(&employee.id, &path);
        assert!(matches!(result, Err(StoreError::InvalidImage { .. })));
    }

    #[test]
    fn test_vectors_roundtrip_and_filter_inactive() {
        let (store, active) = store_with_employee(true);
        let inactive = store
            .create_employee(NewEmployee {
                name: "Luis".into(),
                active: false,
                ..NewEmployee::default()
            })
            .unwrap();
        let dir = tempdir().unwrap();
        let stored = vector(&store, dir.path(), &active, vec![0.6, -0.8, 0.0]);
        vector(&store, dir.path(), &inactive, vec![1.0, 0.0]);

        let vectors = store.active_vectors().unwrap();
        assert_eq!(vectors, vec![stored.clone()]);
        assert!(store.embedded_image_ids(&active.id).unwrap().contains(&stored.image_id));
    }

    #[test]
    fn test_active_vectors_ordered_by_id() {
        let (store, employee) = store_with_employee(true);
        let dir = tempdir().unwrap();
        for n in 1..=4 {
            vector(&store, dir.path(), &employee, vec![1.0; n]);
        }
        let ids: Vec<String> = store.active_vectors().unwrap().into_iter().map(|v| v.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_latest_event_tie_goes_to_last_insert() {
        let (store, employee) = store_with_employee(true);
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let event = |kind, timestamp| NewAttendanceEvent {
            employee_id: employee.id.clone(),
            kind,
            timestamp,
            confidence: 0.9,
        };
        store.insert_event(event(AttendanceKind::CheckIn, ts + Duration::hours(1))).unwrap();
        store.insert_event(event(AttendanceKind::CheckOut, ts)).unwrap();
        assert_eq!(store.latest_event(&employee.id).unwrap().unwrap().kind, AttendanceKind::CheckIn);

        let later = ts + Duration::hours(2);
        store.insert_event(event(AttendanceKind::CheckIn, later)).unwrap();
        store.insert_event(event(AttendanceKind::CheckOut, later)).unwrap();
        assert_eq!(store.latest_event(&employee.id).unwrap().unwrap().kind, AttendanceKind::CheckOut);
    }

    #[test]
    fn test_list_events_filters() {
        let (store, ana) = store_with_employee(true);
        let luis = store
            .create_employee(NewEmployee {
                name: "Luis".into(),
                active: true,
                ..NewEmployee::default()
            })
            .unwrap();
        let day = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        for (employee, offset) in [(&ana, 0), (&luis, 1), (&ana, 9)] {
            store
                .insert_event(NewAttendanceEvent {
                    employee_id: employee.id.clone(),
                    kind: AttendanceKind::CheckIn,
                    timestamp: day + Duration::hours(offset),
                    confidence: 0.8,
                })
                .unwrap();
        }

        let all = store.list_events(&EventFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all[0].event.timestamp > all[1].event.timestamp);

        let ana_only = store
            .list_events(&EventFilter {
                name: Some("pérez".into()),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(ana_only.len(), 2);

        let morning = store
            .list_events(&EventFilter {
                from: Some(day),
                to: Some(day + Duration::hours(1)),
                ..EventFilter::default()
            })
            .unwrap();
        assert_eq!(morning.len(), 2);
    }

    #[test]
    fn test_list_events_name_filter_folds_unicode_and_is_literal() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut ids = Vec::new();
        for name in ["Ángela Núñez", "Ana_Ruiz", "Anabel"] {
            let employee = store
                .create_employee(NewEmployee {
                    name: name.into(),
                    active: true,
                    ..NewEmployee::default()
                })
                .unwrap();
            store
                .insert_event(NewAttendanceEvent {
                    employee_id: employee.id.clone(),
                    kind: AttendanceKind::CheckIn,
                    timestamp: Utc::now(),
                    confidence: 0.9,
                })
                .unwrap();
            ids.push(employee.id);
        }

        let by_name = |name: &str| -> Vec<String> {
            store
                .list_events(&EventFilter {
                    name: Some(name.into()),
                    ..EventFilter::default()
                })
                .unwrap()
                .into_iter()
                .map(|r| r.event.employee_id)
                .collect()
        };
        assert_eq!(by_name("ÁNGELA"), vec![ids[0].clone()]);
        assert_eq!(by_name("núñez"), vec![ids[0].clone()]);
        assert_eq!(by_name("a_r"), vec![ids[1].clone()]);
        assert!(by_name("%").is_empty());
    }

    #[test]
    fn test_insert_event_unknown_employee() {
        let store = SqliteStore::open_in_memory().unwrap();
        let result = store.insert_event(NewAttendanceEvent {
            employee_id: "ghost".into(),
            kind: AttendanceKind::CheckIn,
            timestamp: Utc::now(),
            confidence: 1.0,
        });
        assert!(matches!(result, Err(StoreError::EmployeeNotFound(_))));
    }

    #[test]
    fn test_corrupt_vector_blob() {
        assert!(decode_vector(0, &[0, 0, 0]).is_err());
        let v = decode_vector(0, &encode_vector(&[1.5, -2.0])).unwrap();
        assert_eq!(v, vec![1.5, -2.0]);
    }
}
