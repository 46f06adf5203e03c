//! Observation records shared between the local replica and the remote store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::geo::LatLng;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("non-finite coordinate: lat={lat}, lng={lng}")]
    NonFiniteCoordinate { lat: f64, lng: f64 },

    #[error("record id is empty")]
    EmptyId,

    #[error("server id uses the reserved local prefix: {0}")]
    ReservedId(String),

    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),

    #[error("timestamp out of range: {0} ms")]
    TimestampOutOfRange(i64),
}

/// What was observed: the animal itself, or a sign of it (tracks, scat, damage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Sighting,
    Sign,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Sighting => "sighting",
            ReportKind::Sign => "sign",
        }
    }
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record identifier.
///
/// Drafts get `local-<uuid>`; the server never issues an id with that prefix,
/// so a draft id can never collide with a confirmed one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub const LOCAL_PREFIX: &'static str = "local-";

    /// Fresh identifier for a locally created draft.
    pub fn new_local() -> Self {
        Self(format!("{}{}", Self::LOCAL_PREFIX, Uuid::new_v4()))
    }

    /// Wrap a server-issued identifier, rejecting ids from the local namespace.
    pub fn from_server(id: impl Into<String>) -> Result<Self, RecordError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        if id.starts_with(Self::LOCAL_PREFIX) {
            return Err(RecordError::ReservedId(id));
        }
        Ok(Self(id))
    }

    /// Accept either namespace. Used when reading back the persisted replica.
    pub fn parse(id: impl Into<String>) -> Result<Self, RecordError> {
        let id = id.into();
        if id.is_empty() {
            return Err(RecordError::EmptyId);
        }
        Ok(Self(id))
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with(Self::LOCAL_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim a note and collapse the empty string to `None`.
pub fn normalize_note(note: Option<&str>) -> Option<String> {
    note.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Drop sub-millisecond precision so in-memory and persisted instants agree.
pub fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// One geotagged observation.
///
/// Immutable after construction: replacing a record means inserting a new
/// value under the same (or a new) id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RecordRepr", into = "RecordRepr")]
pub struct Record {
    id: RecordId,
    kind: ReportKind,
    note: Option<String>,
    location: LatLng,
    created_at: DateTime<Utc>,
}

impl Record {
    pub fn new(
        id: RecordId,
        kind: ReportKind,
        note: Option<&str>,
        location: LatLng,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        location.validate()?;
        Ok(Self {
            id,
            kind,
            note: normalize_note(note),
            location,
            created_at: truncate_millis(created_at),
        })
    }

    /// Build a local draft stamped with `now`.
    pub fn draft(
        kind: ReportKind,
        note: Option<&str>,
        location: LatLng,
        now: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        Self::new(RecordId::new_local(), kind, note, location, now)
    }

    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn kind(&self) -> ReportKind {
        self.kind
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn location(&self) -> LatLng {
        self.location
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_draft(&self) -> bool {
        self.id.is_local()
    }

    /// Insert payload for this record: everything except the id.
    pub fn to_new_report(&self) -> NewReport {
        NewReport {
            kind: self.kind,
            note: self.note.clone(),
            location: self.location,
            created_at: self.created_at,
        }
    }

    /// True when `other` describes the same observation (ids aside).
    pub fn same_observation(&self, other: &Record) -> bool {
        self.kind == other.kind && self.note == other.note && self.location == other.location
    }
}

/// Insert payload sent to the remote. The server assigns the id and keeps
/// `created_at` as given.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReport {
    pub kind: ReportKind,
    pub note: Option<String>,
    pub location: LatLng,
    pub created_at: DateTime<Utc>,
}

impl NewReport {
    /// Confirm this payload under a server-issued id.
    pub fn confirm(&self, id: RecordId) -> Result<Record, RecordError> {
        Record::new(
            id,
            self.kind,
            self.note.as_deref(),
            self.location,
            self.created_at,
        )
    }
}

/// Persisted shape: `{id, kind, note?, lat, lng, createdAt}` with `createdAt`
/// in epoch milliseconds.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordRepr {
    id: String,
    kind: ReportKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
    lat: f64,
    lng: f64,
    created_at: i64,
}

impl TryFrom<RecordRepr> for Record {
    type Error = RecordError;

    fn try_from(repr: RecordRepr) -> Result<Self, Self::Error> {
        let created_at = DateTime::from_timestamp_millis(repr.created_at)
            .ok_or(RecordError::TimestampOutOfRange(repr.created_at))?;
        Record::new(
            RecordId::parse(repr.id)?,
            repr.kind,
            repr.note.as_deref(),
            LatLng::new(repr.lat, repr.lng),
            created_at,
        )
    }
}

impl From<Record> for RecordRepr {
    fn from(record: Record) -> Self {
        Self {
            id: record.id.0,
            kind: record.kind,
            note: record.note,
            lat: record.location.lat,
            lng: record.location.lng,
            created_at: record.created_at.timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn note_is_trimmed_and_empty_becomes_none() {
        assert_eq!(normalize_note(Some("  fresh tracks ")), Some("fresh tracks".into()));
        assert_eq!(normalize_note(Some("   ")), None);
        assert_eq!(normalize_note(Some("")), None);
        assert_eq!(normalize_note(None), None);
    }

    #[test]
    fn draft_ids_are_local_and_unique() {
        let a = RecordId::new_local();
        let b = RecordId::new_local();
        assert!(a.is_local());
        assert_ne!(a, b);
    }

    #[test]
    fn server_ids_cannot_use_local_prefix() {
        assert!(matches!(
            RecordId::from_server("local-123"),
            Err(RecordError::ReservedId(_))
        ));
        assert!(matches!(RecordId::from_server(""), Err(RecordError::EmptyId)));
        let id = RecordId::from_server("8c1f").unwrap();
        assert!(!id.is_local());
    }

    #[test]
    fn non_finite_location_rejected() {
        let err = Record::draft(
            ReportKind::Sign,
            None,
            LatLng::new(f64::NAN, 10.0),
            at(0),
        )
        .unwrap_err();
        assert!(matches!(err, RecordError::NonFiniteCoordinate { .. }));
    }

    #[test]
    fn created_at_truncated_to_millis() {
        let precise = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let record =
            Record::draft(ReportKind::Sighting, None, LatLng::new(45.0, -110.0), precise)
                .unwrap();
        assert_eq!(record.created_at().timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn persisted_shape_matches_storage_format() {
        let record = Record::new(
            RecordId::from_server("abc").unwrap(),
            ReportKind::Sighting,
            Some(" sow with cubs "),
            LatLng::new(44.6, -110.5),
            at(1_700_000_000_123),
        )
        .unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "abc");
        assert_eq!(value["kind"], "sighting");
        assert_eq!(value["note"], "sow with cubs");
        assert_eq!(value["lat"], 44.6);
        assert_eq!(value["lng"], -110.5);
        assert_eq!(value["createdAt"], 1_700_000_000_123_i64);
    }

    #[test]
    fn absent_note_is_omitted() {
        let record =
            Record::draft(ReportKind::Sign, Some(""), LatLng::new(1.0, 2.0), at(5)).unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("note").is_none());
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let json = r#"{"id":"x","kind":"tracks","lat":1,"lng":2,"createdAt":0}"#;
        assert!(serde_json::from_str::<Record>(json).is_err());
    }

    #[test]
    fn decode_normalizes_blank_note() {
        let json = r#"{"id":"x","kind":"sign","note":"  ","lat":1,"lng":2,"createdAt":0}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.note(), None);
    }

    #[test]
    fn new_report_keeps_fields_and_created_at() {
        let draft = Record::draft(
            ReportKind::Sign,
            Some("scat"),
            LatLng::new(10.0, 20.0),
            at(42),
        )
        .unwrap();
        let payload = draft.to_new_report();
        let confirmed = payload.confirm(RecordId::from_server("srv-1").unwrap()).unwrap();
        assert!(confirmed.same_observation(&draft));
        assert_eq!(confirmed.created_at(), draft.created_at());
        assert!(!confirmed.is_draft());
        assert!(draft.is_draft());
    }
}
