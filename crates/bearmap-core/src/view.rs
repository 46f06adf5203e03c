//! Derived, sorted view of a replica snapshot.
//!
//! Nothing here is stored: the view is rebuilt from the record set on every
//! read, against the caller's current position and clock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::{format_age, format_distance};
use crate::geo::LatLng;
use crate::ordering::{sort_by_proximity, sort_by_recency};
use crate::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewOrder {
    #[default]
    Recency,
    /// Falls back to recency when no position is known.
    Proximity,
}

/// One row of the presentation list.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewRow {
    pub record: Record,
    pub age_label: String,
    /// Metres from the current position, when one is known.
    pub distance_m: Option<f64>,
    pub distance_label: Option<String>,
}

pub fn derive_view(
    records: impl IntoIterator<Item = Record>,
    position: Option<LatLng>,
    order: ViewOrder,
    now: DateTime<Utc>,
) -> Vec<ViewRow> {
    let mut records: Vec<Record> = records.into_iter().collect();
    match (order, position) {
        (ViewOrder::Proximity, Some(origin)) => sort_by_proximity(&origin, &mut records),
        _ => sort_by_recency(&mut records),
    }

    records
        .into_iter()
        .map(|record| {
            let distance_m = position.map(|p| p.distance_to(&record.location()));
            ViewRow {
                age_label: format_age(now - record.created_at()),
                distance_label: distance_m.map(format_distance),
                distance_m,
                record,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordId, ReportKind};
    use chrono::{TimeDelta, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000).unwrap()
    }

    fn record(id: &str, age: TimeDelta, lat: f64) -> Record {
        Record::new(
            RecordId::from_server(id).unwrap(),
            ReportKind::Sign,
            None,
            LatLng::new(lat, -110.0),
            now() - age,
        )
        .unwrap()
    }

    #[test]
    fn without_position_rows_have_no_distance() {
        let rows = derive_view(
            vec![record("a", TimeDelta::minutes(5), 44.0)],
            None,
            ViewOrder::Recency,
            now(),
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].age_label, "5m ago");
        assert!(rows[0].distance_m.is_none());
        assert!(rows[0].distance_label.is_none());
    }

    #[test]
    fn with_position_rows_carry_distance_labels() {
        let here = LatLng::new(44.0, -110.0);
        let rows = derive_view(
            vec![record("a", TimeDelta::seconds(10), 44.0)],
            Some(here),
            ViewOrder::Recency,
            now(),
        );
        assert_eq!(rows[0].distance_label.as_deref(), Some("0 ft"));
        assert_eq!(rows[0].age_label, "10s ago");
    }

    #[test]
    fn proximity_without_position_falls_back_to_recency() {
        let rows = derive_view(
            vec![
                record("old", TimeDelta::hours(2), 44.0),
                record("new", TimeDelta::hours(1), 45.0),
            ],
            None,
            ViewOrder::Proximity,
            now(),
        );
        let ids: Vec<&str> = rows.iter().map(|r| r.record.id().as_str()).collect();
        assert_eq!(ids, ["new", "old"]);
    }

    #[test]
    fn proximity_with_position_sorts_nearest_first() {
        let rows = derive_view(
            vec![
                record("far-new", TimeDelta::hours(1), 46.0),
                record("near-old", TimeDelta::days(2), 44.01),
            ],
            Some(LatLng::new(44.0, -110.0)),
            ViewOrder::Proximity,
            now(),
        );
        assert_eq!(rows[0].record.id().as_str(), "near-old");
        assert_eq!(rows[0].age_label, "2d ago");
    }
}
