//! Presentation ordering for replica snapshots.
//!
//! The replica is an unordered set. Every read sorts a fresh copy:
//!
//! - Recency: `created_at` descending, ties broken by id ascending so the
//!   order is total and deterministic.
//! - Proximity: distance from a reference point ascending, ties broken by
//!   recency.

use std::cmp::Ordering;

use crate::geo::LatLng;
use crate::record::Record;

/// Newest first; equal instants fall back to id order.
pub fn cmp_recency(a: &Record, b: &Record) -> Ordering {
    b.created_at()
        .cmp(&a.created_at())
        .then_with(|| a.id().cmp(b.id()))
}

/// Nearest to `origin` first, then newest first.
pub fn cmp_proximity(origin: &LatLng, a: &Record, b: &Record) -> Ordering {
    let da = origin.distance_to(&a.location());
    let db = origin.distance_to(&b.location());
    da.total_cmp(&db).then_with(|| cmp_recency(a, b))
}

pub fn sort_by_recency(records: &mut [Record]) {
    records.sort_by(cmp_recency);
}

pub fn sort_by_proximity(origin: &LatLng, records: &mut [Record]) {
    records.sort_by(|a, b| cmp_proximity(origin, a, b));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordId, ReportKind};
    use chrono::{TimeZone, Utc};

    fn record(id: &str, ms: i64, lat: f64) -> Record {
        Record::new(
            RecordId::from_server(id).unwrap(),
            ReportKind::Sighting,
            None,
            LatLng::new(lat, 0.0),
            Utc.timestamp_millis_opt(ms).unwrap(),
        )
        .unwrap()
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id().as_str()).collect()
    }

    #[test]
    fn newest_first() {
        let mut records = vec![record("a", 100, 0.0), record("b", 300, 0.0), record("c", 200, 0.0)];
        sort_by_recency(&mut records);
        assert_eq!(ids(&records), ["b", "c", "a"]);
    }

    #[test]
    fn ties_broken_by_id() {
        let mut records = vec![record("z", 100, 0.0), record("m", 100, 0.0), record("a", 100, 0.0)];
        sort_by_recency(&mut records);
        assert_eq!(ids(&records), ["a", "m", "z"]);
    }

    #[test]
    fn recency_is_independent_of_input_order() {
        let base = vec![
            record("a", 5, 0.0),
            record("b", 5, 0.0),
            record("c", 9, 0.0),
            record("d", 1, 0.0),
        ];
        let mut forward = base.clone();
        let mut reversed: Vec<Record> = base.into_iter().rev().collect();
        sort_by_recency(&mut forward);
        sort_by_recency(&mut reversed);
        assert_eq!(forward, reversed);
        for pair in forward.windows(2) {
            assert_eq!(cmp_recency(&pair[0], &pair[1]), Ordering::Less);
        }
    }

    #[test]
    fn nearest_first_then_newest() {
        let origin = LatLng::new(0.0, 0.0);
        let mut records = vec![
            record("far", 500, 2.0),
            record("near-old", 100, 0.5),
            record("near-new", 200, 0.5),
        ];
        sort_by_proximity(&origin, &mut records);
        assert_eq!(ids(&records), ["near-new", "near-old", "far"]);
    }
}
