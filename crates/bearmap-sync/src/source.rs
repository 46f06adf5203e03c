//! Remote report source: windowed reads and authenticated inserts.

use async_trait::async_trait;
use bearmap_core::{BoundingBox, NewReport, Record};
use chrono::{DateTime, TimeDelta, Utc};

use crate::{RemoteError, SessionGate};

pub const DEFAULT_FETCH_LIMIT: usize = 200;
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Bounding box + time window for a remote read.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchWindow {
    pub bbox: BoundingBox,
    /// Inclusive lower bound on `created_at`.
    pub since: DateTime<Utc>,
    pub limit: usize,
}

impl FetchWindow {
    /// Window covering `bbox` for the `lookback` preceding `now`.
    pub fn lookback(bbox: BoundingBox, now: DateTime<Utc>, lookback: TimeDelta, limit: usize) -> Self {
        Self {
            bbox,
            since: now - lookback,
            limit,
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.bbox.contains(&record.location()) && record.created_at() >= self.since
    }
}

#[async_trait]
pub trait RemoteSource: SessionGate {
    /// Records inside the window, newest first, at most `limit`.
    ///
    /// Pure read: implementations must not change remote state.
    async fn fetch_window(&self, window: &FetchWindow) -> Result<Vec<Record>, RemoteError>;

    /// Store a report under the current identity and return the confirmed
    /// record. Fails with [`RemoteError::Unauthenticated`] without one.
    async fn insert(&self, report: &NewReport) -> Result<Record, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use bearmap_core::{LatLng, RecordId, ReportKind};
    use chrono::TimeZone;

    #[test]
    fn lookback_window_bounds() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let bbox = BoundingBox::new(40.0, 45.0, -112.0, -108.0).unwrap();
        let window = FetchWindow::lookback(bbox, now, TimeDelta::days(7), DEFAULT_FETCH_LIMIT);
        assert_eq!(window.since, now - TimeDelta::days(7));

        let at = |ms_ago: i64, lat: f64| {
            Record::new(
                RecordId::from_server("r").unwrap(),
                ReportKind::Sighting,
                None,
                LatLng::new(lat, -110.0),
                now - TimeDelta::milliseconds(ms_ago),
            )
            .unwrap()
        };
        assert!(window.matches(&at(0, 42.0)));
        assert!(window.matches(&at(TimeDelta::days(7).num_milliseconds(), 42.0)));
        assert!(!window.matches(&at(TimeDelta::days(7).num_milliseconds() + 1, 42.0)));
        assert!(!window.matches(&at(0, 46.0)));
    }
}
