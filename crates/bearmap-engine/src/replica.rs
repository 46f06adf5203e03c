//! In-memory replica: the record set keyed by id, plus draft sync tracking.
//!
//! Merge is insert-or-replace and never removes. Promotion is the one place an
//! entry changes identity: the draft's local id goes away and the confirmed
//! record appears under the server id.

use std::collections::{HashMap, HashSet};

use bearmap_core::{NewReport, Record, RecordId, sort_by_recency};
use tracing::warn;

/// Where a record stands relative to the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Server-issued id.
    Confirmed,
    /// Local draft with an insert in flight.
    Pending,
    /// Local draft with no insert in flight: never sent, failed, or reloaded.
    Unsynced,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub inserted: usize,
    pub replaced: usize,
    pub unchanged: usize,
    /// Fetched records carrying a local id; never allowed to touch drafts.
    pub rejected: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReplicaSet {
    records: HashMap<RecordId, Record>,
    in_flight: HashSet<RecordId>,
}

impl ReplicaSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from loaded records; a repeated id keeps the last one.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.id().clone(), r))
            .collect();
        Self {
            records,
            in_flight: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Owned copy, newest first.
    pub fn snapshot(&self) -> Vec<Record> {
        let mut out: Vec<Record> = self.records.values().cloned().collect();
        sort_by_recency(&mut out);
        out
    }

    /// Insert-or-replace each fetched record by id. Remote wins.
    pub fn merge(&mut self, fetched: impl IntoIterator<Item = Record>) -> MergeStats {
        let mut stats = MergeStats::default();
        for record in fetched {
            if record.is_draft() {
                warn!(id = %record.id(), "remote returned a local id, ignoring");
                stats.rejected += 1;
                continue;
            }
            match self.records.get(record.id()) {
                None => stats.inserted += 1,
                Some(existing) if *existing == record => stats.unchanged += 1,
                Some(_) => stats.replaced += 1,
            }
            self.records.insert(record.id().clone(), record);
        }
        stats
    }

    pub fn insert_draft(&mut self, draft: Record) {
        debug_assert!(draft.is_draft(), "drafts carry local ids");
        self.records.insert(draft.id().clone(), draft);
    }

    /// Mark an unsynced draft as pending and hand back its insert payload.
    ///
    /// `None` if the id is unknown, confirmed, or already pending.
    pub fn begin_sync(&mut self, id: &RecordId) -> Option<NewReport> {
        if self.lifecycle(id) != Some(Lifecycle::Unsynced) {
            return None;
        }
        self.in_flight.insert(id.clone());
        self.records.get(id).map(Record::to_new_report)
    }

    /// Insert failed: the draft goes back to unsynced.
    pub fn abandon_sync(&mut self, id: &RecordId) {
        self.in_flight.remove(id);
    }

    /// Replace the draft `local_id` with its confirmed counterpart.
    ///
    /// Returns `false` if the draft was no longer present; the confirmed
    /// record is inserted either way.
    pub fn promote(&mut self, local_id: &RecordId, confirmed: Record) -> bool {
        self.in_flight.remove(local_id);
        let draft = self.records.remove(local_id);
        if let Some(draft) = &draft {
            if !draft.same_observation(&confirmed) {
                warn!(
                    local_id = %local_id,
                    server_id = %confirmed.id(),
                    "confirmed record differs from draft, keeping server version"
                );
            }
        }
        self.records.insert(confirmed.id().clone(), confirmed);
        draft.is_some()
    }

    pub fn lifecycle(&self, id: &RecordId) -> Option<Lifecycle> {
        let record = self.records.get(id)?;
        Some(if !record.is_draft() {
            Lifecycle::Confirmed
        } else if self.in_flight.contains(id) {
            Lifecycle::Pending
        } else {
            Lifecycle::Unsynced
        })
    }

    /// Unsynced draft ids, oldest first.
    pub fn unsynced(&self) -> Vec<RecordId> {
        let mut drafts: Vec<&Record> = self
            .records
            .values()
            .filter(|r| r.is_draft() && !self.in_flight.contains(r.id()))
            .collect();
        drafts.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        drafts.into_iter().map(|r| r.id().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bearmap_core::{LatLng, ReportKind};
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn confirmed(id: &str, note: Option<&str>, ms: i64) -> Record {
        Record::new(
            RecordId::from_server(id).unwrap(),
            ReportKind::Sighting,
            note,
            LatLng::new(44.0, -110.0),
            Utc.timestamp_millis_opt(ms).unwrap(),
        )
        .unwrap()
    }

    fn draft(note: &str) -> Record {
        Record::draft(
            ReportKind::Sign,
            Some(note),
            LatLng::new(45.0, -111.0),
            Utc.timestamp_millis_opt(1_000).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn merge_counts() {
        let mut set = ReplicaSet::from_records([confirmed("a", None, 1), confirmed("b", None, 2)]);
        let stats = set.merge([
            confirmed("a", None, 1),
            confirmed("b", Some("edited"), 2),
            confirmed("c", None, 3),
        ]);
        assert_eq!(
            stats,
            MergeStats {
                inserted: 1,
                replaced: 1,
                unchanged: 1,
                rejected: 0
            }
        );
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn merge_never_touches_drafts() {
        let d = draft("scat");
        let mut set = ReplicaSet::new();
        set.insert_draft(d.clone());
        let impostor = Record::new(
            d.id().clone(),
            ReportKind::Sighting,
            Some("overwrite"),
            LatLng::new(0.0, 0.0),
            Utc.timestamp_millis_opt(5).unwrap(),
        )
        .unwrap();
        let stats = set.merge([impostor]);
        assert_eq!(stats.rejected, 1);
        assert_eq!(set.get(d.id()), Some(&d));
    }

    #[test]
    fn draft_lifecycle() {
        let d = draft("tracks");
        let id = d.id().clone();
        let mut set = ReplicaSet::new();
        set.insert_draft(d.clone());
        assert_eq!(set.lifecycle(&id), Some(Lifecycle::Unsynced));

        let payload = set.begin_sync(&id).unwrap();
        assert_eq!(payload, d.to_new_report());
        assert_eq!(set.lifecycle(&id), Some(Lifecycle::Pending));
        assert!(set.begin_sync(&id).is_none(), "already pending");
        assert!(set.unsynced().is_empty());

        set.abandon_sync(&id);
        assert_eq!(set.lifecycle(&id), Some(Lifecycle::Unsynced));
        assert_eq!(set.unsynced(), vec![id]);
    }

    #[test]
    fn promote_replaces_draft_under_server_id() {
        let d = draft("tracks");
        let local = d.id().clone();
        let mut set = ReplicaSet::new();
        set.insert_draft(d.clone());
        set.begin_sync(&local);

        let server = d
            .to_new_report()
            .confirm(RecordId::from_server("srv-9").unwrap())
            .unwrap();
        assert!(set.promote(&local, server.clone()));
        assert!(!set.contains(&local));
        assert_eq!(set.len(), 1);
        assert_eq!(set.lifecycle(server.id()), Some(Lifecycle::Confirmed));
        assert!(set.get(server.id()).unwrap().same_observation(&d));
    }

    #[test]
    fn promote_after_fetch_already_brought_server_copy() {
        let d = draft("tracks");
        let local = d.id().clone();
        let server = d
            .to_new_report()
            .confirm(RecordId::from_server("srv-3").unwrap())
            .unwrap();
        let mut set = ReplicaSet::new();
        set.insert_draft(d);
        set.begin_sync(&local);
        set.merge([server.clone()]);
        assert_eq!(set.len(), 2);

        set.promote(&local, server);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn begin_sync_rejects_confirmed_and_unknown() {
        let mut set = ReplicaSet::from_records([confirmed("a", None, 1)]);
        assert!(set.begin_sync(&RecordId::from_server("a").unwrap()).is_none());
        assert!(set.begin_sync(&RecordId::new_local()).is_none());
    }

    #[test]
    fn unsynced_oldest_first() {
        let mut set = ReplicaSet::new();
        let at = |ms| {
            Record::draft(
                ReportKind::Sign,
                None,
                LatLng::new(1.0, 1.0),
                Utc.timestamp_millis_opt(ms).unwrap(),
            )
            .unwrap()
        };
        let (newer, older) = (at(200), at(100));
        set.insert_draft(newer.clone());
        set.insert_draft(older.clone());
        assert_eq!(set.unsynced(), vec![older.id().clone(), newer.id().clone()]);
    }

    #[test]
    fn snapshot_is_newest_first() {
        let set = ReplicaSet::from_records([
            confirmed("a", None, 1),
            confirmed("c", None, 3),
            confirmed("b", None, 2),
        ]);
        let ids: Vec<String> = set.snapshot().iter().map(|r| r.id().to_string()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }

    fn arb_record() -> impl Strategy<Value = Record> {
        (0u8..12, prop::option::of("[a-z]{0,6}"), 0i64..10_000).prop_map(|(id, note, ms)| {
            confirmed(&format!("srv-{id}"), note.as_deref(), ms)
        })
    }

    fn sorted(set: &ReplicaSet) -> Vec<Record> {
        set.snapshot()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_merge_idempotent(
            base in prop::collection::vec(arb_record(), 0..20),
            fetched in prop::collection::vec(arb_record(), 0..20),
        ) {
            let mut once = ReplicaSet::from_records(base.clone());
            once.merge(fetched.clone());
            let mut twice = ReplicaSet::from_records(base);
            twice.merge(fetched.clone());
            twice.merge(fetched);
            prop_assert_eq!(sorted(&once), sorted(&twice));
        }

        #[test]
        fn prop_merge_additive(
            base in prop::collection::vec(arb_record(), 0..20),
            fetched in prop::collection::vec(arb_record(), 0..20),
        ) {
            let mut set = ReplicaSet::from_records(base.clone());
            let before = set.snapshot();
            set.merge(fetched.clone());
            for record in before {
                if !fetched.iter().any(|f| f.id() == record.id()) {
                    prop_assert_eq!(set.get(record.id()), Some(&record));
                }
            }
        }

        #[test]
        fn prop_merge_override(
            base in prop::collection::vec(arb_record(), 0..20),
            fetched in prop::collection::vec(arb_record(), 0..20),
        ) {
            let mut set = ReplicaSet::from_records(base);
            set.merge(fetched.clone());
            // Last occurrence of an id within a single fetch wins.
            let mut expected: HashMap<RecordId, Record> = HashMap::new();
            for record in fetched {
                expected.insert(record.id().clone(), record);
            }
            for (id, record) in expected {
                prop_assert_eq!(set.get(&id), Some(&record));
            }
        }
    }
}
