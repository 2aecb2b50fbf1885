//! Intersection record store.
//!
//! The store is the single source of truth for a session. The phase clock
//! and the control surface both mutate it; each call takes the lock once,
//! so a tick or a control action is atomic relative to the others.
//! Every mutation publishes a fresh snapshot on a broadcast channel for
//! read-only consumers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{ControlError, RecordError};
use crate::signal::control::{self, ControlAction, ControlPolicy, EmergencyAction, TransitionRule};
use crate::signal::{Intersection, IntersectionId, IntersectionRecord, Status, TickOutcome, clock};

/// Snapshot channel capacity; slow readers skip to the newest snapshot.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// A phase change produced by the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseAdvance {
    pub id: IntersectionId,
    pub from: String,
    pub to: String,
    pub time_remaining: u32,
}

/// Result of one clock tick across the store.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Every record the tick touched, in store order. These are the
    /// records that must be propagated to the shared store.
    pub updated: Vec<Intersection>,
    /// Phase transitions among `updated`.
    pub advances: Vec<PhaseAdvance>,
}

/// Result of a bulk emergency override.
#[derive(Debug, Clone)]
pub struct EmergencyReport {
    pub action: EmergencyAction,
    /// Every non-maintenance record after the override.
    pub affected: Vec<Intersection>,
    /// Intersections left alone because they are under maintenance.
    pub skipped: Vec<IntersectionId>,
}

/// How a remote record was merged into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Inserted,
    Replaced,
    /// Identical to the local record.
    Unchanged,
}

/// Result of merging a remote collection snapshot.
#[derive(Debug, Default)]
pub struct SnapshotMerge {
    /// Remote records that violate a record invariant.
    pub rejected: Vec<(IntersectionId, RecordError)>,
    /// Intersections whose local record was kept over the remote copy.
    pub kept: Vec<IntersectionId>,
}

/// Per-status record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub active: usize,
    pub paused: usize,
    pub maintenance: usize,
}

impl StatusCounts {
    #[must_use]
    pub const fn get(&self, status: Status) -> usize {
        match status {
            Status::Active => self.active,
            Status::Paused => self.paused,
            Status::Maintenance => self.maintenance,
        }
    }
}

/// Mutex-guarded, insertion-ordered map of intersection records.
#[derive(Debug)]
pub struct IntersectionStore {
    records: Mutex<IndexMap<IntersectionId, IntersectionRecord>>,
    policy: ControlPolicy,
    snapshots: broadcast::Sender<Vec<Intersection>>,
}

impl IntersectionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(policy: ControlPolicy) -> Self {
        let (snapshots, _) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            records: Mutex::new(IndexMap::new()),
            policy,
            snapshots,
        }
    }

    /// Creates a store pre-populated with `seeds`.
    ///
    /// # Errors
    ///
    /// Returns the first seed that violates a record invariant.
    pub fn with_intersections(
        policy: ControlPolicy,
        seeds: impl IntoIterator<Item = Intersection>,
    ) -> Result<Self, (IntersectionId, RecordError)> {
        let store = Self::new(policy);
        {
            let mut records = store.lock();
            for seed in seeds {
                seed.record.validate().map_err(|e| (seed.id.clone(), e))?;
                records.insert(seed.id, seed.record);
            }
        }
        Ok(store)
    }

    #[must_use]
    pub const fn policy(&self) -> &ControlPolicy {
        &self.policy
    }

    // Mutations are plain field assignments; a poisoned lock still holds
    // consistent records.
    fn lock(&self) -> MutexGuard<'_, IndexMap<IntersectionId, IntersectionRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, records: &IndexMap<IntersectionId, IntersectionRecord>) {
        if self.snapshots.receiver_count() > 0 {
            let _ = self.snapshots.send(collect(records));
        }
    }

    /// Subscribes to store snapshots published after every change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<Intersection>> {
        self.snapshots.subscribe()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Returns a copy of one record.
    #[must_use]
    pub fn get(&self, id: &IntersectionId) -> Option<IntersectionRecord> {
        self.lock().get(id).cloned()
    }

    /// Returns a copy of every record in store order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Intersection> {
        collect(&self.lock())
    }

    #[must_use]
    pub fn status_counts(&self) -> StatusCounts {
        let records = self.lock();
        let mut counts = StatusCounts::default();
        for rec in records.values() {
            match rec.status {
                Status::Active => counts.active += 1,
                Status::Paused => counts.paused += 1,
                Status::Maintenance => counts.maintenance += 1,
            }
        }
        counts
    }

    // ------------------------------------------------------------------
    // Phase clock
    // ------------------------------------------------------------------

    /// Advances every active record by one second.
    pub fn tick_all(&self) -> TickReport {
        self.tick_all_with(|_| {})
    }

    /// Like [`tick_all`](Self::tick_all), handing every updated record to
    /// `on_update` before the lock is released.
    ///
    /// Consumers that forward updates elsewhere see them in the same order
    /// the store applied them, even when control actions race the clock.
    pub fn tick_all_with(&self, mut on_update: impl FnMut(&Intersection)) -> TickReport {
        let mut records = self.lock();
        let mut report = TickReport::default();
        for (id, rec) in records.iter_mut() {
            let outcome = clock::tick(rec);
            if !outcome.touched() {
                continue;
            }
            if let TickOutcome::Advanced { from, to } = outcome {
                report.advances.push(PhaseAdvance {
                    id: id.clone(),
                    from,
                    to,
                    time_remaining: rec.time_remaining,
                });
            }
            let item = Intersection {
                id: id.clone(),
                record: rec.clone(),
            };
            on_update(&item);
            report.updated.push(item);
        }
        if !report.updated.is_empty() {
            self.publish(&records);
        }
        report
    }

    // ------------------------------------------------------------------
    // Control surface
    // ------------------------------------------------------------------

    /// Applies an operator action to one intersection.
    ///
    /// Returns the record after the action and whether anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownIntersection`] if `id` is not in the
    /// store.
    pub fn apply(
        &self,
        id: &IntersectionId,
        action: ControlAction,
    ) -> Result<(IntersectionRecord, bool), ControlError> {
        self.apply_with(id, action, |_| {})
    }

    /// Like [`apply`](Self::apply), calling `on_change` with the updated
    /// record under the lock when the action changed it.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::UnknownIntersection`] if `id` is not in the
    /// store.
    pub fn apply_with(
        &self,
        id: &IntersectionId,
        action: ControlAction,
        on_change: impl FnOnce(&Intersection),
    ) -> Result<(IntersectionRecord, bool), ControlError> {
        let mut records = self.lock();
        let rec = records
            .get_mut(id)
            .ok_or_else(|| ControlError::UnknownIntersection(id.clone()))?;

        let was_active = rec.is_active();
        let changed = control::apply_action(rec, action, &self.policy);
        if action == ControlAction::ToggleManual
            && !was_active
            && rec.is_active()
            && self.policy.enabled(TransitionRule::ManualToggleResumes)
        {
            debug!(
                intersection = %id,
                rule = TransitionRule::ManualToggleResumes.as_str(),
                "manual toggle resumed intersection"
            );
        }
        let after = rec.clone();
        if changed {
            on_change(&Intersection {
                id: id.clone(),
                record: after.clone(),
            });
            self.publish(&records);
        }
        Ok((after, changed))
    }

    /// Applies an emergency override to every intersection not under
    /// maintenance.
    pub fn emergency(&self, action: EmergencyAction) -> EmergencyReport {
        self.emergency_with(action, |_| {})
    }

    /// Like [`emergency`](Self::emergency), handing every affected record
    /// to `on_change` before the lock is released.
    pub fn emergency_with(
        &self,
        action: EmergencyAction,
        mut on_change: impl FnMut(&Intersection),
    ) -> EmergencyReport {
        let mut records = self.lock();
        let mut affected = Vec::new();
        let mut skipped = Vec::new();
        for (id, rec) in records.iter_mut() {
            if control::apply_emergency(rec, action) {
                let item = Intersection {
                    id: id.clone(),
                    record: rec.clone(),
                };
                on_change(&item);
                affected.push(item);
            } else {
                skipped.push(id.clone());
            }
        }
        info!(
            action = %action,
            affected = affected.len(),
            skipped = skipped.len(),
            "emergency override applied"
        );
        if !affected.is_empty() {
            self.publish(&records);
        }
        EmergencyReport {
            action,
            affected,
            skipped,
        }
    }

    // ------------------------------------------------------------------
    // Remote sync
    // ------------------------------------------------------------------

    /// Inserts or replaces one record received from the shared store.
    ///
    /// # Errors
    ///
    /// Returns the violated invariant; the store is left unchanged.
    pub fn merge_remote(
        &self,
        id: IntersectionId,
        record: IntersectionRecord,
    ) -> Result<Merge, RecordError> {
        record.validate()?;
        let mut records = self.lock();
        let merge = match records.get(&id) {
            Some(existing) if *existing == record => return Ok(Merge::Unchanged),
            Some(_) => Merge::Replaced,
            None => Merge::Inserted,
        };
        records.insert(id, record);
        self.publish(&records);
        Ok(merge)
    }

    /// Applies a change to a single field of an existing record, as sent by
    /// the shared store for partial updates.
    ///
    /// # Errors
    ///
    /// Returns a decode message if the record is unknown, the field is not
    /// part of the schema, or the result violates a record invariant.
    pub fn merge_remote_field(
        &self,
        id: &IntersectionId,
        field: &str,
        value: serde_json::Value,
    ) -> Result<Merge, String> {
        let mut records = self.lock();
        let Some(existing) = records.get(id) else {
            return Err(format!("field update for unknown intersection '{id}'"));
        };
        let mut json = serde_json::to_value(existing).map_err(|e| e.to_string())?;
        let Some(obj) = json.as_object_mut() else {
            return Err("record did not serialize to an object".to_string());
        };
        if !obj.contains_key(field) {
            return Err(format!("unknown record field '{field}'"));
        }
        obj.insert(field.to_string(), value);
        let updated: IntersectionRecord =
            serde_json::from_value(json).map_err(|e| format!("field '{field}': {e}"))?;
        updated.validate().map_err(|e| e.to_string())?;
        if records.get(id) == Some(&updated) {
            return Ok(Merge::Unchanged);
        }
        records.insert(id.clone(), updated);
        self.publish(&records);
        Ok(Merge::Replaced)
    }

    /// Merges a remote snapshot of the whole collection.
    ///
    /// Invalid records are dropped and returned alongside their error.
    /// Records absent from the snapshot are kept: records are never
    /// deleted during a session.
    pub fn replace_from_remote(
        &self,
        snapshot: Vec<Intersection>,
    ) -> Vec<(IntersectionId, RecordError)> {
        self.merge_snapshot(snapshot, |_, _| false, |_| {}).rejected
    }

    /// Merges a remote snapshot, keeping local records the caller still
    /// owns.
    ///
    /// `keep_local` is asked about every valid remote record that has a
    /// local counterpart; when it answers `true` the local record stays and,
    /// if it differs from the remote copy, is passed to `on_kept` so it can
    /// be written back. Both callbacks run under the store lock.
    pub fn merge_snapshot(
        &self,
        snapshot: Vec<Intersection>,
        mut keep_local: impl FnMut(&IntersectionId, &IntersectionRecord) -> bool,
        mut on_kept: impl FnMut(&Intersection),
    ) -> SnapshotMerge {
        let mut merge = SnapshotMerge::default();
        let mut records = self.lock();
        for item in snapshot {
            if let Err(e) = item.record.validate() {
                merge.rejected.push((item.id, e));
                continue;
            }
            if let Some(local) = records.get(&item.id) {
                if keep_local(&item.id, &item.record) {
                    if *local != item.record {
                        on_kept(&Intersection {
                            id: item.id.clone(),
                            record: local.clone(),
                        });
                    }
                    merge.kept.push(item.id);
                    continue;
                }
            }
            records.insert(item.id, item.record);
        }
        self.publish(&records);
        merge
    }
}

fn collect(records: &IndexMap<IntersectionId, IntersectionRecord>) -> Vec<Intersection> {
    records
        .iter()
        .map(|(id, rec)| Intersection {
            id: id.clone(),
            record: rec.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::intersection::seed_intersections;
    use crate::signal::Mode;

    fn seeded() -> IntersectionStore {
        IntersectionStore::with_intersections(ControlPolicy::default(), seed_intersections())
            .unwrap()
    }

    fn id(s: &str) -> IntersectionId {
        IntersectionId::new(s)
    }

    #[test]
    fn seeds_keep_order() {
        let store = seeded();
        let ids: Vec<String> = store.snapshot().into_iter().map(|i| i.id.0).collect();
        assert_eq!(ids, ["1", "2", "3", "4"]);
    }

    #[test]
    fn invalid_seed_rejected() {
        let mut seeds = seed_intersections();
        seeds[1].record.phases.clear();
        let err = IntersectionStore::with_intersections(ControlPolicy::default(), seeds)
            .unwrap_err();
        assert_eq!(err.0, id("2"));
        assert_eq!(err.1, RecordError::EmptyPhases);
    }

    #[test]
    fn tick_skips_maintenance_and_reports_active() {
        let store = seeded();
        let report = store.tick_all();
        let ids: Vec<&str> = report.updated.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["1", "2", "4"]);
        assert_eq!(store.get(&id("3")).unwrap().time_remaining, 0);
        assert_eq!(store.get(&id("1")).unwrap().time_remaining, 44);
    }

    #[test]
    fn tick_reports_phase_advances() {
        let store = seeded();
        for _ in 0..7 {
            assert!(store.tick_all().advances.is_empty());
        }
        // Harbor Rd started on yellow-ew with 8 seconds.
        let report = store.tick_all();
        assert_eq!(
            report.advances,
            vec![PhaseAdvance {
                id: id("4"),
                from: "yellow-ew".into(),
                to: "red-ew".into(),
                time_remaining: 30,
            }]
        );
    }

    #[test]
    fn apply_unknown_intersection() {
        let store = seeded();
        let err = store.apply(&id("99"), ControlAction::Reset).unwrap_err();
        assert!(matches!(err, ControlError::UnknownIntersection(i) if i == id("99")));
    }

    #[test]
    fn apply_pause_then_tick_freezes() {
        let store = seeded();
        let (rec, changed) = store.apply(&id("1"), ControlAction::Pause).unwrap();
        assert!(changed);
        assert_eq!(rec.status, Status::Paused);
        store.tick_all();
        assert_eq!(store.get(&id("1")).unwrap().time_remaining, 45);
    }

    #[test]
    fn reset_on_fresh_green_is_unchanged() {
        let store = seeded();
        let (_, changed) = store.apply(&id("1"), ControlAction::Reset).unwrap();
        assert!(!changed);
    }

    #[test]
    fn manual_toggle_activates_maintenance_record() {
        let store = seeded();
        let (rec, _) = store.apply(&id("3"), ControlAction::ToggleManual).unwrap();
        assert_eq!(rec.mode, Mode::Automatic);
        assert_eq!(rec.status, Status::Active);
    }

    #[test]
    fn emergency_all_stop_leaves_maintenance() {
        let store = seeded();
        let before = store.get(&id("3")).unwrap();
        let report = store.emergency(EmergencyAction::AllStop);
        assert_eq!(report.affected.len(), 3);
        assert_eq!(report.skipped, vec![id("3")]);
        for item in &report.affected {
            assert_eq!(item.record.current_phase, "red-ns");
            assert_eq!(item.record.time_remaining, 30);
        }
        assert_eq!(store.get(&id("3")).unwrap(), before);
    }

    #[test]
    fn emergency_resume_unpauses() {
        let store = seeded();
        store.apply(&id("2"), ControlAction::Pause).unwrap();
        store.emergency(EmergencyAction::Resume);
        let rec = store.get(&id("2")).unwrap();
        assert_eq!(rec.status, Status::Active);
        assert_eq!(rec.current_phase, "green-ns");
        assert_eq!(store.get(&id("3")).unwrap().status, Status::Maintenance);
    }

    #[test]
    fn merge_remote_validates() {
        let store = seeded();
        let mut rec = store.get(&id("1")).unwrap();
        rec.current_phase = "purple".into();
        assert!(store.merge_remote(id("1"), rec).is_err());
        assert_eq!(store.get(&id("1")).unwrap().current_phase, "green-ns");
    }

    #[test]
    fn merge_remote_insert_replace_unchanged() {
        let store = seeded();
        let mut rec = store.get(&id("1")).unwrap();
        assert_eq!(store.merge_remote(id("1"), rec.clone()), Ok(Merge::Unchanged));
        rec.time_remaining = 3;
        assert_eq!(store.merge_remote(id("1"), rec.clone()), Ok(Merge::Replaced));
        assert_eq!(store.merge_remote(id("5"), rec), Ok(Merge::Inserted));
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn merge_remote_field_updates_one_field() {
        let store = seeded();
        let merge = store
            .merge_remote_field(&id("2"), "status", serde_json::json!("paused"))
            .unwrap();
        assert_eq!(merge, Merge::Replaced);
        assert_eq!(store.get(&id("2")).unwrap().status, Status::Paused);

        assert!(store
            .merge_remote_field(&id("2"), "colour", serde_json::json!("blue"))
            .is_err());
        assert!(store
            .merge_remote_field(&id("2"), "currentPhase", serde_json::json!("nope"))
            .is_err());
        assert!(store
            .merge_remote_field(&id("77"), "status", serde_json::json!("paused"))
            .is_err());
    }

    #[test]
    fn replace_from_remote_drops_invalid_and_keeps_missing() {
        let store = seeded();
        let mut incoming = seed_intersections();
        incoming.truncate(2);
        incoming[0].record.time_remaining = 9;
        incoming[1].record.phases.clear();
        let rejected = store.replace_from_remote(incoming);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].0, id("2"));
        assert_eq!(store.get(&id("1")).unwrap().time_remaining, 9);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn mutation_callbacks_see_records_in_apply_order() {
        let store = seeded();
        let mut seen = Vec::new();
        store.tick_all_with(|item| seen.push((item.id.clone(), item.record.time_remaining)));
        store
            .apply_with(&id("1"), ControlAction::Pause, |item| {
                seen.push((item.id.clone(), item.record.time_remaining));
            })
            .unwrap();
        store
            .apply_with(&id("1"), ControlAction::Pause, |_| panic!("unchanged record reported"))
            .unwrap();
        store.emergency_with(EmergencyAction::AllStop, |item| {
            seen.push((item.id.clone(), item.record.time_remaining));
        });
        assert_eq!(
            seen,
            [
                (id("1"), 44),
                (id("2"), 11),
                (id("4"), 7),
                (id("1"), 44),
                (id("1"), 30),
                (id("2"), 30),
                (id("4"), 30),
            ]
        );
    }

    #[test]
    fn merge_snapshot_keeps_owned_records() {
        let store = seeded();
        store.apply(&id("1"), ControlAction::Pause).unwrap();
        let mut incoming = seed_intersections();
        incoming[1].record.time_remaining = 5;

        let mut written = Vec::new();
        let merge = store.merge_snapshot(
            incoming,
            |i, _| i == &id("1") || i == &id("3"),
            |item| written.push(item.clone()),
        );

        assert_eq!(merge.kept, vec![id("1"), id("3")]);
        assert!(merge.rejected.is_empty());
        assert_eq!(store.get(&id("1")).unwrap().status, Status::Paused);
        assert_eq!(store.get(&id("2")).unwrap().time_remaining, 5);
        // Record 3 already matched the remote copy, so only 1 is written back.
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].record.status, Status::Paused);
    }

    #[test]
    fn status_counts() {
        let store = seeded();
        let counts = store.status_counts();
        assert_eq!(counts.get(Status::Active), 3);
        assert_eq!(counts.get(Status::Maintenance), 1);
        assert_eq!(counts.get(Status::Paused), 0);
    }

    #[tokio::test]
    async fn subscribers_see_snapshots() {
        let store = seeded();
        let mut rx = store.subscribe();
        store.apply(&id("1"), ControlAction::Pause).unwrap();
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap[0].record.status, Status::Paused);
    }
}
