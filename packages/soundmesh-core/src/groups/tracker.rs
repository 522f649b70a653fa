//! GroupTracker (§4.9): process-wide membership bookkeeping for zone groups.
//!
//! Grounded on `services/sync_group_manager.rs`'s group membership shape and
//! `sonos/zone_groups.rs`'s normalization idiom (leader first, members
//! sorted), generalized from one backend's topology push to any backend's
//! `upsert_group`/`remove_group` calls converging on one `GroupRecord` store.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::events::{EventEmitter, TopologyEvent};
use crate::model::{GroupRecord, ZoneId};

/// What changed as a result of an `upsert_group` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupChangeKind {
    New,
    Updated,
    Unchanged,
}

/// Indexed store of every active [`GroupRecord`], keyed by leader, member and
/// backend external id.
pub struct GroupTracker {
    by_leader: DashMap<ZoneId, GroupRecord>,
    member_index: DashMap<ZoneId, ZoneId>,
    external_index: DashMap<String, ZoneId>,
    emitter: Arc<dyn EventEmitter>,
}

impl GroupTracker {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            by_leader: DashMap::new(),
            member_index: DashMap::new(),
            external_index: DashMap::new(),
            emitter,
        }
    }

    pub fn group_led_by(&self, leader: &str) -> Option<GroupRecord> {
        self.by_leader.get(leader).map(|e| e.clone())
    }

    /// Looks up the group a zone belongs to, whether it is the leader or a
    /// member.
    pub fn group_for_zone(&self, zone_id: &str) -> Option<GroupRecord> {
        if let Some(record) = self.by_leader.get(zone_id) {
            return Some(record.clone());
        }
        let leader = self.member_index.get(zone_id)?.clone();
        self.by_leader.get(&leader).map(|e| e.clone())
    }

    pub fn group_by_external_id(&self, external_id: &str) -> Option<GroupRecord> {
        let leader = self.external_index.get(external_id)?.clone();
        self.by_leader.get(&leader).map(|e| e.clone())
    }

    pub fn all_groups(&self) -> Vec<GroupRecord> {
        self.by_leader.iter().map(|e| e.value().clone()).collect()
    }

    /// Normalizes `record` (leader present, members deduped and sorted with
    /// the leader first), rejects a member already claimed by a different
    /// leader or a member that is itself a leader, stores the result and
    /// returns it together with what kind of change it was.
    pub fn upsert_group(&self, mut record: GroupRecord) -> SoundMeshResult<(GroupRecord, GroupChangeKind)> {
        if !record.members.contains(&record.leader) {
            record.members.push(record.leader.clone());
        }
        let others: std::collections::BTreeSet<ZoneId> = record
            .members
            .iter()
            .filter(|m| **m != record.leader)
            .cloned()
            .collect();
        let mut normalized = Vec::with_capacity(others.len() + 1);
        normalized.push(record.leader.clone());
        normalized.extend(others);
        record.members = normalized;

        if !record.is_valid() {
            return Err(SoundMeshError::GroupInvariant(format!(
                "group led by {} failed validation after normalization",
                record.leader
            )));
        }

        for member in record.members.iter().filter(|m| **m != record.leader) {
            if let Some(existing_leader) = self.member_index.get(member) {
                if *existing_leader != record.leader {
                    return Err(SoundMeshError::GroupInvariant(format!(
                        "zone {member} already belongs to the group led by {}",
                        *existing_leader
                    )));
                }
            }
            if self.by_leader.contains_key(member) {
                return Err(SoundMeshError::GroupInvariant(format!(
                    "zone {member} is itself a group leader"
                )));
            }
        }

        let kind = match self.by_leader.get(&record.leader) {
            Some(existing) if *existing == record => GroupChangeKind::Unchanged,
            Some(_) => GroupChangeKind::Updated,
            None => GroupChangeKind::New,
        };

        if kind != GroupChangeKind::Unchanged {
            for member in &record.members {
                if *member != record.leader {
                    self.member_index.insert(member.clone(), record.leader.clone());
                }
            }
            if let Some(external_id) = &record.external_id {
                self.external_index.insert(external_id.clone(), record.leader.clone());
            }
            self.by_leader.insert(record.leader.clone(), record.clone());
            self.emit_groups_discovered();
        }

        Ok((record, kind))
    }

    /// Removes the group led by `leader`, returning the record that was
    /// removed (if any) so the caller can stop its members.
    pub fn remove_group(&self, leader: &str) -> Option<GroupRecord> {
        let (_, record) = self.by_leader.remove(leader)?;
        for member in &record.members {
            if member != leader {
                self.member_index.remove(member);
            }
        }
        if let Some(external_id) = &record.external_id {
            self.external_index.remove(external_id);
        }
        self.emit_groups_discovered();
        Some(record)
    }

    fn emit_groups_discovered(&self) {
        self.emitter.emit_topology(TopologyEvent::GroupsDiscovered {
            group_count: self.by_leader.len(),
            timestamp: crate::utils::now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::model::GroupSource;

    fn record(leader: &str, members: &[&str]) -> GroupRecord {
        GroupRecord {
            leader: leader.into(),
            members: members.iter().map(|m| m.to_string()).collect(),
            backend: "dlna".into(),
            external_id: None,
            source: GroupSource::Manual,
            updated_at: 0,
        }
    }

    #[test]
    fn upsert_normalizes_members_and_reports_new() {
        let tracker = GroupTracker::new(Arc::new(NoopEventEmitter));
        let (stored, kind) = tracker.upsert_group(record("z1", &["z3", "z2"])).unwrap();
        assert_eq!(stored.members, vec!["z1".to_string(), "z2".to_string(), "z3".to_string()]);
        assert_eq!(kind, GroupChangeKind::New);
    }

    #[test]
    fn second_identical_upsert_is_unchanged() {
        let tracker = GroupTracker::new(Arc::new(NoopEventEmitter));
        tracker.upsert_group(record("z1", &["z1", "z2"])).unwrap();
        let (_, kind) = tracker.upsert_group(record("z1", &["z1", "z2"])).unwrap();
        assert_eq!(kind, GroupChangeKind::Unchanged);
    }

    #[test]
    fn upsert_rejects_member_already_claimed_by_another_leader() {
        let tracker = GroupTracker::new(Arc::new(NoopEventEmitter));
        tracker.upsert_group(record("z1", &["z1", "z2"])).unwrap();
        let err = tracker.upsert_group(record("z9", &["z9", "z2"])).unwrap_err();
        assert!(matches!(err, SoundMeshError::GroupInvariant(_)));
    }

    #[test]
    fn remove_group_clears_member_index() {
        let tracker = GroupTracker::new(Arc::new(NoopEventEmitter));
        tracker.upsert_group(record("z1", &["z1", "z2"])).unwrap();
        let removed = tracker.remove_group("z1").unwrap();
        assert_eq!(removed.leader, "z1");
        assert!(tracker.group_for_zone("z2").is_none());
    }
}
