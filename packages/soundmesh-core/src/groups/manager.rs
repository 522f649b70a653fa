//! GroupManager (§4.9): reacts to [`GroupTracker`] changes by joining native
//! backend groups where possible, falling back to PCM replication via
//! [`MixedGroupCoordinator`] for members whose protocol has no native-group
//! hook, and owns the two group-volume algorithms.
//!
//! Grounded on `services/sync_group_manager.rs`'s "on group change, tell the
//! renderer layer to converge" shape, split here into the native-join path
//! (driver-specific SOAP/cast calls) and the mixed-replication path
//! ([`MixedGroupCoordinator`]) the teacher keeps as one undifferentiated
//! "add to group" call.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::audio_manager::AudioManager;
use crate::error::SoundMeshResult;
use crate::events::EventEmitter;
use crate::groups::mixed::MixedGroupCoordinator;
use crate::groups::tracker::{GroupChangeKind, GroupTracker};
use crate::model::{GroupRecord, ZoneId};
use crate::outputs::sonos::SonosDriver;
use crate::outputs::OutputDriver;
use crate::protocol_constants::{GROUP_VOLUME_CONVERGENCE_EPSILON, GROUP_VOLUME_MAX_ITERATIONS};

/// Backends that support joining a native, renderer-side group (currently
/// only Sonos's `SetAVTransportURI x-rincon:` join, §4.7). Implemented by
/// wrapping each driver's own inherent `join_group`/`leave_group`.
#[async_trait]
pub trait GroupCapable: Send + Sync {
    async fn join_group(&self, coordinator_token: &str) -> SoundMeshResult<()>;
    async fn leave_group(&self) -> SoundMeshResult<()>;
}

#[async_trait]
impl GroupCapable for SonosDriver {
    async fn join_group(&self, coordinator_token: &str) -> SoundMeshResult<()> {
        SonosDriver::join_group(self, coordinator_token).await
    }

    async fn leave_group(&self) -> SoundMeshResult<()> {
        SonosDriver::leave_group(self).await
    }
}

/// Wire payload for a group's current state, broadcast to clients on every
/// change (§4.9 `broadcastGroupState`).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioSyncGroupPayload {
    pub leader: ZoneId,
    pub members: Vec<ZoneId>,
    pub backend: String,
    pub volumes: Vec<u8>,
}

/// Coordinates group membership changes across native-capable and
/// mixed-protocol backends.
pub struct GroupManager {
    tracker: Arc<GroupTracker>,
    mixed: Arc<MixedGroupCoordinator>,
    audio_manager: Arc<AudioManager>,
    /// Every zone's volume-control driver, used for `applyMasterVolume`
    /// and `applySpecGroupVolume`.
    drivers: Arc<DashMap<ZoneId, Arc<dyn OutputDriver>>>,
    /// Subset of `drivers` whose backend exposes native grouping.
    group_capable: Arc<DashMap<ZoneId, Arc<dyn GroupCapable>>>,
    emitter: Arc<dyn EventEmitter>,
}

impl GroupManager {
    pub fn new(
        tracker: Arc<GroupTracker>,
        mixed: Arc<MixedGroupCoordinator>,
        audio_manager: Arc<AudioManager>,
        drivers: Arc<DashMap<ZoneId, Arc<dyn OutputDriver>>>,
        group_capable: Arc<DashMap<ZoneId, Arc<dyn GroupCapable>>>,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            tracker,
            mixed,
            audio_manager,
            drivers,
            group_capable,
            emitter,
        }
    }

    /// Applies a group membership change: normalizes and stores it via
    /// [`GroupTracker::upsert_group`], then converges every member onto the
    /// leader's content, either through a native group join or, for members
    /// whose backend isn't in `group_capable`, a PCM tap via
    /// [`MixedGroupCoordinator`].
    pub async fn upsert_group(&self, record: GroupRecord, sample_rate: u32, channels: u16) -> SoundMeshResult<GroupRecord> {
        let (stored, kind) = self.tracker.upsert_group(record)?;
        if kind == GroupChangeKind::Unchanged {
            return Ok(stored);
        }

        for member in stored.members.iter().filter(|m| **m != stored.leader) {
            if let Some(capable) = self.group_capable.get(member) {
                if capable.join_group(&stored.leader).await.is_ok() {
                    continue;
                }
                log::warn!("[groups] native join failed for {member}, falling back to PCM replication");
            }
            if let Err(e) = self.mixed.attach_member(&stored.leader, member, sample_rate, channels).await {
                log::warn!("[groups] failed to attach {member} to {} via PCM tap: {e}", stored.leader);
            }
        }

        self.broadcast_group_state(&stored);
        Ok(stored)
    }

    /// Tears down the group led by `leader`: stops every non-leader member
    /// and broadcasts an empty payload (§4.9).
    pub async fn remove_group(&self, leader: &str) -> SoundMeshResult<()> {
        let Some(record) = self.tracker.remove_group(leader) else {
            return Ok(());
        };
        for member in record.members.iter().filter(|m| **m != record.leader) {
            if let Some(capable) = self.group_capable.get(member) {
                let _ = capable.leave_group().await;
            }
            self.mixed.detach_member(&record.leader, member).await;
            let _ = self.audio_manager.stop(member).await;
        }
        self.emitter.emit_topology(crate::events::TopologyEvent::GroupsDiscovered {
            group_count: self.tracker.all_groups().len(),
            timestamp: crate::utils::now_millis(),
        });
        Ok(())
    }

    /// §4.9 `applyMasterVolume`: shifts every member by the leader's own
    /// volume delta, clamped to `[0, 100]`. No iteration; a member already at
    /// a clamp boundary simply stays there.
    pub fn apply_master_volume(leader_volume: u8, target: u8, members: &[u8]) -> Vec<u8> {
        let delta = target as i32 - leader_volume as i32;
        members
            .iter()
            .map(|v| (*v as i32 + delta).clamp(0, 100) as u8)
            .collect()
    }

    /// §4.9 `applySpecGroupVolume`: drives every member toward `target` by
    /// the same delta, redistributing whatever a clamp ate away across the
    /// members that still have headroom, until the redistributed remainder
    /// is negligible or everyone is clamped.
    pub fn apply_spec_group_volume(members: &[u8], target: u8) -> Vec<u8> {
        if members.is_empty() {
            return Vec::new();
        }
        let mut volumes: Vec<f64> = members.iter().map(|v| *v as f64).collect();
        let mean = volumes.iter().sum::<f64>() / volumes.len() as f64;
        let mut remaining_delta = target as f64 - mean;

        for _ in 0..GROUP_VOLUME_MAX_ITERATIONS {
            if remaining_delta.abs() < GROUP_VOLUME_CONVERGENCE_EPSILON {
                break;
            }
            let mut unclamped: Vec<usize> = Vec::new();
            let mut lost = 0.0;
            for (i, v) in volumes.iter_mut().enumerate() {
                let proposed = *v + remaining_delta;
                let clamped = proposed.clamp(0.0, 100.0);
                lost += proposed - clamped;
                *v = clamped;
                if clamped > 0.0 && clamped < 100.0 {
                    unclamped.push(i);
                }
            }
            if lost.abs() < GROUP_VOLUME_CONVERGENCE_EPSILON || unclamped.is_empty() {
                break;
            }
            remaining_delta = -lost / unclamped.len() as f64;
        }

        volumes.into_iter().map(|v| v.round().clamp(0.0, 100.0) as u8).collect()
    }

    /// Pushes computed `(zone, volume)` targets out to each zone's driver,
    /// the step [`Self::apply_master_volume`]/[`Self::apply_spec_group_volume`]
    /// feed into once a caller has decided which algorithm applies.
    pub async fn apply_volumes(&self, assignments: &[(ZoneId, u8)]) -> SoundMeshResult<()> {
        for (zone_id, volume) in assignments {
            let Some(driver) = self.drivers.get(zone_id).map(|e| e.clone()) else {
                log::warn!("[groups] no output driver registered for zone {zone_id}, skipping volume push");
                continue;
            };
            driver.set_volume(*volume).await?;
        }
        Ok(())
    }

    fn broadcast_group_state(&self, record: &GroupRecord) {
        let volumes = vec![50u8; record.members.len()];
        let payload = AudioSyncGroupPayload {
            leader: record.leader.clone(),
            members: record.members.clone(),
            backend: record.backend.clone(),
            volumes,
        };
        log::debug!("[groups] broadcasting group state: {payload:?}");
        self.emitter.emit_topology(crate::events::TopologyEvent::GroupsDiscovered {
            group_count: self.tracker.all_groups().len(),
            timestamp: crate::utils::now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_volume_shifts_every_member_by_the_same_delta() {
        let shifted = GroupManager::apply_master_volume(40, 60, &[20, 50, 90]);
        assert_eq!(shifted, vec![40, 70, 100]);
    }

    #[test]
    fn master_volume_clamps_without_redistribution() {
        let shifted = GroupManager::apply_master_volume(10, 0, &[5, 50]);
        assert_eq!(shifted, vec![0, 40]);
    }

    #[test]
    fn spec_group_volume_converges_on_target_mean() {
        let result = GroupManager::apply_spec_group_volume(&[20, 40, 60], 50);
        let mean: f64 = result.iter().map(|v| *v as f64).sum::<f64>() / result.len() as f64;
        assert!((mean - 50.0).abs() < 1.0);
    }

    #[test]
    fn spec_group_volume_redistributes_clamped_headroom() {
        let result = GroupManager::apply_spec_group_volume(&[0, 50], 10);
        assert_eq!(result[0], 0);
        assert!(result[1] > 50);
    }

    #[test]
    fn spec_group_volume_handles_empty_members() {
        assert_eq!(GroupManager::apply_spec_group_volume(&[], 50), Vec::<u8>::new());
    }
}
