//! ZonePlayer: per-zone playback state machine with a position ticker
//! (§4.6).
//!
//! Grounded on `stream/manager.rs`'s spawned-task-per-resource idiom
//! (`TaskSpawner::spawn` driving a loop that reads shared state through an
//! `Arc`) generalized from "pump bytes" to "advance wall-clock position".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::audio_manager::{AudioManager, ProfileRequirement};
use crate::engine::TranscodeEngine;
use crate::error::SoundMeshResult;
use crate::events::{EventEmitter, ZoneEvent};
use crate::model::{OutputProfile, PlaybackMetadata, PlaybackState, ZoneId};
use crate::protocol_constants::{POSITION_TICKER_INTERVAL_MS, POSITION_TICKER_START_BARRIER_SECS};
use crate::runtime::TaskSpawner;

fn now_millis() -> u64 {
    crate::utils::now_millis()
}

/// Small tolerance added to `duration` before the `ended` event fires, to
/// absorb encoder trailing bytes (§4.6, per-zone override of the process
/// default).
#[derive(Debug, Clone, Copy)]
pub struct EndGuard(pub f64);

impl Default for EndGuard {
    fn default() -> Self {
        Self(0.0)
    }
}

/// Owns the position ticker for one zone. `AudioManager` remains the sole
/// owner of `PlaybackSession` mutation; this type only reads elapsed/duration
/// back out of it to compute ticks and publish `position`/`ended` events.
pub struct ZonePlayer {
    zone_id: ZoneId,
    audio_manager: Arc<AudioManager>,
    engine: Arc<TranscodeEngine>,
    emitter: Arc<dyn EventEmitter>,
    spawner: Arc<dyn TaskSpawner>,
    end_guard: EndGuard,
    ticking: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
}

impl ZonePlayer {
    pub fn new(
        zone_id: ZoneId,
        audio_manager: Arc<AudioManager>,
        engine: Arc<TranscodeEngine>,
        emitter: Arc<dyn EventEmitter>,
        spawner: Arc<dyn TaskSpawner>,
        end_guard: EndGuard,
    ) -> Self {
        Self {
            zone_id,
            audio_manager,
            engine,
            emitter,
            spawner,
            end_guard,
            ticking: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// §4.6 `playUri`: starts the session via `AudioManager` then arms the
    /// position ticker once the primary profile's first chunk has arrived,
    /// or a 15 s barrier elapses — whichever comes first.
    #[allow(clippy::too_many_arguments)]
    pub async fn play_uri(
        &self,
        uri: &str,
        metadata: PlaybackMetadata,
        start_at_sec: Option<f64>,
        requirement: ProfileRequirement,
        is_mixed_group_leader: bool,
        output_settings: crate::model::AudioOutputSettings,
        primary_profile: OutputProfile,
    ) -> SoundMeshResult<()> {
        self.audio_manager
            .play_uri(
                &self.zone_id,
                uri,
                metadata,
                start_at_sec,
                requirement,
                is_mixed_group_leader,
                output_settings,
            )
            .await?;
        self.arm_ticker(primary_profile);
        Ok(())
    }

    pub async fn pause(&self) -> SoundMeshResult<()> {
        self.disarm_ticker();
        self.audio_manager.pause(&self.zone_id).await
    }

    pub async fn resume(&self, primary_profile: OutputProfile) -> SoundMeshResult<()> {
        self.audio_manager.resume(&self.zone_id).await?;
        self.arm_ticker(primary_profile);
        Ok(())
    }

    pub async fn stop(&self) -> SoundMeshResult<()> {
        self.disarm_ticker();
        self.audio_manager.stop(&self.zone_id).await
    }

    fn disarm_ticker(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.ticking.store(false, Ordering::SeqCst);
    }

    /// Arms the ticker: waits (without blocking the caller) for the first
    /// chunk of `primary_profile`, or the 15 s barrier, then spawns the tick
    /// loop. Each arm bumps `generation` so a stale ticker from a prior
    /// `playUri`/`resume` call exits cleanly instead of double-ticking.
    fn arm_ticker(&self, primary_profile: OutputProfile) {
        let my_generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.ticking.store(true, Ordering::SeqCst);

        let zone_id = self.zone_id.clone();
        let audio_manager = self.audio_manager.clone();
        let engine = self.engine.clone();
        let emitter = self.emitter.clone();
        let generation = self.generation.clone();
        let ticking = self.ticking.clone();
        let end_guard = self.end_guard;

        self.spawner.spawn(Box::pin(async move {
            let _ = tokio::time::timeout(
                Duration::from_secs(POSITION_TICKER_START_BARRIER_SECS),
                engine.wait_for_first_chunk(
                    &zone_id,
                    primary_profile,
                    POSITION_TICKER_START_BARRIER_SECS * 1000,
                ),
            )
            .await;

            if generation.load(Ordering::SeqCst) != my_generation {
                return;
            }

            run_tick_loop(zone_id, audio_manager, emitter, generation, ticking, my_generation, end_guard).await;
        }));
    }
}

async fn run_tick_loop(
    zone_id: ZoneId,
    audio_manager: Arc<AudioManager>,
    emitter: Arc<dyn EventEmitter>,
    generation: Arc<AtomicU64>,
    ticking: Arc<AtomicBool>,
    my_generation: u64,
    end_guard: EndGuard,
) {
    let mut last_tick = now_millis();
    loop {
        tokio::time::sleep(Duration::from_millis(POSITION_TICKER_INTERVAL_MS)).await;
        if generation.load(Ordering::SeqCst) != my_generation || !ticking.load(Ordering::SeqCst) {
            return;
        }

        let now = now_millis();
        let delta_sec = (now.saturating_sub(last_tick)) as f64 / 1000.0;
        last_tick = now;

        let Some((elapsed, duration, state)) = audio_manager.tick_position(&zone_id, delta_sec) else {
            return;
        };
        if state != PlaybackState::Playing {
            return;
        }

        emitter.emit_zone(ZoneEvent::Position {
            zone_id: zone_id.clone(),
            position: elapsed,
            timestamp: now,
        });

        if duration > 0.0 && elapsed >= duration - end_guard.0 {
            emitter.emit_zone(ZoneEvent::Ended {
                zone_id: zone_id.clone(),
                position: duration,
                timestamp: now,
            });
            ticking.store(false, Ordering::SeqCst);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_guard_defaults_to_zero() {
        assert_eq!(EndGuard::default().0, 0.0);
    }
}
