//! PlaybackService: thin façade over [`TranscodeEngine`] + [`Fanout`]
//! (§4.4).
//!
//! Grounded on the teacher's `streaming_runtime.rs` "bootstrap owns the
//! long-lived singletons, exposes a narrow surface to callers" shape: this
//! type owns nothing the engine/fanout don't already own, it only
//! translates `AudioManager`'s domain calls into engine options and forwards
//! the termination channel onward.

use std::sync::Arc;

use crate::engine::{StartOptions, StopReason, TerminationEvent, TranscodeEngine};
use crate::error::SoundMeshResult;
use crate::fanout::{FanoutSubscription, SubscribeOptions};
use crate::model::{AudioOutputSettings, EngineOutputSpec, OutputProfile, PlaybackSource, ProfileStats, ZoneId};

/// Facade over [`TranscodeEngine`] (§4.4 PlaybackService).
pub struct PlaybackService {
    engine: Arc<TranscodeEngine>,
}

impl PlaybackService {
    pub fn new(engine: Arc<TranscodeEngine>) -> Self {
        Self { engine }
    }

    /// (a) translates `PlaybackSource` + profile list + `AudioOutputSettings`
    /// into engine `start` options.
    pub async fn start(
        &self,
        zone_id: &ZoneId,
        source: PlaybackSource,
        profiles: &[OutputProfile],
        settings: &AudioOutputSettings,
        binary_path: &str,
    ) -> SoundMeshResult<()> {
        let outputs = profiles
            .iter()
            .map(|&profile| EngineOutputSpec {
                profile,
                sample_rate: settings.sample_rate,
                channels: settings.channels,
                pcm_bit_depth: settings.pcm_bit_depth,
                mp3_bitrate_kbps: settings.mp3_bitrate_kbps,
            })
            .collect();
        self.engine
            .start(StartOptions {
                zone_id: zone_id.clone(),
                input: source,
                outputs,
                binary_path: binary_path.to_string(),
                prebuffer_bytes: settings.prebuffer_bytes,
            })
            .await
    }

    /// §4.2 `startWithHandoff`, forwarded for gapless source changes.
    pub async fn start_with_handoff(
        &self,
        zone_id: &ZoneId,
        source: PlaybackSource,
        profiles: &[OutputProfile],
        settings: &AudioOutputSettings,
        binary_path: &str,
        migrate_profile: OutputProfile,
        timeout_ms: u64,
    ) -> SoundMeshResult<()> {
        let outputs = profiles
            .iter()
            .map(|&profile| EngineOutputSpec {
                profile,
                sample_rate: settings.sample_rate,
                channels: settings.channels,
                pcm_bit_depth: settings.pcm_bit_depth,
                mp3_bitrate_kbps: settings.mp3_bitrate_kbps,
            })
            .collect();
        self.engine
            .start_with_handoff(
                StartOptions {
                    zone_id: zone_id.clone(),
                    input: source,
                    outputs,
                    binary_path: binary_path.to_string(),
                    prebuffer_bytes: settings.prebuffer_bytes,
                },
                migrate_profile,
                timeout_ms,
            )
            .await
    }

    pub async fn stop(&self, zone_id: &str, reason: StopReason, discard_subscribers: bool) -> SoundMeshResult<()> {
        self.engine.stop(zone_id, reason, discard_subscribers).await
    }

    pub fn has_session(&self, zone_id: &str) -> bool {
        self.engine.has_session(zone_id)
    }

    /// (b) exposes subscriber APIs.
    pub fn create_stream(
        &self,
        zone_id: &str,
        profile: OutputProfile,
        max_bytes: usize,
        opts: SubscribeOptions,
    ) -> SoundMeshResult<FanoutSubscription> {
        self.engine.create_stream(zone_id, profile, max_bytes, opts)
    }

    pub async fn wait_for_first_chunk(&self, zone_id: &str, profile: OutputProfile, timeout_ms: u64) -> bool {
        self.engine.wait_for_first_chunk(zone_id, profile, timeout_ms).await
    }

    /// §4.2 `createLocalSession`: used by mixed-group PCM tapping.
    pub async fn create_local_session(
        &self,
        local_id: String,
        source: PlaybackSource,
        output: EngineOutputSpec,
        prebuffer_bytes: usize,
        binary_path: String,
    ) -> SoundMeshResult<()> {
        self.engine
            .create_local_session(local_id, source, output, prebuffer_bytes, binary_path)
            .await
    }

    pub async fn stop_local_session(&self, local_id: &str) {
        self.engine.stop_local_session(local_id).await;
    }

    pub fn local_session_stream(
        &self,
        local_id: &str,
        profile: OutputProfile,
        max_bytes: usize,
        opts: SubscribeOptions,
    ) -> Option<FanoutSubscription> {
        self.engine.local_session_stream(local_id, profile, max_bytes, opts)
    }

    /// (b) exposes stats APIs.
    pub fn stats(&self, zone_id: &str) -> Option<std::collections::HashMap<OutputProfile, ProfileStats>> {
        self.engine.get_session_stats(zone_id)
    }

    /// (c) the session-termination callback is wired into `AudioManager` by
    /// the caller holding the `mpsc::Receiver<TerminationEvent>` side of the
    /// channel this service's engine was constructed with — this facade does
    /// not hold that receiver itself, matching §4.4's "wires... into
    /// AudioManager" rather than "owns the wiring".
    pub fn termination_event_zone(event: &TerminationEvent) -> &ZoneId {
        &event.zone_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::TokioSpawner;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn has_session_false_for_unstarted_zone() {
        let (tx, _rx) = mpsc::channel(8);
        let spawner = Arc::new(TokioSpawner::current());
        let engine = Arc::new(TranscodeEngine::new(tx, spawner));
        let service = PlaybackService::new(engine);
        assert!(!service.has_session("z1"));
    }
}
