//! MixedGroupCoordinator (§4.9): replicates a leader's audio to members
//! whose output protocol doesn't support native grouping by tapping the
//! leader's PCM fanout and fanning it out through per-member named pipes.
//!
//! Grounded on `engine/mod.rs`'s `createLocalSession`/`createStream` pair —
//! reusing the *existing* PCM fanout the leader's session already carries
//! when it's a mixed-group leader (`AudioManager::select_profiles` adds
//! `Pcm` for exactly this reason) rather than spinning up a second,
//! independent local session.

use std::sync::Arc;

use crate::engine::TranscodeEngine;
use crate::error::{SoundMeshError, SoundMeshResult};
use crate::fanout::{FanoutMessage, SubscribeOptions};
use crate::groups::pipe_fanout::PipeFanout;
use crate::model::OutputProfile;
use crate::protocol_constants::{MIXED_GROUP_FRESH_START_SECS, SUBSCRIBER_QUEUE_MAX_BYTES};
use crate::runtime::TaskSpawner;

/// Taps a mixed-group leader's PCM output and relays it into member pipes.
pub struct MixedGroupCoordinator {
    engine: Arc<TranscodeEngine>,
    pipe_fanout: Arc<PipeFanout>,
    spawner: Arc<dyn TaskSpawner>,
}

impl MixedGroupCoordinator {
    pub fn new(engine: Arc<TranscodeEngine>, pipe_fanout: Arc<PipeFanout>, spawner: Arc<dyn TaskSpawner>) -> Self {
        Self {
            engine,
            pipe_fanout,
            spawner,
        }
    }

    /// §4.9 "Start-at resolution for local taps": prefers the greater of the
    /// leader's recorded elapsed time and wall-clock `now - startedAt`,
    /// unless the session is younger than [`MIXED_GROUP_FRESH_START_SECS`]
    /// (treated as a fresh start), clamped to `[0, duration-1]`.
    pub fn decide_tap_start_at(leader_started_at_ms: u64, now_ms: u64, leader_elapsed_sec: f64, duration_sec: f64) -> f64 {
        let session_age_sec = now_ms.saturating_sub(leader_started_at_ms) as f64 / 1000.0;
        if session_age_sec < MIXED_GROUP_FRESH_START_SECS as f64 {
            return 0.0;
        }
        let start_at = leader_elapsed_sec.max(session_age_sec);
        if duration_sec > 0.0 {
            start_at.clamp(0.0, (duration_sec - 1.0).max(0.0))
        } else {
            start_at.max(0.0)
        }
    }

    /// Subscribes to `leader_zone_id`'s PCM fanout and relays it into a
    /// fresh input pipe for `member_zone_id`. Returns the `pipe:` URI the
    /// caller hands to `AudioManager::play_uri` for that member, so it joins
    /// the engine's ordinary `pipe` source machinery (including its
    /// self-healing restart) instead of a bespoke playback path.
    pub async fn attach_member(
        &self,
        leader_zone_id: &str,
        member_zone_id: &str,
        sample_rate: u32,
        channels: u16,
    ) -> SoundMeshResult<String> {
        let mut subscription = self.engine.create_stream(
            leader_zone_id,
            OutputProfile::Pcm,
            SUBSCRIBER_QUEUE_MAX_BYTES,
            SubscribeOptions {
                prime_with_buffer: true,
                label: format!("mixed-group:{member_zone_id}"),
            },
        )?;

        let stream_id = format!("mixed-{leader_zone_id}-{member_zone_id}");
        self.pipe_fanout
            .open(stream_id.clone())
            .await
            .map_err(|e| SoundMeshError::EngineFailure(e.to_string()))?;

        let pipe_fanout = self.pipe_fanout.clone();
        let relay_stream_id = stream_id.clone();
        self.spawner.spawn(Box::pin(async move {
            loop {
                match subscription.recv().await {
                    Some(FanoutMessage::Data(chunk)) => pipe_fanout.feed(&relay_stream_id, chunk).await,
                    Some(FanoutMessage::End) | Some(FanoutMessage::Error(_)) | None => break,
                }
            }
            pipe_fanout.close(&relay_stream_id).await;
        }));

        Ok(format!("pipe:{stream_id}?format=s16le&rate={sample_rate}&channels={channels}"))
    }

    pub async fn detach_member(&self, leader_zone_id: &str, member_zone_id: &str) {
        self.pipe_fanout
            .close(&format!("mixed-{leader_zone_id}-{member_zone_id}"))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_starts_at_zero() {
        let start_at = MixedGroupCoordinator::decide_tap_start_at(1_000, 2_000, 40.0, 300.0);
        assert_eq!(start_at, 0.0);
    }

    #[test]
    fn settled_session_prefers_greater_of_elapsed_and_wall_clock() {
        let start_at = MixedGroupCoordinator::decide_tap_start_at(0, 10_000, 5.0, 300.0);
        assert_eq!(start_at, 10.0);
    }

    #[test]
    fn start_at_is_clamped_below_duration() {
        let start_at = MixedGroupCoordinator::decide_tap_start_at(0, 301_000, 0.0, 300.0);
        assert_eq!(start_at, 299.0);
    }
}
