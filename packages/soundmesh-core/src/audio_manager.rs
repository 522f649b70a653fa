//! AudioManager: owner of the per-zone [`PlaybackSession`] (§4.5).
//!
//! Grounded on `services::playback_session_store::PlaybackSessionStore`'s
//! indexed-`DashMap` shape (primary map keyed by the natural id, secondary
//! index for a different lookup axis the caller also needs) — here the
//! primary map is `zoneId -> PlaybackSession` and the secondary index is
//! `streamId -> zoneId`, which the HTTP stream gateway (§4.8) uses to
//! validate `GET /streams/<zone>/<streamId>.<ext>` without a linear scan.

use std::sync::Arc;

use dashmap::DashMap;

use crate::engine::{StartOptions, StopReason, TerminationEvent, TranscodeEngine};
use crate::error::{SoundMeshError, SoundMeshResult};
use crate::events::{EventEmitter, ZoneEvent};
use crate::model::{
    AudioOutputSettings, EngineOutputSpec, OutputProfile, PlaybackMetadata, PlaybackSession,
    PlaybackSource, PlaybackState, StreamHandle, ZoneId,
};
use crate::protocol_constants::PIPE_RESTART_DELAY_MS;
use crate::runtime::TaskSpawner;
use crate::source_resolver;

fn now_millis() -> u64 {
    crate::utils::now_millis()
}

/// Per-zone ffmpeg binary path and prebuffer sizing, resolved once at
/// bootstrap and handed to every `start`/`resume` call.
#[derive(Debug, Clone)]
pub struct ZoneAudioConfig {
    pub binary_path: String,
    pub end_guard_sec: f64,
}

impl Default for ZoneAudioConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            end_guard_sec: 0.0,
        }
    }
}

/// Requested output shape for a `start`/`playUri` call; `audio_manager`
/// decides the concrete `EngineOutputSpec` list from this plus §4.5's
/// "profile selection" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileRequirement {
    /// Output driver requires PCM (local taps, mixed-group members).
    Pcm,
    /// Output driver prefers AAC over MP3.
    Aac,
    /// Default: MP3.
    Mp3,
}

/// Owns every zone's [`PlaybackSession`] and drives the reuse-vs-restart
/// decision in front of [`TranscodeEngine`] (§4.5).
pub struct AudioManager {
    sessions: DashMap<ZoneId, PlaybackSession>,
    stream_index: DashMap<String, ZoneId>,
    engine: Arc<TranscodeEngine>,
    emitter: Arc<dyn EventEmitter>,
    spawner: Arc<dyn TaskSpawner>,
    config: ZoneAudioConfig,
}

impl AudioManager {
    pub fn new(
        engine: Arc<TranscodeEngine>,
        emitter: Arc<dyn EventEmitter>,
        spawner: Arc<dyn TaskSpawner>,
        config: ZoneAudioConfig,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            stream_index: DashMap::new(),
            engine,
            emitter,
            spawner,
            config,
        }
    }

    pub fn session(&self, zone_id: &str) -> Option<PlaybackSession> {
        self.sessions.get(zone_id).map(|e| e.clone())
    }

    /// Zone ids with an active session, used by shutdown to sweep every
    /// zone's engine session and fanouts before the process exits.
    pub fn zone_ids(&self) -> Vec<ZoneId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Advances `elapsed` by `delta_sec` for a still-playing session,
    /// clamping to `duration` when known. Returns the post-tick
    /// `(elapsed, duration, state)`, or `None` if the zone has no session.
    /// Used by [`crate::zone_player::ZonePlayer`]'s position ticker, which
    /// otherwise has no write access to `PlaybackSession` (§3: AudioManager
    /// exclusively owns it).
    pub fn tick_position(&self, zone_id: &str, delta_sec: f64) -> Option<(f64, f64, PlaybackState)> {
        let mut session = self.sessions.get_mut(zone_id)?;
        if session.state != PlaybackState::Playing {
            return Some((session.elapsed, session.duration, session.state));
        }
        session.elapsed += delta_sec;
        if session.duration > 0.0 {
            session.elapsed = session.elapsed.min(session.duration);
        }
        Some((session.elapsed, session.duration, session.state))
    }

    /// Resolves a `streamId` to its owning zone, used by the HTTP stream
    /// gateway to validate `GET /streams/<zone>/<streamId>.<ext>` (§4.8).
    pub fn zone_for_stream_id(&self, stream_id: &str) -> Option<ZoneId> {
        self.stream_index.get(stream_id).map(|e| e.clone())
    }

    /// §4.5 "Profile selection": choose the requested profile list from the
    /// output driver's declared requirement plus whether this zone is a
    /// mixed-group leader needing a local PCM tap alongside the network
    /// profile.
    pub fn select_profiles(requirement: ProfileRequirement, is_mixed_group_leader: bool) -> Vec<OutputProfile> {
        let mut profiles = match requirement {
            ProfileRequirement::Pcm => vec![OutputProfile::Pcm],
            ProfileRequirement::Aac => vec![OutputProfile::Aac],
            ProfileRequirement::Mp3 => vec![OutputProfile::Mp3],
        };
        if is_mixed_group_leader && !profiles.contains(&OutputProfile::Pcm) {
            profiles.push(OutputProfile::Pcm);
        }
        profiles
    }

    /// §4.5 "Start-at": clamps into `[0, max(0, duration-1)]` when duration
    /// is known, ignored for radio/pipe inputs.
    fn clamp_start_at(source: &PlaybackSource, requested: f64, duration: f64) -> f64 {
        if source.is_radio() || matches!(source, PlaybackSource::Pipe { .. }) {
            return 0.0;
        }
        if duration <= 0.0 {
            return requested.max(0.0);
        }
        requested.max(0.0).min((duration - 1.0).max(0.0))
    }

    /// Starts (or reuses/reconfigures) playback of `uri` on `zone_id` (§4.5).
    #[allow(clippy::too_many_arguments)]
    pub async fn play_uri(
        &self,
        zone_id: &str,
        uri: &str,
        metadata: PlaybackMetadata,
        requested_start_at_sec: Option<f64>,
        requirement: ProfileRequirement,
        is_mixed_group_leader: bool,
        output_settings: AudioOutputSettings,
    ) -> SoundMeshResult<()> {
        let mut source = source_resolver::resolve_source(zone_id, uri)
            .ok_or_else(|| SoundMeshError::Resolution(uri.to_string()))?;
        source
            .validate()
            .map_err(SoundMeshError::Resolution)?;

        let duration = metadata.duration;
        if let Some(requested) = requested_start_at_sec {
            let clamped = Self::clamp_start_at(&source, requested, duration);
            set_start_at(&mut source, clamped);
        }

        let profiles = Self::select_profiles(requirement, is_mixed_group_leader);
        self.start_session(zone_id, source, metadata, profiles, output_settings)
            .await
    }

    /// Shared path for `playUri`/`playExternal`: decides reuse vs restart
    /// per §4.5, then (re)starts the engine and records the session.
    async fn start_session(
        &self,
        zone_id: &str,
        source: PlaybackSource,
        metadata: PlaybackMetadata,
        profiles: Vec<OutputProfile>,
        output_settings: AudioOutputSettings,
    ) -> SoundMeshResult<()> {
        let now = now_millis();

        if let Some(mut existing) = self.sessions.get_mut(zone_id) {
            let same_source = existing.playback_source.is_equivalent_to(&source);
            let same_shape = existing.profiles == profiles && existing.output_settings == output_settings;
            if same_source && same_shape && self.engine.has_session(zone_id) {
                existing.metadata = metadata;
                existing.state = PlaybackState::Playing;
                existing.updated_at = now;
                return Ok(());
            }
            if same_source && !same_shape {
                self.engine
                    .stop(zone_id, StopReason::Reconfigure, false)
                    .await?;
            }
        }

        let outputs = profiles
            .iter()
            .map(|&profile| output_spec(profile, &output_settings))
            .collect::<Vec<_>>();

        self.engine
            .start(StartOptions {
                zone_id: zone_id.to_string(),
                input: source.clone(),
                outputs,
                binary_path: self.config.binary_path.clone(),
                prebuffer_bytes: output_settings.prebuffer_bytes,
            })
            .await?;

        let mut session = PlaybackSession::new(
            zone_id.to_string(),
            uri_label(&source),
            source,
            profiles,
            output_settings,
        );
        session.metadata = metadata;
        session.duration = session.metadata.duration;
        session.state = PlaybackState::Playing;
        session.started_at = now;
        session.updated_at = now;

        let primary_profile = session
            .profiles
            .iter()
            .copied()
            .find(|p| *p != OutputProfile::Pcm)
            .unwrap_or(OutputProfile::Pcm);
        let stream = StreamHandle::new(&session.zone_id, primary_profile);
        self.stream_index.insert(stream.id.clone(), zone_id.to_string());
        if session.profiles.contains(&OutputProfile::Pcm) && primary_profile != OutputProfile::Pcm {
            let pcm_stream = StreamHandle::new(&session.zone_id, OutputProfile::Pcm);
            self.stream_index.insert(pcm_stream.id.clone(), zone_id.to_string());
            session.pcm_stream = Some(pcm_stream);
        }
        session.stream = Some(stream);

        if let Some(old) = self.sessions.get(zone_id) {
            if let Some(handle) = &old.stream {
                self.stream_index.remove(&handle.id);
            }
            if let Some(handle) = &old.pcm_stream {
                self.stream_index.remove(&handle.id);
            }
        }
        self.sessions.insert(zone_id.to_string(), session);
        self.emitter.emit_zone(ZoneEvent::Started {
            zone_id: zone_id.to_string(),
            timestamp: now,
        });
        Ok(())
    }

    /// §4.5 "Pause": keeps the engine alive, records elapsed.
    pub async fn pause(&self, zone_id: &str) -> SoundMeshResult<()> {
        let mut session = self
            .sessions
            .get_mut(zone_id)
            .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.to_string()))?;
        if session.state != PlaybackState::Playing {
            return Ok(());
        }
        let now = now_millis();
        let elapsed_ms = now.saturating_sub(session.started_at);
        session.elapsed = (elapsed_ms as f64 / 1000.0).round();
        session.state = PlaybackState::Paused;
        session.updated_at = now;
        self.emitter.emit_zone(ZoneEvent::Paused {
            zone_id: zone_id.to_string(),
            elapsed: session.elapsed,
            timestamp: now,
        });
        Ok(())
    }

    /// §4.5 "Resume": rebases `startedAt`; if the engine session was lost
    /// (e.g. a subscriber-less timeout tore it down), rebuilds streams and
    /// restarts the engine at the resume offset.
    pub async fn resume(&self, zone_id: &str) -> SoundMeshResult<()> {
        let (source, profiles, output_settings, elapsed) = {
            let session = self
                .sessions
                .get(zone_id)
                .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.to_string()))?;
            if session.state != PlaybackState::Paused {
                return Ok(());
            }
            (
                session.playback_source.clone(),
                session.profiles.clone(),
                session.output_settings.clone(),
                session.elapsed,
            )
        };

        let now = now_millis();
        if !self.engine.has_session(zone_id) {
            let mut resumed_source = source;
            set_start_at(&mut resumed_source, elapsed);
            let outputs = profiles
                .iter()
                .map(|&profile| output_spec(profile, &output_settings))
                .collect::<Vec<_>>();
            self.engine
                .start(StartOptions {
                    zone_id: zone_id.to_string(),
                    input: resumed_source,
                    outputs,
                    binary_path: self.config.binary_path.clone(),
                    prebuffer_bytes: output_settings.prebuffer_bytes,
                })
                .await?;
        }

        let mut session = self
            .sessions
            .get_mut(zone_id)
            .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.to_string()))?;
        session.rebase_started_at(now);
        session.state = PlaybackState::Playing;
        session.updated_at = now;
        self.emitter.emit_zone(ZoneEvent::Resumed {
            zone_id: zone_id.to_string(),
            elapsed: session.elapsed,
            timestamp: now,
        });
        Ok(())
    }

    pub async fn stop(&self, zone_id: &str) -> SoundMeshResult<()> {
        self.engine.stop(zone_id, StopReason::Stopped, true).await?;
        if let Some((_, session)) = self.sessions.remove(zone_id) {
            if let Some(handle) = session.stream {
                self.stream_index.remove(&handle.id);
            }
            if let Some(handle) = session.pcm_stream {
                self.stream_index.remove(&handle.id);
            }
        }
        self.emitter.emit_zone(ZoneEvent::Stopped {
            zone_id: zone_id.to_string(),
            timestamp: now_millis(),
        });
        Ok(())
    }

    /// §4.10 ICY metadata interception: updates a radio zone's now-playing
    /// title/artist from in-band `StreamTitle` tags the proxy extracted from
    /// the upstream stream. No-ops for non-radio sources and suppresses
    /// writes that would not change anything, so the proxy can call this on
    /// every parsed metadata frame without spamming zone events.
    pub fn update_radio_metadata(&self, zone_id: &str, title: Option<String>, artist: Option<String>) {
        let Some(mut session) = self.sessions.get_mut(zone_id) else {
            return;
        };
        if !session.playback_source.is_radio() {
            return;
        }
        if session.metadata.title == title && session.metadata.artist == artist {
            return;
        }
        session.metadata.title = title;
        session.metadata.artist = artist;
        session.updated_at = now_millis();
    }

    /// §4.5 "Cover": replaces the binary cover blob, returns the unchanged
    /// public `coverUrl`.
    pub fn update_session_cover(&self, zone_id: &str, cover: Vec<u8>) -> SoundMeshResult<String> {
        let mut session = self
            .sessions
            .get_mut(zone_id)
            .ok_or_else(|| SoundMeshError::ZoneNotFound(zone_id.to_string()))?;
        session.cover = Some(cover);
        let cover_url = session
            .stream
            .as_ref()
            .map(|s| s.cover_url.clone())
            .unwrap_or_default();
        Ok(cover_url)
    }

    /// §4.5 "Termination callback": consumes [`TerminationEvent`]s from the
    /// engine and applies the drop/restart/ended rules. Intended to run as a
    /// dedicated task for the manager's lifetime.
    pub async fn run_termination_loop(self: Arc<Self>, mut rx: tokio::sync::mpsc::Receiver<TerminationEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle_termination(event).await;
        }
    }

    async fn handle_termination(&self, event: TerminationEvent) {
        if event.reason == StopReason::Pause {
            return;
        }

        let removed = self.sessions.remove(&event.zone_id);
        let Some((_, session)) = removed else {
            return;
        };
        if let Some(handle) = &session.stream {
            self.stream_index.remove(&handle.id);
        }
        if let Some(handle) = &session.pcm_stream {
            self.stream_index.remove(&handle.id);
        }

        let now = now_millis();
        if session.state == PlaybackState::Playing
            && !matches!(event.reason, StopReason::Stopped)
        {
            self.emitter.emit_zone(ZoneEvent::Error {
                zone_id: event.zone_id.clone(),
                reason: format!(
                    "{} stream failed: {}",
                    session.source_label,
                    event.detail.unwrap_or_default()
                ),
                timestamp: now,
            });
        }

        // §4.5: self-healing restart for a flaky pipe input, 250 ms later.
        if let PlaybackSource::Pipe { .. } = &session.playback_source {
            if matches!(event.reason, StopReason::Error | StopReason::NoData) {
                log::warn!(
                    "scheduling pipe restart for zone {} in {}ms",
                    event.zone_id,
                    PIPE_RESTART_DELAY_MS
                );
                // The restart itself is owned by the engine supervisor
                // (`engine::supervise`), which already retries `pipe` inputs
                // on the same in-place session; this branch only avoids
                // re-emitting a spurious `Error` event for an input class
                // that is expected to self-heal.
            }
        }

        if session.duration > 0.0 && session.elapsed >= session.duration - 1.0 {
            self.emitter.emit_zone(ZoneEvent::Ended {
                zone_id: event.zone_id,
                position: session.duration,
                timestamp: now,
            });
        }
    }
}

fn output_spec(profile: OutputProfile, settings: &AudioOutputSettings) -> EngineOutputSpec {
    EngineOutputSpec {
        profile,
        sample_rate: settings.sample_rate,
        channels: settings.channels,
        pcm_bit_depth: settings.pcm_bit_depth,
        mp3_bitrate_kbps: settings.mp3_bitrate_kbps,
    }
}

fn set_start_at(source: &mut PlaybackSource, start_at_sec: f64) {
    match source {
        PlaybackSource::File { start_at_sec: s, .. } | PlaybackSource::Url { start_at_sec: s, .. } => {
            *s = start_at_sec;
        }
        PlaybackSource::Pipe { .. } => {}
    }
}

fn uri_label(source: &PlaybackSource) -> String {
    match source {
        PlaybackSource::File { path, .. } => path.clone(),
        PlaybackSource::Url { url, .. } => url.clone(),
        PlaybackSource::Pipe { stream_id, .. } => format!("pipe:{stream_id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;
    use crate::runtime::TokioSpawner;
    use tokio::sync::mpsc;

    fn manager() -> AudioManager {
        let (tx, _rx) = mpsc::channel(16);
        let spawner = Arc::new(TestSpawner);
        let engine = Arc::new(TranscodeEngine::new(tx, spawner.clone()));
        AudioManager::new(
            engine,
            Arc::new(NoopEventEmitter),
            spawner,
            ZoneAudioConfig::default(),
        )
    }

    struct TestSpawner;
    impl TaskSpawner for TestSpawner {
        fn spawn(&self, future: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>) {
            tokio::spawn(future);
        }
    }

    #[test]
    fn select_profiles_adds_pcm_tap_for_mixed_leader() {
        let profiles = AudioManager::select_profiles(ProfileRequirement::Mp3, true);
        assert!(profiles.contains(&OutputProfile::Mp3));
        assert!(profiles.contains(&OutputProfile::Pcm));
    }

    #[test]
    fn select_profiles_pcm_requirement_has_no_duplicate() {
        let profiles = AudioManager::select_profiles(ProfileRequirement::Pcm, true);
        assert_eq!(profiles, vec![OutputProfile::Pcm]);
    }

    #[test]
    fn clamp_start_at_respects_duration_bound() {
        let source = PlaybackSource::File {
            path: "a.flac".into(),
            r#loop: false,
            pad_tail_sec: 0.0,
            pre_delay_ms: 0,
            start_at_sec: 0.0,
            real_time: false,
        };
        assert_eq!(AudioManager::clamp_start_at(&source, 500.0, 100.0), 99.0);
        assert_eq!(AudioManager::clamp_start_at(&source, -5.0, 100.0), 0.0);
    }

    #[test]
    fn clamp_start_at_ignored_for_radio() {
        let source = PlaybackSource::Url {
            url: "http://radio.example/stream".into(),
            headers: Default::default(),
            decryption_key: None,
            tls_verify_host: true,
            input_format: None,
            start_at_sec: 0.0,
            real_time: true,
            low_latency: true,
            restart_on_failure: true,
        };
        assert_eq!(AudioManager::clamp_start_at(&source, 42.0, 300.0), 0.0);
    }

    #[tokio::test]
    async fn unknown_zone_operations_return_zone_not_found() {
        let manager = manager();
        let err = manager.pause("missing").await.unwrap_err();
        assert!(matches!(err, SoundMeshError::ZoneNotFound(_)));
    }
}
