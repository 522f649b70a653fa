//! TranscodeEngine: exactly-once spawn of one media-pipeline process per
//! zone, multiplexing its outputs to per-profile [`Fanout`]s (§4.2).
//!
//! The restart loop is modeled as a supervisor task per session with an
//! explicit state machine rather than the coroutine-style retry loop an
//! ffmpeg wrapper would otherwise grow into (§9 redesign flag), grounded on
//! `hua0512-rust-srec`'s `FfmpegEngine::start` for the process-supervision
//! half and `services::sync_group_manager`'s DashMap-of-sessions shape for
//! the registry half.

pub mod process;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Notify};

use crate::fanout::{self, Fanout, FanoutStats, SubscribeOptions};
use crate::model::{EngineOutputSpec, OutputProfile, PlaybackSource, ProfileStats, ZoneId};
use crate::protocol_constants::{
    ENGINE_NO_DATA_TIMEOUT_SECS, ENGINE_RESTART_BACKOFF_CAP_SECS, PIPE_RESTART_DELAY_MS,
};
use crate::runtime::TaskSpawner;

use process::{SpawnedProcess, StderrRingBuffer};

/// Why a session stopped. Mirrors the `reason` parameter of `stop` (§4.2)
/// plus the terminal variants the supervisor itself can reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Reconfigure,
    Handoff,
    Switch,
    Stopped,
    NoData,
    Error,
}

impl StopReason {
    /// §7: reasons that must be suppressed from being interpreted as an
    /// error by the session owner.
    pub fn is_silent(self) -> bool {
        matches!(
            self,
            StopReason::Pause | StopReason::Reconfigure | StopReason::Handoff | StopReason::Switch
        )
    }
}

/// Supervisor state machine driving the restart loop (§9 redesign flag).
#[derive(Debug, Clone, Copy, PartialEq)]
enum EngineState {
    Starting,
    Running,
    Restarting,
    Terminating,
}

/// Event delivered to the session owner when a session ends without an
/// explicit, silent `stop` call covering it — the message-passing
/// replacement for the "supervisor calls back into the owner" cycle (§9).
#[derive(Debug, Clone)]
pub struct TerminationEvent {
    pub zone_id: ZoneId,
    pub reason: StopReason,
    pub detail: Option<String>,
}

/// Options accepted by [`TranscodeEngine::start`] / `start_with_handoff`.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub zone_id: ZoneId,
    pub input: PlaybackSource,
    pub outputs: Vec<EngineOutputSpec>,
    pub binary_path: String,
    pub prebuffer_bytes: usize,
}

struct EngineSession {
    zone_id: ZoneId,
    input: PlaybackSource,
    outputs: Vec<EngineOutputSpec>,
    fanouts: HashMap<OutputProfile, Fanout>,
    state: SyncMutex<EngineState>,
    stop_reason: SyncMutex<Option<StopReason>>,
    stderr_ring: Arc<SyncMutex<StderrRingBuffer>>,
    restarts: AtomicU32,
    first_chunk_notify: HashMap<OutputProfile, Arc<Notify>>,
    first_chunk_seen: DashMap<OutputProfile, bool>,
    stats: DashMap<OutputProfile, ProfileStats>,
    /// Woken by `mark_stopped` so the supervisor can stop racing `child.wait()`
    /// against an externally requested stop and instead kill it promptly.
    stop_signal: Notify,
}

impl EngineSession {
    fn new(
        zone_id: ZoneId,
        input: PlaybackSource,
        outputs: Vec<EngineOutputSpec>,
        prebuffer_bytes: usize,
    ) -> Arc<Self> {
        let mut fanouts = HashMap::new();
        let mut first_chunk_notify = HashMap::new();
        let first_chunk_seen = DashMap::new();
        let stats = DashMap::new();
        for spec in &outputs {
            fanouts.insert(spec.profile, Fanout::new(spec.profile, prebuffer_bytes));
            first_chunk_notify.insert(spec.profile, Arc::new(Notify::new()));
            first_chunk_seen.insert(spec.profile, false);
            stats.insert(spec.profile, ProfileStats::default());
        }
        Arc::new(Self {
            zone_id,
            input,
            outputs,
            fanouts,
            state: SyncMutex::new(EngineState::Starting),
            stop_reason: SyncMutex::new(None),
            stderr_ring: process::new_ring_buffer(),
            restarts: AtomicU32::new(0),
            first_chunk_notify,
            first_chunk_seen,
            stats,
            stop_signal: Notify::new(),
        })
    }

    fn matches_signature(&self, input: &PlaybackSource, outputs: &[EngineOutputSpec]) -> bool {
        self.input.is_equivalent_to(input)
            && self.outputs.len() == outputs.len()
            && self.outputs.iter().zip(outputs.iter()).all(|(a, b)| {
                a.profile == b.profile && a.sample_rate == b.sample_rate && a.channels == b.channels
            })
    }

    fn mark_first_chunk(&self, profile: OutputProfile) {
        if let Some(mut seen) = self.first_chunk_seen.get_mut(&profile) {
            if !*seen {
                *seen = true;
                if let Some(notify) = self.first_chunk_notify.get(&profile) {
                    notify.notify_waiters();
                }
            }
        }
    }
}

/// Supervises one child media-pipeline process per zone (§4.2).
pub struct TranscodeEngine {
    sessions: DashMap<ZoneId, Arc<EngineSession>>,
    local_sessions: DashMap<String, Arc<EngineSession>>,
    termination_tx: mpsc::Sender<TerminationEvent>,
    spawner: Arc<dyn TaskSpawner>,
    pipe_dir: PathBuf,
}

impl TranscodeEngine {
    pub fn new(termination_tx: mpsc::Sender<TerminationEvent>, spawner: Arc<dyn TaskSpawner>) -> Self {
        Self {
            sessions: DashMap::new(),
            local_sessions: DashMap::new(),
            termination_tx,
            spawner,
            pipe_dir: process::default_pipe_dir(),
        }
    }

    pub fn has_session(&self, zone_id: &str) -> bool {
        self.sessions.contains_key(zone_id)
    }

    /// §4.2 `start`: reuses a running session with an identical signature,
    /// otherwise stops the existing one with reason `reconfigure` and spawns
    /// fresh.
    pub async fn start(&self, options: StartOptions) -> crate::error::SoundMeshResult<()> {
        if let Some(existing) = self.sessions.get(&options.zone_id) {
            if existing.matches_signature(&options.input, &options.outputs) {
                return Ok(());
            }
        }
        if self.sessions.contains_key(&options.zone_id) {
            self.stop(&options.zone_id, StopReason::Reconfigure, false).await?;
        }
        let session = self.spawn_session(options).await?;
        self.sessions.insert(session.zone_id.clone(), session);
        Ok(())
    }

    /// §4.2 `startWithHandoff`: spawns a new engine alongside the running
    /// one, migrates subscribers once `migrate_profile` has emitted its
    /// first chunk (or the deadline elapses), then tears the old one down
    /// with reason `handoff`.
    pub async fn start_with_handoff(
        &self,
        options: StartOptions,
        migrate_profile: OutputProfile,
        timeout_ms: u64,
    ) -> crate::error::SoundMeshResult<()> {
        let zone_id = options.zone_id.clone();
        let new_session = self.spawn_session(options).await?;

        let already_seen = new_session
            .first_chunk_seen
            .get(&migrate_profile)
            .map(|v| *v)
            .unwrap_or(false);
        let ready = if already_seen {
            true
        } else if let Some(notify) = new_session.first_chunk_notify.get(&migrate_profile) {
            tokio::time::timeout(Duration::from_millis(timeout_ms), notify.notified())
                .await
                .is_ok()
        } else {
            false
        };

        if !ready {
            mark_stopped(&new_session, StopReason::Error);
            return Err(crate::error::SoundMeshError::EngineFailure(format!(
                "handoff timed out waiting for first chunk of {migrate_profile:?}"
            )));
        }

        if let Some(old_session) = self.sessions.get(&zone_id).map(|e| e.clone()) {
            for (profile, old_fanout) in &old_session.fanouts {
                if let Some(new_fanout) = new_session.fanouts.get(profile) {
                    old_fanout.migrate_all(new_fanout);
                }
            }
            mark_stopped(&old_session, StopReason::Handoff);
        }

        self.sessions.insert(zone_id, new_session);
        Ok(())
    }

    /// §4.2 `stop`.
    pub async fn stop(
        &self,
        zone_id: &str,
        reason: StopReason,
        discard_subscribers: bool,
    ) -> crate::error::SoundMeshResult<()> {
        if let Some((_, session)) = self.sessions.remove(zone_id) {
            if discard_subscribers {
                for fanout in session.fanouts.values() {
                    fanout.end();
                }
            }
            mark_stopped(&session, reason);
        }
        Ok(())
    }

    /// §4.2 `createStream`.
    pub fn create_stream(
        &self,
        zone_id: &str,
        profile: OutputProfile,
        max_bytes: usize,
        opts: SubscribeOptions,
    ) -> crate::error::SoundMeshResult<fanout::FanoutSubscription> {
        let session = self
            .sessions
            .get(zone_id)
            .ok_or_else(|| crate::error::SoundMeshError::ZoneNotFound(zone_id.to_string()))?;
        let fanout = session
            .fanouts
            .get(&profile)
            .ok_or_else(|| crate::error::SoundMeshError::StreamNotFound(format!("{zone_id}/{profile:?}")))?;
        Ok(fanout.subscribe(max_bytes, opts))
    }

    /// §4.2 `waitForFirstChunk`.
    pub async fn wait_for_first_chunk(&self, zone_id: &str, profile: OutputProfile, timeout_ms: u64) -> bool {
        let Some(session) = self.sessions.get(zone_id).map(|e| e.clone()) else {
            return false;
        };
        if session.first_chunk_seen.get(&profile).map(|v| *v).unwrap_or(false) {
            return true;
        }
        let Some(notify) = session.first_chunk_notify.get(&profile).cloned() else {
            return false;
        };
        tokio::time::timeout(Duration::from_millis(timeout_ms), notify.notified())
            .await
            .is_ok()
    }

    /// §4.2 `createLocalSession`: an independent-lifecycle session used by
    /// mixed-group PCM tapping, not registered under the zone's main
    /// session slot.
    pub async fn create_local_session(
        &self,
        local_id: String,
        source: PlaybackSource,
        output: EngineOutputSpec,
        prebuffer_bytes: usize,
        binary_path: String,
    ) -> crate::error::SoundMeshResult<()> {
        let options = StartOptions {
            zone_id: local_id.clone(),
            input: source,
            outputs: vec![output],
            binary_path,
            prebuffer_bytes,
        };
        let session = self.spawn_session(options).await?;
        self.local_sessions.insert(local_id, session);
        Ok(())
    }

    pub async fn stop_local_session(&self, local_id: &str) {
        if let Some((_, session)) = self.local_sessions.remove(local_id) {
            mark_stopped(&session, StopReason::Stopped);
        }
    }

    pub fn local_session_stream(
        &self,
        local_id: &str,
        profile: OutputProfile,
        max_bytes: usize,
        opts: SubscribeOptions,
    ) -> Option<fanout::FanoutSubscription> {
        self.local_sessions
            .get(local_id)
            .and_then(|s| s.fanouts.get(&profile).map(|f| f.subscribe(max_bytes, opts)))
    }

    /// §4.2 `getSessionStats`.
    pub fn get_session_stats(&self, zone_id: &str) -> Option<HashMap<OutputProfile, ProfileStats>> {
        let session = self.sessions.get(zone_id)?;
        let mut out = HashMap::new();
        for entry in session.stats.iter() {
            let mut stats = entry.value().clone();
            if let Some(fanout) = session.fanouts.get(entry.key()) {
                let FanoutStats {
                    subscribers,
                    subscriber_drops,
                    ..
                } = fanout.stats();
                stats.subscribers = subscribers;
                stats.subscriber_drops = subscriber_drops;
            }
            stats.restarts = session.restarts.load(Ordering::Relaxed);
            stats.last_error = session.stderr_ring.lock().last().map(str::to_string);
            out.insert(*entry.key(), stats);
        }
        Some(out)
    }

    async fn spawn_session(&self, options: StartOptions) -> crate::error::SoundMeshResult<Arc<EngineSession>> {
        let session = EngineSession::new(
            options.zone_id.clone(),
            options.input.clone(),
            options.outputs.clone(),
            options.prebuffer_bytes,
        );
        let fifo_outputs = prepare_fifos(&self.pipe_dir, &session).await?;
        let spawned = spawn_child(&session, &options.binary_path, &fifo_outputs)?;
        *session.state.lock() = EngineState::Running;
        spawn_io_tasks(&self.spawner, &session, &fifo_outputs);
        self.spawner.spawn(Box::pin(supervise(
            session.clone(),
            spawned,
            options.binary_path,
            self.pipe_dir.clone(),
            self.spawner.clone(),
            self.termination_tx.clone(),
        )));
        Ok(session)
    }
}

fn mark_stopped(session: &Arc<EngineSession>, reason: StopReason) {
    *session.stop_reason.lock() = Some(reason);
    *session.state.lock() = EngineState::Terminating;
    for fanout in session.fanouts.values() {
        if reason.is_silent() {
            fanout.end();
        } else {
            fanout.error(format!("session terminated: {reason:?}"));
        }
    }
    // `notify_one`, not `notify_waiters`: the supervisor may not have reached
    // its `.notified()` await yet, and `notify_one` stores a permit for the
    // next call instead of only waking whoever is already waiting.
    session.stop_signal.notify_one();
}

async fn prepare_fifos(
    pipe_dir: &Path,
    session: &EngineSession,
) -> crate::error::SoundMeshResult<Vec<(EngineOutputSpec, PathBuf)>> {
    let mut outputs = Vec::with_capacity(session.outputs.len());
    for spec in &session.outputs {
        let path = process::output_pipe_path(pipe_dir, &session.zone_id, spec.profile);
        process::ensure_fifo(&path)
            .await
            .map_err(|e| crate::error::SoundMeshError::EngineFailure(e.to_string()))?;
        outputs.push((spec.clone(), path));
    }
    Ok(outputs)
}

/// Spawns ffmpeg for `session` and stashes the `Child`/`stdin` the
/// supervisor needs to await and, if requested, stop gracefully. Takes
/// ownership of the process handles via the returned tuple rather than
/// storing them on `EngineSession` so the supervisor task is the sole
/// owner — avoids the lock contention a shared `Mutex<Option<Child>>` would
/// add on every stats read.
fn spawn_child(
    session: &EngineSession,
    binary_path: &str,
    fifo_outputs: &[(EngineOutputSpec, PathBuf)],
) -> crate::error::SoundMeshResult<SpawnedProcess> {
    process::spawn(binary_path, &session.input, fifo_outputs)
        .map_err(|e| crate::error::SoundMeshError::EngineFailure(e.to_string()))
}

fn spawn_io_tasks(
    spawner: &Arc<dyn TaskSpawner>,
    session: &Arc<EngineSession>,
    fifo_outputs: &[(EngineOutputSpec, PathBuf)],
) {
    for (spec, path) in fifo_outputs {
        spawner.spawn(Box::pin(read_fifo_into_fanout(session.clone(), spec.profile, path.clone())));
    }
}

async fn read_fifo_into_fanout(session: Arc<EngineSession>, profile: OutputProfile, path: PathBuf) {
    use tokio::io::AsyncReadExt;
    let mut reader = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            log::warn!("failed to open output fifo {}: {e}", path.display());
            return;
        }
    };
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                session.mark_first_chunk(profile);
                if let Some(fanout) = session.fanouts.get(&profile) {
                    fanout.push(bytes::Bytes::copy_from_slice(&buf[..n]));
                }
                if let Some(mut stats) = session.stats.get_mut(&profile) {
                    stats.bytes += n as u64;
                }
            }
            Err(_) => break,
        }
    }
}

fn is_real_time(source: &PlaybackSource) -> bool {
    match source {
        PlaybackSource::File { real_time, .. } => *real_time,
        PlaybackSource::Url { real_time, .. } => *real_time,
        PlaybackSource::Pipe { real_time, .. } => *real_time,
    }
}

enum ExitOutcome {
    Exited(Option<i32>),
    NoData,
    StopRequested,
}

/// §4.2 timeout/failure handling: when the input isn't real-time, a primary
/// profile that never emits a byte within `ENGINE_NO_DATA_TIMEOUT_SECS`
/// counts as a session-termination with reason "no data", independent of
/// whether the child is still alive. Also races against `stop_signal` so an
/// explicit `TranscodeEngine::stop` doesn't have to wait for the child to
/// exit on its own before the supervisor notices.
async fn wait_for_exit_or_no_data(child: &mut tokio::process::Child, session: &Arc<EngineSession>) -> ExitOutcome {
    let guard_profile = session.outputs.first().map(|s| s.profile).filter(|_| !is_real_time(&session.input));

    let no_data_guard = match guard_profile {
        Some(profile) if !session.first_chunk_seen.get(&profile).map(|v| *v).unwrap_or(false) => {
            session.first_chunk_notify.get(&profile).cloned()
        }
        _ => None,
    };

    match no_data_guard {
        Some(notify) => {
            tokio::select! {
                status = child.wait() => ExitOutcome::Exited(status.ok().and_then(|s| s.code())),
                _ = session.stop_signal.notified() => ExitOutcome::StopRequested,
                _ = notify.notified() => ExitOutcome::Exited(child.wait().await.ok().and_then(|s| s.code())),
                _ = tokio::time::sleep(Duration::from_secs(ENGINE_NO_DATA_TIMEOUT_SECS)) => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    ExitOutcome::NoData
                }
            }
        }
        None => {
            tokio::select! {
                status = child.wait() => ExitOutcome::Exited(status.ok().and_then(|s| s.code())),
                _ = session.stop_signal.notified() => ExitOutcome::StopRequested,
            }
        }
    }
}

/// Owns the full restart loop for one session: spawns ffmpeg, waits for
/// exit, classifies the exit against the stop reason recorded by
/// `mark_stopped`, and — when the exit was unexpected and the input allows
/// it — respawns in place against the *same* `fanouts`, so subscribers are
/// never dropped across a restart (§4.2 restart policy).
async fn supervise(
    session: Arc<EngineSession>,
    mut spawned: SpawnedProcess,
    binary_path: String,
    pipe_dir: PathBuf,
    spawner: Arc<dyn TaskSpawner>,
    termination_tx: mpsc::Sender<TerminationEvent>,
) {
    loop {
        let SpawnedProcess { mut child, stdin, stderr } = spawned;
        spawner.spawn(Box::pin(process::pump_stderr(stderr, session.stderr_ring.clone())));

        let exit_code = match wait_for_exit_or_no_data(&mut child, &session).await {
            ExitOutcome::NoData => {
                mark_stopped(&session, StopReason::NoData);
                let _ = termination_tx
                    .send(TerminationEvent {
                        zone_id: session.zone_id.clone(),
                        reason: StopReason::NoData,
                        detail: Some(format!(
                            "no bytes on primary profile within {ENGINE_NO_DATA_TIMEOUT_SECS}s"
                        )),
                    })
                    .await;
                return;
            }
            ExitOutcome::StopRequested => {
                process::stop_gracefully(child, stdin, Duration::from_secs(5)).await;
                // `mark_stopped` already recorded the reason and ended/errored
                // the fanouts before waking this select; nothing left to emit.
                return;
            }
            ExitOutcome::Exited(code) => {
                drop(stdin);
                code
            }
        };

        let recorded_reason = *session.stop_reason.lock();
        if let Some(reason) = recorded_reason {
            if !reason.is_silent() {
                let _ = termination_tx
                    .send(TerminationEvent {
                        zone_id: session.zone_id.clone(),
                        reason,
                        detail: exit_code.map(|c| format!("exit code {c}")),
                    })
                    .await;
            }
            return;
        }

        let restart_eligible = matches!(
            &session.input,
            PlaybackSource::Url { restart_on_failure: true, .. }
        );
        if !restart_eligible {
            let _ = termination_tx
                .send(TerminationEvent {
                    zone_id: session.zone_id.clone(),
                    reason: StopReason::Error,
                    detail: exit_code.map(|c| format!("exit code {c}")),
                })
                .await;
            return;
        }

        *session.state.lock() = EngineState::Restarting;
        let attempt = session.restarts.fetch_add(1, Ordering::Relaxed) + 1;
        let backoff_secs = attempt.min(ENGINE_RESTART_BACKOFF_CAP_SECS as u32);
        let delay = if matches!(session.input, PlaybackSource::Pipe { .. }) {
            Duration::from_millis(PIPE_RESTART_DELAY_MS)
        } else {
            Duration::from_secs(backoff_secs as u64)
        };
        tokio::time::sleep(delay).await;
        log::warn!(
            "engine for zone {} exited unexpectedly, restarting (attempt {attempt})",
            session.zone_id
        );

        let fifo_outputs = match prepare_fifos(&pipe_dir, &session).await {
            Ok(f) => f,
            Err(e) => {
                let _ = termination_tx
                    .send(TerminationEvent {
                        zone_id: session.zone_id.clone(),
                        reason: StopReason::Error,
                        detail: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        };
        spawned = match spawn_child(&session, &binary_path, &fifo_outputs) {
            Ok(p) => p,
            Err(e) => {
                let _ = termination_tx
                    .send(TerminationEvent {
                        zone_id: session.zone_id.clone(),
                        reason: StopReason::Error,
                        detail: Some(e.to_string()),
                    })
                    .await;
                return;
            }
        };
        spawn_io_tasks(&spawner, &session, &fifo_outputs);
        *session.state.lock() = EngineState::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reason_silent_set_matches_spec() {
        assert!(StopReason::Pause.is_silent());
        assert!(StopReason::Reconfigure.is_silent());
        assert!(StopReason::Handoff.is_silent());
        assert!(StopReason::Switch.is_silent());
        assert!(!StopReason::Error.is_silent());
        assert!(!StopReason::NoData.is_silent());
    }

    #[test]
    fn engine_session_signature_ignores_unrelated_fields() {
        let input = PlaybackSource::File {
            path: "/a.flac".into(),
            r#loop: false,
            pad_tail_sec: 0.0,
            pre_delay_ms: 0,
            start_at_sec: 0.0,
            real_time: false,
        };
        let outputs = vec![EngineOutputSpec {
            profile: OutputProfile::Pcm,
            sample_rate: 44100,
            channels: 2,
            pcm_bit_depth: 16,
            mp3_bitrate_kbps: 192,
        }];
        let session = EngineSession::new("z1".into(), input.clone(), outputs.clone(), 1024);
        assert!(session.matches_signature(&input, &outputs));
    }
}
