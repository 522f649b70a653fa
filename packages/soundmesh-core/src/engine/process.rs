//! Child-process plumbing for the transcode engine (§4.2).
//!
//! Grounded on `hua0512-rust-srec`'s `FfmpegEngine::build_args`/`start` —
//! same "shell out to ffmpeg, pipe stdin for graceful stop, ring-buffer
//! stderr" idiom, generalized from one output file to N concurrently
//! readable output profiles.
//!
//! ffmpeg can only write one stream to its own stdout, so each requested
//! [`OutputProfile`] is given its own named pipe (created with the `mkfifo`
//! utility, matching this codebase's habit of shelling out rather than
//! reaching for a raw libc binding) and ffmpeg is told to write that
//! profile's encoded bytes there with a `-map ... -f <fmt> <fifo>` output
//! group per profile.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin};

use crate::model::{EngineOutputSpec, OutputProfile, PlaybackSource};

/// Bounded tail of recent stderr lines, surfaced via `getSessionStats`
/// (§4.2).
#[derive(Debug, Default, Clone)]
pub struct StderrRingBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn tail(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

const STDERR_RING_CAPACITY: usize = 50;

/// Default directory under which profile/input named pipes are created.
/// `groups::pipe_fanout` writes to the same convention for `pipe` sources.
pub fn default_pipe_dir() -> PathBuf {
    std::env::temp_dir().join("soundmesh-pipes")
}

pub fn output_pipe_path(base_dir: &Path, zone_id: &str, profile: OutputProfile) -> PathBuf {
    base_dir.join(format!("out-{zone_id}-{}", profile.extension()))
}

pub fn input_pipe_path(base_dir: &Path, stream_id: &str) -> PathBuf {
    base_dir.join(format!("in-{stream_id}"))
}

/// Creates a named pipe at `path` if one does not already exist, shelling
/// out to `mkfifo` the way this codebase shells out to its media tools
/// rather than binding libc directly.
pub async fn ensure_fifo(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let status = tokio::process::Command::new("mkfifo")
        .arg(path)
        .status()
        .await?;
    if !status.success() {
        return Err(std::io::Error::other(format!(
            "mkfifo failed for {}",
            path.display()
        )));
    }
    Ok(())
}

fn ffmpeg_output_format(profile: OutputProfile) -> &'static str {
    match profile {
        OutputProfile::Mp3 => "mp3",
        OutputProfile::Aac => "adts",
        OutputProfile::Pcm => "wav",
    }
}

/// Builds the ffmpeg argument vector for one engine session.
pub fn build_args(
    source: &PlaybackSource,
    outputs: &[(EngineOutputSpec, PathBuf)],
) -> Vec<String> {
    let mut args = vec!["-y".to_string(), "-hide_banner".to_string(), "-nostdin".to_string()];

    match source {
        PlaybackSource::File {
            path,
            r#loop,
            start_at_sec,
            ..
        } => {
            if *r#loop {
                args.extend(["-stream_loop".to_string(), "-1".to_string()]);
            }
            if *start_at_sec > 0.0 {
                args.extend(["-ss".to_string(), format!("{start_at_sec:.3}")]);
            }
            args.extend(["-i".to_string(), path.clone()]);
        }
        PlaybackSource::Url {
            url,
            headers,
            start_at_sec,
            ..
        } => {
            if !headers.is_empty() {
                let header_lines = headers
                    .iter()
                    .map(|(k, v)| format!("{k}: {v}"))
                    .collect::<Vec<_>>()
                    .join("\r\n");
                args.extend(["-headers".to_string(), header_lines]);
            }
            if *start_at_sec > 0.0 {
                args.extend(["-ss".to_string(), format!("{start_at_sec:.3}")]);
            }
            args.extend(["-reconnect".to_string(), "1".to_string()]);
            args.extend(["-i".to_string(), url.clone()]);
        }
        PlaybackSource::Pipe {
            format,
            sample_rate,
            channels,
            ..
        } => {
            let fmt = match format {
                crate::model::PcmFormat::S16le => "s16le",
                crate::model::PcmFormat::S24le => "s24le",
                crate::model::PcmFormat::S32le => "s32le",
            };
            args.extend([
                "-f".to_string(),
                fmt.to_string(),
                "-ar".to_string(),
                sample_rate.to_string(),
                "-ac".to_string(),
                channels.to_string(),
            ]);
            let pipe_path = input_pipe_path(&default_pipe_dir(), pipe_stream_id(source));
            args.extend(["-i".to_string(), pipe_path.to_string_lossy().into_owned()]);
        }
    }

    for (spec, fifo_path) in outputs {
        args.extend(["-map".to_string(), "0:a".to_string()]);
        match spec.profile {
            OutputProfile::Mp3 => {
                args.extend([
                    "-c:a".to_string(),
                    "libmp3lame".to_string(),
                    "-b:a".to_string(),
                    format!("{}k", spec.mp3_bitrate_kbps),
                ]);
            }
            OutputProfile::Aac => {
                args.extend(["-c:a".to_string(), "aac".to_string()]);
            }
            OutputProfile::Pcm => {
                let codec = match spec.pcm_bit_depth {
                    24 => "pcm_s24le",
                    32 => "pcm_s32le",
                    _ => "pcm_s16le",
                };
                args.extend(["-c:a".to_string(), codec.to_string()]);
            }
        }
        args.extend([
            "-ar".to_string(),
            spec.sample_rate.to_string(),
            "-ac".to_string(),
            spec.channels.to_string(),
            "-f".to_string(),
            ffmpeg_output_format(spec.profile).to_string(),
            fifo_path.to_string_lossy().into_owned(),
        ]);
    }

    args
}

fn pipe_stream_id(source: &PlaybackSource) -> &str {
    match source {
        PlaybackSource::Pipe { stream_id, .. } => stream_id,
        _ => "",
    }
}

/// A spawned ffmpeg child plus the handles the supervisor needs.
pub struct SpawnedProcess {
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub stderr: ChildStderr,
}

/// Spawns ffmpeg with stdin piped (for a graceful `q` stop) and stderr
/// piped (for the ring buffer). Output bytes flow through the fifos named
/// in `outputs`, not through stdout.
pub fn spawn(
    binary_path: &str,
    source: &PlaybackSource,
    outputs: &[(EngineOutputSpec, PathBuf)],
) -> std::io::Result<SpawnedProcess> {
    let args = build_args(source, outputs);
    let mut child = tokio::process::Command::new(binary_path)
        .args(&args)
        .env("LC_ALL", "C")
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdin = child.stdin.take();
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("failed to capture ffmpeg stderr"))?;

    Ok(SpawnedProcess {
        child,
        stdin,
        stderr,
    })
}

/// Requests graceful shutdown by writing `q` to ffmpeg's stdin, falling
/// back to killing the process if it does not exit within `timeout`.
pub async fn stop_gracefully(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    timeout: std::time::Duration,
) -> Option<i32> {
    if let Some(stdin) = stdin.take() {
        let mut stdin = stdin;
        let _ = stdin.write_all(b"q").await;
        let _ = stdin.flush().await;
        let _ = stdin.shutdown().await;
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(_)) => None,
        Err(_) => {
            let _ = child.kill().await;
            child.wait().await.ok().and_then(|s| s.code())
        }
    }
}

/// Reads stderr lines into the ring buffer until EOF; intended to run as a
/// dedicated task for the lifetime of the child process.
pub async fn pump_stderr(stderr: ChildStderr, ring: Arc<Mutex<StderrRingBuffer>>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                log::debug!("ffmpeg stderr: {line}");
                ring.lock().push(line);
            }
            Ok(None) | Err(_) => break,
        }
    }
}

pub fn new_ring_buffer() -> Arc<Mutex<StderrRingBuffer>> {
    Arc::new(Mutex::new(StderrRingBuffer::new(STDERR_RING_CAPACITY)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn build_args_includes_icy_headers_for_radio_url() {
        let mut headers = HashMap::new();
        headers.insert("Icy-MetaData".to_string(), "1".to_string());
        let source = PlaybackSource::Url {
            url: "http://radio.example/stream".into(),
            headers,
            decryption_key: None,
            tls_verify_host: true,
            input_format: None,
            start_at_sec: 0.0,
            real_time: true,
            low_latency: true,
            restart_on_failure: true,
        };
        let spec = EngineOutputSpec {
            profile: OutputProfile::Mp3,
            sample_rate: 44100,
            channels: 2,
            pcm_bit_depth: 16,
            mp3_bitrate_kbps: 192,
        };
        let args = build_args(&source, &[(spec, PathBuf::from("/tmp/out.mp3"))]);
        assert!(args.iter().any(|a| a.contains("Icy-MetaData")));
        assert!(args.contains(&"-reconnect".to_string()));
    }

    #[test]
    fn build_args_seeks_file_source_at_start_at_sec() {
        let source = PlaybackSource::File {
            path: "/music/a.flac".into(),
            r#loop: false,
            pad_tail_sec: 0.0,
            pre_delay_ms: 0,
            start_at_sec: 42.5,
            real_time: false,
        };
        let spec = EngineOutputSpec {
            profile: OutputProfile::Pcm,
            sample_rate: 48000,
            channels: 2,
            pcm_bit_depth: 16,
            mp3_bitrate_kbps: 192,
        };
        let args = build_args(&source, &[(spec, PathBuf::from("/tmp/out.wav"))]);
        let ss_pos = args.iter().position(|a| a == "-ss").unwrap();
        assert_eq!(args[ss_pos + 1], "42.500");
    }

    #[test]
    fn ring_buffer_evicts_oldest_line_past_capacity() {
        let mut ring = StderrRingBuffer::new(2);
        ring.push("a".into());
        ring.push("b".into());
        ring.push("c".into());
        assert_eq!(ring.tail(), vec!["b".to_string(), "c".to_string()]);
    }
}
