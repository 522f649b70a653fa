//! Slave-player driver (SlimProto-style, §4.7).
//!
//! Sends wire-level control frames over a TCP channel to a local subprocess
//! that owns the actual renderer protocol. Grounded on `engine/mod.rs`'s
//! supervised-task shape (a long-lived background task owns the connection
//! and is the only writer; callers hand it commands, never touch the socket
//! directly) and on [`crate::sonos::discovery::ssdp`]'s discovery-then-cache
//! pattern for enumerating available players before a zone claims one.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::error::{SoundMeshError, SoundMeshResult};
use crate::model::{HttpPreferences, HttpProfile, OutputProfile, PreferredOutput};
use crate::outputs::{DriverSession, OutputDriver};

/// A player the subprocess has announced, keyed by its own stable id.
#[derive(Debug, Clone)]
pub struct SlavePlayerInfo {
    pub player_id: String,
    pub name: String,
}

/// Tracks which zone currently owns which discovered player, so a second
/// zone can't silently steal a player out from under the first.
#[derive(Default)]
pub struct SlavePlayerRegistry {
    players: DashMap<String, SlavePlayerInfo>,
    zone_to_player: DashMap<String, String>,
}

impl SlavePlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&self, info: SlavePlayerInfo) {
        self.players.insert(info.player_id.clone(), info);
    }

    pub fn available_players(&self) -> Vec<SlavePlayerInfo> {
        self.players.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Claims `player_id` for `zone_id`; fails if another zone already holds
    /// it.
    pub fn claim(&self, zone_id: &str, player_id: &str) -> SoundMeshResult<()> {
        if !self.players.contains_key(player_id) {
            return Err(SoundMeshError::RendererFault(format!("unknown slave player {player_id}")));
        }
        for entry in self.zone_to_player.iter() {
            if entry.value() == player_id && entry.key() != zone_id {
                return Err(SoundMeshError::RendererFault(format!(
                    "player {player_id} already claimed by zone {}",
                    entry.key()
                )));
            }
        }
        self.zone_to_player.insert(zone_id.to_string(), player_id.to_string());
        Ok(())
    }

    pub fn release(&self, zone_id: &str) {
        self.zone_to_player.remove(zone_id);
    }

    pub fn player_for_zone(&self, zone_id: &str) -> Option<String> {
        self.zone_to_player.get(zone_id).map(|e| e.value().clone())
    }
}

/// Wire commands the background writer task understands. The exact byte
/// encoding of the subprocess's control protocol is out of scope; these
/// variants are serialized to a small length-prefixed frame by
/// `encode_command`.
#[derive(Debug, Clone)]
enum SlaveCommand {
    Stream { player_id: String, url: String },
    Pause { player_id: String },
    Resume { player_id: String },
    Stop { player_id: String },
    Volume { player_id: String, level: u8 },
}

fn encode_command(cmd: &SlaveCommand) -> Vec<u8> {
    let body = match cmd {
        SlaveCommand::Stream { player_id, url } => format!("STRM {player_id} {url}"),
        SlaveCommand::Pause { player_id } => format!("PAUS {player_id}"),
        SlaveCommand::Resume { player_id } => format!("CONT {player_id}"),
        SlaveCommand::Stop { player_id } => format!("STOP {player_id}"),
        SlaveCommand::Volume { player_id, level } => format!("VOLU {player_id} {level}"),
    };
    let bytes = body.into_bytes();
    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    frame.extend_from_slice(&bytes);
    frame
}

async fn writer_task(mut stream: TcpStream, mut rx: mpsc::Receiver<SlaveCommand>) {
    while let Some(cmd) = rx.recv().await {
        let frame = encode_command(&cmd);
        if let Err(e) = stream.write_all(&frame).await {
            log::warn!("[slave_player] write failed: {e}");
            break;
        }
    }
}

/// Output driver for one zone's claimed slave player, writing commands
/// through a single background task that owns the socket.
pub struct SlavePlayerDriver {
    player_id: String,
    tx: mpsc::Sender<SlaveCommand>,
}

impl SlavePlayerDriver {
    pub async fn connect(addr: &str, player_id: String) -> SoundMeshResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| SoundMeshError::Network(format!("slave player connect to {addr} failed: {e}")))?;
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(writer_task(stream, rx));
        Ok(Self { player_id, tx })
    }

    async fn send(&self, cmd: SlaveCommand) -> SoundMeshResult<()> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| SoundMeshError::RendererFault(format!("slave player {} channel closed", self.player_id)))
    }
}

#[async_trait]
impl OutputDriver for SlavePlayerDriver {
    async fn play(&self, session: &DriverSession) -> SoundMeshResult<()> {
        self.send(SlaveCommand::Stream {
            player_id: self.player_id.clone(),
            url: session.stream_url.clone(),
        })
        .await
    }

    async fn pause(&self) -> SoundMeshResult<()> {
        self.send(SlaveCommand::Pause { player_id: self.player_id.clone() }).await
    }

    async fn resume(&self) -> SoundMeshResult<()> {
        self.send(SlaveCommand::Resume { player_id: self.player_id.clone() }).await
    }

    async fn stop(&self) -> SoundMeshResult<()> {
        self.send(SlaveCommand::Stop { player_id: self.player_id.clone() }).await
    }

    async fn set_volume(&self, volume: u8) -> SoundMeshResult<()> {
        self.send(SlaveCommand::Volume { player_id: self.player_id.clone(), level: volume.min(100) }).await
    }

    async fn update_metadata(&self, _title: Option<&str>, _artist: Option<&str>, _cover_url: Option<&str>) -> SoundMeshResult<()> {
        Ok(())
    }

    async fn dispose(&self) {
        let _ = self.send(SlaveCommand::Stop { player_id: self.player_id.clone() }).await;
    }

    fn preferred_output(&self) -> PreferredOutput {
        PreferredOutput {
            profile: OutputProfile::Mp3,
            sample_rate: 44_100,
            channels: 2,
        }
    }

    fn http_preferences(&self) -> HttpPreferences {
        HttpPreferences {
            http_profile: HttpProfile::Chunked,
            icy_enabled: false,
            icy_interval: None,
            icy_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_command_prefixes_big_endian_length() {
        let frame = encode_command(&SlaveCommand::Pause { player_id: "p1".into() });
        let len = u32::from_be_bytes(frame[0..4].try_into().unwrap()) as usize;
        assert_eq!(len, frame.len() - 4);
        assert_eq!(&frame[4..], b"PAUS p1");
    }

    #[test]
    fn registry_rejects_claim_by_a_second_zone() {
        let registry = SlavePlayerRegistry::new();
        registry.announce(SlavePlayerInfo { player_id: "p1".into(), name: "Kitchen".into() });
        registry.claim("zone-a", "p1").unwrap();
        assert!(registry.claim("zone-b", "p1").is_err());
    }

    #[test]
    fn releasing_a_zone_frees_its_player() {
        let registry = SlavePlayerRegistry::new();
        registry.announce(SlavePlayerInfo { player_id: "p1".into(), name: "Kitchen".into() });
        registry.claim("zone-a", "p1").unwrap();
        registry.release("zone-a");
        assert!(registry.claim("zone-b", "p1").is_ok());
    }
}
