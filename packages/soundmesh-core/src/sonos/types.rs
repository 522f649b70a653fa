//! Sonos AVTransport/topology domain types used by the output driver (§4.7).

use serde::Serialize;

/// `AVTransport` `TransportState`, as returned by `GetTransportInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
    Transitioning,
}

impl TransportState {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PLAYING" => Some(Self::Playing),
            "PAUSED_PLAYBACK" => Some(Self::Paused),
            "STOPPED" => Some(Self::Stopped),
            "TRANSITIONING" => Some(Self::Transitioning),
            _ => None,
        }
    }
}

/// One member of a Sonos zone group, as reported by `ZoneGroupTopology`.
#[derive(Debug, Clone, Serialize)]
pub struct ZoneGroupMember {
    pub uuid: String,
    pub ip: String,
    pub name: String,
}

/// A Sonos zone group: one coordinator plus its members (S1-style group,
/// identified by `x-rincon:<UDN>` SetAVTransportURI joins).
#[derive(Debug, Clone, Serialize)]
pub struct ZoneGroup {
    pub coordinator_uuid: String,
    pub members: Vec<ZoneGroupMember>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_state_parses_known_values() {
        assert_eq!(TransportState::parse("PLAYING"), Some(TransportState::Playing));
        assert_eq!(TransportState::parse("bogus"), None);
    }
}
