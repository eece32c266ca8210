//! Zustandsautomat einer Sitzung
//!
//! ```text
//! Connecting -> SignalingReady -> VoiceLinkPending -> VoiceLinkOpen
//!      |               |                 |                 |
//!      +---------------+-----------------+-----------------+--> ShuttingDown -> Closed
//! ```

use std::fmt;

/// Zustand der SessionBridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeZustand {
    /// Peer-Verbindung und Datenkanal werden ausgehandelt
    Connecting,
    /// Browser hat "ready" gemeldet; Durchgangszustand
    SignalingReady,
    /// Wartet auf den Datenkanal, danach laeuft der Aufbau zum Murmur-Server
    VoiceLinkPending,
    /// Audio fliesst in beide Richtungen
    VoiceLinkOpen,
    ShuttingDown,
    /// Endzustand, alle Ressourcen freigegeben
    Closed,
}

impl BridgeZustand {
    /// Prueft ob der Uebergang nach `ziel` erlaubt ist
    pub fn erlaubt(self, ziel: BridgeZustand) -> bool {
        use BridgeZustand::*;
        matches!(
            (self, ziel),
            (Connecting, SignalingReady)
                | (SignalingReady, VoiceLinkPending)
                | (VoiceLinkPending, VoiceLinkOpen)
                | (Connecting | SignalingReady | VoiceLinkPending | VoiceLinkOpen, ShuttingDown)
                | (ShuttingDown, Closed)
        )
    }

    /// `true` solange die Sitzung nicht abgebaut wird
    pub fn ist_aktiv(self) -> bool {
        !matches!(self, Self::ShuttingDown | Self::Closed)
    }
}

impl fmt::Display for BridgeZustand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::SignalingReady => "signaling_ready",
            Self::VoiceLinkPending => "voice_link_pending",
            Self::VoiceLinkOpen => "voice_link_open",
            Self::ShuttingDown => "shutting_down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}
