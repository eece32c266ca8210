//! Fehlertypen fuer die SessionBridge

use murmurgate_audio::AudioError;
use murmurgate_protocol::ProtocolError;
use thiserror::Error;

/// Fehlertyp einer Sitzung
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Fehlerhafter Frame vom Murmur-Server
    #[error("Protokollfehler: {0}")]
    Protokoll(#[from] ProtocolError),

    /// Codec- oder Pufferfehler
    #[error("Audiofehler: {0}")]
    Audio(#[from] AudioError),

    /// Voice-Socket, Datenkanal oder Peer-Verbindung weggebrochen
    #[error("Transportfehler: {0}")]
    Transport(String),

    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS-Fehler: {0}")]
    Tls(String),
}

impl BridgeError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// `true` wenn der Fehler die Sitzung beendet
    ///
    /// Ein zu grosser Frame bedeutet, dass der Bytestrom nicht mehr an
    /// Frame-Grenzen ausgerichtet ist.
    pub fn ist_fatal(&self) -> bool {
        match self {
            Self::Protokoll(ProtocolError::FrameZuGross { .. }) => true,
            Self::Protokoll(_) | Self::Audio(_) => false,
            Self::Transport(_) | Self::Io(_) | Self::Tls(_) => true,
        }
    }
}

/// Result-Typ fuer die SessionBridge
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn klassifizierung() {
        assert!(!BridgeError::from(ProtocolError::malformed("x")).ist_fatal());
        assert!(!BridgeError::from(AudioError::PufferVoll).ist_fatal());
        assert!(BridgeError::from(ProtocolError::FrameZuGross {
            laenge: 1,
            maximum: 0
        })
        .ist_fatal());
        assert!(BridgeError::transport("eof").ist_fatal());
    }
}
