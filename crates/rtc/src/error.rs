//! Fehlertypen der Browser-Adapter

use murmurgate_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtcError {
    /// Fehler aus dem WebRTC-Stack
    #[error("WebRTC-Fehler: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// Signaling-Nachricht nicht lesbar (JSON)
    #[error("Signaling-Fehler: {0}")]
    Signaling(#[from] ProtocolError),
}

pub type RtcResult<T> = Result<T, RtcError>;
