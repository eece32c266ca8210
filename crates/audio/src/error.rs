//! Fehlertypen fuer die Audio-Pipeline

use thiserror::Error;

use murmurgate_protocol::ProtocolError;

/// Alle moeglichen Fehler der Audio-Pipeline
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Codec-Fehler: {0}")]
    CodecFehler(String),

    #[error("Falsche Frame-Groesse: {erwartet} Samples erwartet, {erhalten} erhalten")]
    FalscheFrameGroesse { erwartet: usize, erhalten: usize },

    /// Browser lieferte mehr als einen 10-ms-Frame pro Callback
    #[error("Zu viele Samples im Paket: {0}")]
    ZuVieleSamples(usize),

    /// Alle Ringpuffer-Slots eines Sprechers belegt
    #[error("Alle Puffer voll")]
    PufferVoll,

    #[error("Tunnel-Frame konnte nicht gebaut werden: {0}")]
    Protokoll(#[from] ProtocolError),
}

impl AudioError {
    pub(crate) fn codec(e: impl std::fmt::Display) -> Self {
        Self::CodecFehler(e.to_string())
    }
}

pub type AudioResult<T> = Result<T, AudioError>;
