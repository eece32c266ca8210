//! Fehlertypen fuer das Murmur-Protokoll

use thiserror::Error;

/// Alle Fehler beim Lesen und Schreiben des Murmur-Protokolls
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Cursor wollte ueber das Pufferende hinaus lesen.
    ///
    /// Kein echter Fehler: der Aufrufer entscheidet, ob auf weitere
    /// Bytes gewartet wird.
    #[error("Zu wenig Daten: {benoetigt} Bytes benoetigt, {verfuegbar} verfuegbar")]
    InsufficientData { benoetigt: usize, verfuegbar: usize },

    /// Unerwarteter Typ/Target-Wert oder Laengen-Mismatch
    #[error("Fehlerhaftes Paket: {0}")]
    MalformedPacket(String),

    /// Frame-Laenge ueberschreitet das erlaubte Maximum (Protokoll-Desync)
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {maximum} Bytes)")]
    FrameZuGross { laenge: usize, maximum: usize },

    /// Opus-Nutzlast laesst sich im Laengen-Varint nicht darstellen
    #[error("Opus-Nutzlast zu gross: {0} Bytes")]
    NutzlastZuGross(usize),

    /// Signaling-Nachricht ist kein gueltiges JSON
    #[error("JSON-Fehler: {0}")]
    Json(#[from] serde_json::Error),

    /// IO-Fehler (nur ueber den tokio-util Decoder erreichbar)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Erstellt einen `MalformedPacket`-Fehler
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPacket(msg.into())
    }

    /// `true` wenn lediglich Bytes fehlen
    pub fn ist_unvollstaendig(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }
}

/// Result-Typ fuer das Protokoll-Crate
pub type ProtocolResult<T> = Result<T, ProtocolError>;
