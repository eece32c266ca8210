//! Schnittstellen zur Browser-Seite
//!
//! Die SessionBridge kennt weder WebRTC noch WebSocket. Adapter
//! implementieren diese Traits und liefern Ereignisse ueber einen
//! [`SessionHandle`](crate::session::SessionHandle) zurueck.
//!
//! Alle Methoden sind synchron und blockieren nicht: Adapter reihen
//! intern ein und senden asynchron.

use std::sync::Arc;

use bytes::Bytes;
use murmurgate_audio::FRAME_SAMPLES;
use murmurgate_protocol::ServerNachricht;

use crate::error::BridgeResult;

/// Ausgehender Audio-Track fuer einen entfernten Sprecher
pub trait OutboundTrack: Send + Sync {
    /// Track-ID wie sie der Browser sieht
    fn id(&self) -> String;

    /// Uebergibt 10 ms PCM (48 kHz mono)
    fn push_pcm(&self, pcm: &[i16; FRAME_SAMPLES]);
}

/// Peer-Verbindung zum Browser
pub trait PeerConnection: Send + Sync {
    /// Legt einen neuen Audio-Track an und stoesst die Neuverhandlung an
    fn add_audio_track(&self) -> BridgeResult<Arc<dyn OutboundTrack>>;

    fn close(&self);
}

/// Zuverlaessiger, geordneter Datenkanal zum Browser
pub trait DataChannel: Send + Sync {
    fn send(&self, daten: Bytes);

    fn close(&self);
}

/// JSON-Kanal zum Browser (WebSocket)
pub trait SignalingSink: Send + Sync {
    fn send(&self, nachricht: ServerNachricht);

    fn close(&self);
}

/// Alle Browser-seitigen Kollaborateure einer Sitzung
#[derive(Clone)]
pub struct BrowserSeite {
    pub peer: Arc<dyn PeerConnection>,
    pub data_channel: Arc<dyn DataChannel>,
    pub signaling: Arc<dyn SignalingSink>,
}
