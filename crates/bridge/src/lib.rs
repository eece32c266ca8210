//! murmurgate-bridge – Bruecke zwischen einer Browser-Sitzung und Murmur
//!
//! Eine `SessionBridge` besitzt pro Browser:
//! - die TLS-Verbindung zum Murmur-Server
//! - Reassembler und Upload-Aggregator
//! - einen `SpeakerTrack` pro entferntem Sprecher
//!
//! WebRTC und WebSocket sind ueber die Traits in `peer` angebunden.

pub mod error;
pub mod peer;
pub mod session;
pub mod session_id;
pub mod speaker_tracks;
pub mod state;
pub mod voice_link;

pub use error::{BridgeError, BridgeResult};
pub use peer::{BrowserSeite, DataChannel, OutboundTrack, PeerConnection, SignalingSink};
pub use session::{kanal, BridgeDienste, SessionBridge, SessionEvent, SessionEvents, SessionHandle};
pub use session_id::{naechste_session_id, SessionIdGenerator};
pub use speaker_tracks::SpeakerTrack;
pub use state::BridgeZustand;
pub use voice_link::{TlsVoiceConnector, VoiceConnector, VoiceIo, VoiceStream};
