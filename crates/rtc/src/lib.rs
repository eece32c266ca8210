//! murmurgate-rtc – Browser-Adapter
//!
//! Implementiert die Kollaborateur-Traits aus `murmurgate-bridge`:
//! - `RtcPeer` / `RtcDataChannel` ueber webrtc-rs
//! - `WsSignaling` ueber tokio-tungstenite

pub mod error;
pub mod peer;
pub mod signaling;

pub use error::{RtcError, RtcResult};
pub use peer::{RtcDataChannel, RtcKonfig, RtcPeer, RtcTrack, SdpPartner, DATENKANAL_LABEL};
pub use signaling::{signaling_lesen, WsSignaling};
