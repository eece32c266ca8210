//! murmurgate-protocol – Murmur-Wire-Format und Browser-Signaling
//!
//! Dieses Crate enthaelt alles, was Bytes interpretiert:
//! - Varint- und Big-Endian-Cursor (`varint`)
//! - Frame-Header und Reassemblierung des TCP-Stroms (`frame`)
//! - Audio-Tunnel-Payloads (`tunnel`)
//! - JSON-Nachrichten fuer den Browser-WebSocket (`signaling`)

pub mod error;
pub mod frame;
pub mod signaling;
pub mod tunnel;
pub mod varint;

pub use error::{ProtocolError, ProtocolResult};
pub use frame::{FrameReassembler, ProtocolFrame, Reassembled, AUDIO_TUNNEL_TYP, HEADER_GROESSE};
pub use signaling::{ClientNachricht, IceKandidat, ServerNachricht};
pub use tunnel::AudioTunnelMessage;
pub use varint::{PacketReader, PacketWriter};
