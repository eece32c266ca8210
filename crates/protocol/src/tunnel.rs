//! Audio-Tunnel (Frame-Typ 1)
//!
//! Payload-Layout Server -> Client:
//!
//! ```text
//! u8      typeTarget (0x80 = Opus, Ziel 0)
//! varint  Session-ID des Sprechers
//! varint  Sequenznummer
//! varint  Opus-Laenge (Bit 0x2000 = letztes Paket)
//! bytes   Opus-Daten
//! [12]    optional: Position (3x f32), wird nicht interpretiert
//! ```
//!
//! Client -> Server ist identisch, nur ohne Session-ID.

use bytes::Bytes;

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{ProtocolFrame, AUDIO_TUNNEL_TYP, HEADER_GROESSE};
use crate::varint::{PacketReader, PacketWriter};

/// Erwarteter typeTarget-Wert (Opus an Ziel 0)
pub const TYPE_TARGET_OPUS: u8 = 0x80;

/// Markierungsbit "letztes Paket" im Laengen-Varint
pub const LETZTES_PAKET_BIT: u64 = 0x2000;

/// Maske fuer die eigentliche Opus-Laenge
pub const OPUS_LAENGEN_MASKE: u64 = 0x1FFF;

/// Laenge der optionalen Positionsdaten
pub const POSITION_GROESSE: usize = 12;

// ---------------------------------------------------------------------------
// AudioTunnelMessage
// ---------------------------------------------------------------------------

/// Dekodierte Audio-Tunnel-Nachricht
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTunnelMessage {
    /// Session-ID des Sprechers (beim Uplink immer 0)
    pub speaker_session: u64,
    pub sequenz: u64,
    pub opus: Bytes,
    /// Bit 0x2000 war im Laengenfeld gesetzt
    pub ist_letztes_paket: bool,
    /// Rohe Positionsdaten, unveraendert durchgereicht
    pub position: Option<[u8; POSITION_GROESSE]>,
}

impl AudioTunnelMessage {
    /// Dekodiert einen Downlink-Payload (vom Murmur-Server)
    pub fn decode(payload: &Bytes) -> ProtocolResult<Self> {
        decode_intern(payload, true)
    }

    /// Dekodiert einen Uplink-Payload (vom Client, ohne Session-ID)
    pub fn decode_uplink(payload: &Bytes) -> ProtocolResult<Self> {
        decode_intern(payload, false)
    }
}

fn decode_intern(payload: &Bytes, mit_session: bool) -> ProtocolResult<AudioTunnelMessage> {
    let mut r = PacketReader::neu(payload);

    let type_target = r.read_u8()?;
    if type_target != TYPE_TARGET_OPUS {
        return Err(ProtocolError::malformed(format!(
            "unerwartetes typeTarget 0x{type_target:02X}"
        )));
    }

    let speaker_session = if mit_session { r.read_varint()? } else { 0 };
    let sequenz = r.read_varint()?;
    let laengenfeld = r.read_varint()?;
    let opus_laenge = (laengenfeld & OPUS_LAENGEN_MASKE) as usize;
    let ist_letztes_paket = laengenfeld & LETZTES_PAKET_BIT != 0;

    let rest = r.remaining();
    let position = if rest == opus_laenge {
        None
    } else if rest == opus_laenge + POSITION_GROESSE {
        let start = r.position() + opus_laenge;
        let mut pos = [0u8; POSITION_GROESSE];
        pos.copy_from_slice(&payload[start..]);
        Some(pos)
    } else {
        return Err(ProtocolError::malformed(format!(
            "Laengen-Mismatch: Opus {opus_laenge} Bytes, verbleibend {rest} Bytes"
        )));
    };

    let start = r.position();
    Ok(AudioTunnelMessage {
        speaker_session,
        sequenz,
        opus: payload.slice(start..start + opus_laenge),
        ist_letztes_paket,
        position,
    })
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Baut einen vollstaendigen Uplink-Frame inklusive Header
///
/// Die Frame-Laenge wird nach dem Schreiben der Varints nachgetragen.
pub fn encode_bytes(sequenz: u64, opus: &[u8]) -> ProtocolResult<Bytes> {
    schreiben(None, sequenz, opus, None)
}

/// Wie [`encode_bytes`], liefert aber den Frame als [`ProtocolFrame`]
pub fn encode(sequenz: u64, opus: &[u8]) -> ProtocolResult<ProtocolFrame> {
    als_frame(encode_bytes(sequenz, opus)?)
}

/// Baut einen Downlink-Frame, wie ihn der Murmur-Server sendet
pub fn encode_downlink(
    speaker_session: u64,
    sequenz: u64,
    opus: &[u8],
    position: Option<[u8; POSITION_GROESSE]>,
) -> ProtocolResult<ProtocolFrame> {
    als_frame(schreiben(Some(speaker_session), sequenz, opus, position)?)
}

fn schreiben(
    speaker_session: Option<u64>,
    sequenz: u64,
    opus: &[u8],
    position: Option<[u8; POSITION_GROESSE]>,
) -> ProtocolResult<Bytes> {
    if opus.len() as u64 > OPUS_LAENGEN_MASKE {
        return Err(ProtocolError::NutzlastZuGross(opus.len()));
    }

    let mut w = PacketWriter::mit_kapazitaet(HEADER_GROESSE + 16 + opus.len() + POSITION_GROESSE);
    w.put_u16_be(AUDIO_TUNNEL_TYP);
    let laengen_pos = w.reservieren(4);

    w.put_u8(TYPE_TARGET_OPUS);
    if let Some(session) = speaker_session {
        w.put_varint(session);
    }
    w.put_varint(sequenz);
    w.put_varint(opus.len() as u64);
    w.put_bytes(opus);
    if let Some(pos) = position {
        w.put_bytes(&pos);
    }

    let payload_laenge = (w.position() - HEADER_GROESSE) as u32;
    w.patch_u32_be(laengen_pos, payload_laenge);
    Ok(w.freeze())
}

fn als_frame(bytes: Bytes) -> ProtocolResult<ProtocolFrame> {
    if bytes.len() < HEADER_GROESSE {
        return Err(ProtocolError::InsufficientData {
            benoetigt: HEADER_GROESSE,
            verfuegbar: bytes.len(),
        });
    }
    Ok(ProtocolFrame::neu(AUDIO_TUNNEL_TYP, bytes.slice(HEADER_GROESSE..)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
