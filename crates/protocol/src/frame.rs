//! Murmur-TCP-Frames und Reassemblierung
//!
//! Der Murmur-Server sendet einen ununterbrochenen Bytestrom aus Frames:
//!
//! ```text
//! +--------+--------+--------+--------+--------+--------+----...----+
//! | Typ (u16 BE)    | Laenge (u32 BE)                   | Payload    |
//! +--------+--------+--------+--------+--------+--------+----...----+
//! ```
//!
//! Nur Typ 1 (Audio-Tunnel) wird geparst. Alle anderen Frames gehen
//! unveraendert und in Originalreihenfolge an den Browser-Datenkanal.
//!
//! ## Reassemblierung
//!
//! Socket-Chunks haben keinerlei Bezug zu Frame-Grenzen. Der
//! `FrameReassembler` haelt zwischen zwei Chunks genau einen Zustand:
//! - angefangener Header (< 6 Bytes), oder
//! - angefangener Audio-Frame (Header + Teil-Payload), oder
//! - Anzahl noch ausstehender Bytes eines bereits weitergeleiteten
//!   Nicht-Audio-Frames.
//!
//! Nicht-Audio-Bytes werden nie laenger gepuffert als bis zum Ende des
//! aktuellen Chunks.

use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::{ProtocolError, ProtocolResult};

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Groesse des Frame-Headers (Typ + Laenge)
pub const HEADER_GROESSE: usize = 6;

/// Frame-Typ des Audio-Tunnels (UDPTunnel)
pub const AUDIO_TUNNEL_TYP: u16 = 1;

/// Maximale Laenge eines Audio-Frames, bevor ein Protokoll-Desync angenommen wird
pub const MAX_AUDIO_FRAME_GROESSE: usize = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// ProtocolFrame
// ---------------------------------------------------------------------------

/// Ein vollstaendiger Murmur-Frame
///
/// Die Laenge ist immer `payload.len()`; sie wird nicht separat gespeichert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolFrame {
    pub typ: u16,
    pub payload: Bytes,
}

impl ProtocolFrame {
    pub fn neu(typ: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            typ,
            payload: payload.into(),
        }
    }

    /// Laenge laut Header
    pub fn laenge(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn ist_audio(&self) -> bool {
        self.typ == AUDIO_TUNNEL_TYP
    }

    /// Haengt Header und Payload an `dst` an
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_GROESSE + self.payload.len());
        dst.put_u16(self.typ);
        dst.put_u32(self.laenge());
        dst.put_slice(&self.payload);
    }

    /// Serialisiert den Frame fuer den Socket
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode_into(&mut buf);
        buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// Reassembled
// ---------------------------------------------------------------------------

/// Ergebnis der Reassemblierung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    /// Vollstaendiger Audio-Tunnel-Frame
    Audio(ProtocolFrame),
    /// Rohe Nicht-Audio-Bytes fuer den Datenkanal (evtl. nur ein Teil-Frame)
    Durchreichen(Bytes),
}

// ---------------------------------------------------------------------------
// FrameReassembler
// ---------------------------------------------------------------------------

/// Zustandsautomat, der Socket-Chunks in Frames zerlegt
///
/// Implementiert `tokio_util::codec::Decoder`; `push` ist die
/// chunk-basierte Variante fuer Aufrufer ohne `FramedRead`.
#[derive(Debug)]
pub struct FrameReassembler {
    /// Angefangener Header oder angefangener Audio-Frame
    puffer: BytesMut,
    /// Ausstehende Bytes eines bereits weitergeleiteten Nicht-Audio-Frames
    durchreichen_rest: usize,
    max_audio_frame: usize,
}

impl FrameReassembler {
    pub fn neu() -> Self {
        Self::mit_max_groesse(MAX_AUDIO_FRAME_GROESSE)
    }

    /// Reassembler mit eigenem Limit fuer Audio-Frames
    pub fn mit_max_groesse(max_audio_frame: usize) -> Self {
        Self {
            puffer: BytesMut::new(),
            durchreichen_rest: 0,
            max_audio_frame,
        }
    }

    /// Verarbeitet einen Chunk und liefert alle daraus fertig gewordenen Teile
    /// in Stromreihenfolge.
    pub fn push(&mut self, chunk: &[u8]) -> ProtocolResult<Vec<Reassembled>> {
        let mut puffer = std::mem::take(&mut self.puffer);
        puffer.extend_from_slice(chunk);

        let mut ausgabe = Vec::new();
        let ergebnis = loop {
            match self.decode(&mut puffer) {
                Ok(Some(teil)) => ausgabe.push(teil),
                Ok(None) => break Ok(ausgabe),
                Err(e) => break Err(e),
            }
        };

        self.puffer = puffer;
        ergebnis
    }

    /// Anzahl zwischengespeicherter Bytes (Header-Rest oder Audio-Frame)
    pub fn gepufferte_bytes(&self) -> usize {
        self.puffer.len()
    }

    /// Anzahl noch ausstehender Bytes eines Nicht-Audio-Frames
    pub fn ausstehende_durchreiche_bytes(&self) -> usize {
        self.durchreichen_rest
    }
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::neu()
    }
}

impl Decoder for FrameReassembler {
    type Item = Reassembled;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Laenge des Nicht-Audio-Laufs am Anfang von `src`
        let mut lauf = 0usize;

        if self.durchreichen_rest > 0 {
            if src.is_empty() {
                return Ok(None);
            }
            lauf = self.durchreichen_rest.min(src.len());
            self.durchreichen_rest -= lauf;
            if self.durchreichen_rest > 0 {
                return Ok(Some(Reassembled::Durchreichen(src.split_to(lauf).freeze())));
            }
        }

        loop {
            let rest = &src[lauf..];
            if rest.len() < HEADER_GROESSE {
                break;
            }

            let typ = u16::from_be_bytes([rest[0], rest[1]]);
            let laenge = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]) as usize;

            if typ == AUDIO_TUNNEL_TYP {
                // Erst den bisherigen Lauf abgeben, Audio im naechsten Aufruf
                if lauf > 0 {
                    break;
                }
                if laenge > self.max_audio_frame {
                    return Err(ProtocolError::FrameZuGross {
                        laenge,
                        maximum: self.max_audio_frame,
                    });
                }

                let gesamt = HEADER_GROESSE + laenge;
                if src.len() < gesamt {
                    src.reserve(gesamt - src.len());
                    return Ok(None);
                }

                let frame = src.split_to(gesamt).freeze();
                return Ok(Some(Reassembled::Audio(ProtocolFrame {
                    typ,
                    payload: frame.slice(HEADER_GROESSE..),
                })));
            }

            let ende = lauf + HEADER_GROESSE + laenge;
            if ende <= src.len() {
                lauf = ende;
                continue;
            }

            // Nicht-Audio-Frame reicht ueber den Chunk hinaus
            self.durchreichen_rest = ende - src.len();
            lauf = src.len();
            break;
        }

        if lauf > 0 {
            return Ok(Some(Reassembled::Durchreichen(src.split_to(lauf).freeze())));
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_bytes(typ: u16, payload: &[u8]) -> Vec<u8> {
        ProtocolFrame::neu(typ, payload.to_vec()).to_bytes().to_vec()
    }

    /// Teilt die Ausgabe in Audio-Frames und den zusammengesetzten Durchreich-Strom
    fn aufteilen(teile: Vec<Reassembled>) -> (Vec<ProtocolFrame>, Vec<u8>) {
        let mut audio = Vec::new();
        let mut durch = Vec::new();
        for teil in teile {
            match teil {
                Reassembled::Audio(f) => audio.push(f),
                Reassembled::Durchreichen(b) => durch.extend_from_slice(&b),
            }
        }
        (audio, durch)
    }

    fn beispiel_strom() -> (Vec<u8>, Vec<u8>) {
        let mut strom = Vec::new();
        let mut erwartet_durch = Vec::new();

        let ping = frame_bytes(3, &[1, 2, 3, 4, 5, 6, 7, 8]);
        erwartet_durch.extend_from_slice(&ping);
        strom.extend_from_slice(&ping);

        strom.extend(frame_bytes(1, &[0x80, 0x05, 0x00, 0x03, b'a', b'b', b'c']));

        let text = frame_bytes(11, b"hallo welt");
        erwartet_durch.extend_from_slice(&text);
        strom.extend_from_slice(&text);

        let leer = frame_bytes(7, &[]);
        erwartet_durch.extend_from_slice(&leer);
        strom.extend_from_slice(&leer);

        strom.extend(frame_bytes(1, &[0x80, 0x09, 0x01, 0x02, b'x', b'y']));
        strom.extend(frame_bytes(1, &[0x80, 0x05, 0x02, 0x01, b'z']));

        let ende = frame_bytes(5, &[9; 20]);
        erwartet_durch.extend_from_slice(&ende);
        strom.extend_from_slice(&ende);

        (strom, erwartet_durch)
    }

    #[test]
    fn ein_chunk_alle_frames() {
        let (strom, erwartet_durch) = beispiel_strom();
        let mut r = FrameReassembler::neu();
        let (audio, durch) = aufteilen(r.push(&strom).unwrap());

        assert_eq!(audio.len(), 3);
        assert!(audio.iter().all(|f| f.ist_audio()));
        assert_eq!(&audio[0].payload[..], &[0x80, 0x05, 0x00, 0x03, b'a', b'b', b'c']);
        assert_eq!(durch, erwartet_durch);
        assert_eq!(r.gepufferte_bytes(), 0);
        assert_eq!(r.ausstehende_durchreiche_bytes(), 0);
    }

    #[test]
    fn beliebige_chunk_grenzen_liefern_gleiche_folge() {
        let (strom, _) = beispiel_strom();
        let referenz = aufteilen(FrameReassembler::neu().push(&strom).unwrap());

        for i in 0..=strom.len() {
            for j in i..=strom.len() {
                let mut r = FrameReassembler::neu();
                let mut teile = r.push(&strom[..i]).unwrap();
                teile.extend(r.push(&strom[i..j]).unwrap());
                teile.extend(r.push(&strom[j..]).unwrap());
                assert_eq!(aufteilen(teile), referenz, "Split bei {i}/{j}");
                assert_eq!(r.gepufferte_bytes(), 0);
            }
        }
    }

    #[test]
    fn byteweise_zufuhr() {
        let (strom, _) = beispiel_strom();
        let referenz = aufteilen(FrameReassembler::neu().push(&strom).unwrap());

        let mut r = FrameReassembler::neu();
        let mut teile = Vec::new();
        for b in &strom {
            teile.extend(r.push(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(aufteilen(teile), referenz);
    }

    #[test]
    fn audio_frame_nach_byte_neun_geteilt() {
        let daten = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x80, 0x05, 0x00, 0x03, 0x61, 0x62, 0x63,
        ];
        let mut r = FrameReassembler::neu();

        assert!(r.push(&daten[..9]).unwrap().is_empty());
        assert_eq!(r.gepufferte_bytes(), 9);

        let teile = r.push(&daten[9..]).unwrap();
        assert_eq!(teile.len(), 1);
        match &teile[0] {
            Reassembled::Audio(f) => {
                assert_eq!(f.laenge(), 7);
                assert_eq!(&f.payload[..], &daten[6..]);
            }
            andere => panic!("Audio-Frame erwartet, erhalten: {andere:?}"),
        }
        assert_eq!(r.gepufferte_bytes(), 0);
    }

    #[test]
    fn header_rest_wird_gepuffert_und_vorherige_bytes_durchgereicht() {
        let mut strom = frame_bytes(2, &[1, 2]);
        let naechster = frame_bytes(4, &[7, 7, 7]);
        strom.extend_from_slice(&naechster[..4]);

        let mut r = FrameReassembler::neu();
        let teile = r.push(&strom).unwrap();
        assert_eq!(teile, vec![Reassembled::Durchreichen(Bytes::from(frame_bytes(2, &[1, 2])))]);
        assert_eq!(r.gepufferte_bytes(), 4);

        let teile = r.push(&naechster[4..]).unwrap();
        assert_eq!(teile, vec![Reassembled::Durchreichen(Bytes::from(naechster))]);
    }

    #[test]
    fn nicht_audio_ueber_chunkgrenze_wird_sofort_weitergeleitet() {
        let frame = frame_bytes(9, &[5; 100]);
        let mut r = FrameReassembler::neu();

        let teile = r.push(&frame[..30]).unwrap();
        assert_eq!(teile, vec![Reassembled::Durchreichen(Bytes::copy_from_slice(&frame[..30]))]);
        assert_eq!(r.gepufferte_bytes(), 0);
        assert_eq!(r.ausstehende_durchreiche_bytes(), 76);

        let teile = r.push(&frame[30..60]).unwrap();
        assert_eq!(teile, vec![Reassembled::Durchreichen(Bytes::copy_from_slice(&frame[30..60]))]);
        assert_eq!(r.ausstehende_durchreiche_bytes(), 46);

        // Rest des Frames plus ein Audio-Frame im selben Chunk
        let mut chunk = frame[60..].to_vec();
        chunk.extend(frame_bytes(1, &[0x80, 0x01, 0x00, 0x00]));
        let (audio, durch) = aufteilen(r.push(&chunk).unwrap());
        assert_eq!(durch, frame[60..].to_vec());
        assert_eq!(audio.len(), 1);
        assert_eq!(r.ausstehende_durchreiche_bytes(), 0);
    }

    #[test]
    fn reihenfolge_durchreichen_vor_audio() {
        let mut strom = frame_bytes(3, &[1]);
        strom.extend(frame_bytes(1, &[0x80, 0x01, 0x00, 0x00]));
        strom.extend(frame_bytes(3, &[2]));

        let teile = FrameReassembler::neu().push(&strom).unwrap();
        assert_eq!(teile.len(), 3);
        assert!(matches!(teile[0], Reassembled::Durchreichen(_)));
        assert!(matches!(teile[1], Reassembled::Audio(_)));
        assert!(matches!(teile[2], Reassembled::Durchreichen(_)));
    }

    #[test]
    fn zu_grosser_audio_frame_abgelehnt() {
        let mut r = FrameReassembler::mit_max_groesse(16);
        let mut daten = vec![0x00, 0x01];
        daten.extend_from_slice(&1000u32.to_be_bytes());
        let result = r.push(&daten);
        assert!(matches!(result, Err(ProtocolError::FrameZuGross { laenge: 1000, .. })));
    }

    #[test]
    fn leerer_chunk_ist_harmlos() {
        let mut r = FrameReassembler::neu();
        assert!(r.push(&[]).unwrap().is_empty());
        assert_eq!(r.gepufferte_bytes(), 0);
    }
}
