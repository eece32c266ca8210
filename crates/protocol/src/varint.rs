//! Varint- und Big-Endian-Cursor fuer das Murmur-Protokoll
//!
//! Murmur kodiert Session-IDs, Sequenznummern und Laengen im Audio-Tunnel
//! als Varint mit Praefix-Bits. Feste Integer sind immer big-endian.
//!
//! ## Varint-Tabelle
//!
//! ```text
//! Praefix     Bytes  Wertebereich
//! 0xxxxxxx    1      7 Bit
//! 10xxxxxx    2      14 Bit
//! 110xxxxx    3      21 Bit
//! 1110xxxx    4      28 Bit
//! 111100__    5      32 Bit (folgt: u32 BE)
//! 111101__    9      64 Bit (folgt: u64 BE)
//! 111110__    1+n    negativ, folgt: Varint des Komplements
//! 111111xx    1      negativ, zwei Bit (~xx)
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};

// ---------------------------------------------------------------------------
// PacketReader
// ---------------------------------------------------------------------------

/// Lese-Cursor ueber einen Byte-Puffer
///
/// Jeder Lesevorgang ist atomar: fehlen Bytes, bleibt die Position
/// unveraendert und `InsufficientData` wird zurueckgegeben.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Erstellt einen Cursor am Anfang von `buf`
    pub fn neu(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Aktuelle Leseposition
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Anzahl noch nicht gelesener Bytes
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Alle noch nicht gelesenen Bytes (ohne den Cursor zu bewegen)
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn bereit(&self, anzahl: usize) -> ProtocolResult<()> {
        if self.remaining() < anzahl {
            return Err(ProtocolError::InsufficientData {
                benoetigt: anzahl,
                verfuegbar: self.remaining(),
            });
        }
        Ok(())
    }

    /// Ueberspringt `anzahl` Bytes
    pub fn skip(&mut self, anzahl: usize) -> ProtocolResult<()> {
        self.bereit(anzahl)?;
        self.pos += anzahl;
        Ok(())
    }

    pub fn read_u8(&mut self) -> ProtocolResult<u8> {
        self.bereit(1)?;
        let wert = self.buf[self.pos];
        self.pos += 1;
        Ok(wert)
    }

    pub fn read_u16_be(&mut self) -> ProtocolResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&mut self) -> ProtocolResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64_be(&mut self) -> ProtocolResult<u64> {
        let b = self.read_bytes(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    /// Liest `anzahl` rohe Bytes ohne Kopie
    pub fn read_bytes(&mut self, anzahl: usize) -> ProtocolResult<&'a [u8]> {
        self.bereit(anzahl)?;
        let slice = &self.buf[self.pos..self.pos + anzahl];
        self.pos += anzahl;
        Ok(slice)
    }

    /// Liest einen Varint und gibt den Wert zurueck
    pub fn read_varint(&mut self) -> ProtocolResult<u64> {
        let (wert, verbraucht) = varint_lesen(self.rest())?;
        self.pos += verbraucht;
        Ok(wert)
    }
}

/// Dekodiert einen Varint am Anfang von `buf`.
///
/// Gibt `(wert, verbrauchte_bytes)` zurueck. Negative Werte liegen als
/// Zweierkomplement im `u64` (`as i64` liefert den vorzeichenbehafteten Wert).
pub fn varint_lesen(buf: &[u8]) -> ProtocolResult<(u64, usize)> {
    varint_lesen_intern(buf, true)
}

fn varint_lesen_intern(buf: &[u8], negation_erlaubt: bool) -> ProtocolResult<(u64, usize)> {
    let bytes_pruefen = |anzahl: usize| -> ProtocolResult<()> {
        if buf.len() < anzahl {
            return Err(ProtocolError::InsufficientData {
                benoetigt: anzahl,
                verfuegbar: buf.len(),
            });
        }
        Ok(())
    };

    bytes_pruefen(1)?;
    let v = buf[0] as u64;

    if v & 0x80 == 0 {
        return Ok((v & 0x7F, 1));
    }
    if v & 0xC0 == 0x80 {
        bytes_pruefen(2)?;
        return Ok((((v & 0x3F) << 8) | buf[1] as u64, 2));
    }
    if v & 0xE0 == 0xC0 {
        bytes_pruefen(3)?;
        let wert = ((v & 0x1F) << 16) | (buf[1] as u64) << 8 | buf[2] as u64;
        return Ok((wert, 3));
    }
    if v & 0xF0 == 0xE0 {
        bytes_pruefen(4)?;
        let wert = ((v & 0x0F) << 24)
            | (buf[1] as u64) << 16
            | (buf[2] as u64) << 8
            | buf[3] as u64;
        return Ok((wert, 4));
    }

    match v & 0xFC {
        0xF0 => {
            bytes_pruefen(5)?;
            let wert = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
            Ok((wert as u64, 5))
        }
        0xF4 => {
            bytes_pruefen(9)?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&buf[1..9]);
            Ok((u64::from_be_bytes(arr), 9))
        }
        // Verschachtelte Negation ist nicht definiert
        _ if !negation_erlaubt => Err(ProtocolError::malformed(format!(
            "Verschachtelter negativer Varint (Praefix {:#04x})",
            v
        ))),
        0xF8 => {
            let (inner, verbraucht) = varint_lesen_intern(&buf[1..], false)?;
            Ok((!inner, 1 + verbraucht))
        }
        _ => Ok((!(v & 0x03), 1)),
    }
}

// ---------------------------------------------------------------------------
// PacketWriter
// ---------------------------------------------------------------------------

/// Schreib-Cursor ueber einen wachsenden `BytesMut`
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Erstellt einen leeren Writer
    pub fn neu() -> Self {
        Self::default()
    }

    /// Erstellt einen Writer mit vorbelegter Kapazitaet
    pub fn mit_kapazitaet(kapazitaet: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(kapazitaet),
        }
    }

    /// Anzahl bisher geschriebener Bytes
    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn put_u8(&mut self, wert: u8) {
        self.buf.put_u8(wert);
    }

    pub fn put_u16_be(&mut self, wert: u16) {
        self.buf.put_u16(wert);
    }

    pub fn put_u32_be(&mut self, wert: u32) {
        self.buf.put_u32(wert);
    }

    pub fn put_bytes(&mut self, daten: &[u8]) {
        self.buf.put_slice(daten);
    }

    /// Reserviert `anzahl` Null-Bytes und gibt deren Startposition zurueck
    pub fn reservieren(&mut self, anzahl: usize) -> usize {
        let start = self.buf.len();
        self.buf.put_bytes(0, anzahl);
        start
    }

    /// Ueberschreibt vier bereits geschriebene Bytes ab `position` (Backpatch)
    pub fn patch_u32_be(&mut self, position: usize, wert: u32) {
        self.buf[position..position + 4].copy_from_slice(&wert.to_be_bytes());
    }

    /// Schreibt einen Varint (Werte mit gesetztem Bit 63 gelten als negativ)
    pub fn put_varint(&mut self, wert: u64) {
        let mut i = wert;

        if i & 0x8000_0000_0000_0000 != 0 && !i < 0x1_0000_0000 {
            i = !i;
            if i <= 0x3 {
                self.buf.put_u8(0xFC | i as u8);
                return;
            }
            self.buf.put_u8(0xF8);
        }

        if i < 0x80 {
            self.buf.put_u8(i as u8);
        } else if i < 0x4000 {
            self.buf.put_u8(((i >> 8) as u8) | 0x80);
            self.buf.put_u8(i as u8);
        } else if i < 0x20_0000 {
            self.buf.put_u8(((i >> 16) as u8) | 0xC0);
            self.buf.put_u8((i >> 8) as u8);
            self.buf.put_u8(i as u8);
        } else if i < 0x1000_0000 {
            self.buf.put_u8(((i >> 24) as u8) | 0xE0);
            self.buf.put_u8((i >> 16) as u8);
            self.buf.put_u8((i >> 8) as u8);
            self.buf.put_u8(i as u8);
        } else if i < 0x1_0000_0000 {
            self.buf.put_u8(0xF0);
            self.buf.put_u32(i as u32);
        } else {
            self.buf.put_u8(0xF4);
            self.buf.put_u64(i);
        }
    }

    /// Schreibt einen vorzeichenbehafteten Varint
    pub fn put_varint_i64(&mut self, wert: i64) {
        self.put_varint(wert as u64);
    }

    /// Gibt die geschriebenen Bytes zurueck
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Kodiert einen einzelnen Varint
pub fn varint_schreiben(wert: u64) -> Bytes {
    let mut writer = PacketWriter::mit_kapazitaet(9);
    writer.put_varint(wert);
    writer.freeze()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
