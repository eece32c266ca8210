//! Ringpuffer pro entferntem Sprecher
//!
//! Dekodierte Opus-Frames landen in einem von drei Slots. Der
//! Wiedergabe-Takt (alle 10 ms) entnimmt jeweils 480 Samples aus dem
//! aeltesten belegten Slot. Dekodierung und Wiedergabe laufen damit
//! unabhaengig voneinander, die Verzoegerung ist auf drei Frames begrenzt.

use tracing::debug;

use crate::codec::FRAME_SAMPLES;
use crate::error::{AudioError, AudioResult};

/// Anzahl der Slots im Ringpuffer
pub const RING_SLOTS: usize = 3;

/// Drei-Slot-Ringpuffer fuer dekodiertes PCM eines Sprechers
#[derive(Debug, Default)]
pub struct SpeakerAudioBuffer {
    slots: [Option<Vec<i16>>; RING_SLOTS],
    write_slot: usize,
    read_slot: usize,
    read_offset: usize,
}

impl SpeakerAudioBuffer {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Legt einen dekodierten Frame in den ersten freien Slot ab `write_slot`
    ///
    /// Gibt den belegten Slot zurueck. Sind alle Slots belegt, wird der
    /// Frame verworfen und `PufferVoll` gemeldet. Leere Frames werden
    /// ignoriert.
    pub fn push(&mut self, pcm: Vec<i16>) -> AudioResult<Option<usize>> {
        if pcm.is_empty() {
            return Ok(None);
        }

        for i in 0..RING_SLOTS {
            let slot = (self.write_slot + i) % RING_SLOTS;
            if self.slots[slot].is_none() {
                self.slots[slot] = Some(pcm);
                self.write_slot = (slot + 1) % RING_SLOTS;
                return Ok(Some(slot));
            }
        }

        Err(AudioError::PufferVoll)
    }

    /// Entnimmt die naechsten 480 Samples
    ///
    /// Gibt `false` zurueck wenn der aktuelle Lese-Slot leer ist (Stille).
    /// Ein Rest kuerzer als 480 Samples wird mit Nullen aufgefuellt und
    /// der Slot danach freigegeben.
    pub fn drain_into(&mut self, ziel: &mut [i16; FRAME_SAMPLES]) -> bool {
        let Some(frame) = self.slots[self.read_slot].as_ref() else {
            return false;
        };

        let rest = frame.len() - self.read_offset;
        if rest >= FRAME_SAMPLES {
            ziel.copy_from_slice(&frame[self.read_offset..self.read_offset + FRAME_SAMPLES]);
            self.read_offset += FRAME_SAMPLES;
        } else {
            debug!(rest, "Teil-Frame im Upload-Puffer, wird aufgefuellt");
            ziel[..rest].copy_from_slice(&frame[self.read_offset..]);
            ziel[rest..].fill(0);
            self.read_offset = frame.len();
        }

        if self.read_offset >= frame.len() {
            self.slots[self.read_slot] = None;
            self.read_slot = (self.read_slot + 1) % RING_SLOTS;
            self.read_offset = 0;
        }
        true
    }

    /// Anzahl belegter Slots
    pub fn belegt(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn ist_leer(&self) -> bool {
        self.belegt() == 0
    }
}
