//! Opus Encoder/Decoder Wrapper
//!
//! Kapselt audiopus hinter zwei kleinen Traits, damit Sitzungslogik und
//! Tests ohne echten Codec auskommen. Alles ist 48 kHz mono, 16-Bit-PCM.

use audiopus::{
    coder::{Decoder, Encoder},
    Application, Bitrate, Channels, SampleRate,
};
use tracing::debug;

use crate::error::{AudioError, AudioResult};

/// Abtastrate aller PCM-Daten
pub const ABTASTRATE: u32 = 48_000;

/// Samples eines 10-ms-Frames (Wiedergabe-Takt)
pub const FRAME_SAMPLES: usize = 480;

/// Samples eines Upload-Frames zum Murmur-Server (40 ms)
pub const UPLOAD_FRAME_SAMPLES: usize = 4 * FRAME_SAMPLES;

/// Groesster Opus-Frame (120 ms) als Decoder-Puffer
const MAX_DECODE_SAMPLES: usize = 5760;

/// Groesster Opus-Payload den der Encoder erzeugen darf
const MAX_PAKET_BYTES: usize = 4000;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Kodiert einen PCM-Frame fester Groesse zu Opus
pub trait PcmEncoder: Send {
    fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>>;

    /// Erwartete Anzahl Samples pro Aufruf
    fn frame_samples(&self) -> usize;
}

/// Dekodiert ein Opus-Paket zu PCM
pub trait PcmDecoder: Send {
    fn decode(&mut self, opus: &[u8]) -> AudioResult<Vec<i16>>;
}

/// Erzeugt Codec-Instanzen (eine pro Sprecher bzw. pro Sitzung)
pub trait CodecFabrik: Send + Sync {
    fn encoder(&self, frame_samples: usize) -> AudioResult<Box<dyn PcmEncoder>>;
    fn decoder(&self) -> AudioResult<Box<dyn PcmDecoder>>;
}

// ---------------------------------------------------------------------------
// Opus
// ---------------------------------------------------------------------------

/// Opus-Encoder: kodiert i16-PCM zu Opus-Bytes
pub struct OpusEncoder {
    encoder: Encoder,
    frame_samples: usize,
}

impl OpusEncoder {
    /// Erstellt einen Encoder fuer Frames von `frame_samples` Samples
    pub fn neu(frame_samples: usize, bitrate_kbps: u32, komplexitaet: u8) -> AudioResult<Self> {
        let mut encoder = Encoder::new(SampleRate::Hz48000, Channels::Mono, Application::Voip)
            .map_err(AudioError::codec)?;

        encoder
            .set_bitrate(Bitrate::BitsPerSecond(bitrate_kbps as i32 * 1000))
            .map_err(AudioError::codec)?;

        // audiopus 0.2 erwartet u8
        encoder
            .set_complexity(komplexitaet)
            .map_err(AudioError::codec)?;

        debug!(
            "OpusEncoder erstellt: {}kbps, komplexitaet={}, frame_samples={}",
            bitrate_kbps, komplexitaet, frame_samples
        );

        Ok(Self {
            encoder,
            frame_samples,
        })
    }
}

impl PcmEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
        if pcm.len() != self.frame_samples {
            return Err(AudioError::FalscheFrameGroesse {
                erwartet: self.frame_samples,
                erhalten: pcm.len(),
            });
        }

        let mut output = vec![0u8; MAX_PAKET_BYTES];
        let written = self
            .encoder
            .encode(pcm, &mut output)
            .map_err(AudioError::codec)?;

        output.truncate(written);
        Ok(output)
    }

    fn frame_samples(&self) -> usize {
        self.frame_samples
    }
}

/// Opus-Decoder: dekodiert Opus-Bytes zu i16-PCM
pub struct OpusDecoder {
    decoder: Decoder,
}

impl OpusDecoder {
    pub fn neu() -> AudioResult<Self> {
        let decoder =
            Decoder::new(SampleRate::Hz48000, Channels::Mono).map_err(AudioError::codec)?;
        Ok(Self { decoder })
    }
}

impl PcmDecoder for OpusDecoder {
    fn decode(&mut self, opus: &[u8]) -> AudioResult<Vec<i16>> {
        let mut output = vec![0i16; MAX_DECODE_SAMPLES];
        let decoded = self
            .decoder
            .decode(Some(opus), &mut output[..], false)
            .map_err(AudioError::codec)?;

        output.truncate(decoded);
        Ok(output)
    }
}

/// Fabrik fuer echte Opus-Codecs
#[derive(Debug, Clone, Copy)]
pub struct OpusFabrik {
    pub bitrate_kbps: u32,
    pub komplexitaet: u8,
}

impl Default for OpusFabrik {
    fn default() -> Self {
        Self {
            bitrate_kbps: 40,
            komplexitaet: 9,
        }
    }
}

impl CodecFabrik for OpusFabrik {
    fn encoder(&self, frame_samples: usize) -> AudioResult<Box<dyn PcmEncoder>> {
        Ok(Box::new(OpusEncoder::neu(
            frame_samples,
            self.bitrate_kbps,
            self.komplexitaet,
        )?))
    }

    fn decoder(&self) -> AudioResult<Box<dyn PcmDecoder>> {
        Ok(Box::new(OpusDecoder::neu()?))
    }
}
