//! Ein Track pro entferntem Sprecher
//!
//! Dekodierung passiert in der Sitzung, die Wiedergabe in einem eigenen
//! Takt-Task. Beide teilen sich nur den Ringpuffer.

use std::sync::Arc;
use std::time::Duration;

use murmurgate_audio::{AudioResult, PcmDecoder, SpeakerAudioBuffer, FRAME_SAMPLES};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::peer::OutboundTrack;

/// Wiedergabetakt (480 Samples bei 48 kHz)
pub const TAKT: Duration = Duration::from_millis(10);

/// Zustand eines entfernten Sprechers
pub struct SpeakerTrack {
    session_id: u64,
    track: Arc<dyn OutboundTrack>,
    decoder: Box<dyn PcmDecoder>,
    puffer: Arc<Mutex<SpeakerAudioBuffer>>,
    takt: JoinHandle<()>,
}

impl SpeakerTrack {
    /// Legt den Ringpuffer an und startet den Takt-Task
    pub fn starten(
        session_id: u64,
        track: Arc<dyn OutboundTrack>,
        decoder: Box<dyn PcmDecoder>,
    ) -> Self {
        let puffer = Arc::new(Mutex::new(SpeakerAudioBuffer::neu()));
        let takt = tokio::spawn(wiedergabe_takt(Arc::clone(&puffer), Arc::clone(&track)));

        Self {
            session_id,
            track,
            decoder,
            puffer,
            takt,
        }
    }

    /// Dekodiert ein Opus-Paket und legt es im Ringpuffer ab
    pub fn audio_empfangen(&mut self, opus: &[u8]) -> AudioResult<()> {
        let pcm = self.decoder.decode(opus)?;
        self.puffer.lock().push(pcm)?;
        Ok(())
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn track_id(&self) -> String {
        self.track.id()
    }

    /// Beendet den Takt-Task; mehrfacher Aufruf ist harmlos
    pub fn stoppen(&self) {
        self.takt.abort();
    }
}

impl Drop for SpeakerTrack {
    fn drop(&mut self) {
        self.takt.abort();
    }
}

async fn wiedergabe_takt(puffer: Arc<Mutex<SpeakerAudioBuffer>>, track: Arc<dyn OutboundTrack>) {
    let mut intervall = tokio::time::interval(TAKT);
    intervall.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frame = [0i16; FRAME_SAMPLES];

    loop {
        intervall.tick().await;
        let bereit = puffer.lock().drain_into(&mut frame);
        if bereit {
            track.push_pcm(&frame);
        }
    }
}
