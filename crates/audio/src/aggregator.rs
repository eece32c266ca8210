//! Sammelt Browser-PCM bis zu einem vollen Upload-Frame
//!
//! Der Browser liefert pro Callback hoechstens 480 Samples. Erst bei
//! genau 1920 Samples (40 ms) wird kodiert und als Audio-Tunnel-Frame
//! verpackt. Bei Ueberlauf wird verworfen statt gepuffert.

use bytes::Bytes;
use tracing::debug;

use murmurgate_protocol::tunnel;

use crate::codec::{PcmEncoder, FRAME_SAMPLES, UPLOAD_FRAME_SAMPLES};
use crate::error::{AudioError, AudioResult};

/// Akkumulator fuer ausgehendes Audio einer Sitzung
pub struct OutboundAudioAggregator {
    encoder: Box<dyn PcmEncoder>,
    puffer: Box<[i16; UPLOAD_FRAME_SAMPLES]>,
    schreib_offset: usize,
    letzte_anzahl: usize,
    sequenz: u64,
}

impl OutboundAudioAggregator {
    pub fn neu(encoder: Box<dyn PcmEncoder>) -> Self {
        Self {
            encoder,
            puffer: Box::new([0; UPLOAD_FRAME_SAMPLES]),
            schreib_offset: 0,
            letzte_anzahl: 0,
            sequenz: 0,
        }
    }

    /// Verarbeitet einen Browser-Callback
    ///
    /// Liefert den fertigen Tunnel-Frame (inklusive 6-Byte-Header), sobald
    /// 1920 Samples beisammen sind. Die Sequenznummer steigt pro
    /// angenommenem Aufruf um eins, nicht pro Frame.
    pub fn push(&mut self, samples: &[i16]) -> AudioResult<Option<Bytes>> {
        if samples.len() > FRAME_SAMPLES {
            return Err(AudioError::ZuVieleSamples(samples.len()));
        }

        if samples.len() > self.letzte_anzahl && self.schreib_offset > 0 {
            debug!(verworfen = self.schreib_offset, "Verwerfe Teilpuffer (Groessenwechsel)");
            self.schreib_offset = 0;
        }
        self.letzte_anzahl = samples.len();

        let sequenz = self.sequenz;
        self.sequenz += 1;

        let neu_offset = self.schreib_offset + samples.len();
        if neu_offset > UPLOAD_FRAME_SAMPLES {
            debug!(verworfen = neu_offset, "Verwerfe Teilpuffer (zu gross)");
            self.schreib_offset = 0;
            return Ok(None);
        }

        self.puffer[self.schreib_offset..neu_offset].copy_from_slice(samples);
        self.schreib_offset = neu_offset;

        if self.schreib_offset < UPLOAD_FRAME_SAMPLES {
            return Ok(None);
        }

        self.schreib_offset = 0;
        let opus = self.encoder.encode(&self.puffer[..])?;
        Ok(Some(tunnel::encode_bytes(sequenz, &opus)?))
    }

    /// Naechste zu vergebende Sequenznummer
    pub fn sequenz(&self) -> u64 {
        self.sequenz
    }

    /// Anzahl gesammelter Samples
    pub fn gepuffert(&self) -> usize {
        self.schreib_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmurgate_protocol::{AudioTunnelMessage, HEADER_GROESSE};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Zaehlt Aufrufe, Payload ist erstes und letztes Sample
    struct ZaehlEncoder {
        aufrufe: Arc<AtomicUsize>,
    }

    impl PcmEncoder for ZaehlEncoder {
        fn encode(&mut self, pcm: &[i16]) -> AudioResult<Vec<u8>> {
            assert_eq!(pcm.len(), UPLOAD_FRAME_SAMPLES);
            self.aufrufe.fetch_add(1, Ordering::SeqCst);
            Ok(vec![pcm[0] as u8, pcm[UPLOAD_FRAME_SAMPLES - 1] as u8])
        }

        fn frame_samples(&self) -> usize {
            UPLOAD_FRAME_SAMPLES
        }
    }

    fn aggregator() -> (OutboundAudioAggregator, Arc<AtomicUsize>) {
        let aufrufe = Arc::new(AtomicUsize::new(0));
        let agg = OutboundAudioAggregator::neu(Box::new(ZaehlEncoder {
            aufrufe: aufrufe.clone(),
        }));
        (agg, aufrufe)
    }

    fn decode(frame: &Bytes) -> AudioTunnelMessage {
        AudioTunnelMessage::decode_uplink(&frame.slice(HEADER_GROESSE..)).unwrap()
    }

    #[test]
    fn vier_callbacks_ergeben_einen_frame() {
        let (mut agg, aufrufe) = aggregator();
        let mut frames = Vec::new();
        for i in 0..4 {
            if let Some(f) = agg.push(&vec![i as i16 + 1; 480]).unwrap() {
                frames.push(f);
            }
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(aufrufe.load(Ordering::SeqCst), 1);

        let msg = decode(&frames[0]);
        // Vierter Aufruf traegt Sequenz 3
        assert_eq!(msg.sequenz, 3);
        assert_eq!(&msg.opus[..], &[1, 4]);
        assert_eq!(agg.sequenz(), 4);
        assert_eq!(agg.gepuffert(), 0);
    }

    #[test]
    fn fuenf_callbacks_kodieren_genau_einmal() {
        let (mut agg, aufrufe) = aggregator();
        let ergebnisse: Vec<_> = (0..5).map(|_| agg.push(&[100; 480]).unwrap()).collect();

        assert_eq!(ergebnisse.iter().filter(|e| e.is_some()).count(), 1);
        assert!(ergebnisse[3].is_some());
        assert_eq!(aufrufe.load(Ordering::SeqCst), 1);
        assert_eq!(agg.gepuffert(), 480);
        assert_eq!(agg.sequenz(), 5);
    }

    #[test]
    fn ueberlauf_verwirft_puffer() {
        let (mut agg, aufrufe) = aggregator();
        // 5 x 441 = 2205 > 1920
        for _ in 0..4 {
            assert!(agg.push(&[1; 441]).unwrap().is_none());
        }
        assert_eq!(agg.gepuffert(), 1764);
        assert!(agg.push(&[1; 441]).unwrap().is_none());
        assert_eq!(agg.gepuffert(), 0);
        assert_eq!(aufrufe.load(Ordering::SeqCst), 0);
        assert_eq!(agg.sequenz(), 5);
    }

    #[test]
    fn groessenwechsel_verwirft_teilpuffer() {
        let (mut agg, _) = aggregator();
        agg.push(&[1; 240]).unwrap();
        agg.push(&[1; 240]).unwrap();
        assert_eq!(agg.gepuffert(), 480);

        // Mehr Samples als zuvor: Teilpuffer verworfen
        agg.push(&[2; 480]).unwrap();
        assert_eq!(agg.gepuffert(), 480);

        // Weniger Samples: kein Verwerfen
        agg.push(&[2; 240]).unwrap();
        assert_eq!(agg.gepuffert(), 720);
    }

    #[test]
    fn zu_viele_samples_abgelehnt_ohne_sequenz() {
        let (mut agg, _) = aggregator();
        assert!(matches!(
            agg.push(&[0; 481]),
            Err(AudioError::ZuVieleSamples(481))
        ));
        assert_eq!(agg.sequenz(), 0);
        assert_eq!(agg.gepuffert(), 0);
    }

    #[test]
    fn frame_header_laenge_stimmt() {
        let (mut agg, _) = aggregator();
        let mut frame = None;
        for _ in 0..4 {
            frame = agg.push(&[3; 480]).unwrap().or(frame);
        }
        let frame = frame.unwrap();
        assert_eq!(&frame[..2], &[0x00, 0x01]);
        let laenge = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize;
        assert_eq!(laenge, frame.len() - HEADER_GROESSE);
    }
}
