//! SessionBridge – eine Browser-Sitzung
//!
//! Jede Sitzung ist ein eigener tokio-Task, der seinen Kontext exklusiv
//! besitzt. Adapter (WebRTC, WebSocket, Voice-Socket) melden Ereignisse
//! ueber einen [`SessionHandle`]; die Bridge verarbeitet sie strikt
//! nacheinander.
//!
//! ## Datenfluss
//! ```text
//! Browser-PCM -> OutboundAudioAggregator -> Voice-Writer -> Murmur
//! Murmur -> Voice-Reader -> FrameReassembler -+-> AudioTunnel -> SpeakerTrack -> Browser-Track
//!                                             +-> Datenkanal (alle anderen Frames)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use murmurgate_audio::{
    AudioError, CodecFabrik, OutboundAudioAggregator, UPLOAD_FRAME_SAMPLES,
};
use murmurgate_protocol::{AudioTunnelMessage, FrameReassembler, Reassembled, ServerNachricht};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn, Instrument, Span};

use crate::error::{BridgeError, BridgeResult};
use crate::peer::BrowserSeite;
use crate::speaker_tracks::SpeakerTrack;
use crate::state::BridgeZustand;
use crate::voice_link::{VoiceConnector, VoiceStream};

/// Lesepuffer pro Socket-Read
const LESE_PUFFER: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Ereignisse
// ---------------------------------------------------------------------------

/// Alles, was von aussen auf eine Sitzung einwirkt
pub enum SessionEvent {
    /// Browser meldet ICE/DTLS fertig
    ClientReady,
    DataChannelOpen,
    /// Bytes vom Browser fuer den Murmur-Server
    DataChannelNachricht(Bytes),
    DataChannelGeschlossen,
    DataChannelFehler(String),
    /// Mikrofon-Samples des Browsers (hoechstens 480)
    BrowserAudio(Vec<i16>),
    VoiceVerbunden(VoiceStream),
    /// Roher Chunk vom Murmur-Socket
    VoiceDaten(Bytes),
    VoiceGeschlossen,
    VoiceFehler(String),
    SignalingGeschlossen,
    PeerFehler(String),
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ClientReady => "client_ready",
            Self::DataChannelOpen => "data_channel_open",
            Self::DataChannelNachricht(_) => "data_channel_nachricht",
            Self::DataChannelGeschlossen => "data_channel_geschlossen",
            Self::DataChannelFehler(_) => "data_channel_fehler",
            Self::BrowserAudio(_) => "browser_audio",
            Self::VoiceVerbunden(_) => "voice_verbunden",
            Self::VoiceDaten(_) => "voice_daten",
            Self::VoiceGeschlossen => "voice_geschlossen",
            Self::VoiceFehler(_) => "voice_fehler",
            Self::SignalingGeschlossen => "signaling_geschlossen",
            Self::PeerFehler(_) => "peer_fehler",
        }
    }
}

impl std::fmt::Debug for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sendeseite der Ereigniswarteschlange einer Sitzung
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    /// Meldet ein Ereignis; nach Sitzungsende wird es verworfen
    pub fn melden(&self, ereignis: SessionEvent) {
        if let Err(e) = self.tx.send(ereignis) {
            trace!(ereignis = ?e.0, "Sitzung beendet, Ereignis verworfen");
        }
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Empfangsseite; haelt selbst nur eine schwache Referenz auf den Sender,
/// damit die Sitzung endet, sobald alle Adapter weg sind.
#[derive(Debug)]
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    weak: mpsc::WeakUnboundedSender<SessionEvent>,
}

impl SessionEvents {
    /// Wartet auf das naechste Ereignis; `None` wenn kein Adapter mehr lebt
    pub async fn naechstes(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    fn handle(&self) -> Option<SessionHandle> {
        self.weak.upgrade().map(|tx| SessionHandle { tx })
    }
}

/// Erstellt die Ereigniswarteschlange einer neuen Sitzung
pub fn kanal() -> (SessionHandle, SessionEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    let weak = tx.downgrade();
    (SessionHandle { tx }, SessionEvents { rx, weak })
}

// ---------------------------------------------------------------------------
// Dienste
// ---------------------------------------------------------------------------

/// Prozessweit geteilte Dienste, die jede Sitzung braucht
#[derive(Clone)]
pub struct BridgeDienste {
    pub connector: Arc<dyn VoiceConnector>,
    pub codecs: Arc<dyn CodecFabrik>,
}

// ---------------------------------------------------------------------------
// SessionBridge
// ---------------------------------------------------------------------------

/// Besitzt den kompletten Zustand einer Browser-Sitzung
pub struct SessionBridge {
    id: String,
    zustand: BridgeZustand,
    browser: BrowserSeite,
    dienste: BridgeDienste,
    events: SessionEvents,

    client_ready: bool,
    data_channel_offen: bool,

    voice_aufbau: Option<JoinHandle<()>>,
    voice_leser: Option<JoinHandle<()>>,
    voice_tx: Option<mpsc::UnboundedSender<Bytes>>,

    reassembler: FrameReassembler,
    aggregator: OutboundAudioAggregator,
    sprecher: HashMap<u64, SpeakerTrack>,
}

impl SessionBridge {
    pub fn neu(
        id: impl Into<String>,
        browser: BrowserSeite,
        dienste: BridgeDienste,
        events: SessionEvents,
    ) -> BridgeResult<Self> {
        let encoder = dienste.codecs.encoder(UPLOAD_FRAME_SAMPLES)?;

        Ok(Self {
            id: id.into(),
            zustand: BridgeZustand::Connecting,
            browser,
            dienste,
            events,
            client_ready: false,
            data_channel_offen: false,
            voice_aufbau: None,
            voice_leser: None,
            voice_tx: None,
            reassembler: FrameReassembler::neu(),
            aggregator: OutboundAudioAggregator::neu(encoder),
            sprecher: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zustand(&self) -> BridgeZustand {
        self.zustand
    }

    /// Anzahl bekannter Sprecher
    pub fn sprecher_anzahl(&self) -> usize {
        self.sprecher.len()
    }

    /// Verarbeitet Ereignisse bis die Sitzung geschlossen ist
    pub async fn starten(mut self) {
        let span = tracing::info_span!("sitzung", id = %self.id);
        async move {
            debug!("Sitzung gestartet");
            while self.zustand != BridgeZustand::Closed {
                match self.events.naechstes().await {
                    Some(ereignis) => self.verarbeiten(ereignis),
                    None => self.herunterfahren("alle Adapter getrennt"),
                }
            }
            debug!("Sitzung beendet");
        }
        .instrument(span)
        .await
    }

    /// Verarbeitet genau ein Ereignis
    pub fn verarbeiten(&mut self, ereignis: SessionEvent) {
        if !self.zustand.ist_aktiv() {
            trace!(ereignis = ereignis.name(), "Ereignis nach Shutdown ignoriert");
            return;
        }

        match ereignis {
            SessionEvent::ClientReady => {
                self.client_ready = true;
                if self.zustand == BridgeZustand::Connecting {
                    self.wechseln(BridgeZustand::SignalingReady);
                    // Ab hier wird nur noch auf den Datenkanal gewartet
                    self.wechseln(BridgeZustand::VoiceLinkPending);
                }
                self.voice_link_pruefen();
            }
            SessionEvent::DataChannelOpen => {
                debug!("Datenkanal offen");
                self.data_channel_offen = true;
                self.voice_link_pruefen();
            }
            SessionEvent::DataChannelNachricht(daten) => self.an_murmur(daten),
            SessionEvent::BrowserAudio(samples) => self.browser_audio(&samples),
            SessionEvent::VoiceVerbunden(stream) => self.voice_verbunden(stream),
            SessionEvent::VoiceDaten(chunk) => self.voice_daten(&chunk),
            SessionEvent::VoiceGeschlossen => self.herunterfahren("Murmur-Socket geschlossen"),
            SessionEvent::VoiceFehler(e) => {
                debug!(fehler = %e, "Fehler auf dem Murmur-Socket");
                self.herunterfahren("Murmur-Socket-Fehler");
            }
            SessionEvent::DataChannelGeschlossen => self.herunterfahren("Datenkanal geschlossen"),
            SessionEvent::DataChannelFehler(e) => {
                debug!(fehler = %e, "Fehler auf dem Datenkanal");
                self.herunterfahren("Datenkanal-Fehler");
            }
            SessionEvent::SignalingGeschlossen => self.herunterfahren("WebSocket geschlossen"),
            SessionEvent::PeerFehler(e) => {
                debug!(fehler = %e, "Peer-Verbindung verloren");
                self.herunterfahren("Peer-Verbindung verloren");
            }
        }
    }

    fn wechseln(&mut self, ziel: BridgeZustand) {
        if self.zustand.erlaubt(ziel) {
            debug!(von = %self.zustand, nach = %ziel, "Zustandswechsel");
            self.zustand = ziel;
        } else {
            warn!(von = %self.zustand, nach = %ziel, "Ungueltiger Zustandswechsel ignoriert");
        }
    }

    // -----------------------------------------------------------------------
    // Voice-Link
    // -----------------------------------------------------------------------

    /// Oeffnet die Murmur-Verbindung sobald Browser und Datenkanal bereit sind
    fn voice_link_pruefen(&mut self) {
        if !(self.client_ready && self.data_channel_offen) {
            return;
        }
        if self.zustand != BridgeZustand::VoiceLinkPending || self.voice_aufbau.is_some() {
            return;
        }
        let Some(handle) = self.events.handle() else {
            return;
        };

        debug!("Murmur-Verbindung wird aufgebaut");
        let connector = Arc::clone(&self.dienste.connector);
        self.voice_aufbau = Some(tokio::spawn(
            async move {
                match connector.verbinden().await {
                    Ok(stream) => handle.melden(SessionEvent::VoiceVerbunden(stream)),
                    Err(e) => handle.melden(SessionEvent::VoiceFehler(e.to_string())),
                }
            }
            .instrument(Span::current()),
        ));
    }

    fn voice_verbunden(&mut self, stream: VoiceStream) {
        let Some(handle) = self.events.handle() else {
            return;
        };

        let (mut leser, mut schreiber) = tokio::io::split(stream);
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        // Schreiber: Fire-and-forget, Half-Close sobald der Sender wegfaellt
        let schreib_handle = handle.clone();
        tokio::spawn(
            async move {
                while let Some(daten) = rx.recv().await {
                    if let Err(e) = schreiber.write_all(&daten).await {
                        schreib_handle.melden(SessionEvent::VoiceFehler(e.to_string()));
                        return;
                    }
                }
                if let Err(e) = schreiber.shutdown().await {
                    trace!(fehler = %e, "Half-Close fehlgeschlagen");
                }
            }
            .instrument(Span::current()),
        );

        self.voice_leser = Some(tokio::spawn(
            async move {
                let mut puffer = BytesMut::with_capacity(LESE_PUFFER);
                loop {
                    puffer.reserve(LESE_PUFFER);
                    match leser.read_buf(&mut puffer).await {
                        Ok(0) => {
                            handle.melden(SessionEvent::VoiceGeschlossen);
                            break;
                        }
                        Ok(_) => handle.melden(SessionEvent::VoiceDaten(puffer.split().freeze())),
                        Err(e) => {
                            handle.melden(SessionEvent::VoiceFehler(e.to_string()));
                            break;
                        }
                    }
                }
            }
            .instrument(Span::current()),
        ));

        self.voice_tx = Some(tx);
        self.wechseln(BridgeZustand::VoiceLinkOpen);
        self.browser.signaling.send(ServerNachricht::Start);
    }

    /// Browser -> Murmur, unveraendert
    fn an_murmur(&mut self, daten: Bytes) {
        match &self.voice_tx {
            Some(tx) => {
                if let Err(e) = tx.send(daten) {
                    trace!(laenge = e.0.len(), "Murmur-Schreiber beendet, Nachricht verworfen");
                }
            }
            None => debug!("Datenkanal-Nachricht vor Murmur-Verbindung verworfen"),
        }
    }

    // -----------------------------------------------------------------------
    // Audio
    // -----------------------------------------------------------------------

    fn browser_audio(&mut self, samples: &[i16]) {
        // Ohne Murmur-Verbindung zaehlt auch die Sequenz nicht weiter
        if self.voice_tx.is_none() {
            return;
        }

        match self.aggregator.push(samples) {
            Ok(Some(frame)) => {
                if let Some(Err(e)) = self.voice_tx.as_ref().map(|tx| tx.send(frame)) {
                    trace!(laenge = e.0.len(), "Murmur-Schreiber beendet, Audio verworfen");
                }
            }
            Ok(None) => {}
            Err(e) => self.fehler_behandeln(e.into(), "Browser-Audio verworfen"),
        }
    }

    fn voice_daten(&mut self, chunk: &[u8]) {
        let teile = match self.reassembler.push(chunk) {
            Ok(teile) => teile,
            Err(e) => {
                self.fehler_behandeln(e.into(), "Murmur-Strom nicht lesbar");
                return;
            }
        };

        // Erst alle neuen Sprecher anlegen und melden, dann dekodieren
        let mut audio = Vec::new();
        for teil in teile {
            if !self.zustand.ist_aktiv() {
                return;
            }
            match teil {
                Reassembled::Durchreichen(daten) => self.browser.data_channel.send(daten),
                Reassembled::Audio(frame) => match AudioTunnelMessage::decode(&frame.payload) {
                    Ok(nachricht) => {
                        if self.sprecher_sicherstellen(nachricht.speaker_session) {
                            audio.push(nachricht);
                        }
                    }
                    Err(e) => self.fehler_behandeln(e.into(), "Audio-Frame verworfen"),
                },
            }
        }

        for nachricht in audio {
            if !self.zustand.ist_aktiv() {
                return;
            }
            let Some(sprecher) = self.sprecher.get_mut(&nachricht.speaker_session) else {
                continue;
            };
            match sprecher.audio_empfangen(&nachricht.opus) {
                Ok(()) => {}
                Err(AudioError::PufferVoll) => {
                    debug!(sprecher = nachricht.speaker_session, "Alle Puffer voll")
                }
                Err(e) => self.fehler_behandeln(e.into(), "Opus-Paket verworfen"),
            }
        }
    }

    /// Fatale Fehler beenden die Sitzung, alle anderen kosten nur das Paket
    fn fehler_behandeln(&mut self, fehler: BridgeError, kontext: &str) {
        if fehler.ist_fatal() {
            warn!(fehler = %fehler, kontext, "Sitzung wird wegen Fehler beendet");
            self.herunterfahren(kontext);
        } else {
            debug!(fehler = %fehler, kontext);
        }
    }

    /// Legt bei Bedarf Track, Decoder und Takt fuer einen Sprecher an
    fn sprecher_sicherstellen(&mut self, session_id: u64) -> bool {
        if self.sprecher.contains_key(&session_id) {
            return true;
        }

        let decoder = match self.dienste.codecs.decoder() {
            Ok(d) => d,
            Err(e) => {
                warn!(sprecher = session_id, fehler = %e, "Decoder nicht erstellbar");
                return false;
            }
        };
        let track = match self.browser.peer.add_audio_track() {
            Ok(t) => t,
            Err(e) => {
                warn!(sprecher = session_id, fehler = %e, "Track nicht erstellbar");
                return false;
            }
        };

        let track_id = track.id();
        debug!(sprecher = session_id, track = %track_id, "Neuer Sprecher");
        self.browser.signaling.send(ServerNachricht::User {
            session_id,
            track_id,
        });
        self.sprecher
            .insert(session_id, SpeakerTrack::starten(session_id, track, decoder));
        true
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Baut die Sitzung ab; nur der erste Aufruf hat eine Wirkung
    pub fn herunterfahren(&mut self, grund: &str) {
        if !self.zustand.ist_aktiv() {
            return;
        }
        self.wechseln(BridgeZustand::ShuttingDown);
        debug!(grund, "Sitzung wird beendet");

        if let Some(aufbau) = self.voice_aufbau.take() {
            aufbau.abort();
        }
        if let Some(leser) = self.voice_leser.take() {
            leser.abort();
        }
        // Schreiber macht den Half-Close, sobald sein Sender wegfaellt
        self.voice_tx = None;

        self.browser.signaling.close();
        self.browser.data_channel.close();
        self.browser.peer.close();

        for (_, sprecher) in self.sprecher.drain() {
            sprecher.stoppen();
            trace!(
                sprecher = sprecher.session_id(),
                track = %sprecher.track_id(),
                "Takt gestoppt"
            );
        }

        self.wechseln(BridgeZustand::Closed);
    }
}
