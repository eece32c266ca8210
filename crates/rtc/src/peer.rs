//! WebRTC-Peer zum Browser
//!
//! Das Gateway ist die anbietende Seite: es legt Datenkanal und einen
//! Empfangs-Transceiver fuer das Mikrofon an, schickt das erste Offer
//! und verhandelt bei jedem neuen Sprecher-Track neu. Es laeuft immer
//! hoechstens eine Verhandlung; die naechste beginnt erst nach der
//! Antwort des Browsers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use murmurgate_audio::{CodecFabrik, PcmDecoder, PcmEncoder, ABTASTRATE, FRAME_SAMPLES};
use murmurgate_bridge::{
    BridgeResult, DataChannel, OutboundTrack, PeerConnection, SessionEvent, SessionHandle,
    SignalingSink,
};
use murmurgate_protocol::{IceKandidat, ServerNachricht};
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::RtcResult;

/// Label des Datenkanals, den der Browser-Client erwartet
pub const DATENKANAL_LABEL: &str = "dataChannel";

/// Dauer eines ausgehenden Opus-Samples
const FRAME_DAUER: Duration = Duration::from_millis(10);

/// Einstellungen fuer neue Peer-Verbindungen
#[derive(Debug, Clone, Default)]
pub struct RtcKonfig {
    /// STUN/TURN-URLs
    pub ice_server: Vec<String>,
}

/// Opus mono 48 kHz, wie der Browser es fuer Sprache aushandelt
fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: ABTASTRATE,
        channels: 1,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_owned(),
        rtcp_feedback: vec![],
    }
}

// ---------------------------------------------------------------------------
// SDP-Partner
// ---------------------------------------------------------------------------

/// Was der Signaling-Leser mit Browser-Nachrichten anstellt
#[async_trait]
pub trait SdpPartner: Send + Sync {
    /// Antwort des Browsers auf unser Offer
    async fn antwort_setzen(&self, sdp: String) -> RtcResult<()>;

    /// Offer des Browsers beantworten
    async fn angebot_beantworten(&self, sdp: String) -> RtcResult<()>;

    async fn kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> RtcResult<()>;
}

// ---------------------------------------------------------------------------
// RtcPeer
// ---------------------------------------------------------------------------

/// Offer/Answer-Zustand, geteilt mit den Neuverhandlungs-Tasks
struct Verhandlung {
    pc: Arc<RTCPeerConnection>,
    signaling: Arc<dyn SignalingSink>,
    sperre: Arc<tokio::sync::Mutex<()>>,
    /// Gehalten von Offer bis Antwort
    offen: Mutex<Option<OwnedMutexGuard<()>>>,
    /// ICE-Kandidaten vor der ersten Beschreibung; `None` sobald sie raus ist
    wartende_kandidaten: Mutex<Option<Vec<IceKandidat>>>,
}

impl Verhandlung {
    async fn angebot_senden(&self, sperre: OwnedMutexGuard<()>) -> RtcResult<()> {
        let angebot = self.pc.create_offer(None).await?;
        self.pc.set_local_description(angebot.clone()).await?;

        *self.offen.lock() = Some(sperre);
        self.signaling.send(ServerNachricht::Offer { sdp: angebot.sdp });
        self.kandidaten_freigeben();
        debug!("Offer gesendet");
        Ok(())
    }

    /// Der Browser kann Kandidaten erst nach Offer/Answer zuordnen
    fn kandidat_weiterleiten(&self, kandidat: IceKandidat) {
        if let Some(wartend) = self.wartende_kandidaten.lock().as_mut() {
            wartend.push(kandidat);
            return;
        }
        self.signaling.send(ServerNachricht::Ice(kandidat));
    }

    fn kandidaten_freigeben(&self) {
        let wartend = self.wartende_kandidaten.lock().take();
        for kandidat in wartend.into_iter().flatten() {
            self.signaling.send(ServerNachricht::Ice(kandidat));
        }
    }

    /// Haengt einen lokalen Track an und verhandelt neu
    async fn track_anhaengen(&self, track: Arc<TrackLocalStaticSample>) -> RtcResult<()> {
        let sperre = self.sperre.clone().lock_owned().await;

        let sender = self
            .pc
            .add_track(track as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP lesen, sonst laufen die Interceptors nicht
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = sender.read(&mut rtcp_buf).await {}
        });

        self.angebot_senden(sperre).await
    }
}

/// Peer-Verbindung einer Sitzung
pub struct RtcPeer {
    verhandlung: Arc<Verhandlung>,
    codecs: Arc<dyn CodecFabrik>,
    stream_id: String,
    track_zaehler: AtomicU32,
}

impl RtcPeer {
    /// Baut Peer-Verbindung und Datenkanal auf und verdrahtet alle
    /// Callbacks mit der Sitzung
    pub async fn aufbauen(
        konfig: &RtcKonfig,
        sitzung_id: &str,
        handle: SessionHandle,
        signaling: Arc<dyn SignalingSink>,
        codecs: Arc<dyn CodecFabrik>,
    ) -> RtcResult<(Arc<Self>, Arc<RtcDataChannel>)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if konfig.ice_server.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: konfig.ice_server.clone(),
                ..Default::default()
            }]
        };

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await?,
        );

        // Mikrofon des Browsers
        pc.add_transceiver_from_kind(
            RTPCodecType::Audio,
            Some(RTCRtpTransceiverInit {
                direction: RTCRtpTransceiverDirection::Recvonly,
                send_encodings: vec![],
            }),
        )
        .await?;

        let dc = pc.create_data_channel(DATENKANAL_LABEL, None).await?;
        datenkanal_verdrahten(&dc, &handle);

        let verhandlung = Arc::new(Verhandlung {
            pc: pc.clone(),
            signaling,
            sperre: Arc::new(tokio::sync::Mutex::new(())),
            offen: Mutex::new(None),
            wartende_kandidaten: Mutex::new(Some(Vec::new())),
        });
        peer_verdrahten(&pc, &handle, Arc::downgrade(&verhandlung), codecs.clone());

        let peer = Arc::new(Self {
            verhandlung,
            codecs,
            stream_id: format!("murmurgate-{sitzung_id}"),
            track_zaehler: AtomicU32::new(0),
        });

        Ok((peer, Arc::new(RtcDataChannel::starten(dc))))
    }

    /// Schickt das erste Offer an den Browser
    pub async fn verhandlung_starten(&self) -> RtcResult<()> {
        let sperre = self.verhandlung.sperre.clone().lock_owned().await;
        self.verhandlung.angebot_senden(sperre).await
    }
}

#[async_trait]
impl SdpPartner for RtcPeer {
    async fn antwort_setzen(&self, sdp: String) -> RtcResult<()> {
        let antwort = RTCSessionDescription::answer(sdp)?;
        let ergebnis = self.verhandlung.pc.set_remote_description(antwort).await;

        // Naechste Verhandlung freigeben, auch wenn die Antwort kaputt war
        self.verhandlung.offen.lock().take();
        ergebnis?;
        debug!("Antwort gesetzt");
        Ok(())
    }

    async fn angebot_beantworten(&self, sdp: String) -> RtcResult<()> {
        // Nicht warten: die Antwort auf unser Offer kommt ueber denselben Leser
        let Ok(_sperre) = self.verhandlung.sperre.try_lock() else {
            warn!("Offer vom Browser waehrend eigener Verhandlung, ignoriert");
            return Ok(());
        };
        let pc = &self.verhandlung.pc;

        let angebot = RTCSessionDescription::offer(sdp)?;
        pc.set_remote_description(angebot).await?;

        let antwort = pc.create_answer(None).await?;
        pc.set_local_description(antwort.clone()).await?;
        self.verhandlung
            .signaling
            .send(ServerNachricht::Answer { sdp: antwort.sdp });
        self.verhandlung.kandidaten_freigeben();
        Ok(())
    }

    async fn kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> RtcResult<()> {
        self.verhandlung
            .pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: kandidat.candidate,
                sdp_mid: kandidat.sdp_mid,
                sdp_mline_index: kandidat.sdp_mline_index,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}

impl PeerConnection for RtcPeer {
    fn add_audio_track(&self) -> BridgeResult<Arc<dyn OutboundTrack>> {
        let nummer = self.track_zaehler.fetch_add(1, Ordering::Relaxed);
        let id = format!("speaker-{nummer}");

        let encoder = self.codecs.encoder(FRAME_SAMPLES)?;
        let lokal = Arc::new(TrackLocalStaticSample::new(
            opus_capability(),
            id.clone(),
            self.stream_id.clone(),
        ));

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(track_kodieren(lokal.clone(), encoder, rx));

        let verhandlung = self.verhandlung.clone();
        let track_id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = verhandlung.track_anhaengen(lokal).await {
                warn!(track = %track_id, fehler = %e, "Neuverhandlung fehlgeschlagen");
            }
        });

        Ok(Arc::new(RtcTrack { id, tx }))
    }

    fn close(&self) {
        self.verhandlung.offen.lock().take();
        let pc = self.verhandlung.pc.clone();
        tokio::spawn(async move {
            if let Err(e) = pc.close().await {
                debug!(fehler = %e, "Peer-Verbindung schliessen fehlgeschlagen");
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

fn peer_verdrahten(
    pc: &RTCPeerConnection,
    handle: &SessionHandle,
    verhandlung: Weak<Verhandlung>,
    codecs: Arc<dyn CodecFabrik>,
) {
    let h = handle.clone();
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            debug!(mime = %track.codec().capability.mime_type, "Browser-Track empfangen");
            match codecs.decoder() {
                Ok(decoder) => {
                    tokio::spawn(mikrofon_lesen(track, decoder, h.clone()));
                }
                Err(e) => warn!(fehler = %e, "Kein Decoder fuer Browser-Track"),
            }
            Box::pin(async {})
        },
    ));

    let h = handle.clone();
    pc.on_peer_connection_state_change(Box::new(move |zustand: RTCPeerConnectionState| {
        debug!(%zustand, "Peer-Zustand");
        if matches!(
            zustand,
            RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
        ) {
            h.melden(SessionEvent::PeerFehler(zustand.to_string()));
        }
        Box::pin(async {})
    }));

    pc.on_ice_candidate(Box::new(move |kandidat: Option<RTCIceCandidate>| {
        if let (Some(k), Some(verhandlung)) = (kandidat, verhandlung.upgrade()) {
            match k.to_json() {
                Ok(json) => verhandlung.kandidat_weiterleiten(IceKandidat {
                    candidate: json.candidate,
                    sdp_mid: json.sdp_mid,
                    sdp_mline_index: json.sdp_mline_index,
                }),
                Err(e) => debug!(fehler = %e, "ICE-Kandidat nicht serialisierbar"),
            }
        }
        Box::pin(async {})
    }));
}

fn datenkanal_verdrahten(dc: &RTCDataChannel, handle: &SessionHandle) {
    let h = handle.clone();
    dc.on_open(Box::new(move || {
        h.melden(SessionEvent::DataChannelOpen);
        Box::pin(async {})
    }));

    let h = handle.clone();
    dc.on_message(Box::new(move |nachricht: DataChannelMessage| {
        h.melden(SessionEvent::DataChannelNachricht(nachricht.data));
        Box::pin(async {})
    }));

    let h = handle.clone();
    dc.on_close(Box::new(move || {
        h.melden(SessionEvent::DataChannelGeschlossen);
        Box::pin(async {})
    }));

    let h = handle.clone();
    dc.on_error(Box::new(move |e: webrtc::Error| {
        h.melden(SessionEvent::DataChannelFehler(e.to_string()));
        Box::pin(async {})
    }));
}

/// Dekodiert das Browser-Mikrofon und meldet es in Haeppchen zu
/// hoechstens 480 Samples
async fn mikrofon_lesen(
    track: Arc<TrackRemote>,
    mut decoder: Box<dyn PcmDecoder>,
    handle: SessionHandle,
) {
    while !handle.ist_geschlossen() {
        let (paket, _) = match track.read_rtp().await {
            Ok(p) => p,
            Err(e) => {
                debug!(fehler = %e, "Browser-Track beendet");
                break;
            }
        };
        if paket.payload.is_empty() {
            continue;
        }

        match decoder.decode(&paket.payload) {
            Ok(pcm) => {
                for stueck in pcm.chunks(FRAME_SAMPLES) {
                    handle.melden(SessionEvent::BrowserAudio(stueck.to_vec()));
                }
            }
            Err(e) => trace!(fehler = %e, "Browser-Paket nicht dekodierbar"),
        }
    }
}

// ---------------------------------------------------------------------------
// Ausgehende Tracks
// ---------------------------------------------------------------------------

/// Track eines entfernten Sprechers
pub struct RtcTrack {
    id: String,
    tx: mpsc::UnboundedSender<[i16; FRAME_SAMPLES]>,
}

impl OutboundTrack for RtcTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn push_pcm(&self, pcm: &[i16; FRAME_SAMPLES]) {
        if self.tx.send(*pcm).is_err() {
            trace!(track = %self.id, "Encoder beendet, Frame verworfen");
        }
    }
}

/// Kodiert getaktetes PCM zu 10-ms-Opus und schreibt es in den Track.
/// Endet, sobald der `RtcTrack` fallengelassen wird.
async fn track_kodieren(
    track: Arc<TrackLocalStaticSample>,
    mut encoder: Box<dyn PcmEncoder>,
    mut rx: mpsc::UnboundedReceiver<[i16; FRAME_SAMPLES]>,
) {
    while let Some(pcm) = rx.recv().await {
        let opus = match encoder.encode(&pcm) {
            Ok(o) => o,
            Err(e) => {
                trace!(fehler = %e, "Sprecher-Frame nicht kodierbar");
                continue;
            }
        };

        let sample = Sample {
            data: Bytes::from(opus),
            duration: FRAME_DAUER,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            trace!(fehler = %e, "Sample nicht geschrieben");
        }
    }
    trace!(track = %track.id(), "Sprecher-Track beendet");
}

// ---------------------------------------------------------------------------
// Datenkanal
// ---------------------------------------------------------------------------

/// Datenkanal mit eigener Sende-Warteschlange
///
/// Ein Writer-Task sendet in Reihenfolge. `close` schliesst den Kanal
/// erst, nachdem alles Eingereihte raus ist.
pub struct RtcDataChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl RtcDataChannel {
    fn starten(dc: Arc<RTCDataChannel>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        tokio::spawn(async move {
            while let Some(daten) = rx.recv().await {
                if let Err(e) = dc.send(&daten).await {
                    debug!(fehler = %e, "Datenkanal: Senden fehlgeschlagen");
                    break;
                }
            }
            if let Err(e) = dc.close().await {
                debug!(fehler = %e, "Datenkanal schliessen fehlgeschlagen");
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl DataChannel for RtcDataChannel {
    fn send(&self, daten: Bytes) {
        match self.tx.lock().as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(daten) {
                    trace!(laenge = e.0.len(), "Datenkanal-Writer beendet, Nachricht verworfen");
                }
            }
            None => trace!("Datenkanal bereits geschlossen"),
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmurgate_audio::{AudioResult, CodecFabrik};

    struct StummCodec;

    impl PcmEncoder for StummCodec {
        fn encode(&mut self, _pcm: &[i16]) -> AudioResult<Vec<u8>> {
            Ok(vec![0xF8, 0xFF, 0xFE])
        }

        fn frame_samples(&self) -> usize {
            FRAME_SAMPLES
        }
    }

    impl PcmDecoder for StummCodec {
        fn decode(&mut self, _opus: &[u8]) -> AudioResult<Vec<i16>> {
            Ok(vec![0; 960])
        }
    }

    struct StummFabrik;

    impl CodecFabrik for StummFabrik {
        fn encoder(&self, _frame_samples: usize) -> AudioResult<Box<dyn PcmEncoder>> {
            Ok(Box::new(StummCodec))
        }

        fn decoder(&self) -> AudioResult<Box<dyn PcmDecoder>> {
            Ok(Box::new(StummCodec))
        }
    }

    #[derive(Default)]
    struct Mitschrift {
        nachrichten: Mutex<Vec<ServerNachricht>>,
    }

    impl SignalingSink for Mitschrift {
        fn send(&self, nachricht: ServerNachricht) {
            self.nachrichten.lock().push(nachricht);
        }

        fn close(&self) {}
    }

    impl Mitschrift {
        fn offers(&self) -> Vec<String> {
            self.nachrichten
                .lock()
                .iter()
                .filter_map(|n| match n {
                    ServerNachricht::Offer { sdp } => Some(sdp.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    async fn peer_bauen() -> (Arc<RtcPeer>, Arc<Mitschrift>, murmurgate_bridge::SessionEvents) {
        let (handle, events) = murmurgate_bridge::kanal();
        let mitschrift = Arc::new(Mitschrift::default());
        let (peer, _dc) = RtcPeer::aufbauen(
            &RtcKonfig::default(),
            "4FBF",
            handle,
            mitschrift.clone(),
            Arc::new(StummFabrik),
        )
        .await
        .unwrap();
        (peer, mitschrift, events)
    }

    async fn warten_auf_offers(mitschrift: &Mitschrift, anzahl: usize) -> Vec<String> {
        for _ in 0..200 {
            let offers = mitschrift.offers();
            if offers.len() >= anzahl {
                return offers;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("keine {anzahl} Offers erhalten");
    }

    #[test]
    fn opus_mono_48k() {
        let cap = opus_capability();
        assert_eq!(cap.mime_type, "audio/opus");
        assert_eq!(cap.clock_rate, 48_000);
        assert_eq!(cap.channels, 1);
    }

    #[tokio::test]
    async fn erstes_offer_enthaelt_audio_und_datenkanal() {
        let (peer, mitschrift, _events) = peer_bauen().await;
        peer.verhandlung_starten().await.unwrap();

        let offers = mitschrift.offers();
        assert_eq!(offers.len(), 1);
        assert!(offers[0].contains("m=audio"));
        assert!(offers[0].contains("m=application"));
        peer.close();
    }

    #[tokio::test]
    async fn neuer_track_loest_neues_offer_aus() {
        let (peer, mitschrift, _events) = peer_bauen().await;

        let track = peer.add_audio_track().unwrap();
        assert_eq!(track.id(), "speaker-0");
        let zweiter = peer.add_audio_track().unwrap();
        assert_eq!(zweiter.id(), "speaker-1");

        // Zweites Offer erst nach der Antwort auf das erste
        let offers = warten_auf_offers(&mitschrift, 1).await;
        assert!(offers[0].contains("speaker-0"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mitschrift.offers().len(), 1);

        track.push_pcm(&[0; FRAME_SAMPLES]);
        peer.close();
    }

    #[test]
    fn push_pcm_nach_encoder_ende_verwirft_frame() {
        let (tx, rx) = mpsc::unbounded_channel();
        let track = RtcTrack {
            id: "speaker-3".into(),
            tx,
        };
        drop(rx);

        track.push_pcm(&[0; FRAME_SAMPLES]);
        assert!(track.tx.is_closed());
    }

    #[tokio::test]
    async fn browser_offer_waehrend_track_anhaengen_wird_ignoriert() {
        let (peer, mitschrift, _events) = peer_bauen().await;

        // Wie `track_anhaengen` zwischen Sperre und gesendetem Offer
        let sperre = peer.verhandlung.sperre.clone().lock_owned().await;
        assert!(peer.verhandlung.offen.lock().is_none());

        tokio::time::timeout(
            Duration::from_secs(1),
            peer.angebot_beantworten("v=0".into()),
        )
        .await
        .expect("Offer des Browsers blockiert den Signaling-Leser")
        .unwrap();
        assert!(mitschrift.nachrichten.lock().is_empty());

        // Nach der Verhandlung laeuft das naechste Offer normal
        drop(sperre);
        peer.verhandlung_starten().await.unwrap();
        assert_eq!(mitschrift.offers().len(), 1);
        peer.close();
    }
}
