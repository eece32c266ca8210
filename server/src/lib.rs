//! murmurgate-server – Bibliotheks-Root
//!
//! Nimmt Browser-WebSockets (TLS) an und startet pro Verbindung eine
//! `SessionBridge` samt WebRTC-Peer.

pub mod config;
pub mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use murmurgate_audio::OpusFabrik;
use murmurgate_bridge::{
    kanal, naechste_session_id, BridgeDienste, BrowserSeite, PeerConnection, SessionBridge,
    SessionEvent, SignalingSink, TlsVoiceConnector,
};
use murmurgate_rtc::{signaling_lesen, RtcKonfig, RtcPeer, WsSignaling};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::WebSocketStream;

use config::ServerConfig;

/// Haelt den laufenden Gateway-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
    acceptor: TlsAcceptor,
    dienste: BridgeDienste,
    rtc: RtcKonfig,
}

impl Server {
    /// Erstellt das Gateway; Zertifikat und Schluessel kommen aus der Konfiguration
    pub fn neu(config: ServerConfig) -> Result<Self> {
        let acceptor =
            tls::acceptor_laden(&config.signaling.tls_zertifikat, &config.signaling.tls_schluessel)?;
        Self::mit_acceptor(config, acceptor)
    }

    pub fn mit_acceptor(config: ServerConfig, acceptor: TlsAcceptor) -> Result<Self> {
        let connector = TlsVoiceConnector::neu(
            config.murmur.host.clone(),
            config.murmur.port,
            config.murmur.zertifikat_pruefen,
        )?;
        let codecs = OpusFabrik {
            bitrate_kbps: config.audio.bitrate_kbps,
            komplexitaet: config.audio.komplexitaet,
        };
        let rtc = RtcKonfig {
            ice_server: config.rtc.ice_server.clone(),
        };

        Ok(Self {
            config,
            acceptor,
            dienste: BridgeDienste {
                connector: Arc::new(connector),
                codecs: Arc::new(codecs),
            },
            rtc,
        })
    }

    /// Lauscht auf dem Signaling-Port bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.signaling_bind_adresse()).await?;
        tracing::info!(
            adresse = %self.config.signaling_bind_adresse(),
            murmur = %format!("{}:{}", self.config.murmur.host, self.config.murmur.port),
            "WebSocket-Signaling lauscht"
        );

        tokio::select! {
            ergebnis = self.annehmen(listener) => ergebnis,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown-Signal empfangen, Gateway wird beendet");
                Ok(())
            }
        }
    }

    /// Accept-Schleife auf einem bereits gebundenen Listener
    pub async fn annehmen(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(fehler = %e, "TCP_NODELAY nicht gesetzt");
            }

            let acceptor = self.acceptor.clone();
            let dienste = self.dienste.clone();
            let rtc = self.rtc.clone();

            tokio::spawn(async move {
                verbindung_behandeln(stream, peer_addr, acceptor, dienste, rtc).await;
            });
        }
    }
}

/// TLS- und WebSocket-Handshake, danach eine Sitzung
async fn verbindung_behandeln(
    stream: TcpStream,
    peer_addr: SocketAddr,
    acceptor: TlsAcceptor,
    dienste: BridgeDienste,
    rtc: RtcKonfig,
) {
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(peer = %peer_addr, fehler = %e, "TLS-Handshake fehlgeschlagen");
            return;
        }
    };

    // Nur WebSocket-Upgrades werden beantwortet
    let ws = match tokio_tungstenite::accept_async(tls_stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(
                peer = %peer_addr,
                fehler = %e,
                "HTTP-Anfrage ohne WebSocket-Upgrade auf dem Signaling-Port"
            );
            return;
        }
    };

    tracing::debug!(peer = %peer_addr, "Neue Browser-Verbindung");
    sitzung_betreiben(ws, dienste, rtc).await;
}

/// Baut Peer, Signaling und Bridge einer Verbindung auf und laeuft, bis
/// der WebSocket zu ist und die Sitzung beendet wurde
pub async fn sitzung_betreiben<S>(ws: WebSocketStream<S>, dienste: BridgeDienste, rtc: RtcKonfig)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let id = naechste_session_id();
    let (sink, strom) = ws.split();
    let signaling = Arc::new(WsSignaling::starten(sink));
    let (handle, events) = kanal();

    let (peer, data_channel) = match RtcPeer::aufbauen(
        &rtc,
        &id,
        handle.clone(),
        signaling.clone(),
        dienste.codecs.clone(),
    )
    .await
    {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(sitzung = %id, fehler = %e, "Peer-Verbindung nicht aufgebaut");
            signaling.close();
            return;
        }
    };

    let browser = BrowserSeite {
        peer: peer.clone(),
        data_channel,
        signaling: signaling.clone(),
    };
    let bridge = match SessionBridge::neu(id.clone(), browser, dienste, events) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(sitzung = %id, fehler = %e, "Sitzung nicht erstellt");
            peer.close();
            signaling.close();
            return;
        }
    };
    let sitzung = tokio::spawn(bridge.starten());

    if let Err(e) = peer.verhandlung_starten().await {
        handle.melden(SessionEvent::PeerFehler(e.to_string()));
    }

    signaling_lesen(strom, peer.as_ref(), &handle).await;
    drop(handle);

    // Panik in der Sitzung bleibt auf diese Verbindung beschraenkt
    if let Err(e) = sitzung.await {
        tracing::error!(sitzung = %id, fehler = %e, "Sitzungs-Task abgebrochen");
    }
}
