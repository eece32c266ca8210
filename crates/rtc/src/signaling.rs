//! WebSocket-Signaling zum Browser
//!
//! Schreibseite: eine Warteschlange plus Writer-Task, damit die Sitzung
//! synchron senden kann. Leseseite: `signaling_lesen` laeuft im
//! Verbindungs-Task und reicht SDP/ICE an den Peer weiter.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use murmurgate_bridge::{SessionEvent, SessionHandle, SignalingSink};
use murmurgate_protocol::{ClientNachricht, ServerNachricht};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, trace, warn};

use crate::error::RtcResult;
use crate::peer::SdpPartner;

/// Sendeseite des Browser-WebSockets
pub struct WsSignaling {
    tx: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl WsSignaling {
    /// Startet den Writer-Task auf der Sendehaelfte des WebSockets
    pub fn starten<S>(mut sink: S) -> Self
    where
        S: Sink<Message, Error = WsError> + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(nachricht) = rx.recv().await {
                if let Err(e) = sink.send(nachricht).await {
                    debug!(fehler = %e, "WebSocket: Senden fehlgeschlagen");
                    break;
                }
            }
            // Close-Frame, dann Verbindung schliessen
            if let Err(e) = sink.close().await {
                trace!(fehler = %e, "WebSocket bereits geschlossen");
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
        }
    }
}

impl SignalingSink for WsSignaling {
    fn send(&self, nachricht: ServerNachricht) {
        let json = match nachricht.to_json() {
            Ok(j) => j,
            Err(e) => {
                warn!(fehler = %e, "Signaling-Nachricht nicht serialisierbar");
                return;
            }
        };

        match self.tx.lock().as_ref() {
            Some(tx) => {
                if let Err(e) = tx.send(Message::Text(json.into())) {
                    trace!(nachricht = ?e.0, "WebSocket-Writer beendet, Nachricht verworfen");
                }
            }
            None => trace!("WebSocket bereits geschlossen, Nachricht verworfen"),
        }
    }

    fn close(&self) {
        self.tx.lock().take();
    }
}

/// Liest Browser-Nachrichten bis der WebSocket zu ist
///
/// `ready` wird als `ClientReady` an die Sitzung gemeldet, SDP und ICE
/// gehen an den Peer. Am Ende steht immer `SignalingGeschlossen`.
pub async fn signaling_lesen<S, P>(mut strom: S, partner: &P, handle: &SessionHandle)
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
    P: SdpPartner + ?Sized,
{
    while let Some(nachricht) = strom.next().await {
        let text = match nachricht {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Binary(daten)) => {
                debug!(laenge = daten.len(), "Binaere Signaling-Nachricht ignoriert");
                continue;
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(fehler = %e, "WebSocket-Fehler");
                break;
            }
        };

        if let Err(e) = nachricht_verarbeiten(text.as_str(), partner, handle).await {
            warn!(fehler = %e, "Signaling-Nachricht nicht verarbeitet");
        }
    }

    debug!("Signaling-Verbindung beendet");
    handle.melden(SessionEvent::SignalingGeschlossen);
}

async fn nachricht_verarbeiten<P>(text: &str, partner: &P, handle: &SessionHandle) -> RtcResult<()>
where
    P: SdpPartner + ?Sized,
{
    match ClientNachricht::from_json(text)? {
        ClientNachricht::Ready => {
            debug!("Client bereit");
            handle.melden(SessionEvent::ClientReady);
        }
        ClientNachricht::Answer { sdp } => partner.antwort_setzen(sdp).await?,
        ClientNachricht::Offer { sdp } => partner.angebot_beantworten(sdp).await?,
        ClientNachricht::Ice(kandidat) => partner.kandidat_hinzufuegen(kandidat).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use murmurgate_protocol::IceKandidat;
    use tokio_tungstenite::tungstenite::protocol::Role;
    use tokio_tungstenite::WebSocketStream;

    #[derive(Default)]
    struct Protokoll {
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SdpPartner for Protokoll {
        async fn antwort_setzen(&self, sdp: String) -> RtcResult<()> {
            self.log.lock().push(format!("answer:{sdp}"));
            Ok(())
        }

        async fn angebot_beantworten(&self, sdp: String) -> RtcResult<()> {
            self.log.lock().push(format!("offer:{sdp}"));
            Ok(())
        }

        async fn kandidat_hinzufuegen(&self, kandidat: IceKandidat) -> RtcResult<()> {
            self.log.lock().push(format!("ice:{}", kandidat.candidate));
            Ok(())
        }
    }

    async fn ws_paar() -> (
        WebSocketStream<tokio::io::DuplexStream>,
        WebSocketStream<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(a, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn nachrichten_kommen_als_json_an() {
        let (server, mut client) = ws_paar().await;
        let (sink, _strom) = server.split();
        let signaling = WsSignaling::starten(sink);

        signaling.send(ServerNachricht::Start);
        signaling.send(ServerNachricht::User {
            session_id: 9,
            track_id: "speaker-1".into(),
        });

        let erste = client.next().await.unwrap().unwrap();
        assert_eq!(erste.into_text().unwrap().as_str(), r#"{"type":"start"}"#);

        let zweite = client.next().await.unwrap().unwrap();
        let wert: serde_json::Value =
            serde_json::from_str(zweite.into_text().unwrap().as_str()).unwrap();
        assert_eq!(wert["type"], "user");
        assert_eq!(wert["trackId"], "speaker-1");
    }

    #[tokio::test]
    async fn close_schickt_close_frame() {
        let (server, mut client) = ws_paar().await;
        let (sink, _strom) = server.split();
        let signaling = WsSignaling::starten(sink);

        signaling.send(ServerNachricht::Start);
        signaling.close();
        // Nach close wird nichts mehr gesendet
        signaling.send(ServerNachricht::Start);

        assert!(client.next().await.unwrap().unwrap().is_text());
        assert!(client.next().await.unwrap().unwrap().is_close());
    }

    #[tokio::test]
    async fn leser_verteilt_nachrichten() {
        let (server, mut client) = ws_paar().await;
        let (_sink, strom) = server.split();
        let (handle, mut events) = murmurgate_bridge::kanal();
        let partner = Protokoll::default();

        for text in [
            r#"{"type":"answer","sdp":"v=0"}"#,
            r#"{"type":"ice","candidate":"candidate:1","sdpMid":"0","sdpMLineIndex":0}"#,
            r#"{"type":"unbekannt"}"#,
            r#"{"type":"ready"}"#,
        ] {
            client.send(Message::Text(text.into())).await.unwrap();
        }
        client.close(None).await.unwrap();

        signaling_lesen(strom, &partner, &handle).await;

        assert_eq!(
            *partner.log.lock(),
            vec!["answer:v=0".to_string(), "ice:candidate:1".to_string()]
        );
        assert!(matches!(events.naechstes().await, Some(SessionEvent::ClientReady)));
        assert!(matches!(
            events.naechstes().await,
            Some(SessionEvent::SignalingGeschlossen)
        ));
    }
}
