//! Ende-zu-Ende ueber den echten Listener: TLS, WebSocket, erstes Offer

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use murmurgate_protocol::ServerNachricht;
use murmurgate_server::{config::ServerConfig, tls, Server};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

struct TestGateway {
    adresse: std::net::SocketAddr,
    connector: TlsConnector,
}

impl TestGateway {
    async fn starten() -> Self {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let acceptor =
            tls::acceptor_aus_pem(&cert.cert.pem(), &cert.key_pair.serialize_pem()).unwrap();

        let mut config = ServerConfig::default();
        config.rtc.ice_server.clear();
        // Wird in diesen Tests nie erreicht
        config.murmur.host = "127.0.0.1".into();
        config.murmur.port = 9;

        let server = Server::mit_acceptor(config, acceptor).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let adresse = listener.local_addr().unwrap();
        tokio::spawn(server.annehmen(listener));

        let mut wurzeln = rustls::RootCertStore::empty();
        wurzeln.add(cert.cert.der().clone()).unwrap();
        let client_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(wurzeln)
        .with_no_client_auth();

        Self {
            adresse,
            connector: TlsConnector::from(Arc::new(client_config)),
        }
    }

    async fn tls_verbinden(&self) -> TlsStream<TcpStream> {
        let tcp = TcpStream::connect(self.adresse).await.unwrap();
        self.connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn browser_bekommt_offer_nach_handshake() {
    let gateway = TestGateway::starten().await;
    let tls = gateway.tls_verbinden().await;
    let (mut ws, _) = tokio_tungstenite::client_async("ws://localhost/", tls)
        .await
        .unwrap();

    let nachricht = timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("kein Offer erhalten")
        .unwrap()
        .unwrap();
    let offer: ServerNachricht = serde_json::from_str(nachricht.to_text().unwrap()).unwrap();
    match offer {
        ServerNachricht::Offer { sdp } => {
            assert!(sdp.contains("m=audio"));
            assert!(sdp.contains("m=application"));
        }
        andere => panic!("Offer erwartet, erhalten: {andere:?}"),
    }

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn http_anfrage_wird_nicht_beantwortet() {
    let gateway = TestGateway::starten().await;
    let mut tls = gateway.tls_verbinden().await;

    tls.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();

    // Verbindung wird geschlossen, ohne dass ein WebSocket entsteht
    let mut rest = Vec::new();
    let ergebnis = timeout(Duration::from_secs(5), tls.read_to_end(&mut rest)).await;
    assert!(ergebnis.is_ok(), "Verbindung blieb offen");
    assert!(!String::from_utf8_lossy(&rest).contains("101 Switching Protocols"));
}
