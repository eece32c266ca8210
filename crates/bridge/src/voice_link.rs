//! Verbindung zum Murmur-Server
//!
//! Pro Browser-Sitzung genau ein TLS-Socket. Murmur-Server verwenden
//! ueblicherweise selbstsignierte Zertifikate; die Pruefung ist daher
//! abschaltbar.

use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{BridgeError, BridgeResult};

/// Bidirektionaler Bytestrom zum Murmur-Server
pub trait VoiceIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> VoiceIo for T {}

pub type VoiceStream = Box<dyn VoiceIo>;

/// Baut die Verbindung zum Murmur-Server auf
#[async_trait]
pub trait VoiceConnector: Send + Sync {
    async fn verbinden(&self) -> BridgeResult<VoiceStream>;
}

// ---------------------------------------------------------------------------
// TlsVoiceConnector
// ---------------------------------------------------------------------------

/// TLS-Verbindung ueber tokio-rustls
pub struct TlsVoiceConnector {
    host: String,
    port: u16,
    connector: TlsConnector,
}

impl TlsVoiceConnector {
    pub fn neu(host: impl Into<String>, port: u16, zertifikat_pruefen: bool) -> BridgeResult<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| BridgeError::Tls(e.to_string()))?;

        let tls_config = if zertifikat_pruefen {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(JedesZertifikat))
                .with_no_client_auth()
        };

        Ok(Self {
            host: host.into(),
            port,
            connector: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    pub fn adresse(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for TlsVoiceConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsVoiceConnector")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[async_trait]
impl VoiceConnector for TlsVoiceConnector {
    async fn verbinden(&self) -> BridgeResult<VoiceStream> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        tcp.set_nodelay(true)?;

        let name = ServerName::try_from(self.host.clone())
            .map_err(|e| BridgeError::Tls(format!("Ungueltiger Hostname {}: {}", self.host, e)))?;
        let tls = self.connector.connect(name, tcp).await?;

        tracing::debug!(adresse = %self.adresse(), "Murmur-Verbindung hergestellt");
        Ok(Box::new(tls))
    }
}

/// Akzeptiert jedes Server-Zertifikat
#[derive(Debug)]
struct JedesZertifikat;

impl ServerCertVerifier for JedesZertifikat {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_mit_und_ohne_pruefung() {
        let c = TlsVoiceConnector::neu("murmur.example.org", 64738, false).unwrap();
        assert_eq!(c.adresse(), "murmur.example.org:64738");
        assert!(TlsVoiceConnector::neu("murmur.example.org", 64738, true).is_ok());
        assert!(format!("{c:?}").contains("TlsVoiceConnector"));
    }

    #[tokio::test]
    async fn verbindung_abgelehnt_ist_fatal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let c = TlsVoiceConnector::neu("127.0.0.1", port, false).unwrap();
        let fehler = match c.verbinden().await {
            Ok(_) => panic!("Verbindung sollte fehlschlagen"),
            Err(e) => e,
        };
        assert!(fehler.ist_fatal());
    }
}
