//! TLS fuer den Signaling-Listener

use std::sync::Arc;

use anyhow::{Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

/// Baut den Acceptor aus PEM-Dateien
pub fn acceptor_laden(zertifikat_pfad: &str, schluessel_pfad: &str) -> Result<TlsAcceptor> {
    let zertifikat = std::fs::read_to_string(zertifikat_pfad)
        .with_context(|| format!("Zertifikat '{zertifikat_pfad}' nicht lesbar"))?;
    let schluessel = std::fs::read_to_string(schluessel_pfad)
        .with_context(|| format!("Schluessel '{schluessel_pfad}' nicht lesbar"))?;
    acceptor_aus_pem(&zertifikat, &schluessel)
}

pub fn acceptor_aus_pem(zertifikat_pem: &str, schluessel_pem: &str) -> Result<TlsAcceptor> {
    let kette = parse_certificates(zertifikat_pem)?;
    let schluessel = parse_private_key(schluessel_pem)?;

    let tls_config =
        ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .context("TLS-Protokollversionen")?
            .with_no_client_auth()
            .with_single_cert(kette, schluessel)
            .context("Zertifikat und Schluessel passen nicht")?;

    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}

fn parse_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    let kette = certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .context("Zertifikat-Parsing fehlgeschlagen")?;
    if kette.is_empty() {
        anyhow::bail!("Kein Zertifikat gefunden");
    }
    Ok(kette)
}

fn parse_private_key(pem: &str) -> Result<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    private_key(&mut cursor)
        .context("Schluessel-Parsing fehlgeschlagen")?
        .ok_or_else(|| anyhow::anyhow!("Kein privater Schluessel gefunden"))
}
