//! Gateway-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! Standardwerte, sodass das Gateway ohne Konfigurationsdatei laeuft.

use serde::{Deserialize, Serialize};

/// Vollstaendige Gateway-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// WebSocket-Signaling fuer Browser
    pub signaling: SignalingEinstellungen,
    /// Ziel-Murmur-Server
    pub murmur: MurmurEinstellungen,
    /// Opus-Encoder
    pub audio: AudioEinstellungen,
    pub rtc: RtcEinstellungen,
    pub logging: LoggingEinstellungen,
}

/// WebSocket-Listener (immer TLS)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingEinstellungen {
    pub bind_adresse: String,
    pub port: u16,
    /// PEM-Zertifikatskette
    pub tls_zertifikat: String,
    /// PEM-Schluessel
    pub tls_schluessel: String,
}

impl Default for SignalingEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            port: 8136,
            tls_zertifikat: "cert.pem".into(),
            tls_schluessel: "key.pem".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MurmurEinstellungen {
    pub host: String,
    pub port: u16,
    /// Zertifikat des Murmur-Servers gegen die Web-PKI pruefen.
    /// Murmur-Server nutzen meist selbstsignierte Zertifikate.
    pub zertifikat_pruefen: bool,
}

impl Default for MurmurEinstellungen {
    fn default() -> Self {
        Self {
            host: "default.mumble.prod.hearo.live".into(),
            port: 64738,
            zertifikat_pruefen: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    /// Bitrate in kbit/s (6–510)
    pub bitrate_kbps: u32,
    /// Encoder-Komplexitaet (0–10)
    pub komplexitaet: u8,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            bitrate_kbps: 40,
            komplexitaet: 9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcEinstellungen {
    /// STUN/TURN-URLs fuer ICE
    pub ice_server: Vec<String>,
}

impl Default for RtcEinstellungen {
    fn default() -> Self {
        Self {
            ice_server: vec!["stun:stun.l.google.com:19302".into()],
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: "trace", "debug", "info", "warn", "error"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config: Self = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => toml::from_str(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Prueft Wertebereiche
    pub fn validieren(&self) -> anyhow::Result<()> {
        if self.signaling.port == 0 {
            anyhow::bail!("signaling.port darf nicht 0 sein");
        }
        if self.murmur.port == 0 {
            anyhow::bail!("murmur.port darf nicht 0 sein");
        }
        if self.murmur.host.trim().is_empty() {
            anyhow::bail!("murmur.host ist leer");
        }
        if !(6..=510).contains(&self.audio.bitrate_kbps) {
            anyhow::bail!(
                "audio.bitrate_kbps {} ausserhalb 6–510",
                self.audio.bitrate_kbps
            );
        }
        if self.audio.komplexitaet > 10 {
            anyhow::bail!("audio.komplexitaet {} groesser als 10", self.audio.komplexitaet);
        }
        Ok(())
    }

    /// Bind-Adresse des Signaling-Listeners
    pub fn signaling_bind_adresse(&self) -> String {
        format!("{}:{}", self.signaling.bind_adresse, self.signaling.port)
    }
}
