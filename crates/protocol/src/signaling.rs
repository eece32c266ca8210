//! JSON-Nachrichten auf dem Browser-WebSocket
//!
//! Alle Nachrichten tragen ein `type`-Feld als Diskriminator.

use serde::{Deserialize, Serialize};

use crate::error::ProtocolResult;

/// ICE-Kandidat wie ihn `RTCIceCandidate.toJSON()` im Browser liefert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceKandidat {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

/// Gateway -> Browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerNachricht {
    /// Sprachverbindung zum Murmur-Server steht
    Start,
    /// Neuer Sprecher: welcher Track gehoert zu welcher Murmur-Session
    User {
        #[serde(rename = "sessionId")]
        session_id: u64,
        #[serde(rename = "trackId")]
        track_id: String,
    },
    Offer { sdp: String },
    Answer { sdp: String },
    Ice(IceKandidat),
}

/// Browser -> Gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientNachricht {
    /// Browser meldet ICE/DTLS abgeschlossen
    Ready,
    Offer { sdp: String },
    Answer { sdp: String },
    Ice(IceKandidat),
}

impl ServerNachricht {
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ClientNachricht {
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProtocolError;

    #[test]
    fn start_und_user_format() {
        assert_eq!(ServerNachricht::Start.to_json().unwrap(), r#"{"type":"start"}"#);

        let user = ServerNachricht::User {
            session_id: 5,
            track_id: "speaker-5".into(),
        };
        let wert: serde_json::Value = serde_json::from_str(&user.to_json().unwrap()).unwrap();
        assert_eq!(wert["type"], "user");
        assert_eq!(wert["sessionId"], 5);
        assert_eq!(wert["trackId"], "speaker-5");
    }

    #[test]
    fn ice_kandidat_felder() {
        let msg = ClientNachricht::from_json(
            r#"{"type":"ice","candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        match msg {
            ClientNachricht::Ice(k) => {
                assert_eq!(k.sdp_mid.as_deref(), Some("0"));
                assert_eq!(k.sdp_mline_index, Some(0));
            }
            andere => panic!("Ice erwartet, erhalten: {andere:?}"),
        }
    }

    #[test]
    fn ready_und_answer_parsen() {
        assert_eq!(
            ClientNachricht::from_json(r#"{"type":"ready"}"#).unwrap(),
            ClientNachricht::Ready
        );
        assert_eq!(
            ClientNachricht::from_json(r#"{"type":"answer","sdp":"v=0"}"#).unwrap(),
            ClientNachricht::Answer { sdp: "v=0".into() }
        );
    }

    #[test]
    fn unbekannter_typ_ist_json_fehler() {
        assert!(matches!(
            ClientNachricht::from_json(r#"{"type":"tanzen"}"#),
            Err(ProtocolError::Json(_))
        ));
    }
}
