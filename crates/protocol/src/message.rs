//! Chat-Nachrichten
//!
//! Alle Nachrichten die ueber die TLS-Verbindung ausgetauscht werden.
//! Das `type`-Feld im JSON bestimmt die Variante; unbekannte Felder
//! werden beim Dekodieren ignoriert (Vorwaertskompatibilitaet).

use serde::{Deserialize, Serialize};

/// Eine Nachricht des Chat-Protokolls
///
/// ## Wire-Beispiele
/// ```json
/// {"type":"auth","password":"geheim"}
/// {"type":"auth_result","success":false,"error":"Invalid password"}
/// {"type":"message","content":"hi","sender":"A","sender_ip":"10.0.0.1"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatMessage {
    /// Authentifizierungs-Anfrage (Client -> Server, erste Nachricht)
    Auth {
        /// Server-Passwort im Klartext – wird serverseitig gehasht verglichen
        password: String,
    },
    /// Ergebnis der Authentifizierung (Server -> Client)
    AuthResult {
        success: bool,
        /// Fehlerbeschreibung, nur bei `success == false` gesetzt
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Chat-Nachricht
    ///
    /// Client -> Server ohne `sender_ip`; der Server ergaenzt das Feld
    /// vor dem Rebroadcast an alle anderen Clients.
    Message {
        content: String,
        sender: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_ip: Option<String>,
    },
}

impl ChatMessage {
    /// Erstellt eine Auth-Anfrage
    pub fn auth(password: impl Into<String>) -> Self {
        Self::Auth {
            password: password.into(),
        }
    }

    /// Erstellt ein erfolgreiches Auth-Ergebnis
    pub fn auth_ok() -> Self {
        Self::AuthResult {
            success: true,
            error: None,
        }
    }

    /// Erstellt ein fehlgeschlagenes Auth-Ergebnis
    pub fn auth_abgelehnt(grund: impl Into<String>) -> Self {
        Self::AuthResult {
            success: false,
            error: Some(grund.into()),
        }
    }

    /// Erstellt eine Chat-Nachricht ohne Absender-IP (Client-Seite)
    pub fn nachricht(content: impl Into<String>, sender: impl Into<String>) -> Self {
        Self::Message {
            content: content.into(),
            sender: sender.into(),
            sender_ip: None,
        }
    }
}
