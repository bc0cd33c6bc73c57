//! Client-Directory – Registry aller authentifizierten Verbindungen
//!
//! Die Schluesselmenge des Directory entspricht zu jedem Zeitpunkt exakt
//! der Menge der aktuell authentifizierten, lebenden Verbindungen: ein
//! Eintrag entsteht erst nach erfolgreicher Authentifizierung und
//! verschwindet beim Ende des zugehoerigen Handler-Tasks – bei einem
//! Absturz durch den Monitor-Task, nie nur durch Handler-Code.

use dashmap::DashMap;
use palaver_core::ClientId;
use palaver_protocol::ChatMessage;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::RelayError;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer verbundenen Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub id: ClientId,
    pub tx: mpsc::Sender<ChatMessage>,
}

impl ClientSender {
    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    /// Ein langsamer oder toter Peer blockiert damit nie den Aufrufer.
    pub fn senden(&self, nachricht: ChatMessage) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    client = %self.id,
                    ereignis = "send_failure",
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    client = %self.id,
                    ereignis = "send_failure",
                    "Send-Queue geschlossen (Client getrennt)"
                );
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ClientRecord
// ---------------------------------------------------------------------------

/// Metadaten einer authentifizierten Verbindung
#[derive(Clone, Debug)]
pub struct ClientRecord {
    /// IP-Adresse der Gegenseite
    pub remote_ip: String,
    /// Anzeigename; startet als IP und wird aus dem `sender`-Feld
    /// weitergeleiteter Nachrichten aktualisiert
    pub display_name: String,
    /// Send-Queue der Verbindung (Router -> Schreib-Task)
    pub sender: ClientSender,
}

// ---------------------------------------------------------------------------
// ClientDirectory
// ---------------------------------------------------------------------------

/// Registry aller authentifizierten Verbindungen
///
/// Die einzige von mehreren Tasks mutierte Ressource des Relays. Saemtliche
/// Mutation laeuft durch diese eine Komponente; Clone teilt den inneren
/// Zustand (Arc + DashMap).
#[derive(Clone, Default)]
pub struct ClientDirectory {
    inner: Arc<DashMap<ClientId, ClientRecord>>,
}

impl ClientDirectory {
    /// Erstellt ein leeres Directory
    pub fn neu() -> Self {
        Self::default()
    }

    /// Registriert eine authentifizierte Verbindung
    ///
    /// Schlaegt mit [`RelayError::BereitsRegistriert`] fehl wenn die ID
    /// schon vorhanden ist; ein Handle wird hoechstens einmal registriert.
    pub fn registrieren(
        &self,
        id: ClientId,
        remote_ip: impl Into<String>,
        tx: mpsc::Sender<ChatMessage>,
    ) -> Result<(), RelayError> {
        let remote_ip = remote_ip.into();
        match self.inner.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RelayError::BereitsRegistriert(id)),
            dashmap::mapref::entry::Entry::Vacant(eintrag) => {
                eintrag.insert(ClientRecord {
                    display_name: remote_ip.clone(),
                    remote_ip,
                    sender: ClientSender { id, tx },
                });
                tracing::debug!(client = %id, "Client im Directory registriert");
                Ok(())
            }
        }
    }

    /// Entfernt eine Verbindung – idempotent, No-op falls nicht vorhanden
    pub fn entfernen(&self, id: &ClientId) {
        if self.inner.remove(id).is_some() {
            tracing::debug!(client = %id, "Client aus Directory entfernt");
        }
    }

    /// Konsistente Punkt-in-Zeit-Sicht aller Eintraege
    ///
    /// Sortiert nach ClientId, damit ein Fan-out-Durchlauf eine
    /// deterministische Sequenz abarbeitet (DashMap-Iterationsreihenfolge
    /// ist unspezifiziert).
    pub fn schnappschuss(&self) -> Vec<(ClientId, ClientRecord)> {
        let mut eintraege: Vec<_> = self
            .inner
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        eintraege.sort_by_key(|(id, _)| *id);
        eintraege
    }

    /// Liefert eine Kopie des Eintrags zu einer ID
    pub fn eintrag(&self, id: &ClientId) -> Option<ClientRecord> {
        self.inner.get(id).map(|e| e.value().clone())
    }

    /// Aktualisiert den Anzeigenamen eines Eintrags (No-op falls abwesend)
    pub fn namen_aktualisieren(&self, id: &ClientId, name: &str) {
        if let Some(mut eintrag) = self.inner.get_mut(id) {
            if eintrag.display_name != name {
                eintrag.display_name = name.to_string();
            }
        }
    }

    /// Anzahl der registrierten Verbindungen
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }

    /// Prueft ob eine ID registriert ist
    pub fn ist_registriert(&self, id: &ClientId) -> bool {
        self.inner.contains_key(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
