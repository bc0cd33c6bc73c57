//! Broadcast-Router – Serialisierter Fan-out an alle anderen Clients
//!
//! Alle eingehenden Chat-Nachrichten laufen durch genau eine Queue mit
//! genau einem Konsumenten-Task. Damit sind alle Fan-outs vollstaendig
//! serialisiert: kein Broadcast verschraenkt seine Sends mit einem
//! anderen, und jeder Durchlauf arbeitet auf einem atomar gezogenen
//! Directory-Schnappschuss statt auf einer live mutierten Struktur.

use palaver_core::ClientId;
use palaver_protocol::ChatMessage;
use tokio::sync::mpsc;

use crate::directory::ClientDirectory;
use crate::error::RelayError;

/// Groesse der Router-Queue (alle Verbindungen zusammen)
const ROUTER_QUEUE_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// Eingehende Nachricht
// ---------------------------------------------------------------------------

/// Eine vom Handler dekodierte Chat-Nachricht samt Absender-Handle
#[derive(Debug)]
struct EingehendeNachricht {
    absender: ClientId,
    content: String,
    sender_name: String,
}

// ---------------------------------------------------------------------------
// RouterHandle
// ---------------------------------------------------------------------------

/// Sende-Seite der Router-Queue, eine Kopie pro Verbindungs-Handler
#[derive(Clone)]
pub struct RouterHandle {
    tx: mpsc::Sender<EingehendeNachricht>,
}

impl RouterHandle {
    /// Reiht eine Nachricht zur Verteilung ein
    ///
    /// Wartet bei voller Queue (erhaelt so die Reihenfolge innerhalb der
    /// eigenen Verbindung). Schlaegt nur fehl wenn der Router-Task nicht
    /// mehr laeuft.
    pub async fn weiterleiten(
        &self,
        absender: ClientId,
        content: String,
        sender_name: String,
    ) -> Result<(), RelayError> {
        self.tx
            .send(EingehendeNachricht {
                absender,
                content,
                sender_name,
            })
            .await
            .map_err(|_| RelayError::RouterGeschlossen)
    }
}

// ---------------------------------------------------------------------------
// BroadcastRouter
// ---------------------------------------------------------------------------

/// Der eine Konsument der Router-Queue
pub struct BroadcastRouter {
    directory: ClientDirectory,
    rx: mpsc::Receiver<EingehendeNachricht>,
}

impl BroadcastRouter {
    /// Erstellt Router und zugehoeriges Handle
    pub fn neu(directory: ClientDirectory) -> (Self, RouterHandle) {
        let (tx, rx) = mpsc::channel(ROUTER_QUEUE_GROESSE);
        (Self { directory, rx }, RouterHandle { tx })
    }

    /// Verarbeitet Nachrichten bis alle Handles fallengelassen wurden
    ///
    /// Laeuft als eigener Task; ein Durchlauf pro Nachricht, strikt
    /// nacheinander.
    pub async fn starten(mut self) {
        while let Some(nachricht) = self.rx.recv().await {
            self.verteilen(nachricht);
        }
        tracing::debug!("Router-Task beendet");
    }

    /// Ein Fan-out-Durchlauf fuer eine Nachricht
    fn verteilen(&self, nachricht: EingehendeNachricht) {
        let EingehendeNachricht {
            absender,
            content,
            sender_name,
        } = nachricht;

        // Absender-Metadaten aufloesen. Ist der Absender schon abgemeldet
        // (Race mit dem eigenen Teardown), wird die Nachricht still verworfen.
        let Some(absender_eintrag) = self.directory.eintrag(&absender) else {
            tracing::trace!(client = %absender, "Absender nicht mehr registriert – verworfen");
            return;
        };

        // Anzeigename aus der Nachricht uebernehmen, sonst den gemerkten
        let name = if sender_name.is_empty() {
            absender_eintrag.display_name.clone()
        } else {
            self.directory.namen_aktualisieren(&absender, &sender_name);
            sender_name
        };

        let ausgehend = ChatMessage::Message {
            content,
            sender: name,
            sender_ip: Some(absender_eintrag.remote_ip.clone()),
        };

        let mut gesendet = 0usize;
        let mut fehlgeschlagen = 0usize;
        for (id, eintrag) in self.directory.schnappschuss() {
            if id == absender {
                continue;
            }
            // Einzelne Sendefehler werden toleriert; ein unerreichbarer
            // Peer blockiert nie die Zustellung an die uebrigen.
            if eintrag.sender.senden(ausgehend.clone()) {
                gesendet += 1;
            } else {
                fehlgeschlagen += 1;
            }
        }

        tracing::trace!(
            client = %absender,
            gesendet,
            fehlgeschlagen,
            "Broadcast verteilt"
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registrierter_client(
        directory: &ClientDirectory,
        ip: &str,
        kapazitaet: usize,
    ) -> (ClientId, mpsc::Receiver<ChatMessage>) {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(kapazitaet);
        directory.registrieren(id, ip, tx).unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn broadcast_erreicht_alle_ausser_absender() {
        let directory = ClientDirectory::neu();
        let (router, handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        let (a, mut rx_a) = registrierter_client(&directory, "10.0.0.1", 8);
        let (_b, mut rx_b) = registrierter_client(&directory, "10.0.0.2", 8);
        let (_c, mut rx_c) = registrierter_client(&directory, "10.0.0.3", 8);

        handle
            .weiterleiten(a, "hi".into(), "A".into())
            .await
            .unwrap();

        let erwartet = ChatMessage::Message {
            content: "hi".into(),
            sender: "A".into(),
            sender_ip: Some("10.0.0.1".into()),
        };
        assert_eq!(rx_b.recv().await.unwrap(), erwartet);
        assert_eq!(rx_c.recv().await.unwrap(), erwartet);

        // Der Absender selbst bekommt nichts
        assert!(rx_a.try_recv().is_err(), "Absender darf nichts empfangen");

        drop(handle);
        router_task.await.unwrap();
    }

    #[tokio::test]
    async fn voller_empfaenger_blockiert_die_uebrigen_nicht() {
        let directory = ClientDirectory::neu();
        let (router, handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        let (a, _rx_a) = registrierter_client(&directory, "10.0.0.1", 8);
        // B hat Kapazitaet 1 und die Queue ist bereits voll
        let (b, mut rx_b) = registrierter_client(&directory, "10.0.0.2", 1);
        directory
            .eintrag(&b)
            .unwrap()
            .sender
            .senden(ChatMessage::nachricht("stau", "X"));
        let (_c, mut rx_c) = registrierter_client(&directory, "10.0.0.3", 8);

        handle
            .weiterleiten(a, "durchkommen".into(), "A".into())
            .await
            .unwrap();

        // C empfaengt trotz vollem B
        let bei_c = rx_c.recv().await.unwrap();
        assert!(matches!(bei_c, ChatMessage::Message { content, .. } if content == "durchkommen"));

        // Bei B liegt nur die Stau-Nachricht
        assert_eq!(rx_b.recv().await.unwrap(), ChatMessage::nachricht("stau", "X"));
        assert!(rx_b.try_recv().is_err());

        drop(handle);
        router_task.await.unwrap();
    }

    #[tokio::test]
    async fn unbekannter_absender_wird_still_verworfen() {
        let directory = ClientDirectory::neu();
        let (router, handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        let (_b, mut rx_b) = registrierter_client(&directory, "10.0.0.2", 8);

        // Absender war nie registriert (bzw. bereits abgemeldet)
        handle
            .weiterleiten(ClientId::new(), "geist".into(), "G".into())
            .await
            .unwrap();

        drop(handle);
        router_task.await.unwrap();

        assert!(rx_b.try_recv().is_err(), "Nichts darf zugestellt werden");
    }

    #[tokio::test]
    async fn leerer_sender_name_faellt_auf_display_name_zurueck() {
        let directory = ClientDirectory::neu();
        let (router, handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        let (a, _rx_a) = registrierter_client(&directory, "10.0.0.1", 8);
        let (_b, mut rx_b) = registrierter_client(&directory, "10.0.0.2", 8);

        handle
            .weiterleiten(a, "ohne namen".into(), String::new())
            .await
            .unwrap();

        let empfangen = rx_b.recv().await.unwrap();
        assert!(
            matches!(empfangen, ChatMessage::Message { sender, .. } if sender == "10.0.0.1"),
            "Anzeigename muss auf die IP zurueckfallen"
        );

        drop(handle);
        router_task.await.unwrap();
    }

    #[tokio::test]
    async fn sender_name_aktualisiert_directory_eintrag() {
        let directory = ClientDirectory::neu();
        let (router, handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        let (a, _rx_a) = registrierter_client(&directory, "10.0.0.1", 8);
        let (_b, mut rx_b) = registrierter_client(&directory, "10.0.0.2", 8);

        handle
            .weiterleiten(a, "hallo".into(), "Alice".into())
            .await
            .unwrap();
        rx_b.recv().await.unwrap();

        assert_eq!(directory.eintrag(&a).unwrap().display_name, "Alice");

        drop(handle);
        router_task.await.unwrap();
    }
}
