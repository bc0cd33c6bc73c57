//! Client-Connection – Verwaltet eine einzelne TLS-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Die State Machine verwaltet den Verbindungszustand.
//!
//! ## State Machine
//! ```text
//! Verbunden -> Authentifizierung -> Authentifiziert -> Geschlossen
//!                  |                     |
//!                  +------ Abschluss ----+
//! ```
//!
//! Fehlgeschlagene Authentifizierung und Socket-Fehler werden nie
//! wiederholt – beide beenden die Verbindung bedingungslos. Der Handler
//! liefert einen expliziten [`VerbindungsAbschluss`] zurueck; der
//! Monitor-Task im Acceptor reagiert einheitlich darauf.
//!
//! Geschrieben wird ausschliesslich durch einen eigenen Schreib-Task, der
//! die Send-Queue der Verbindung entleert. So kann der Router nebenlaeufig
//! zum Lese-Loop dieser Verbindung einreihen.

use std::net::SocketAddr;
use std::sync::Arc;

use palaver_auth::SharedSecret;
use palaver_core::ClientId;
use palaver_protocol::{read_frame, write_frame, ChatMessage, WireError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::directory::ClientDirectory;
use crate::router::RouterHandle;

/// Groesse der Send-Queue pro Verbindung
const SEND_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Zustand und Abschluss
// ---------------------------------------------------------------------------

/// Zustand der Verbindung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    /// TLS-Handshake abgeschlossen, noch keine Nachricht gelesen
    Verbunden,
    /// Erste Nachricht wird gelesen und geprueft
    Authentifizierung,
    /// Erfolgreich authentifiziert, Nachrichten-Loop laeuft
    Authentifiziert,
    /// Terminal – Verbindung beendet
    Geschlossen,
}

/// Expliziter terminaler Ausgang eines Verbindungs-Handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsAbschluss {
    /// Gegenseite hat die Verbindung geschlossen
    ClientGetrennt,
    /// Transportfehler beim Lesen oder Schreiben
    TransportFehler,
    /// Protokollverstoss: zu grosser Frame, ungueltiges JSON oder
    /// falscher Nachrichtentyp fuer den aktuellen Zustand
    Protokollverstoss,
    /// Falsches Passwort – Client wurde einmalig benachrichtigt
    AuthAbgelehnt,
    /// Interner Fehler (Hashing, Router weg)
    InternerFehler,
}

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne Verbindung
///
/// Generisch ueber den Stream, damit Tests die State Machine ueber
/// `tokio::io::duplex` ohne TLS treiben koennen.
pub struct ClientConnection {
    id: ClientId,
    peer_addr: SocketAddr,
    directory: ClientDirectory,
    router: RouterHandle,
    secret: Arc<SharedSecret>,
    zustand: VerbindungsZustand,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection im Zustand `Verbunden`
    pub fn neu(
        peer_addr: SocketAddr,
        directory: ClientDirectory,
        router: RouterHandle,
        secret: Arc<SharedSecret>,
    ) -> Self {
        Self {
            id: ClientId::new(),
            peer_addr,
            directory,
            router,
            secret,
            zustand: VerbindungsZustand::Verbunden,
        }
    }

    /// Das Verbindungs-Handle
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Aktueller Zustand der Verbindung
    pub fn zustand(&self) -> VerbindungsZustand {
        self.zustand
    }

    /// Treibt die Verbindung bis zum terminalen Zustand
    ///
    /// Raeumt den eigenen Directory-Eintrag beim Ende selbst auf; der
    /// Monitor-Task wiederholt das idempotent, damit die Entfernung auch
    /// bei einem Panic garantiert ist.
    pub async fn verarbeiten<S>(mut self, stream: S) -> VerbindungsAbschluss
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut leser, schreiber) = tokio::io::split(stream);

        // Send-Queue: Router und Handler reihen ein, der Schreib-Task
        // entleert und schreibt Frames auf die TLS-Verbindung
        let (sende_tx, sende_rx) = mpsc::channel::<ChatMessage>(SEND_QUEUE_GROESSE);
        let schreib_task = tokio::spawn(schreib_schleife(schreiber, sende_rx, self.id));

        let abschluss = self.schleife(&mut leser, &sende_tx).await;

        self.zustand = VerbindungsZustand::Geschlossen;
        self.directory.entfernen(&self.id);

        // Queue schliessen: der Schreib-Task entleert verbliebene
        // Nachrichten (z.B. das letzte auth_result) und beendet sich
        drop(sende_tx);
        let _ = schreib_task.await;

        abschluss
    }

    /// Authentifizierung und anschliessender Nachrichten-Loop
    async fn schleife<R>(
        &mut self,
        leser: &mut R,
        sende_tx: &mpsc::Sender<ChatMessage>,
    ) -> VerbindungsAbschluss
    where
        R: AsyncRead + Unpin,
    {
        // --- Authentifizierung: genau eine Nachricht -------------------
        self.zustand = VerbindungsZustand::Authentifizierung;

        let passwort = match read_frame(leser).await {
            Ok(ChatMessage::Auth { password }) => password,
            Ok(_andere) => {
                // Falscher Typ vor der Authentifizierung: Verbindung
                // beenden, keine strukturierte Antwort
                tracing::debug!(
                    client = %self.id,
                    peer = %self.peer_addr,
                    "Nachricht vor Authentifizierung – Verbindung wird beendet"
                );
                return VerbindungsAbschluss::Protokollverstoss;
            }
            Err(e) => return self.lesefehler(e),
        };

        match self.secret.pruefen(&passwort) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    client = %self.id,
                    peer = %self.peer_addr,
                    ereignis = "auth_failure",
                    "Authentifizierung abgelehnt"
                );
                let _ = sende_tx
                    .send(ChatMessage::auth_abgelehnt("Invalid password"))
                    .await;
                return VerbindungsAbschluss::AuthAbgelehnt;
            }
            Err(e) => {
                tracing::error!(client = %self.id, fehler = %e, "Passwortpruefung fehlgeschlagen");
                return VerbindungsAbschluss::InternerFehler;
            }
        }

        // Erst registrieren, dann bestaetigen: sobald der Client das
        // auth_result sieht, ist er garantiert im Directory
        if let Err(e) =
            self.directory
                .registrieren(self.id, self.peer_addr.ip().to_string(), sende_tx.clone())
        {
            tracing::error!(client = %self.id, fehler = %e, "Registrierung fehlgeschlagen");
            return VerbindungsAbschluss::InternerFehler;
        }
        if sende_tx.send(ChatMessage::auth_ok()).await.is_err() {
            return VerbindungsAbschluss::TransportFehler;
        }

        self.zustand = VerbindungsZustand::Authentifiziert;
        tracing::info!(
            client = %self.id,
            peer = %self.peer_addr,
            ereignis = "auth_success",
            "Client authentifiziert"
        );

        // --- Nachrichten-Loop ------------------------------------------
        loop {
            match read_frame(leser).await {
                Ok(ChatMessage::Message {
                    content, sender, ..
                }) => {
                    // Eingehendes sender_ip wird ignoriert; der Router
                    // setzt es aus den Directory-Metadaten
                    if self
                        .router
                        .weiterleiten(self.id, content, sender)
                        .await
                        .is_err()
                    {
                        tracing::error!(client = %self.id, "Router nicht erreichbar");
                        return VerbindungsAbschluss::InternerFehler;
                    }
                }
                Ok(_andere) => {
                    tracing::debug!(
                        client = %self.id,
                        "Unerwarteter Nachrichtentyp im authentifizierten Zustand"
                    );
                    return VerbindungsAbschluss::Protokollverstoss;
                }
                Err(e) => return self.lesefehler(e),
            }
        }
    }

    /// Klassifiziert einen Lesefehler in einen terminalen Ausgang
    fn lesefehler(&self, fehler: WireError) -> VerbindungsAbschluss {
        if fehler.ist_protokollverstoss() {
            tracing::warn!(
                client = %self.id,
                peer = %self.peer_addr,
                fehler = %fehler,
                "Protokollverstoss – Verbindung wird beendet"
            );
            return VerbindungsAbschluss::Protokollverstoss;
        }
        match fehler {
            WireError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                tracing::debug!(client = %self.id, peer = %self.peer_addr, "Verbindung vom Client getrennt");
                VerbindungsAbschluss::ClientGetrennt
            }
            _ => {
                tracing::warn!(client = %self.id, peer = %self.peer_addr, fehler = %fehler, "Lesefehler");
                VerbindungsAbschluss::TransportFehler
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Schreib-Task
// ---------------------------------------------------------------------------

/// Entleert die Send-Queue und schreibt Frames auf die Verbindung
///
/// Beendet sich wenn die Queue geschlossen ist (alle Sender weg) oder
/// ein Schreibfehler auftritt. Ein Schreibfehler hier betrifft nur diese
/// eine Verbindung; der Lese-Loop bemerkt den Abbruch von selbst.
async fn schreib_schleife<W>(
    mut schreiber: W,
    mut sende_rx: mpsc::Receiver<ChatMessage>,
    id: ClientId,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(nachricht) = sende_rx.recv().await {
        if let Err(e) = write_frame(&mut schreiber, &nachricht).await {
            tracing::warn!(
                client = %id,
                ereignis = "send_failure",
                fehler = %e,
                "Senden fehlgeschlagen"
            );
            break;
        }
    }
    let _ = schreiber.shutdown().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::BroadcastRouter;
    use std::time::Duration;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    struct TestUmgebung {
        directory: ClientDirectory,
        router_handle: RouterHandle,
        secret: Arc<SharedSecret>,
    }

    fn testumgebung() -> TestUmgebung {
        let directory = ClientDirectory::neu();
        let (router, router_handle) = BroadcastRouter::neu(directory.clone());
        tokio::spawn(router.starten());
        TestUmgebung {
            directory,
            router_handle,
            secret: Arc::new(SharedSecret::aus_passwort("korrekt").unwrap()),
        }
    }

    fn verbindung(umgebung: &TestUmgebung) -> ClientConnection {
        ClientConnection::neu(
            test_addr(),
            umgebung.directory.clone(),
            umgebung.router_handle.clone(),
            Arc::clone(&umgebung.secret),
        )
    }

    #[tokio::test]
    async fn neue_verbindung_startet_im_zustand_verbunden() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);
        assert_eq!(conn.zustand(), VerbindungsZustand::Verbunden);
    }

    #[tokio::test]
    async fn erfolgreiche_authentifizierung() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);
        let id = conn.id();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(conn.verarbeiten(server));

        let (mut client_leser, mut client_schreiber) = tokio::io::split(client);
        write_frame(&mut client_schreiber, &ChatMessage::auth("korrekt"))
            .await
            .unwrap();

        let antwort = read_frame(&mut client_leser).await.unwrap();
        assert_eq!(antwort, ChatMessage::auth_ok());
        assert!(umgebung.directory.ist_registriert(&id));

        // Client trennt; Handler endet mit ClientGetrennt
        drop(client_schreiber);
        drop(client_leser);
        let abschluss = handler.await.unwrap();
        assert_eq!(abschluss, VerbindungsAbschluss::ClientGetrennt);
        assert!(!umgebung.directory.ist_registriert(&id));
    }

    #[tokio::test]
    async fn falsches_passwort_wird_einmalig_beantwortet() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);
        let id = conn.id();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(conn.verarbeiten(server));

        let (mut client_leser, mut client_schreiber) = tokio::io::split(client);
        write_frame(&mut client_schreiber, &ChatMessage::auth("falsch"))
            .await
            .unwrap();

        let antwort = read_frame(&mut client_leser).await.unwrap();
        assert_eq!(
            antwort,
            ChatMessage::auth_abgelehnt("Invalid password")
        );

        // Danach schliesst der Server die Verbindung
        let result = read_frame(&mut client_leser).await;
        assert!(result.is_err(), "Verbindung muss geschlossen sein");

        let abschluss = handler.await.unwrap();
        assert_eq!(abschluss, VerbindungsAbschluss::AuthAbgelehnt);
        assert!(!umgebung.directory.ist_registriert(&id));
    }

    #[tokio::test]
    async fn nachricht_vor_auth_beendet_ohne_antwort() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);

        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(conn.verarbeiten(server));

        let (mut client_leser, mut client_schreiber) = tokio::io::split(client);
        write_frame(&mut client_schreiber, &ChatMessage::nachricht("hi", "A"))
            .await
            .unwrap();

        let abschluss = handler.await.unwrap();
        assert_eq!(abschluss, VerbindungsAbschluss::Protokollverstoss);

        // Keine strukturierte Antwort, nur EOF
        let result = read_frame(&mut client_leser).await;
        assert!(result.is_err());
        assert_eq!(umgebung.directory.anzahl(), 0);
    }

    #[tokio::test]
    async fn auth_nach_auth_ist_protokollverstoss() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);
        let id = conn.id();

        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(conn.verarbeiten(server));

        let (mut client_leser, mut client_schreiber) = tokio::io::split(client);
        write_frame(&mut client_schreiber, &ChatMessage::auth("korrekt"))
            .await
            .unwrap();
        read_frame(&mut client_leser).await.unwrap();

        // Zweites auth im authentifizierten Zustand
        write_frame(&mut client_schreiber, &ChatMessage::auth("korrekt"))
            .await
            .unwrap();

        let abschluss = handler.await.unwrap();
        assert_eq!(abschluss, VerbindungsAbschluss::Protokollverstoss);
        assert!(!umgebung.directory.ist_registriert(&id));
    }

    #[tokio::test]
    async fn ungueltiges_json_ist_protokollverstoss() {
        let umgebung = testumgebung();
        let conn = verbindung(&umgebung);

        let (client, server) = tokio::io::duplex(64 * 1024);
        let handler = tokio::spawn(conn.verarbeiten(server));

        // Frame mit gueltiger Laenge aber kaputter Payload
        let (_client_leser, mut client_schreiber) = tokio::io::split(client);
        let payload = b"definitiv kein json";
        client_schreiber
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await
            .unwrap();
        client_schreiber.write_all(payload).await.unwrap();

        let abschluss = handler.await.unwrap();
        assert_eq!(abschluss, VerbindungsAbschluss::Protokollverstoss);
    }

    #[tokio::test]
    async fn nachrichten_werden_an_den_router_weitergeleitet() {
        let umgebung = testumgebung();

        // Einen Empfaenger direkt im Directory registrieren
        let empfaenger = ClientId::new();
        let (empf_tx, mut empf_rx) = mpsc::channel(8);
        umgebung
            .directory
            .registrieren(empfaenger, "10.0.0.99", empf_tx)
            .unwrap();

        let conn = verbindung(&umgebung);
        let (client, server) = tokio::io::duplex(64 * 1024);
        let _handler = tokio::spawn(conn.verarbeiten(server));

        let (mut client_leser, mut client_schreiber) = tokio::io::split(client);
        write_frame(&mut client_schreiber, &ChatMessage::auth("korrekt"))
            .await
            .unwrap();
        read_frame(&mut client_leser).await.unwrap();

        write_frame(&mut client_schreiber, &ChatMessage::nachricht("hallo", "A"))
            .await
            .unwrap();

        let empfangen = tokio::time::timeout(Duration::from_secs(5), empf_rx.recv())
            .await
            .expect("Broadcast muss ankommen")
            .unwrap();
        assert_eq!(
            empfangen,
            ChatMessage::Message {
                content: "hallo".into(),
                sender: "A".into(),
                sender_ip: Some("127.0.0.1".into()),
            }
        );
    }
}
