//! TLS-Listener – Bindet Socket, akzeptiert und ueberwacht Verbindungen
//!
//! Der `RelayServer` bindet einen TCP-Socket, fuehrt pro Verbindung den
//! TLS-Handshake durch und startet fuer jede den Handler in einem eigenen
//! tokio-Task.
//!
//! ## Fehlerisolation
//! - Ein Handler-Fehler (inkl. Panic) erreicht weder den Acceptor noch
//!   andere Handler.
//! - Ein beendeter Handler wird nie neu gestartet – seine Verbindung ist
//!   weg, ein Neustart haette kein Gegenueber.
//! - Pro Verbindung laeuft ein Monitor-Task, der das Ende des Handlers
//!   (auch per `JoinError` beobachtete Panics) abwartet und den
//!   Directory-Eintrag entfernt. Die Bereinigung haengt damit nicht davon
//!   ab, dass Handler-Code seinen eigenen Aufraeumpfad erreicht.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use palaver_auth::SharedSecret;
use palaver_core::ClientId;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

use crate::connection::{ClientConnection, VerbindungsAbschluss};
use crate::directory::ClientDirectory;
use crate::router::RouterHandle;

/// Wartezeit nach einem transienten Accept-Fehler
const ACCEPT_FEHLER_PAUSE: Duration = Duration::from_millis(10);

/// Konfiguration des Relay-Servers
#[derive(Debug, Clone)]
pub struct RelayServerKonfig {
    pub bind_addr: SocketAddr,
    /// Maximale Anzahl gleichzeitig authentifizierter Clients
    pub max_clients: u32,
}

/// TLS-Relay-Server
///
/// Bindet einen TCP-Socket und akzeptiert Verbindungen in einer Loop,
/// bis `shutdown_rx` ein `true`-Signal empfaengt.
pub struct RelayServer {
    konfig: RelayServerKonfig,
    directory: ClientDirectory,
    router: RouterHandle,
    secret: Arc<SharedSecret>,
    tls: TlsAcceptor,
}

impl RelayServer {
    /// Erstellt einen neuen RelayServer
    pub fn neu(
        konfig: RelayServerKonfig,
        directory: ClientDirectory,
        router: RouterHandle,
        secret: Arc<SharedSecret>,
        tls: TlsAcceptor,
    ) -> Self {
        Self {
            konfig,
            directory,
            router,
            secret,
            tls,
        }
    }

    /// Bindet den Listener und startet die Accept-Loop
    pub async fn starten(
        self,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.konfig.bind_addr).await?;
        self.starten_auf(listener, shutdown_rx).await
    }

    /// Accept-Loop auf einem bereits gebundenen Listener
    ///
    /// Separat nutzbar wenn der Aufrufer den Port selbst waehlen will
    /// (z.B. Port 0 in Tests).
    pub async fn starten_auf(
        self,
        listener: TcpListener,
        mut shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "TLS-Relay-Server gestartet");

        loop {
            tokio::select! {
                // Neue eingehende Verbindung
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => self.verbindung_annehmen(stream, peer_addr),
                        Err(e) if ist_transient(&e) => {
                            tracing::error!(fehler = %e, "Transienter Accept-Fehler");
                            tokio::time::sleep(ACCEPT_FEHLER_PAUSE).await;
                        }
                        Err(e) => {
                            // Listener unbrauchbar – sauber aufhoeren
                            tracing::error!(fehler = %e, "Accept-Fehler, Listener wird geschlossen");
                            return Err(e);
                        }
                    }
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Relay-Server: Shutdown-Signal empfangen");
                        break;
                    }
                }
            }
        }

        tracing::info!("TLS-Relay-Server gestoppt");
        Ok(())
    }

    /// Startet Handshake-, Handler- und Monitor-Task fuer eine Verbindung
    fn verbindung_annehmen(&self, stream: TcpStream, peer_addr: SocketAddr) {
        // Client-Limit pruefen (vor dem teuren Handshake)
        let online = self.directory.anzahl() as u32;
        if online >= self.konfig.max_clients {
            tracing::warn!(
                peer = %peer_addr,
                max = self.konfig.max_clients,
                "Server voll – Verbindung abgelehnt"
            );
            drop(stream);
            return;
        }

        let tls = self.tls.clone();
        let directory = self.directory.clone();
        let verbindung = ClientConnection::neu(
            peer_addr,
            directory.clone(),
            self.router.clone(),
            Arc::clone(&self.secret),
        );
        let id = verbindung.id();

        // Aeusserer Task: Handshake, dann Monitor fuer den Handler-Task
        tokio::spawn(async move {
            let tls_stream = match tls.accept(stream).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(peer = %peer_addr, fehler = %e, "TLS-Handshake fehlgeschlagen");
                    return;
                }
            };
            tracing::info!(client = %id, peer = %peer_addr, ereignis = "connect", "Neue Verbindung");

            let handler = tokio::spawn(verbindung.verarbeiten(tls_stream));
            handler_ueberwachen(directory, id, peer_addr, handler).await;
        });
    }
}

/// Wartet auf das Ende eines Handler-Tasks und entfernt den
/// Directory-Eintrag
///
/// Beobachtet auch Panics als `JoinError`; die Bereinigung haengt nicht
/// davon ab, dass der Handler seinen eigenen Aufraeumpfad erreicht.
async fn handler_ueberwachen(
    directory: ClientDirectory,
    id: ClientId,
    peer_addr: SocketAddr,
    handler: JoinHandle<VerbindungsAbschluss>,
) {
    match handler.await {
        Ok(abschluss) => {
            tracing::info!(
                client = %id,
                peer = %peer_addr,
                ereignis = "disconnect",
                grund = ?abschluss,
                "Verbindung beendet"
            );
        }
        Err(e) => {
            tracing::error!(
                client = %id,
                peer = %peer_addr,
                ereignis = "disconnect",
                fehler = %e,
                "Handler-Task abgestuerzt"
            );
        }
    }

    // Garantierte Bereinigung, unabhaengig vom Handler-Pfad
    directory.entfernen(&id);
}

/// Accept-Fehler die einen erneuten Versuch rechtfertigen
fn ist_transient(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::BroadcastRouter;
    use palaver_crypto::{generate_self_signed_cert, TlsServer};

    fn install_crypto_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    fn test_server() -> RelayServer {
        install_crypto_provider();
        let directory = ClientDirectory::neu();
        let (router, router_handle) = BroadcastRouter::neu(directory.clone());
        tokio::spawn(router.starten());

        let identitaet = generate_self_signed_cert("relay-test").unwrap();
        let tls = TlsServer::neu(&identitaet).unwrap();

        RelayServer::neu(
            RelayServerKonfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                max_clients: 4,
            },
            directory,
            router_handle,
            Arc::new(SharedSecret::aus_passwort("geheim").unwrap()),
            tls.acceptor,
        )
    }

    #[tokio::test]
    async fn sauberer_stopp_per_shutdown_signal() {
        let server = test_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn(server.starten_auf(listener, shutdown_rx));
        shutdown_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("Server muss stoppen")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn handshake_fehler_stoppt_den_acceptor_nicht() {
        let server = test_server();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let task = tokio::spawn(server.starten_auf(listener, shutdown_rx));

        // Kein TLS: Rohdaten senden, Handshake schlaegt fehl
        {
            use tokio::io::AsyncWriteExt;
            let mut roh = TcpStream::connect(addr).await.unwrap();
            let _ = roh.write_all(b"kein tls handshake").await;
        }

        // Der Acceptor lebt noch: weitere Verbindung wird angenommen
        let _zweite = TcpStream::connect(addr).await.unwrap();

        shutdown_tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("Server muss stoppen")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn abgestuerzter_handler_wird_aus_dem_directory_entfernt() {
        let directory = ClientDirectory::neu();
        let id = ClientId::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        directory.registrieren(id, "10.0.0.1", tx).unwrap();
        assert!(directory.ist_registriert(&id));

        // Handler stuerzt mitten in der Verbindung ab und erreicht seinen
        // eigenen Aufraeumpfad nie; der Monitor muss trotzdem bereinigen
        let handler: JoinHandle<VerbindungsAbschluss> =
            tokio::spawn(async { panic!("Handler-Absturz") });
        handler_ueberwachen(
            directory.clone(),
            id,
            "10.0.0.1:4000".parse().unwrap(),
            handler,
        )
        .await;

        assert!(!directory.ist_registriert(&id));
        assert_eq!(directory.anzahl(), 0);
    }

    #[test]
    fn transiente_fehler_klassifizierung() {
        use std::io::{Error, ErrorKind};
        assert!(ist_transient(&Error::new(ErrorKind::ConnectionReset, "x")));
        assert!(ist_transient(&Error::new(ErrorKind::Interrupted, "x")));
        assert!(!ist_transient(&Error::new(ErrorKind::PermissionDenied, "x")));
    }
}
