//! palaver-server – Bibliotheks-Root
//!
//! Verdrahtet die Subsysteme: Geheimnis hashen, TLS-Identitaet laden,
//! Directory + Router + Relay-Server starten, auf Shutdown-Signal warten.

pub mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use palaver_auth::SharedSecret;
use palaver_crypto::{generate_self_signed_cert, TlsIdentitaet, TlsServer};
use palaver_relay::{BroadcastRouter, ClientDirectory, RelayServer, RelayServerKonfig};

use config::ServerConfig;

/// Einstiegspunkt fuer das Binary
///
/// Die Konfiguration wird vor dem Logging geladen (das Log-Level steht in
/// der Datei); Hinweise zum Ladevorgang laufen deshalb erst nach der
/// Logging-Initialisierung durchs Log.
pub async fn ausfuehren() -> Result<()> {
    let config_pfad =
        std::env::var("PALAVER_CONFIG").unwrap_or_else(|_| "palaver.toml".into());

    let geladen = ServerConfig::laden(&config_pfad)?;
    let aus_datei = geladen.is_some();
    let config = geladen.unwrap_or_default();

    logging_initialisieren(&config.logging.level, &config.logging.format);
    if !aus_datei {
        tracing::warn!(
            pfad = %config_pfad,
            "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
        );
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Palaver Server wird initialisiert"
    );

    Server::neu(config).starten().await
}

/// Initialisiert tracing-subscriber mit Level und Format aus der Konfiguration
///
/// `RUST_LOG` uebersteuert das konfigurierte Level.
fn logging_initialisieren(level: &str, format: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let basis = fmt().with_env_filter(filter).with_target(true);
    if format == "json" {
        basis.json().with_thread_ids(true).init();
    } else {
        basis.init();
    }
}

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Server-Geheimnis hashen (fatal wenn keins konfiguriert)
    /// 2. TLS-Identitaet laden bzw. Dev-Zertifikat generieren
    /// 3. Router-Task starten
    /// 4. TLS-Listener starten
    /// 5. Auf Ctrl-C warten, dann Accept-Loop stoppen
    pub async fn starten(self) -> Result<()> {
        // rustls-Provider einmalig fuer den Prozess festlegen
        let _ = rustls::crypto::ring::default_provider().install_default();

        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %self.config.tcp_bind_adresse(),
            max_clients = self.config.server.max_clients,
            "Server startet"
        );

        // Geheimnis: fatal vor dem ersten Accept, nie danach
        let passwort = self
            .config
            .server_passwort()
            .context("Kein Server-Passwort konfiguriert ([server].passwort oder PALAVER_PASSWORT)")?;
        let secret = Arc::new(
            SharedSecret::aus_passwort(&passwort).context("Server-Passwort konnte nicht gehasht werden")?,
        );

        // TLS-Identitaet vom Zertifikats-Lieferanten, sonst Dev-Zertifikat
        let identitaet = match (
            &self.config.netzwerk.tls_zertifikat,
            &self.config.netzwerk.tls_schluessel,
        ) {
            (Some(cert), Some(key)) => TlsIdentitaet::aus_dateien(cert, key)
                .context("TLS-Zertifikat/Schluessel konnte nicht geladen werden")?,
            _ => {
                tracing::warn!(
                    "Keine TLS-Zertifikatspfade konfiguriert – selbstsigniertes \
                     Dev-Zertifikat wird generiert"
                );
                generate_self_signed_cert(&self.config.server.name)
                    .context("Dev-Zertifikat konnte nicht generiert werden")?
            }
        };
        let tls = TlsServer::neu(&identitaet).context("TLS-Konfiguration ungueltig")?;

        let bind_addr: SocketAddr = self
            .config
            .tcp_bind_adresse()
            .parse()
            .context("Ungueltige Bind-Adresse")?;

        // Directory + Router
        let directory = ClientDirectory::neu();
        let (router, router_handle) = BroadcastRouter::neu(directory.clone());
        let router_task = tokio::spawn(router.starten());

        // Relay-Server
        let relay = RelayServer::neu(
            RelayServerKonfig {
                bind_addr,
                max_clients: self.config.server.max_clients,
            },
            directory,
            router_handle,
            secret,
            tls.acceptor,
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let relay_task = tokio::spawn(relay.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::signal::ctrl_c().await?;
        tracing::info!("Shutdown-Signal empfangen, Server wird beendet");

        let _ = shutdown_tx.send(true);
        relay_task.await?.context("Relay-Server endete mit Fehler")?;
        drop(router_task);

        Ok(())
    }
}
