//! Server-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte; nur das Server-Passwort muss gesetzt sein
//! (Datei oder Umgebungsvariable), sonst verweigert der Server den Start.

use serde::{Deserialize, Serialize};

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Allgemeine Server-Einstellungen
    pub server: ServerEinstellungen,
    /// Netzwerk-Einstellungen
    pub netzwerk: NetzwerkEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
}

/// Allgemeine Server-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEinstellungen {
    /// Anzeigename des Servers
    pub name: String,
    /// Maximale Anzahl gleichzeitiger Clients
    pub max_clients: u32,
    /// Server-Passwort; alternativ via PALAVER_PASSWORT setzbar
    pub passwort: Option<String>,
}

impl Default for ServerEinstellungen {
    fn default() -> Self {
        Self {
            name: "Palaver Server".into(),
            max_clients: 512,
            passwort: None,
        }
    }
}

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// Bind-Adresse fuer die TLS-Verbindung
    pub bind_adresse: String,
    /// Port fuer die TLS-Verbindung
    pub tcp_port: u16,
    /// TLS-Zertifikat-Pfad (leer = selbstsigniertes Dev-Zertifikat)
    pub tls_zertifikat: Option<String>,
    /// TLS-Schluessel-Pfad
    pub tls_schluessel: Option<String>,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".into(),
            tcp_port: 9400,
            tls_zertifikat: None,
            tls_schluessel: None,
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
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    ///
    /// Gibt `Ok(None)` zurueck wenn die Datei nicht existiert. Der Aufrufer
    /// faellt dann auf die Standardwerte zurueck und meldet das selbst –
    /// beim Laden ist das Logging noch nicht initialisiert, eine hier
    /// ausgegebene Warnung ginge verloren.
    pub fn laden(pfad: &str) -> anyhow::Result<Option<Self>> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(Some(config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// Gibt die vollstaendige Bind-Adresse fuer TLS zurueck
    pub fn tcp_bind_adresse(&self) -> String {
        format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.tcp_port)
    }

    /// Loest das Server-Passwort auf: Umgebungsvariable vor Konfigurationsdatei
    pub fn server_passwort(&self) -> Option<String> {
        std::env::var("PALAVER_PASSWORT")
            .ok()
            .filter(|p| !p.is_empty())
            .or_else(|| self.server.passwort.clone().filter(|p| !p.is_empty()))
    }
}
