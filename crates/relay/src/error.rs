//! Fehlertypen fuer den Relay-Kern

use palaver_auth::AuthError;
use palaver_core::ClientId;
use palaver_protocol::WireError;
use thiserror::Error;

/// Fehlertyp fuer den Relay-Kern
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO-Fehler (TCP, Socket)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Fehler im Wire-Format
    #[error("Wire-Fehler: {0}")]
    Wire(#[from] WireError),

    /// Authentifizierungsfehler
    #[error("Authentifizierungsfehler: {0}")]
    Auth(#[from] AuthError),

    /// Verbindung ist bereits im Directory registriert
    #[error("Verbindung bereits registriert: {0}")]
    BereitsRegistriert(ClientId),

    /// Der Router-Task laeuft nicht mehr
    #[error("Router nicht erreichbar")]
    RouterGeschlossen,
}

/// Result-Typ fuer den Relay-Kern
pub type RelayResult<T> = Result<T, RelayError>;
