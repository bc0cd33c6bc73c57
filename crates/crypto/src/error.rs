//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Zertifikat-Generierung fehlgeschlagen: {0}")]
    ZertifikatGenerierung(String),

    #[error("Zertifikat/Schluessel konnte nicht geladen werden ({pfad}): {grund}")]
    IdentitaetLaden { pfad: String, grund: String },

    #[error("TLS-Fehler: {0}")]
    Tls(String),
}

/// Result-Typ fuer das Kryptografie-Subsystem
pub type CryptoResult<T> = Result<T, CryptoError>;
