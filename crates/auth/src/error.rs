//! Fehlertypen fuer den Auth-Service

use thiserror::Error;

/// Alle moeglichen Fehler im Auth-Service
#[derive(Debug, Error)]
pub enum AuthError {
    // --- Passwort ---
    #[error("Passwort-Hashing fehlgeschlagen: {0}")]
    PasswortHashing(String),

    // --- Konfiguration ---
    #[error("Kein Server-Passwort konfiguriert")]
    GeheimnisFehlt,
}

/// Result-Typ fuer den Auth-Service
pub type AuthResult<T> = Result<T, AuthError>;
