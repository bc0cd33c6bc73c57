//! SharedSecret – das eine Server-Geheimnis
//!
//! Jeder Client authentifiziert sich gegen dasselbe Server-Passwort.
//! Das Geheimnis wird genau einmal beim Start gehasht und ist danach
//! unveraenderlich; es existiert prozessweit genau eine Instanz
//! (typischerweise hinter `Arc`). Klartext wird nach dem Hashen nicht
//! aufbewahrt und nirgendwo direkt verglichen – jede Pruefung laeuft
//! durch Argon2.

use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::{Algorithm, Argon2, Params, Version};

use crate::error::AuthError;

/// Argon2id-Speicherkosten in KiB (64 MiB, OWASP-Empfehlung Stand 2024)
const M_COST_KIB: u32 = 64 * 1024;
/// Argon2id-Iterationen
const T_COST: u32 = 3;
/// Argon2id-Parallelismus
const P_COST: u32 = 1;

/// Unveraenderlicher Argon2id-Hash des Server-Passworts (PHC-String)
#[derive(Clone)]
pub struct SharedSecret {
    hash: String,
}

impl SharedSecret {
    /// Erzeugt das Geheimnis aus dem Klartext-Passwort
    ///
    /// Hasht mit zufaelligem Salt; der einzige Ort im Prozess der ein
    /// Passwort hasht statt zu verifizieren.
    pub fn aus_passwort(passwort: &str) -> Result<Self, AuthError> {
        if passwort.is_empty() {
            return Err(AuthError::GeheimnisFehlt);
        }
        let salt = SaltString::generate(&mut OsRng);
        let hash = argon2id()
            .hash_password(passwort.as_bytes(), &salt)
            .map_err(|e| AuthError::PasswortHashing(e.to_string()))?
            .to_string();
        Ok(Self { hash })
    }

    /// Erzeugt das Geheimnis aus einem bereits vorliegenden PHC-Hash
    ///
    /// Der Hash wird geparst um offensichtlich ungueltige Werte frueh
    /// abzulehnen statt erst beim ersten Login.
    pub fn aus_hash(hash: impl Into<String>) -> Result<Self, AuthError> {
        let hash = hash.into();
        phc_parsen(&hash)?;
        Ok(Self { hash })
    }

    /// Prueft ein vom Client geliefertes Passwort gegen das Geheimnis
    ///
    /// Gibt `Ok(false)` bei Nichtuebereinstimmung zurueck; jeder andere
    /// Verifikationsfehler ist ein echter Fehler.
    pub fn pruefen(&self, passwort: &str) -> Result<bool, AuthError> {
        let parsed = phc_parsen(&self.hash)?;
        match argon2id().verify_password(passwort.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::PasswortHashing(e.to_string())),
        }
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Hash nicht ausgeben, auch nicht in Debug-Logs
        f.debug_struct("SharedSecret").finish_non_exhaustive()
    }
}

fn argon2id() -> Argon2<'static> {
    // Params::new kann mit den obigen Konstanten nicht fehlschlagen
    let params = Params::new(M_COST_KIB, T_COST, P_COST, None).expect("Argon2-Parameter ungueltig");
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

fn phc_parsen(hash: &str) -> Result<PasswordHash<'_>, AuthError> {
    PasswordHash::new(hash)
        .map_err(|e| AuthError::PasswortHashing(format!("Ungueltiges Hash-Format: {e}")))
}
