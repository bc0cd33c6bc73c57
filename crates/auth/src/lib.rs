//! palaver-auth – Shared-Secret-Authentifizierung
//!
//! `SharedSecret` ist das eine, prozessweite Server-Geheimnis gegen das
//! sich jeder Client authentifizieren muss. Es wird einmal beim Start
//! per Argon2id gehasht; danach gibt es nur noch Verifikation.

pub mod error;
pub mod secret;

// Bequeme Re-Exporte
pub use error::{AuthError, AuthResult};
pub use secret::SharedSecret;
