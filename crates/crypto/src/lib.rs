//! # palaver-crypto
//!
//! TLS-Transportverschluesselung fuer Palaver.
//!
//! ## Module
//! - `tls` - TlsAcceptor-Aufbau aus Zertifikat/Schluessel (PEM) sowie
//!   selbstsignierte Zertifikate fuer Development/Tests
//! - `error` - Fehlertypen

pub mod error;
pub mod tls;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use tls::{generate_self_signed_cert, TlsIdentitaet, TlsServer};
