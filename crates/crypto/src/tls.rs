//! TLS-Server-Identitaet und Acceptor-Aufbau
//!
//! Der Zertifikats-Lieferant ist ein externer Kollaborateur: dieses Modul
//! laedt lediglich `(zertifikat_pfad, schluessel_pfad)` als PEM und baut
//! daraus einen `tokio_rustls::TlsAcceptor`. Zertifikatsinhalte werden
//! nicht validiert oder rotiert.
//!
//! Fuer Development und Tests koennen selbstsignierte Zertifikate via
//! rcgen generiert werden.

use std::path::Path;
use std::sync::Arc;

use rcgen::{CertificateParams, DistinguishedName, KeyPair as RcgenKeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use crate::error::{CryptoError, CryptoResult};

// ---------------------------------------------------------------------------
// TlsIdentitaet
// ---------------------------------------------------------------------------

/// Zertifikat und privater Schluessel als PEM
#[derive(Debug, Clone)]
pub struct TlsIdentitaet {
    /// PEM-kodierte Zertifikatskette
    pub certificate_pem: String,
    /// PEM-kodierter privater Schluessel
    pub private_key_pem: String,
}

impl TlsIdentitaet {
    /// Laedt die Identitaet aus den vom Zertifikats-Lieferanten
    /// uebergebenen Dateipfaden
    pub fn aus_dateien(
        zertifikat_pfad: impl AsRef<Path>,
        schluessel_pfad: impl AsRef<Path>,
    ) -> CryptoResult<Self> {
        let certificate_pem = datei_lesen(zertifikat_pfad.as_ref())?;
        let private_key_pem = datei_lesen(schluessel_pfad.as_ref())?;
        Ok(Self {
            certificate_pem,
            private_key_pem,
        })
    }
}

fn datei_lesen(pfad: &Path) -> CryptoResult<String> {
    std::fs::read_to_string(pfad).map_err(|e| CryptoError::IdentitaetLaden {
        pfad: pfad.display().to_string(),
        grund: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// TlsServer
// ---------------------------------------------------------------------------

/// TLS-Serverseite: haelt den fertig konfigurierten Acceptor
pub struct TlsServer {
    pub acceptor: TlsAcceptor,
}

impl TlsServer {
    /// Baut den Acceptor aus einer TLS-Identitaet
    pub fn neu(identitaet: &TlsIdentitaet) -> CryptoResult<Self> {
        let cert_chain = parse_certificates(&identitaet.certificate_pem)?;
        let private_key = parse_private_key(&identitaet.private_key_pem)?;

        let tls_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(cert_chain, private_key)
            .map_err(|e| CryptoError::Tls(e.to_string()))?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(tls_config)),
        })
    }
}

impl std::fmt::Debug for TlsServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsServer").finish_non_exhaustive()
    }
}

fn parse_certificates(pem: &str) -> CryptoResult<Vec<CertificateDer<'static>>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    let chain: Vec<_> = certs(&mut cursor)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CryptoError::Tls(format!("Zertifikat-Parsing fehlgeschlagen: {}", e)))?;
    if chain.is_empty() {
        return Err(CryptoError::Tls("Kein Zertifikat gefunden".to_string()));
    }
    Ok(chain)
}

fn parse_private_key(pem: &str) -> CryptoResult<PrivateKeyDer<'static>> {
    let mut cursor = std::io::Cursor::new(pem.as_bytes());
    private_key(&mut cursor)
        .map_err(|e| CryptoError::Tls(format!("Schluessel-Parsing fehlgeschlagen: {}", e)))?
        .ok_or_else(|| CryptoError::Tls("Kein privater Schluessel gefunden".to_string()))
}

// ---------------------------------------------------------------------------
// Selbstsignierte Zertifikate (Dev/Test)
// ---------------------------------------------------------------------------

/// Generiert ein selbstsigniertes Zertifikat fuer Development/Testing
pub fn generate_self_signed_cert(common_name: &str) -> CryptoResult<TlsIdentitaet> {
    let mut params = CertificateParams::new(vec![common_name.to_string()])
        .map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(rcgen::DnType::CommonName, common_name);
    params.distinguished_name = distinguished_name;

    let key_pair =
        RcgenKeyPair::generate().map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::ZertifikatGenerierung(e.to_string()))?;

    Ok(TlsIdentitaet {
        certificate_pem: cert.pem(),
        private_key_pem: key_pair.serialize_pem(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
