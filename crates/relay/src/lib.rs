//! palaver-relay – TLS-Relay-Kern
//!
//! Dieser Crate implementiert den Kern des Palaver-Servers: er nimmt
//! TLS-Verbindungen an, authentifiziert jede gegen das gemeinsame
//! Server-Geheimnis und verteilt Chat-Nachrichten an alle anderen
//! verbundenen Clients.
//!
//! ## Architektur
//!
//! ```text
//! TLS Listener (RelayServer)
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task + Schreib-Task)
//!     |  State Machine: Verbunden -> Authentifizierung -> Authentifiziert -> Geschlossen
//!     |
//!     v
//! BroadcastRouter (ein einziger Task, volle Serialisierung)
//!     |
//!     +-- ClientDirectory  – Registry aller authentifizierten Verbindungen
//!     +-- Fan-out          – Snapshot-basiert, nie an den Absender selbst
//!
//! Monitor-Task pro Verbindung – beobachtet das Task-Ende (auch Panics)
//! und garantiert die Entfernung aus dem Directory
//! ```
//!
//! ## Ordnungsgarantien
//! Innerhalb einer Verbindung werden Frames strikt in Empfangsreihenfolge
//! verarbeitet (ein Leser pro Socket). Alle Broadcasts laufen nacheinander
//! durch den Router-Task, zwei Fan-outs verschraenken sich nie. Eine
//! globale Zustellreihenfolge ueber verschiedene Absender hinweg wird
//! jedoch nicht garantiert (best effort).

pub mod connection;
pub mod directory;
pub mod error;
pub mod router;
pub mod tcp;

// Bequeme Re-Exporte
pub use connection::{ClientConnection, VerbindungsAbschluss, VerbindungsZustand};
pub use directory::{ClientDirectory, ClientRecord, ClientSender};
pub use error::{RelayError, RelayResult};
pub use router::{BroadcastRouter, RouterHandle};
pub use tcp::{RelayServer, RelayServerKonfig};
