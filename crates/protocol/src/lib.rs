//! palaver-protocol – Chat-Protokoll (TCP/TLS)
//!
//! Definiert die Nachrichtentypen und das Wire-Format fuer die
//! TLS-Verbindung zwischen Client und Server.
//!
//! ## Design
//! - JSON-Serialisierung via serde (nicht zeitkritisch)
//! - Tagged Enum (`type`-Feld) fuer typsichere Nachrichtentypen
//! - Frames: Laengenpraefix (u32 big-endian) + JSON-Payload, max. 64 KiB

pub mod message;
pub mod wire;

// Bequeme Re-Exporte
pub use message::ChatMessage;
pub use wire::{read_frame, write_frame, FrameCodec, WireError, MAX_FRAME_SIZE};
