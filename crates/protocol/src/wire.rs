//! Wire-Format fuer die TLS-Verbindung
//!
//! Frame-basiertes Protokoll: Laenge (u32 big-endian) + JSON-Payload.
//!
//! ## Frame-Format
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE) | 4 Bytes        | Payload    |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Die Laenge gibt die Anzahl der Payload-Bytes an (ohne die 4 Laengen-Bytes).
//! Frames ueber [`MAX_FRAME_SIZE`] sind Protokollverstoesse: der Aufrufer
//! muss die Verbindung schliessen, ein Weiterlesen ist nicht definiert.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::ChatMessage;

// ---------------------------------------------------------------------------
// Konstanten
// ---------------------------------------------------------------------------

/// Maximale Payload-Groesse eines Frames (64 KiB)
pub const MAX_FRAME_SIZE: usize = 65536;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

// ---------------------------------------------------------------------------
// Fehlertyp
// ---------------------------------------------------------------------------

/// Fehler beim Kodieren oder Dekodieren von Frames
#[derive(Debug, Error)]
pub enum WireError {
    /// Deklarierte Frame-Laenge ueberschreitet das Limit (Dekodier-Seite).
    /// Die Payload wurde nicht gelesen; die Verbindung ist zu schliessen.
    #[error("Frame zu gross: {laenge} Bytes (Maximum: {MAX_FRAME_SIZE} Bytes)")]
    FrameZuGross { laenge: usize },

    /// Kodierte Nachricht ueberschreitet das Limit (Kodier-Seite)
    #[error("Nachricht zu gross: {laenge} Bytes (Maximum: {MAX_FRAME_SIZE} Bytes)")]
    PayloadZuGross { laenge: usize },

    /// Payload ist kein gueltiges JSON bzw. keine bekannte Nachricht
    #[error("Ungueltige JSON-Payload: {0}")]
    UngueltigesJson(#[from] serde_json::Error),

    /// IO-Fehler (inkl. Verbindungsabbruch mitten im Frame)
    #[error("IO-Fehler: {0}")]
    Io(#[from] io::Error),
}

impl WireError {
    /// `true` wenn der Fehler ein Protokollverstoss der Gegenseite ist
    /// (im Gegensatz zu einem Transportfehler)
    pub fn ist_protokollverstoss(&self) -> bool {
        matches!(
            self,
            Self::FrameZuGross { .. } | Self::UngueltigesJson(_)
        )
    }
}

// ---------------------------------------------------------------------------
// FrameCodec
// ---------------------------------------------------------------------------

/// tokio-util Codec fuer frame-basierte Verbindungen
///
/// Implementiert `Encoder<ChatMessage>` und `Decoder` fuer die Integration
/// mit `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Erstellt einen neuen `FrameCodec`
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = ChatMessage;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Warte auf mindestens 4 Bytes fuer das Laengen-Feld
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        // Laenge lesen (big-endian u32) ohne den Buffer zu veraendern
        let laenge = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if laenge > MAX_FRAME_SIZE {
            return Err(WireError::FrameZuGross { laenge });
        }

        // Pruefen ob der vollstaendige Frame bereits im Buffer ist
        let total = LENGTH_FIELD_SIZE + laenge;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        // Laengen-Feld verbrauchen, Payload extrahieren
        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(laenge);

        let nachricht: ChatMessage = serde_json::from_slice(&payload)?;
        Ok(Some(nachricht))
    }
}

impl Encoder<ChatMessage> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: ChatMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;

        if json.len() > MAX_FRAME_SIZE {
            return Err(WireError::PayloadZuGross { laenge: json.len() });
        }

        dst.reserve(LENGTH_FIELD_SIZE + json.len());
        dst.put_u32(json.len() as u32);
        dst.put_slice(&json);

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Hilfsfunktionen fuer direktes async Lesen/Schreiben
// ---------------------------------------------------------------------------

/// Liest einen einzelnen Frame aus einem `AsyncRead`
///
/// Genau zwei logische Lesevorgaenge: das Laengen-Feld, dann exakt
/// `laenge` Payload-Bytes. Kein frame-uebergreifendes Buffering.
///
/// # Fehler
/// - [`WireError::FrameZuGross`] wenn das Laengen-Feld das Limit
///   ueberschreitet; die Payload wird dann nicht gelesen
/// - [`WireError::UngueltigesJson`] bei ungueltiger Payload
/// - [`WireError::Io`] bei Transportfehlern (inkl. `UnexpectedEof`)
pub async fn read_frame<R>(reader: &mut R) -> Result<ChatMessage, WireError>
where
    R: AsyncRead + Unpin,
{
    // Laengen-Feld lesen
    let mut len_buf = [0u8; LENGTH_FIELD_SIZE];
    reader.read_exact(&mut len_buf).await?;
    let laenge = u32::from_be_bytes(len_buf) as usize;

    if laenge > MAX_FRAME_SIZE {
        return Err(WireError::FrameZuGross { laenge });
    }

    // Payload lesen
    let mut payload = vec![0u8; laenge];
    reader.read_exact(&mut payload).await?;

    Ok(serde_json::from_slice(&payload)?)
}

/// Schreibt einen einzelnen Frame in einen `AsyncWrite`
///
/// # Fehler
/// - [`WireError::PayloadZuGross`] wenn die kodierte Nachricht das Limit
///   ueberschreitet
/// - [`WireError::Io`] bei Schreibfehlern
pub async fn write_frame<W>(writer: &mut W, nachricht: &ChatMessage) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(nachricht)?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(WireError::PayloadZuGross { laenge: json.len() });
    }

    let len_bytes = (json.len() as u32).to_be_bytes();
    writer.write_all(&len_bytes).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
