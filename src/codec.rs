//! Schema codec seam.
//!
//! Signal extraction is delegated to a [`SignalCodec`]: given a message
//! identifier and its payload, the codec returns every signal of that message
//! as a `(name, value, unit)` reading. The bit layout math lives entirely on the
//! other side of this trait.
//!
//! With the `dbc` feature (on by default) the crate ships [`DbcCodec`], which
//! wraps a [`dbc_rs::Dbc`] database and uses `Dbc::decode()` for full DBC
//! support (multiplexing, value descriptions, etc.).
//!
//! # Example
//!
//! ```ignore
//! use canlog::codec::{DbcCodec, SignalCodec};
//!
//! let codec = DbcCodec::from_file("vehicle.dbc")?;
//! let readings = codec.decode_message(0x100, &[0x40, 0x1F, 0, 0, 0, 0, 0, 0])?;
//! for r in readings {
//!     println!("{} = {} {}", r.name, r.value, r.unit);
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::CodecError;

/// One decoded signal of a CAN message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalReading {
    /// Signal name from the schema
    pub name: String,
    /// Physical value
    pub value: f64,
    /// Physical unit, empty when the schema defines none
    pub unit: String,
}

impl SignalReading {
    /// Create a new reading.
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

/// Decodes CAN payloads into named signal readings.
///
/// Implementations must be shareable across conversion workers.
pub trait SignalCodec: Send + Sync {
    /// Decode every signal of message `can_id` from `payload`.
    ///
    /// Returns [`CodecError::UnknownMessage`] when the schema has no such
    /// message and [`CodecError::PayloadMismatch`] when the payload length does
    /// not match the message layout.
    fn decode_message(&self, can_id: u32, payload: &[u8])
    -> Result<Vec<SignalReading>, CodecError>;
}

impl<C: SignalCodec + ?Sized> SignalCodec for &C {
    fn decode_message(
        &self,
        can_id: u32,
        payload: &[u8],
    ) -> Result<Vec<SignalReading>, CodecError> {
        (**self).decode_message(can_id, payload)
    }
}

impl<C: SignalCodec + ?Sized> SignalCodec for std::sync::Arc<C> {
    fn decode_message(
        &self,
        can_id: u32,
        payload: &[u8],
    ) -> Result<Vec<SignalReading>, CodecError> {
        (**self).decode_message(can_id, payload)
    }
}

#[cfg(feature = "dbc")]
pub use dbc_codec::DbcCodec;

#[cfg(feature = "dbc")]
mod dbc_codec {
    use std::path::Path;

    use super::{SignalCodec, SignalReading};
    use crate::{CodecError, Error, Result};

    /// Extended identifiers carry bit 31 in the DBC message id.
    const EXTENDED_FLAG: u32 = 0x8000_0000;

    /// [`SignalCodec`] backed by a parsed DBC database.
    pub struct DbcCodec {
        dbc: dbc_rs::Dbc,
    }

    impl core::fmt::Debug for DbcCodec {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("DbcCodec")
                .field("messages", &self.dbc.messages().iter().count())
                .finish()
        }
    }

    impl DbcCodec {
        /// Wrap an already parsed database.
        pub fn new(dbc: dbc_rs::Dbc) -> Self {
            Self { dbc }
        }

        /// Parse a DBC database from its text.
        pub fn parse(content: &str) -> Result<Self> {
            let dbc = dbc_rs::Dbc::parse(content)
                .map_err(|e| Error::Schema(format!("{e:?}")))?;
            Ok(Self::new(dbc))
        }

        /// Load and parse a DBC file.
        pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let content = std::fs::read_to_string(path)?;
            let codec = Self::parse(&content)?;
            tracing::info!(
                path = %path.display(),
                messages = codec.message_count(),
                "loaded DBC schema"
            );
            Ok(codec)
        }

        /// Get the underlying database.
        pub fn dbc(&self) -> &dbc_rs::Dbc {
            &self.dbc
        }

        /// Number of messages defined in the schema.
        pub fn message_count(&self) -> usize {
            self.dbc.messages().iter().count()
        }

        /// Find the schema message for a captured identifier.
        ///
        /// Returns the message together with whether it is an extended-id message.
        fn lookup(&self, can_id: u32) -> Option<(&dbc_rs::Message, bool)> {
            let messages = self.dbc.messages();
            let standard = || messages.find_by_id(can_id).map(|m| (m, false));
            let extended = || {
                messages
                    .find_by_id(can_id | EXTENDED_FLAG)
                    .map(|m| (m, true))
            };

            match crate::frame::classify_id(can_id)? {
                embedded_can::Id::Standard(_) => standard().or_else(extended),
                embedded_can::Id::Extended(_) => extended().or_else(standard),
            }
        }
    }

    impl SignalCodec for DbcCodec {
        fn decode_message(
            &self,
            can_id: u32,
            payload: &[u8],
        ) -> core::result::Result<Vec<SignalReading>, CodecError> {
            let (message, is_extended) = self
                .lookup(can_id)
                .ok_or(CodecError::UnknownMessage { can_id })?;

            let expected = message.dlc() as usize;
            if payload.len() != expected {
                return Err(CodecError::PayloadMismatch {
                    can_id,
                    expected,
                    actual: payload.len(),
                });
            }

            let decoded = self
                .dbc
                .decode(can_id, payload, is_extended)
                .map_err(|e| CodecError::Decode {
                    can_id,
                    message: format!("{e:?}"),
                })?;

            Ok(decoded
                .iter()
                .map(|signal| SignalReading {
                    name: String::from(signal.name),
                    value: signal.value,
                    unit: signal.unit.map(String::from).unwrap_or_default(),
                })
                .collect())
        }
    }

}
