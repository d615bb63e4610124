//! OTA image container handling
//!
//! This module implements parsing and serialization of the ZigBee OTA
//! upgrade file format: a little-endian header with optional fields followed
//! by a sequence of tagged sub-elements.

mod build;
mod parse;
mod types;

pub use build::wrap_raw_firmware;
pub use types::*;

use thiserror::Error;

impl OtaImage {
    /// Parse a container from bytes, tolerating a prefix before the magic.
    pub fn from_bytes(buf: &[u8]) -> Result<OtaImage, DecodeError> {
        parse::from_bytes(buf)
    }

    /// Serialize the container, recomputing `header_length` and
    /// `total_image_size` from the present fields.
    pub fn to_bytes(&self) -> Vec<u8> {
        build::to_bytes(self)
    }

    /// Bring the size and field-control fields and the retained raw form in
    /// sync with the parsed fields.
    pub fn finalize(&mut self) {
        self.header_length = build::computed_header_length(self);
        self.field_control = 0;
        if self.security_credential_version.is_some() {
            self.field_control |= FC_SECURITY_CREDENTIAL_VERSION;
        }
        if self.upgrade_file_destination.is_some() {
            self.field_control |= FC_DEVICE_SPECIFIC;
        }
        if self.hardware_version.is_some() {
            self.field_control |= FC_HARDWARE_VERSION;
        }
        let raw = build::to_bytes(self);
        self.total_image_size = raw.len() as u32;
        self.raw = raw;
    }
}

/// Image container decoding errors
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    #[error("truncated input: needed {needed} bytes, {left} left")]
    Truncated { needed: usize, left: usize },

    #[error("no valid sub-element found")]
    NoSubElements,
}

impl From<crate::wire::ShortRead> for DecodeError {
    fn from(e: crate::wire::ShortRead) -> Self {
        DecodeError::Truncated {
            needed: e.needed,
            left: e.left,
        }
    }
}
