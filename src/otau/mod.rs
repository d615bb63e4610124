//! OTA upgrade cluster definitions
//!
//! Command ids, status codes, payload layouts and sizing constants for
//! ZigBee cluster 0x0019.

mod commands;

pub use commands::*;

use crate::wire::ShortRead;
use thiserror::Error;

/// OTA upgrade cluster id.
pub const OTAU_CLUSTER_ID: u16 = 0x0019;
/// Vendor private cluster used for the optional watchdog restart.
pub const DE_CLUSTER_ID: u16 = 0xFC00;

/// Home Automation profile id, the default for clients not yet resolved.
pub const HA_PROFILE_ID: u16 = 0x0104;

/// OTA cluster command ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    ImageNotify = 0x00,
    QueryNextImageRequest = 0x01,
    QueryNextImageResponse = 0x02,
    ImageBlockRequest = 0x03,
    ImagePageRequest = 0x04,
    ImageBlockResponse = 0x05,
    UpgradeEndRequest = 0x06,
    UpgradeEndResponse = 0x07,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::ImageNotify),
            0x01 => Ok(Command::QueryNextImageRequest),
            0x02 => Ok(Command::QueryNextImageResponse),
            0x03 => Ok(Command::ImageBlockRequest),
            0x04 => Ok(Command::ImagePageRequest),
            0x05 => Ok(Command::ImageBlockResponse),
            0x06 => Ok(Command::UpgradeEndRequest),
            0x07 => Ok(Command::UpgradeEndResponse),
            other => Err(other),
        }
    }
}

/// OTA cluster status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 0x00,
    NotAuthorized = 0x7E,
    MalformedCommand = 0x80,
    UnsupClusterCommand = 0x81,
    Abort = 0x95,
    InvalidImage = 0x96,
    WaitForData = 0x97,
    NoImageAvailable = 0x98,
    RequireMoreImage = 0x99,
}

/// Wildcard file version meaning "whatever the server has".
pub const DONT_CARE_FILE_VERSION: u32 = 0xFFFF_FFFF;

/// Upgrade time telling the client to wait indefinitely for a follow-up.
pub const INDEFINITE_UPGRADE_TIME: u32 = 0xFFFF_FFFF;

/// ZCL header in front of every cluster command (frame control, sequence,
/// command id).
pub const ZCL_HEADER_SIZE: usize = 3;

/// Fixed part of an image block response body (status through data size).
pub const IMAGE_BLOCK_RSP_HEADER_SIZE: usize = 14;

/// Largest ASDU the transport carries without APS fragmentation.
pub const MAX_ASDU_SIZE: usize = 82;

/// Largest ASDU that still fits one MAC frame along a source route.
pub const MAX_SAFE_ASDU_SIZE: usize = 57;

/// Block payload bytes available inside [`MAX_ASDU_SIZE`].
pub const MAX_DATA_SIZE: u8 =
    (MAX_ASDU_SIZE - ZCL_HEADER_SIZE - IMAGE_BLOCK_RSP_HEADER_SIZE) as u8;

/// Block payload bytes available inside [`MAX_SAFE_ASDU_SIZE`].
pub const SAFE_DATA_SIZE: u8 =
    (MAX_SAFE_ASDU_SIZE - ZCL_HEADER_SIZE - IMAGE_BLOCK_RSP_HEADER_SIZE) as u8;

/// Response spacing bounds for page transfers, milliseconds.
pub const MIN_RESPONSE_SPACING: u16 = 20;
pub const MAX_RESPONSE_SPACING: u16 = 500;

/// Field control bit: request carries the node's IEEE address.
pub const FC_IEEE_PRESENT: u8 = 0x01;
/// Field control bit: query carries the hardware version.
pub const FC_HW_VERSION_PRESENT: u8 = 0x01;

/// OTA payload decoding errors
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("truncated payload: needed {needed} bytes, {left} left")]
    Truncated { needed: usize, left: usize },

    #[error("invalid payload length {actual}, expected {expected}")]
    InvalidLength {
        expected: &'static str,
        actual: usize,
    },
}

impl From<ShortRead> for PayloadError {
    fn from(e: ShortRead) -> Self {
        PayloadError::Truncated {
            needed: e.needed,
            left: e.left,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_round_trip() {
        for raw in 0x00..=0x07u8 {
            let cmd = Command::try_from(raw).unwrap();
            assert_eq!(cmd as u8, raw);
        }
        assert_eq!(Command::try_from(0x08), Err(0x08));
    }

    #[test]
    fn test_data_size_budgets() {
        assert_eq!(MAX_DATA_SIZE, 65);
        assert_eq!(SAFE_DATA_SIZE, 40);
    }
}
