//! ZCL frame encode/decode
//!
//! Implements the ZigBee Cluster Library frame format carried in an ASDU:
//! frame control, optional manufacturer code, sequence number, command id
//! and payload.

use crate::wire::{put_u16, put_u8, Reader, ShortRead};
use thiserror::Error;

/// Frame type bits of the frame control field.
pub const FC_FRAME_TYPE_MASK: u8 = 0x03;
/// Profile-wide command frame (default response lives here).
pub const FC_FRAME_TYPE_PROFILE: u8 = 0x00;
/// Cluster-specific command frame.
pub const FC_FRAME_TYPE_CLUSTER: u8 = 0x01;
/// Manufacturer code field present.
pub const FC_MANUFACTURER_SPECIFIC: u8 = 0x04;
/// Direction: sent by the server side of the cluster.
pub const FC_DIRECTION_SERVER_TO_CLIENT: u8 = 0x08;
/// Receiver shall not answer with a default response.
pub const FC_DISABLE_DEFAULT_RESPONSE: u8 = 0x10;

/// Profile-wide default response command id.
pub const CMD_DEFAULT_RESPONSE: u8 = 0x0B;

/// ZCL frame decoding errors
#[derive(Debug, Error)]
pub enum ZclError {
    #[error("truncated ZCL frame: needed {needed} bytes, {left} left")]
    Truncated { needed: usize, left: usize },
}

impl From<ShortRead> for ZclError {
    fn from(e: ShortRead) -> Self {
        ZclError::Truncated {
            needed: e.needed,
            left: e.left,
        }
    }
}

/// A decoded ZCL frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZclFrame {
    pub frame_control: u8,
    pub manufacturer: Option<u16>,
    pub sequence: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl ZclFrame {
    /// Decode a frame from an ASDU.
    pub fn parse(asdu: &[u8]) -> Result<Self, ZclError> {
        let mut r = Reader::new(asdu);

        let frame_control = r.u8()?;
        let manufacturer = if frame_control & FC_MANUFACTURER_SPECIFIC != 0 {
            Some(r.u16()?)
        } else {
            None
        };
        let sequence = r.u8()?;
        let command = r.u8()?;
        let payload = r.bytes(r.remaining())?.to_vec();

        Ok(Self {
            frame_control,
            manufacturer,
            sequence,
            command,
            payload,
        })
    }

    /// Encode the frame into an ASDU.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + self.payload.len());
        put_u8(&mut buf, self.frame_control);
        if let Some(mfc) = self.manufacturer {
            put_u16(&mut buf, mfc);
        }
        put_u8(&mut buf, self.sequence);
        put_u8(&mut buf, self.command);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// A cluster-specific server-to-client response frame. Default responses
    /// to it are suppressed.
    pub fn server_response(sequence: u8, command: u8, payload: Vec<u8>) -> Self {
        Self {
            frame_control: FC_FRAME_TYPE_CLUSTER
                | FC_DIRECTION_SERVER_TO_CLIENT
                | FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer: None,
            sequence,
            command,
            payload,
        }
    }

    /// A profile-wide default response acknowledging `command` with `status`.
    pub fn default_response(sequence: u8, command: u8, status: u8) -> Self {
        Self {
            frame_control: FC_FRAME_TYPE_PROFILE
                | FC_DIRECTION_SERVER_TO_CLIENT
                | FC_DISABLE_DEFAULT_RESPONSE,
            manufacturer: None,
            sequence,
            command: CMD_DEFAULT_RESPONSE,
            payload: vec![command, status],
        }
    }

    pub fn is_cluster_command(&self) -> bool {
        self.frame_control & FC_FRAME_TYPE_MASK == FC_FRAME_TYPE_CLUSTER
    }

    pub fn is_profile_command(&self) -> bool {
        self.frame_control & FC_FRAME_TYPE_MASK == FC_FRAME_TYPE_PROFILE
    }

    pub fn is_default_response(&self) -> bool {
        self.is_profile_command() && self.command == CMD_DEFAULT_RESPONSE
    }

    pub fn disable_default_response(&self) -> bool {
        self.frame_control & FC_DISABLE_DEFAULT_RESPONSE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cluster_command() {
        // frame control | seq | cmd | payload
        let asdu = [0x01, 0x2A, 0x03, 0xDE, 0xAD];
        let frame = ZclFrame::parse(&asdu).unwrap();

        assert!(frame.is_cluster_command());
        assert_eq!(frame.manufacturer, None);
        assert_eq!(frame.sequence, 0x2A);
        assert_eq!(frame.command, 0x03);
        assert_eq!(frame.payload, vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_parse_manufacturer_specific() {
        let asdu = [0x05, 0x35, 0x11, 0x07, 0x00];
        let frame = ZclFrame::parse(&asdu).unwrap();

        assert_eq!(frame.manufacturer, Some(0x1135));
        assert_eq!(frame.sequence, 0x07);
        assert_eq!(frame.command, 0x00);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            ZclFrame::parse(&[0x01, 0x2A]),
            Err(ZclError::Truncated { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let frame = ZclFrame::server_response(0x10, 0x05, vec![0x00, 0x35, 0x11]);
        let parsed = ZclFrame::parse(&frame.to_bytes()).unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.disable_default_response());
    }

    #[test]
    fn test_default_response_shape() {
        let frame = ZclFrame::default_response(0x42, 0x06, 0x95);
        assert!(frame.is_default_response());
        assert_eq!(frame.payload, vec![0x06, 0x95]);

        let bytes = frame.to_bytes();
        assert_eq!(bytes, vec![0x18, 0x42, 0x0B, 0x06, 0x95]);
    }
}
