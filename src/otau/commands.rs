//! OTA cluster command payloads
//!
//! Parsing for the client-initiated requests and building for the server
//! responses. All fields little-endian.

use super::{PayloadError, Status, FC_HW_VERSION_PRESENT, FC_IEEE_PRESENT};
use crate::wire::{put_u16, put_u32, put_u8, Reader};

/// QueryNextImageRequest (0x01)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNextImageRequest {
    pub field_control: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub hardware_version: Option<u16>,
}

impl QueryNextImageRequest {
    /// Parse the payload; length must be 9 or 11 bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        if payload.len() != 9 && payload.len() != 11 {
            return Err(PayloadError::InvalidLength {
                expected: "9 or 11",
                actual: payload.len(),
            });
        }

        let mut r = Reader::new(payload);
        let field_control = r.u8()?;
        let manufacturer_code = r.u16()?;
        let image_type = r.u16()?;
        let file_version = r.u32()?;
        let hardware_version = if field_control & FC_HW_VERSION_PRESENT != 0 {
            Some(r.u16()?)
        } else {
            None
        };

        Ok(Self {
            field_control,
            manufacturer_code,
            image_type,
            file_version,
            hardware_version,
        })
    }
}

/// QueryNextImageResponse (0x02) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryNextImageResponse {
    pub status: Status,
    /// Present only for [`Status::Success`].
    pub image: Option<ImageAnnouncement>,
}

/// The image metadata announced in a successful query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAnnouncement {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub total_image_size: u32,
}

impl QueryNextImageResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13);
        put_u8(&mut buf, self.status as u8);
        if let Some(img) = self.image {
            put_u16(&mut buf, img.manufacturer_code);
            put_u16(&mut buf, img.image_type);
            put_u32(&mut buf, img.file_version);
            put_u32(&mut buf, img.total_image_size);
        }
        buf
    }
}

/// ImageBlockRequest (0x03)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlockRequest {
    pub field_control: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub offset: u32,
    pub max_data_size: u8,
    pub node_address: Option<u64>,
}

impl ImageBlockRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new(payload);
        let field_control = r.u8()?;
        let manufacturer_code = r.u16()?;
        let image_type = r.u16()?;
        let file_version = r.u32()?;
        let offset = r.u32()?;
        let max_data_size = r.u8()?;
        let node_address = if field_control & FC_IEEE_PRESENT != 0 {
            Some(r.u64()?)
        } else {
            None
        };

        Ok(Self {
            field_control,
            manufacturer_code,
            image_type,
            file_version,
            offset,
            max_data_size,
            node_address,
        })
    }
}

/// ImagePageRequest (0x04)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePageRequest {
    pub field_control: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub offset: u32,
    pub max_data_size: u8,
    pub page_size: u16,
    pub response_spacing: u16,
    pub node_address: Option<u64>,
}

impl ImagePageRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new(payload);
        let field_control = r.u8()?;
        let manufacturer_code = r.u16()?;
        let image_type = r.u16()?;
        let file_version = r.u32()?;
        let offset = r.u32()?;
        let max_data_size = r.u8()?;
        let page_size = r.u16()?;
        let response_spacing = r.u16()?;
        let node_address = if field_control & FC_IEEE_PRESENT != 0 {
            Some(r.u64()?)
        } else {
            None
        };

        Ok(Self {
            field_control,
            manufacturer_code,
            image_type,
            file_version,
            offset,
            max_data_size,
            page_size,
            response_spacing,
            node_address,
        })
    }
}

/// ImageBlockResponse (0x05) body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlockResponse {
    pub status: Status,
    /// Present only for [`Status::Success`].
    pub block: Option<ImageBlock>,
}

/// The data portion of a successful block response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlock {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub offset: u32,
    pub data: Vec<u8>,
}

impl ImageBlockResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            14 + self.block.as_ref().map_or(0, |b| b.data.len()),
        );
        put_u8(&mut buf, self.status as u8);
        if let Some(block) = &self.block {
            put_u16(&mut buf, block.manufacturer_code);
            put_u16(&mut buf, block.image_type);
            put_u32(&mut buf, block.file_version);
            put_u32(&mut buf, block.offset);
            put_u8(&mut buf, block.data.len() as u8);
            buf.extend_from_slice(&block.data);
        }
        buf
    }
}

/// UpgradeEndRequest (0x06)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeEndRequest {
    pub status: u8,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}

impl UpgradeEndRequest {
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        let mut r = Reader::new(payload);
        let status = r.u8()?;
        let manufacturer_code = r.u16()?;
        let image_type = r.u16()?;
        let file_version = r.u32()?;

        Ok(Self {
            status,
            manufacturer_code,
            image_type,
            file_version,
        })
    }
}

/// UpgradeEndResponse (0x07) body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeEndResponse {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub current_time: u32,
    pub upgrade_time: u32,
}

impl UpgradeEndResponse {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        put_u16(&mut buf, self.manufacturer_code);
        put_u16(&mut buf, self.image_type);
        put_u32(&mut buf, self.file_version);
        put_u32(&mut buf, self.current_time);
        put_u32(&mut buf, self.upgrade_time);
        buf
    }
}

/// ImageNotify (0x00) payload: query-jitter form only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageNotify;

impl ImageNotify {
    /// Payload type 0 (query jitter only) with the maximum jitter value, so
    /// every receiver answers.
    pub const PAYLOAD_TYPE: u8 = 0x00;
    pub const QUERY_JITTER: u8 = 100;

    pub fn to_bytes(&self) -> Vec<u8> {
        vec![Self::PAYLOAD_TYPE, Self::QUERY_JITTER]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_next_image_request_lengths() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&0x1135u16.to_le_bytes());
        payload.extend_from_slice(&0x0004u16.to_le_bytes());
        payload.extend_from_slice(&0x0000_0100u32.to_le_bytes());

        let req = QueryNextImageRequest::parse(&payload).unwrap();
        assert_eq!(req.manufacturer_code, 0x1135);
        assert_eq!(req.hardware_version, None);

        payload[0] = FC_HW_VERSION_PRESENT;
        payload.extend_from_slice(&0x0102u16.to_le_bytes());
        let req = QueryNextImageRequest::parse(&payload).unwrap();
        assert_eq!(req.hardware_version, Some(0x0102));

        payload.push(0);
        assert!(matches!(
            QueryNextImageRequest::parse(&payload),
            Err(PayloadError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_block_request_with_ieee() {
        let mut payload = vec![FC_IEEE_PRESENT];
        payload.extend_from_slice(&0x1135u16.to_le_bytes());
        payload.extend_from_slice(&0x0004u16.to_le_bytes());
        payload.extend_from_slice(&0x0000_0200u32.to_le_bytes());
        payload.extend_from_slice(&0x0000_0400u32.to_le_bytes()); // offset
        payload.push(64);
        payload.extend_from_slice(&0x0021_2EFF_FF01_2345u64.to_le_bytes());

        let req = ImageBlockRequest::parse(&payload).unwrap();
        assert_eq!(req.offset, 0x0000_0400);
        assert_eq!(req.max_data_size, 64);
        assert_eq!(req.node_address, Some(0x0021_2EFF_FF01_2345));
    }

    #[test]
    fn test_page_request_field_order() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&0x1135u16.to_le_bytes());
        payload.extend_from_slice(&0x0004u16.to_le_bytes());
        payload.extend_from_slice(&0x0000_0200u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.push(64);
        payload.extend_from_slice(&1024u16.to_le_bytes());
        payload.extend_from_slice(&50u16.to_le_bytes());

        let req = ImagePageRequest::parse(&payload).unwrap();
        assert_eq!(req.page_size, 1024);
        assert_eq!(req.response_spacing, 50);
        assert_eq!(req.node_address, None);
    }

    #[test]
    fn test_block_response_bytes() {
        let rsp = ImageBlockResponse {
            status: Status::Success,
            block: Some(ImageBlock {
                manufacturer_code: 0x1135,
                image_type: 0x0004,
                file_version: 0x0000_0200,
                offset: 0x0000_0040,
                data: vec![0xAB, 0xCD],
            }),
        };

        let bytes = rsp.to_bytes();
        assert_eq!(bytes.len(), 14 + 2);
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[13], 2); // data size
        assert_eq!(&bytes[14..], &[0xAB, 0xCD]);

        let abort = ImageBlockResponse {
            status: Status::Abort,
            block: None,
        };
        assert_eq!(abort.to_bytes(), vec![0x95]);
    }

    #[test]
    fn test_upgrade_end_round_trip() {
        let mut payload = vec![0x00];
        payload.extend_from_slice(&0x1135u16.to_le_bytes());
        payload.extend_from_slice(&0x0004u16.to_le_bytes());
        payload.extend_from_slice(&0x0000_0200u32.to_le_bytes());

        let req = UpgradeEndRequest::parse(&payload).unwrap();
        assert_eq!(req.status, 0x00);
        assert_eq!(req.file_version, 0x0000_0200);

        let rsp = UpgradeEndResponse {
            manufacturer_code: req.manufacturer_code,
            image_type: req.image_type,
            file_version: req.file_version,
            current_time: 0,
            upgrade_time: 5,
        };
        let bytes = rsp.to_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[12..16], &5u32.to_le_bytes());
    }

    #[test]
    fn test_image_notify_payload() {
        assert_eq!(ImageNotify.to_bytes(), vec![0x00, 100]);
    }
}
