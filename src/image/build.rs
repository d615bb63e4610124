//! OTA container serialization

use super::types::*;
use super::DecodeError;
use crate::wire::{put_u16, put_u32, put_u64, put_u8};

/// Header length implied by the optional fields present on `img`.
pub(super) fn computed_header_length(img: &OtaImage) -> u16 {
    let mut len = MANDATORY_HEADER_LENGTH;
    if img.security_credential_version.is_some() {
        len += 1;
    }
    if img.upgrade_file_destination.is_some() {
        len += 8;
    }
    if img.hardware_version.is_some() {
        len += 4;
    }
    len
}

/// Serialize `img` into its on-wire little-endian form.
///
/// `header_length` and `total_image_size` are recomputed from the fields and
/// sub-elements actually present; the values stored on `img` are ignored.
pub fn to_bytes(img: &OtaImage) -> Vec<u8> {
    let header_length = computed_header_length(img);

    let mut total = header_length as u32;
    for sub in &img.sub_elements {
        total += SUB_ELEMENT_HEADER_LENGTH as u32 + sub.data.len() as u32;
    }

    let mut field_control = 0u16;
    if img.security_credential_version.is_some() {
        field_control |= FC_SECURITY_CREDENTIAL_VERSION;
    }
    if img.upgrade_file_destination.is_some() {
        field_control |= FC_DEVICE_SPECIFIC;
    }
    if img.hardware_version.is_some() {
        field_control |= FC_HARDWARE_VERSION;
    }

    let mut buf = Vec::with_capacity(total as usize);

    put_u32(&mut buf, UPGRADE_FILE_MAGIC);
    put_u16(&mut buf, img.header_version);
    put_u16(&mut buf, header_length);
    put_u16(&mut buf, field_control);
    put_u16(&mut buf, img.manufacturer_code);
    put_u16(&mut buf, img.image_type);
    put_u32(&mut buf, img.file_version);
    put_u16(&mut buf, img.zigbee_stack_version);
    buf.extend_from_slice(&img.header_string);
    put_u32(&mut buf, total);

    if let Some(v) = img.security_credential_version {
        put_u8(&mut buf, v);
    }
    if let Some(v) = img.upgrade_file_destination {
        put_u64(&mut buf, v);
    }
    if let Some((min, max)) = img.hardware_version {
        put_u16(&mut buf, min);
        put_u16(&mut buf, max);
    }

    for sub in &img.sub_elements {
        put_u16(&mut buf, sub.tag);
        put_u32(&mut buf, sub.data.len() as u32);
        buf.extend_from_slice(&sub.data);
    }

    buf
}

/// Wrap a raw firmware blob (`.bin`, `.GCF`) into a container with a single
/// upgrade-image sub-element.
///
/// The payload uses the BitCloud internal layout: `mem_offset (u32)`,
/// `length (u32)`, the raw bytes, and a trailing CRC-8 placeholder.
pub fn wrap_raw_firmware(
    raw: &[u8],
    manufacturer_code: u16,
    image_type: u16,
    file_version: u32,
) -> Result<OtaImage, DecodeError> {
    if raw.is_empty() {
        return Err(DecodeError::NoSubElements);
    }

    let mut data = Vec::with_capacity(raw.len() + 10);
    put_u32(&mut data, 0); // mem offset
    put_u32(&mut data, raw.len() as u32 + 1); // length incl. end marker
    data.extend_from_slice(raw);
    put_u8(&mut data, 0x77); // end marker
    put_u8(&mut data, 0); // crc8 placeholder

    let length = data.len() as u32;

    let mut img = OtaImage {
        manufacturer_code,
        image_type,
        file_version,
        sub_elements: vec![SubElement {
            tag: TAG_UPGRADE_IMAGE,
            length,
            data,
            truncated: false,
        }],
        ..OtaImage::default()
    };

    img.finalize();
    Ok(img)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image() -> OtaImage {
        let mut img = OtaImage {
            manufacturer_code: 0x1135,
            image_type: 0x0004,
            file_version: 0x0000_0200,
            hardware_version: Some((1, 2)),
            sub_elements: vec![
                SubElement {
                    tag: TAG_UPGRADE_IMAGE,
                    length: 8,
                    data: vec![0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33],
                    truncated: false,
                },
                SubElement {
                    tag: 0xF000,
                    length: 2,
                    data: vec![0xAA, 0xBB],
                    truncated: false,
                },
            ],
            ..OtaImage::default()
        };
        img.set_header_text("unit test image");
        img
    }

    #[test]
    fn test_round_trip() {
        let mut img = sample_image();
        img.finalize();

        let parsed = OtaImage::from_bytes(&img.raw).unwrap();
        assert_eq!(parsed, img);
    }

    #[test]
    fn test_sizes_are_canonicalized() {
        let mut img = sample_image();
        img.finalize();

        // 56 + 4 (hardware range), two sub-element frames
        assert_eq!(img.header_length, 60);
        assert_eq!(img.total_image_size, 60 + 6 + 8 + 6 + 2);
        assert_eq!(img.raw.len() as u32, img.total_image_size);
    }

    #[test]
    fn test_wrap_raw_firmware() {
        let raw = vec![0x5A; 100];
        let img = wrap_raw_firmware(&raw, 0x1135, 0x0002, 0x2000_00C8).unwrap();

        assert_eq!(img.manufacturer_code, 0x1135);
        let sub = img.upgrade_image().unwrap();
        // mem offset + length + payload + end marker + crc
        assert_eq!(sub.data.len(), 4 + 4 + 100 + 1 + 1);
        assert_eq!(&sub.data[..4], &[0, 0, 0, 0]);
        assert_eq!(&sub.data[4..8], &101u32.to_le_bytes());
        assert_eq!(sub.data[sub.data.len() - 2], 0x77);

        let parsed = OtaImage::from_bytes(&img.raw).unwrap();
        assert_eq!(parsed.file_version, 0x2000_00C8);
    }

    #[test]
    fn test_wrap_empty_blob_rejected() {
        assert!(wrap_raw_firmware(&[], 0, 0, 0).is_err());
    }
}
