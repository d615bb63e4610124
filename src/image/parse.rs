//! OTA container parsing

use super::types::*;
use super::DecodeError;
use crate::wire::Reader;

/// Locate the container magic within `buf`.
///
/// Some upstream tooling prepends vendor headers to `.ota` files, so the
/// magic is searched for instead of being required at offset zero.
fn find_magic(buf: &[u8]) -> Option<usize> {
    let magic = UPGRADE_FILE_MAGIC.to_le_bytes();
    buf.windows(magic.len()).position(|w| w == magic)
}

/// Parse an OTA upgrade container from `buf`.
///
/// Bytes preceding the magic are discarded; everything from the magic onward
/// is retained as the serve-able raw form. A sub-element whose declared
/// length runs past the end of the input is kept with the available bytes
/// and marked truncated.
pub fn from_bytes(buf: &[u8]) -> Result<OtaImage, DecodeError> {
    let offset = find_magic(buf).ok_or(DecodeError::MalformedHeader("magic number not found"))?;

    let container = &buf[offset..];
    let mut r = Reader::new(container);

    let _magic = r.u32()?;
    let header_version = r.u16()?;
    let header_length = r.u16()?;

    if header_length < MANDATORY_HEADER_LENGTH {
        return Err(DecodeError::MalformedHeader("header length below minimum"));
    }

    let field_control = r.u16()?;
    if field_control & !FC_KNOWN_BITS != 0 {
        return Err(DecodeError::MalformedHeader("unknown field control bits"));
    }

    let manufacturer_code = r.u16()?;
    let image_type = r.u16()?;
    let file_version = r.u32()?;
    let zigbee_stack_version = r.u16()?;

    let mut header_string = [0u8; 32];
    header_string.copy_from_slice(r.bytes(32)?);

    let total_image_size = r.u32()?;

    let mut processed = MANDATORY_HEADER_LENGTH as usize;

    let security_credential_version = if field_control & FC_SECURITY_CREDENTIAL_VERSION != 0 {
        processed += 1;
        Some(r.u8()?)
    } else {
        None
    };

    let upgrade_file_destination = if field_control & FC_DEVICE_SPECIFIC != 0 {
        processed += 8;
        Some(r.u64()?)
    } else {
        None
    };

    let hardware_version = if field_control & FC_HARDWARE_VERSION != 0 {
        processed += 4;
        let min = r.u16()?;
        let max = r.u16()?;
        Some((min, max))
    } else {
        None
    };

    if (header_length as usize) < processed {
        return Err(DecodeError::MalformedHeader(
            "header length contradicts field control",
        ));
    }

    // Skip header bytes beyond the fields this implementation understands.
    r.skip(header_length as usize - processed)?;

    let mut sub_elements = Vec::new();

    while r.remaining() >= SUB_ELEMENT_HEADER_LENGTH {
        let start = r.position();
        let tag = r.u16()?;
        let length = r.u32()?;

        let size = (length as usize).min(r.remaining());
        let truncated = size < length as usize;
        let data = r.bytes(size)?.to_vec();

        if truncated {
            log::debug!(
                "sub-element at offset {}: tag 0x{:04X} declares {} bytes, only {} present",
                start,
                tag,
                length,
                size
            );
        }

        sub_elements.push(SubElement {
            tag,
            length,
            data,
            truncated,
        });
    }

    if !r.is_empty() {
        log::debug!("ignoring {} trailing container bytes", r.remaining());
    }

    if sub_elements.is_empty() {
        return Err(DecodeError::NoSubElements);
    }

    Ok(OtaImage {
        header_version,
        header_length,
        field_control,
        manufacturer_code,
        image_type,
        file_version,
        zigbee_stack_version,
        header_string,
        total_image_size,
        security_credential_version,
        upgrade_file_destination,
        hardware_version,
        sub_elements,
        raw: container.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{put_u16, put_u32, put_u64, put_u8};

    /// A minimal container: mandatory header and one upgrade-image element.
    pub fn minimal_container(payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, UPGRADE_FILE_MAGIC);
        put_u16(&mut buf, HEADER_VERSION);
        put_u16(&mut buf, MANDATORY_HEADER_LENGTH);
        put_u16(&mut buf, 0); // field control
        put_u16(&mut buf, 0x1135); // manufacturer
        put_u16(&mut buf, 0x0004); // image type
        put_u32(&mut buf, 0x0000_0200); // file version
        put_u16(&mut buf, ZIGBEE_STACK_PRO);
        buf.extend_from_slice(&[b' '; 32]);
        let total = MANDATORY_HEADER_LENGTH as u32
            + SUB_ELEMENT_HEADER_LENGTH as u32
            + payload.len() as u32;
        put_u32(&mut buf, total);
        put_u16(&mut buf, TAG_UPGRADE_IMAGE);
        put_u32(&mut buf, payload.len() as u32);
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_parse_minimal() {
        let buf = minimal_container(&[1, 2, 3, 4]);
        let img = from_bytes(&buf).unwrap();

        assert_eq!(img.manufacturer_code, 0x1135);
        assert_eq!(img.image_type, 0x0004);
        assert_eq!(img.file_version, 0x0000_0200);
        assert_eq!(img.total_image_size, buf.len() as u32);
        assert_eq!(img.sub_elements.len(), 1);
        assert_eq!(img.sub_elements[0].tag, TAG_UPGRADE_IMAGE);
        assert_eq!(img.sub_elements[0].data, vec![1, 2, 3, 4]);
        assert!(!img.sub_elements[0].truncated);
        assert_eq!(img.raw, buf);
    }

    #[test]
    fn test_parse_tolerates_prefix_before_magic() {
        let container = minimal_container(&[9, 9, 9]);
        // 256 junk bytes that cannot contain the magic
        let mut buf = vec![0xEEu8; 256];
        buf.extend_from_slice(&container);

        let img = from_bytes(&buf).unwrap();
        assert_eq!(img.sub_elements[0].data, vec![9, 9, 9]);
        assert_eq!(img.raw, container);
    }

    #[test]
    fn test_parse_missing_magic() {
        let buf = vec![0u8; 128];
        assert!(matches!(
            from_bytes(&buf),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_rejects_short_header_length() {
        let mut buf = minimal_container(&[1]);
        buf[6..8].copy_from_slice(&40u16.to_le_bytes());
        assert!(matches!(
            from_bytes(&buf),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_field_control() {
        let mut buf = minimal_container(&[1]);
        buf[8..10].copy_from_slice(&0x0010u16.to_le_bytes());
        assert!(matches!(
            from_bytes(&buf),
            Err(DecodeError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_parse_no_sub_elements() {
        let buf = minimal_container(&[]);
        // keep only the header
        let header = &buf[..MANDATORY_HEADER_LENGTH as usize];
        assert!(matches!(from_bytes(header), Err(DecodeError::NoSubElements)));
    }

    #[test]
    fn test_parse_truncated_sub_element_is_marked() {
        let mut buf = minimal_container(&[0xAA; 16]);
        // declare more payload than is present
        let len_off = buf.len() - 16 - 4;
        buf[len_off..len_off + 4].copy_from_slice(&64u32.to_le_bytes());

        let img = from_bytes(&buf).unwrap();
        assert_eq!(img.sub_elements.len(), 1);
        let sub = &img.sub_elements[0];
        assert!(sub.truncated);
        assert_eq!(sub.length, 64);
        assert_eq!(sub.data.len(), 16);
    }

    #[test]
    fn test_parse_optional_fields() {
        let mut buf = Vec::new();
        put_u32(&mut buf, UPGRADE_FILE_MAGIC);
        put_u16(&mut buf, HEADER_VERSION);
        put_u16(&mut buf, MANDATORY_HEADER_LENGTH + 1 + 8 + 4);
        put_u16(&mut buf, FC_KNOWN_BITS);
        put_u16(&mut buf, 0x1135);
        put_u16(&mut buf, 0x0002);
        put_u32(&mut buf, 0x2000_00C8);
        put_u16(&mut buf, ZIGBEE_STACK_PRO);
        buf.extend_from_slice(&[0; 32]);
        put_u32(&mut buf, 0); // total size, not validated here
        put_u8(&mut buf, 0x02); // security credential: SE 2.0
        put_u64(&mut buf, 0x0021_2EFF_FF00_1122);
        put_u16(&mut buf, 1); // min hw
        put_u16(&mut buf, 3); // max hw
        put_u16(&mut buf, TAG_UPGRADE_IMAGE);
        put_u32(&mut buf, 2);
        buf.extend_from_slice(&[0xCA, 0xFE]);

        let img = from_bytes(&buf).unwrap();
        assert_eq!(img.security_credential_version, Some(0x02));
        assert_eq!(img.upgrade_file_destination, Some(0x0021_2EFF_FF00_1122));
        assert_eq!(img.hardware_version, Some((1, 3)));
    }
}
