//! OTA container types and constants

/// Upgrade file magic number (`1E F1 EE 0B` on the wire).
pub const UPGRADE_FILE_MAGIC: u32 = 0x0BEE_F11E;

/// Current header version (major 01, minor 00).
pub const HEADER_VERSION: u16 = 0x0100;

/// Size of the mandatory header fields.
pub const MANDATORY_HEADER_LENGTH: u16 = 56;

/// Size of a sub-element frame header (tag + length).
pub const SUB_ELEMENT_HEADER_LENGTH: usize = 6;

/// Header field control: security credential version present.
pub const FC_SECURITY_CREDENTIAL_VERSION: u16 = 0x0001;
/// Header field control: upgrade file destination present.
pub const FC_DEVICE_SPECIFIC: u16 = 0x0002;
/// Header field control: min/max hardware version present.
pub const FC_HARDWARE_VERSION: u16 = 0x0004;

/// All field control bits this implementation understands.
pub const FC_KNOWN_BITS: u16 =
    FC_SECURITY_CREDENTIAL_VERSION | FC_DEVICE_SPECIFIC | FC_HARDWARE_VERSION;

/// Sub-element tag carrying the upgrade image itself.
pub const TAG_UPGRADE_IMAGE: u16 = 0x0000;
/// Sub-element tag for an ECDSA signature.
pub const TAG_ECDSA_SIGNATURE: u16 = 0x0001;
/// Sub-element tag for an ECDSA signing certificate.
pub const TAG_ECDSA_CERTIFICATE: u16 = 0x0002;

/// A tagged sub-element of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubElement {
    /// Tag; `0x0000` is the upgrade image, `0xf000..=0xffff` manufacturer
    /// specific.
    pub tag: u16,
    /// Declared payload length. May exceed `data.len()` when the input was
    /// shorter than the declaration.
    pub length: u32,
    /// Payload bytes actually present.
    pub data: Vec<u8>,
    /// Declared length ran past the end of the input.
    pub truncated: bool,
}

/// A parsed ZigBee OTA upgrade container.
///
/// The serialized byte form is retained in `raw` so block responses can
/// slice payload data without re-serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaImage {
    pub header_version: u16,
    pub header_length: u16,
    pub field_control: u16,
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub zigbee_stack_version: u16,
    pub header_string: [u8; 32],
    /// Total on-wire size including the header and all sub-element frames.
    pub total_image_size: u32,

    pub security_credential_version: Option<u8>,
    pub upgrade_file_destination: Option<u64>,
    /// `(min, max)` hardware version range.
    pub hardware_version: Option<(u16, u16)>,

    pub sub_elements: Vec<SubElement>,

    /// The container bytes as served over the air.
    pub raw: Vec<u8>,
}

impl Default for OtaImage {
    fn default() -> Self {
        Self {
            header_version: HEADER_VERSION,
            header_length: MANDATORY_HEADER_LENGTH,
            field_control: 0,
            manufacturer_code: 0,
            image_type: 0,
            file_version: 0,
            zigbee_stack_version: ZIGBEE_STACK_PRO,
            header_string: [0; 32],
            total_image_size: 0,
            security_credential_version: None,
            upgrade_file_destination: None,
            hardware_version: None,
            sub_elements: Vec::new(),
            raw: Vec::new(),
        }
    }
}

/// ZigBee PRO stack version field value.
pub const ZIGBEE_STACK_PRO: u16 = 0x0002;

impl OtaImage {
    /// The header string as printable text, trailing NULs and spaces trimmed.
    pub fn header_text(&self) -> String {
        let text: String = self
            .header_string
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            })
            .collect();
        text.trim_end().to_string()
    }

    /// Set the header string from text, truncated/padded to 32 bytes.
    pub fn set_header_text(&mut self, text: &str) {
        self.header_string = [0; 32];
        for (dst, src) in self.header_string.iter_mut().zip(text.bytes()) {
            *dst = src;
        }
    }

    /// Number of bytes available to serve, which for a well-formed file
    /// equals `total_image_size`.
    pub fn serve_len(&self) -> u32 {
        self.raw.len() as u32
    }

    /// The upgrade image sub-element, if present.
    pub fn upgrade_image(&self) -> Option<&SubElement> {
        self.sub_elements.iter().find(|s| s.tag == TAG_UPGRADE_IMAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_text_round_trip() {
        let mut img = OtaImage::default();
        img.set_header_text("FLS-A2 firmware");
        assert_eq!(img.header_text(), "FLS-A2 firmware");
        assert_eq!(img.header_string[31], 0);
    }

    #[test]
    fn test_header_text_truncates_to_32() {
        let mut img = OtaImage::default();
        img.set_header_text("0123456789012345678901234567890123456789");
        assert_eq!(img.header_text().len(), 32);
    }
}
