//! Device quirk policy
//!
//! A data table of per-device deviations from the standard conversation:
//! firmware lines that must not be offered an image, manufacturers whose
//! clients mis-handle particular status codes or payload sizes, and image
//! types needing the vendor watchdog restart. The table is consulted by the
//! catalog and the protocol engine; nothing here is control flow.

/// dresden elektronik manufacturer code.
pub const VENDOR_DDEL: u16 = 0x1135;
/// Legrand manufacturer code.
pub const VENDOR_LEGRAND: u16 = 0x1021;
/// Lumi/Xiaomi manufacturer code.
pub const VENDOR_LUMI: u16 = 0x115F;

/// FLS-PP3/H3 image type.
pub const IMG_TYPE_FLS_PP3_H3: u16 = 0x0000;
/// FLS-NB image type.
pub const IMG_TYPE_FLS_NB: u16 = 0x0002;
/// FLS-A2 image type.
pub const IMG_TYPE_FLS_A2: u16 = 0x0004;

/// An inclusive firmware version range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRange {
    pub min: u32,
    pub max: u32,
}

impl VersionRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, version: u32) -> bool {
        (self.min..=self.max).contains(&version)
    }
}

/// Never serve an image to clients running firmware in this range.
#[derive(Debug, Clone, Copy)]
pub struct Suppression {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub firmware: VersionRange,
}

/// Skip unicast image notifies for firmware below `below_version`.
#[derive(Debug, Clone, Copy)]
pub struct NotifyBlacklist {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub below_version: u32,
}

/// The assembled quirk table.
#[derive(Debug, Default)]
pub struct QuirkPolicy {
    suppressions: Vec<Suppression>,
    abort_fallback: Vec<u16>,
    payload_clamp: Vec<u16>,
    notify_blacklist: Vec<NotifyBlacklist>,
    watchdog_reset: Vec<(u16, u16)>,
}

impl QuirkPolicy {
    /// A policy with no quirks at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table of known device quirks.
    pub fn builtin() -> Self {
        Self {
            // FLS-H lp firmware must keep its current line; the newer image
            // is incompatible with these revisions.
            suppressions: vec![Suppression {
                manufacturer_code: VENDOR_DDEL,
                image_type: IMG_TYPE_FLS_PP3_H3,
                firmware: VersionRange::new(0x2000_0050, 0x2000_0054),
            }],
            // These clients re-query in a tight loop on NO_IMAGE_AVAILABLE;
            // only ABORT makes them back off.
            abort_fallback: vec![VENDOR_LEGRAND],
            // Known to drop block responses with more than 40 payload bytes.
            payload_clamp: vec![VENDOR_LUMI],
            // BitCloud 3.2/3.3 image-notify handling is broken below these
            // firmware revisions.
            notify_blacklist: vec![
                NotifyBlacklist {
                    manufacturer_code: VENDOR_DDEL,
                    image_type: IMG_TYPE_FLS_PP3_H3,
                    below_version: 0x2010_00C4,
                },
                NotifyBlacklist {
                    manufacturer_code: VENDOR_DDEL,
                    image_type: IMG_TYPE_FLS_A2,
                    below_version: 0x2010_00C4,
                },
                NotifyBlacklist {
                    manufacturer_code: VENDOR_DDEL,
                    image_type: IMG_TYPE_FLS_NB,
                    below_version: 0x2000_00C8,
                },
            ],
            // Restart only happens through the private write-RAM command.
            watchdog_reset: vec![(VENDOR_DDEL, IMG_TYPE_FLS_NB)],
        }
    }

    /// Must this client be refused an image outright?
    pub fn is_suppressed(&self, manufacturer_code: u16, image_type: u16, firmware: u32) -> bool {
        self.suppressions.iter().any(|s| {
            s.manufacturer_code == manufacturer_code
                && s.image_type == image_type
                && s.firmware.contains(firmware)
        })
    }

    /// Does this manufacturer need ABORT in place of NO_IMAGE_AVAILABLE?
    pub fn abort_instead_of_no_image(&self, manufacturer_code: u16) -> bool {
        self.abort_fallback.contains(&manufacturer_code)
    }

    /// Largest block payload this manufacturer's clients accept, if limited.
    pub fn payload_clamp(&self, manufacturer_code: u16) -> Option<u8> {
        if self.payload_clamp.contains(&manufacturer_code) {
            Some(crate::otau::SAFE_DATA_SIZE)
        } else {
            None
        }
    }

    /// Should a unicast image notify be withheld from this client?
    pub fn skip_unicast_notify(
        &self,
        manufacturer_code: u16,
        image_type: u16,
        firmware: u32,
    ) -> bool {
        self.notify_blacklist.iter().any(|b| {
            b.manufacturer_code == manufacturer_code
                && b.image_type == image_type
                && firmware < b.below_version
        })
    }

    /// Does this image type restart only via the vendor watchdog frame?
    pub fn needs_watchdog_reset(&self, manufacturer_code: u16, image_type: u16) -> bool {
        self.watchdog_reset
            .contains(&(manufacturer_code, image_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suppression_range_is_inclusive() {
        let q = QuirkPolicy::builtin();
        assert!(!q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_004F));
        assert!(q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0050));
        assert!(q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0054));
        assert!(!q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0055));
        assert!(!q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_A2, 0x2000_0052));
    }

    #[test]
    fn test_notify_blacklist_is_strictly_below() {
        let q = QuirkPolicy::builtin();
        assert!(q.skip_unicast_notify(VENDOR_DDEL, IMG_TYPE_FLS_NB, 0x2000_00C7));
        assert!(!q.skip_unicast_notify(VENDOR_DDEL, IMG_TYPE_FLS_NB, 0x2000_00C8));
    }

    #[test]
    fn test_manufacturer_fallbacks() {
        let q = QuirkPolicy::builtin();
        assert!(q.abort_instead_of_no_image(VENDOR_LEGRAND));
        assert!(!q.abort_instead_of_no_image(VENDOR_DDEL));
        assert_eq!(q.payload_clamp(VENDOR_LUMI), Some(40));
        assert_eq!(q.payload_clamp(VENDOR_DDEL), None);
        assert!(q.needs_watchdog_reset(VENDOR_DDEL, IMG_TYPE_FLS_NB));
    }

    #[test]
    fn test_empty_policy_has_no_opinions() {
        let q = QuirkPolicy::empty();
        assert!(!q.is_suppressed(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0052));
        assert!(!q.abort_instead_of_no_image(VENDOR_LEGRAND));
    }
}
