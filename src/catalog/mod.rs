//! On-disk image catalog
//!
//! Scans a directory of upgrade files, indexes them by
//! `(manufacturer, image type, file version)` and answers "best candidate"
//! queries for polling clients. File names follow the canonical
//! `MMMM-TTTT-VVVVVVVV[-suffix].zigbee` convention, uppercase hex.

mod quirks;

pub use quirks::*;

use crate::image::{wrap_raw_firmware, DecodeError, OtaImage};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("cannot derive image identity from file name: {0}")]
    UnrecognizedName(String),
}

/// Identity of a catalog image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageKey {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04X}-{:04X}-{:08X}",
            self.manufacturer_code, self.image_type, self.file_version
        )
    }
}

/// One indexed upgrade image.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub manufacturer_code: u16,
    pub image_type: u16,
    pub file_version: u32,
    pub path: PathBuf,
    pub image: OtaImage,
}

impl CatalogEntry {
    pub fn key(&self) -> ImageKey {
        ImageKey {
            manufacturer_code: self.manufacturer_code,
            image_type: self.image_type,
            file_version: self.file_version,
        }
    }
}

enum FileKind {
    Container,
    RawBlob,
}

fn classify(path: &Path) -> Result<FileKind, CatalogError> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let lower = name.to_ascii_lowercase();

    if lower.ends_with(".zigbee") || lower.ends_with(".ota") || lower.ends_with(".ota.signed") {
        Ok(FileKind::Container)
    } else if lower.ends_with(".bin") || lower.ends_with(".gcf") {
        Ok(FileKind::RawBlob)
    } else {
        Err(CatalogError::UnsupportedExtension(name.to_string()))
    }
}

/// Parse `MMMM-TTTT-VVVVVVVV` out of a catalog file name.
fn key_from_file_name(path: &Path) -> Option<ImageKey> {
    let stem = path.file_name()?.to_str()?.split('.').next()?;
    let mut parts = stem.split('-');

    let manufacturer_code = u16::from_str_radix(parts.next()?, 16).ok()?;
    let image_type = u16::from_str_radix(parts.next()?, 16).ok()?;
    let file_version = u32::from_str_radix(parts.next()?, 16).ok()?;

    Some(ImageKey {
        manufacturer_code,
        image_type,
        file_version,
    })
}

/// The image catalog.
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    quirks: QuirkPolicy,
}

impl Catalog {
    pub fn new(quirks: QuirkPolicy) -> Self {
        Self {
            entries: Vec::new(),
            quirks,
        }
    }

    /// A catalog carrying the built-in device quirk table.
    pub fn with_builtin_quirks() -> Self {
        Self::new(QuirkPolicy::builtin())
    }

    pub fn quirks(&self) -> &QuirkPolicy {
        &self.quirks
    }

    /// All indexed images, in insertion order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by identity.
    pub fn get(&self, key: ImageKey) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.key() == key)
    }

    /// Read, parse and index a single image file.
    ///
    /// Raw firmware blobs take their identity from the canonical file name;
    /// containers carry it in the header. A `.zigbee` alias with the
    /// canonical name is created next to the file when missing. Re-indexing
    /// the same identity replaces the earlier entry.
    pub fn index_image(&mut self, path: &Path) -> Result<ImageKey, CatalogError> {
        let buf = std::fs::read(path)?;

        let image = match classify(path)? {
            FileKind::Container => OtaImage::from_bytes(&buf)?,
            FileKind::RawBlob => {
                let key = key_from_file_name(path).ok_or_else(|| {
                    CatalogError::UnrecognizedName(path.display().to_string())
                })?;
                wrap_raw_firmware(
                    &buf,
                    key.manufacturer_code,
                    key.image_type,
                    key.file_version,
                )?
            }
        };

        let entry = CatalogEntry {
            manufacturer_code: image.manufacturer_code,
            image_type: image.image_type,
            file_version: image.file_version,
            path: path.to_path_buf(),
            image,
        };
        let key = entry.key();

        if let Err(e) = ensure_zigbee_alias(path, key) {
            log::warn!("cannot create catalog alias for {}: {}", path.display(), e);
        }

        if let Some(existing) = self.entries.iter_mut().find(|e| e.key() == key) {
            log::debug!("re-indexed image {}", key);
            *existing = entry;
        } else {
            log::info!(
                "indexed image {} ({} bytes) from {}",
                key,
                entry.image.serve_len(),
                path.display()
            );
            self.entries.push(entry);
        }

        Ok(key)
    }

    /// Index every acceptable file in `dir`. Files that fail to decode are
    /// logged and skipped; the count of indexed images is returned.
    pub fn scan(&mut self, dir: &Path) -> Result<usize, CatalogError> {
        let mut indexed = 0;

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|res| res.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        for path in paths {
            match self.index_image(&path) {
                Ok(_) => indexed += 1,
                Err(CatalogError::UnsupportedExtension(_)) => {}
                Err(e) => {
                    log::warn!("skipping {}: {}", path.display(), e);
                }
            }
        }

        Ok(indexed)
    }

    /// The best upgrade candidate for a client reporting
    /// `(manufacturer, image type, software version)`: the matching entry
    /// with the greatest file version strictly above the client's, earliest
    /// indexed on ties. Quirk suppressions apply after selection.
    pub fn best_for(
        &self,
        manufacturer_code: u16,
        image_type: u16,
        software_version: u32,
    ) -> Option<&CatalogEntry> {
        let mut best: Option<&CatalogEntry> = None;

        for entry in &self.entries {
            if entry.manufacturer_code != manufacturer_code || entry.image_type != image_type {
                continue;
            }
            if entry.file_version <= software_version {
                continue;
            }
            match best {
                Some(b) if entry.file_version <= b.file_version => {}
                _ => best = Some(entry),
            }
        }

        let best = best?;
        if self
            .quirks
            .is_suppressed(manufacturer_code, image_type, software_version)
        {
            log::debug!(
                "candidate {} suppressed for firmware 0x{:08X}",
                best.key(),
                software_version
            );
            return None;
        }

        Some(best)
    }
}

/// Make sure a canonically named `.zigbee` alias for `path` exists in the
/// same directory. Does nothing when `path` already carries the canonical
/// name or the alias is present.
fn ensure_zigbee_alias(path: &Path, key: ImageKey) -> std::io::Result<()> {
    let canonical = format!("{}.zigbee", key);

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if file_name == canonical {
        return Ok(());
    }

    let alias = path.with_file_name(&canonical);
    if alias.exists() {
        return Ok(());
    }

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(path.file_name().unwrap_or_default(), &alias)?;
    }
    #[cfg(not(unix))]
    {
        std::fs::copy(path, &alias)?;
    }

    log::debug!("created catalog alias {}", alias.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{SubElement, TAG_UPGRADE_IMAGE};
    use tempfile::tempdir;

    fn make_image(manufacturer_code: u16, image_type: u16, file_version: u32) -> OtaImage {
        let mut img = OtaImage {
            manufacturer_code,
            image_type,
            file_version,
            sub_elements: vec![SubElement {
                tag: TAG_UPGRADE_IMAGE,
                length: 32,
                data: vec![0x42; 32],
                truncated: false,
            }],
            ..OtaImage::default()
        };
        img.finalize();
        img
    }

    fn write_image(dir: &Path, name: &str, img: &OtaImage) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, &img.raw).unwrap();
        path
    }

    #[test]
    fn test_index_container_and_alias() {
        let dir = tempdir().unwrap();
        let img = make_image(0x1135, 0x0004, 0x0000_0200);
        let path = write_image(dir.path(), "fls-a2-update.zigbee", &img);

        let mut catalog = Catalog::new(QuirkPolicy::empty());
        let key = catalog.index_image(&path).unwrap();

        assert_eq!(key.to_string(), "1135-0004-00000200");
        assert!(dir.path().join("1135-0004-00000200.zigbee").exists());
        assert_eq!(catalog.len(), 1);

        // second pass is idempotent
        catalog.index_image(&path).unwrap();
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_index_raw_blob_takes_identity_from_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1135-0002-200000C8-FLS-NB.bin");
        std::fs::write(&path, vec![0x5A; 64]).unwrap();

        let mut catalog = Catalog::new(QuirkPolicy::empty());
        let key = catalog.index_image(&path).unwrap();

        assert_eq!(key.manufacturer_code, 0x1135);
        assert_eq!(key.image_type, 0x0002);
        assert_eq!(key.file_version, 0x2000_00C8);

        let entry = catalog.get(key).unwrap();
        assert!(entry.image.upgrade_image().is_some());
    }

    #[test]
    fn test_index_raw_blob_without_identity_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("firmware.bin");
        std::fs::write(&path, vec![0u8; 16]).unwrap();

        let mut catalog = Catalog::new(QuirkPolicy::empty());
        assert!(matches!(
            catalog.index_image(&path),
            Err(CatalogError::UnrecognizedName(_))
        ));
    }

    #[test]
    fn test_scan_skips_invalid_files() {
        let dir = tempdir().unwrap();
        write_image(
            dir.path(),
            "1135-0004-00000200.zigbee",
            &make_image(0x1135, 0x0004, 0x0000_0200),
        );
        std::fs::write(dir.path().join("junk.zigbee"), b"not an image").unwrap();
        std::fs::write(dir.path().join("README.txt"), b"ignored").unwrap();

        let mut catalog = Catalog::new(QuirkPolicy::empty());
        let indexed = catalog.scan(dir.path()).unwrap();

        assert_eq!(indexed, 1);
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn test_best_for_picks_greatest_strictly_newer() {
        let mut catalog = Catalog::new(QuirkPolicy::empty());
        for (ver, name) in [(0x100u32, "a"), (0x300, "b"), (0x200, "c")] {
            let img = make_image(0x1135, 0x0004, ver);
            catalog.entries.push(CatalogEntry {
                manufacturer_code: 0x1135,
                image_type: 0x0004,
                file_version: ver,
                path: PathBuf::from(name),
                image: img,
            });
        }

        let best = catalog.best_for(0x1135, 0x0004, 0x0000_0100).unwrap();
        assert_eq!(best.file_version, 0x300);

        // strictly greater: a client already on the newest gets nothing
        assert!(catalog.best_for(0x1135, 0x0004, 0x300).is_none());
        // no cross-matching on manufacturer or type
        assert!(catalog.best_for(0x1135, 0x0008, 0).is_none());
        assert!(catalog.best_for(0x100B, 0x0004, 0).is_none());
    }

    #[test]
    fn test_best_for_stable_on_ties() {
        let mut catalog = Catalog::new(QuirkPolicy::empty());
        for name in ["first", "second"] {
            catalog.entries.push(CatalogEntry {
                manufacturer_code: 1,
                image_type: 1,
                file_version: 2,
                path: PathBuf::from(name),
                image: make_image(1, 1, 2),
            });
        }

        let best = catalog.best_for(1, 1, 1).unwrap();
        assert_eq!(best.path, PathBuf::from("first"));
    }

    #[test]
    fn test_best_for_applies_suppression() {
        let mut catalog = Catalog::with_builtin_quirks();
        catalog.entries.push(CatalogEntry {
            manufacturer_code: VENDOR_DDEL,
            image_type: IMG_TYPE_FLS_PP3_H3,
            file_version: 0x2001_0000,
            path: PathBuf::from("img"),
            image: make_image(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2001_0000),
        });

        // firmware inside the suppressed range gets nothing
        assert!(catalog
            .best_for(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0052)
            .is_none());
        // outside the range the image is served
        assert!(catalog
            .best_for(VENDOR_DDEL, IMG_TYPE_FLS_PP3_H3, 0x2000_0060)
            .is_some());
    }
}
