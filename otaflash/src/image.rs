//! Firmware images.
//!
//! The protocol sends images as opaque bytes; this module only loads them,
//! reports their packet geometry and builds test images.

use crate::error::Result;
use crate::session::packet_count;
use log::debug;
use std::fs;
use std::path::Path;

/// Largest image the device accepts.
pub const MAX_FIRMWARE_SIZE: usize = 1024 * 1024;

/// A raw firmware image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let data = fs::read(path)?;
        debug!("Loaded {} bytes", data.len());

        Ok(Self::from_bytes(data))
    }

    /// Wrap image bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Packets needed to send this image.
    pub fn packet_count(&self) -> usize {
        packet_count(self.data.len())
    }

    /// Whether the device will accept an image this size.
    pub fn fits_device(&self) -> bool {
        !self.data.is_empty() && self.data.len() <= MAX_FIRMWARE_SIZE
    }

    /// Consume the image and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Deterministic test image of `size` bytes.
///
/// Byte `i` is `0xAA` every 256 bytes, `0x55` on the remaining 128-byte
/// boundaries and `i % 256` elsewhere.
#[allow(clippy::cast_possible_truncation)]
pub fn test_pattern(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| {
            if i % 256 == 0 {
                0xAA
            } else if i % 128 == 0 {
                0x55
            } else {
                (i % 256) as u8
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_pattern_markers() {
        let data = test_pattern(1024);
        assert_eq!(data.len(), 1024);
        assert_eq!(data[0], 0xAA);
        assert_eq!(data[1], 1);
        assert_eq!(data[127], 127);
        assert_eq!(data[128], 0x55);
        assert_eq!(data[256], 0xAA);
        assert_eq!(data[384], 0x55);
        assert_eq!(data[511], 255);
    }

    #[test]
    fn test_pattern_empty() {
        assert!(test_pattern(0).is_empty());
    }

    #[test]
    fn test_geometry() {
        let image = FirmwareImage::from_bytes(vec![0; 1000]);
        assert_eq!(image.len(), 1000);
        assert_eq!(image.packet_count(), 63);
        assert!(image.fits_device());

        assert!(!FirmwareImage::from_bytes(Vec::new()).fits_device());
        assert!(!FirmwareImage::from_bytes(vec![0; MAX_FIRMWARE_SIZE + 1]).fits_device());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&test_pattern(300)).unwrap();

        let image = FirmwareImage::from_file(file.path()).unwrap();
        assert_eq!(image.data(), test_pattern(300).as_slice());
    }

    #[test]
    fn test_from_missing_file() {
        assert!(FirmwareImage::from_file("/nonexistent/otaflash.bin").is_err());
    }
}
