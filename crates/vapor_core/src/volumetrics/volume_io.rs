//! Save/load for baked volume textures.
//!
//! The baked radiance texture is the only persisted artifact of the fog
//! system. Files are a small header (magic, version, payload size) followed
//! by a bincode payload of dimensions plus half-precision RGBA texels.
//!
//! # Example
//!
//! ```ignore
//! use vapor_core::volumetrics::volume_io::{save_volume, load_volume};
//!
//! save_volume(&data, "baked/hallway.vapor")?;
//! let data = load_volume("baked/hallway.vapor")?;
//! ```

use half::f16;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Magic bytes for baked volume files
const MAGIC: &[u8; 8] = b"VAPORVOL";

/// Current file format version
const VERSION: u32 = 1;

/// CPU-side baked volume texture: RGBA half floats, x-fastest layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BakedVolumeData {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// 4 channels per cell, `width * height * depth * 4` entries.
    pub texels: Vec<f16>,
}

impl BakedVolumeData {
    /// A volume cleared to opaque black, the state every bake starts from.
    pub fn cleared(width: u32, height: u32, depth: u32) -> Self {
        let cells = (width * height * depth) as usize;
        let mut texels = vec![f16::ZERO; cells * 4];
        for cell in 0..cells {
            texels[cell * 4 + 3] = f16::ONE;
        }
        Self {
            width,
            height,
            depth,
            texels,
        }
    }

    fn texel_offset(&self, x: u32, y: u32, z: u32) -> usize {
        (((z * self.height + y) * self.width + x) * 4) as usize
    }

    /// Read a cell as f32 RGBA.
    pub fn get(&self, x: u32, y: u32, z: u32) -> [f32; 4] {
        let o = self.texel_offset(x, y, z);
        [
            self.texels[o].to_f32(),
            self.texels[o + 1].to_f32(),
            self.texels[o + 2].to_f32(),
            self.texels[o + 3].to_f32(),
        ]
    }

    /// Write a cell from f32 RGBA.
    pub fn set(&mut self, x: u32, y: u32, z: u32, rgba: [f32; 4]) {
        let o = self.texel_offset(x, y, z);
        for (i, channel) in rgba.iter().enumerate() {
            self.texels[o + i] = f16::from_f32(*channel);
        }
    }

    /// Add onto a cell's RGB, leaving alpha untouched.
    pub fn accumulate_rgb(&mut self, x: u32, y: u32, z: u32, rgb: [f32; 3]) {
        let o = self.texel_offset(x, y, z);
        for (i, channel) in rgb.iter().enumerate() {
            let current = self.texels[o + i].to_f32();
            self.texels[o + i] = f16::from_f32(current + channel);
        }
    }

    /// Raw texel bytes for texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }
}

/// Errors that can occur during volume I/O operations.
#[derive(Debug)]
pub enum VolumeIoError {
    /// File system error
    Io(std::io::Error),
    /// Binary serialization error
    Bincode(bincode::Error),
    /// Invalid file format
    InvalidFormat(String),
    /// Unsupported version
    UnsupportedVersion(u32),
    /// Texel count does not match dimensions
    InconsistentDimensions { expected: usize, actual: usize },
}

impl std::fmt::Display for VolumeIoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeIoError::Io(e) => write!(f, "IO error: {}", e),
            VolumeIoError::Bincode(e) => write!(f, "Bincode error: {}", e),
            VolumeIoError::InvalidFormat(msg) => write!(f, "Invalid format: {}", msg),
            VolumeIoError::UnsupportedVersion(v) => write!(f, "Unsupported version: {}", v),
            VolumeIoError::InconsistentDimensions { expected, actual } => write!(
                f,
                "Inconsistent dimensions: expected {} texels, found {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for VolumeIoError {}

impl From<std::io::Error> for VolumeIoError {
    fn from(e: std::io::Error) -> Self {
        VolumeIoError::Io(e)
    }
}

impl From<bincode::Error> for VolumeIoError {
    fn from(e: bincode::Error) -> Self {
        VolumeIoError::Bincode(e)
    }
}

/// Result type for volume I/O operations.
pub type VolumeIoResult<T> = Result<T, VolumeIoError>;

/// Save a baked volume to a file.
pub fn save_volume<P: AsRef<Path>>(data: &BakedVolumeData, path: P) -> VolumeIoResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&VERSION.to_le_bytes())?;

    let payload = bincode::serialize(data)?;
    let size = payload.len() as u64;
    writer.write_all(&size.to_le_bytes())?;
    writer.write_all(&payload)?;

    writer.flush()?;
    Ok(())
}

/// Load a baked volume from a file.
pub fn load_volume<P: AsRef<Path>>(path: P) -> VolumeIoResult<BakedVolumeData> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(VolumeIoError::InvalidFormat(
            "Invalid magic bytes - not a baked volume file".to_string(),
        ));
    }

    let mut version_bytes = [0u8; 4];
    reader.read_exact(&mut version_bytes)?;
    let version = u32::from_le_bytes(version_bytes);
    if version > VERSION {
        return Err(VolumeIoError::UnsupportedVersion(version));
    }

    let mut size_bytes = [0u8; 8];
    reader.read_exact(&mut size_bytes)?;
    let size = u64::from_le_bytes(size_bytes) as usize;

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload)?;

    let data: BakedVolumeData = bincode::deserialize(&payload)?;

    let expected = (data.width * data.height * data.depth * 4) as usize;
    if data.texels.len() != expected {
        return Err(VolumeIoError::InconsistentDimensions {
            expected,
            actual: data.texels.len(),
        });
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_volume() -> BakedVolumeData {
        let mut data = BakedVolumeData::cleared(4, 3, 2);
        data.set(0, 0, 0, [0.25, 0.5, 0.75, 1.0]);
        data.set(3, 2, 1, [2.0, 4.0, 8.0, 1.0]);
        data
    }

    #[test]
    fn cleared_volume_is_opaque_black() {
        let data = BakedVolumeData::cleared(2, 2, 2);
        for z in 0..2 {
            for y in 0..2 {
                for x in 0..2 {
                    assert_eq!(data.get(x, y, z), [0.0, 0.0, 0.0, 1.0]);
                }
            }
        }
    }

    #[test]
    fn accumulate_adds_onto_existing_rgb() {
        let mut data = BakedVolumeData::cleared(1, 1, 1);
        data.accumulate_rgb(0, 0, 0, [0.5, 0.25, 0.0]);
        data.accumulate_rgb(0, 0, 0, [0.5, 0.25, 1.0]);
        let cell = data.get(0, 0, 0);
        assert!((cell[0] - 1.0).abs() < 1e-3);
        assert!((cell[1] - 0.5).abs() < 1e-3);
        assert!((cell[2] - 1.0).abs() < 1e-3);
        assert_eq!(cell[3], 1.0);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let data = create_test_volume();
        let temp_file = NamedTempFile::with_suffix(".vapor").unwrap();
        let path = temp_file.path();

        save_volume(&data, path).unwrap();
        let loaded = load_volume(path).unwrap();

        assert_eq!(loaded.width, data.width);
        assert_eq!(loaded.height, data.height);
        assert_eq!(loaded.depth, data.depth);
        assert_eq!(loaded.get(0, 0, 0), data.get(0, 0, 0));
        assert_eq!(loaded.get(3, 2, 1), data.get(3, 2, 1));
    }

    #[test]
    fn test_invalid_magic() {
        let temp_file = NamedTempFile::with_suffix(".vapor").unwrap();
        std::fs::write(temp_file.path(), b"INVALID!rest").unwrap();

        let result = load_volume(temp_file.path());
        assert!(matches!(result, Err(VolumeIoError::InvalidFormat(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let temp_file = NamedTempFile::with_suffix(".vapor").unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&(VERSION + 1).to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        std::fs::write(temp_file.path(), &bytes).unwrap();

        let result = load_volume(temp_file.path());
        assert!(matches!(result, Err(VolumeIoError::UnsupportedVersion(_))));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut data = create_test_volume();
        data.texels.pop();

        let temp_file = NamedTempFile::with_suffix(".vapor").unwrap();
        save_volume(&data, temp_file.path()).unwrap();

        let result = load_volume(temp_file.path());
        assert!(matches!(
            result,
            Err(VolumeIoError::InconsistentDimensions { .. })
        ));
    }
}
