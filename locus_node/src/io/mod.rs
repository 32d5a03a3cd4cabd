// locus_node/src/io/mod.rs

//! Reference-map and scan file readers.

pub mod pcd;
pub mod ply;

use locus_core::messages::PointCloud;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapLoadError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported map extension '{0}' (expected .pcd or .ply)")]
    UnsupportedExtension(PathBuf),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl From<std::io::Error> for MapLoadError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

/// Loads a point cloud, choosing the reader by file extension.
///
/// The returned cloud has an empty `frame_id` and a zero stamp; the caller
/// decides which frame the file is expressed in.
pub fn load_point_cloud(path: &Path) -> Result<PointCloud, MapLoadError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    let reader = match extension.as_deref() {
        Some("pcd") | Some("ply") => open(path)?,
        _ => return Err(MapLoadError::UnsupportedExtension(path.to_path_buf())),
    };

    let result = match extension.as_deref() {
        Some("pcd") => pcd::read_pcd(reader),
        _ => ply::read_ply(reader),
    };
    result.map_err(|e| match e {
        MapLoadError::Io { source, .. } => MapLoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

fn open(path: &Path) -> Result<BufReader<File>, MapLoadError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| MapLoadError::Io {
            path: path.to_path_buf(),
            source,
        })
}

// =========================================================================
// == Shared Binary Decoding ==
// =========================================================================

/// Scalar encodings shared by PCD `SIZE`/`TYPE` pairs and PLY property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scalar {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl Scalar {
    pub(crate) fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Decodes one little-endian value. `bytes` must hold at least `size()` bytes.
    pub(crate) fn read_le(self, bytes: &[u8]) -> f64 {
        let mut buf = [0u8; 8];
        buf[..self.size()].copy_from_slice(&bytes[..self.size()]);
        match self {
            Self::I8 => f64::from(buf[0] as i8),
            Self::U8 => f64::from(buf[0]),
            Self::I16 => f64::from(i16::from_le_bytes([buf[0], buf[1]])),
            Self::U16 => f64::from(u16::from_le_bytes([buf[0], buf[1]])),
            Self::I32 => f64::from(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Self::U32 => f64::from(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Self::F32 => f64::from(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            Self::F64 => f64::from_le_bytes(buf),
        }
    }
}

/// Reads everything left in `reader` and checks it holds `count` records of
/// `stride` bytes. Both come from an untrusted header.
pub(crate) fn read_records<R: Read>(mut reader: R, count: usize, stride: usize) -> Result<Vec<u8>, MapLoadError> {
    if stride == 0 {
        return Err(MapLoadError::Parse("point records have zero size".to_string()));
    }
    let expected = count
        .checked_mul(stride)
        .ok_or_else(|| MapLoadError::Parse(format!("{count} points of {stride} bytes overflow the address space")))?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    if data.len() < expected {
        return Err(MapLoadError::Parse(format!(
            "expected {expected} bytes of point data, found {}",
            data.len()
        )));
    }
    Ok(data)
}
