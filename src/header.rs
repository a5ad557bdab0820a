//! Turns raw file bytes into [`ArrayMetadata`]: the version-2 (inline
//! header) and version-3 (trailer-at-end) on-disk layouts both normalize to
//! the same in-memory shape, so the planner and decoder never branch on
//! version.

use crate::errors::OmCoreError;

/// Selects the unscale formula and, in production, the codec/delta pair.
/// Only the two 16-bit-element variants this format ships are modeled; a
/// 32-bit floating-point variant is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionKind {
    Linear,
    Logarithmic,
}

impl CompressionKind {
    pub fn bytes_per_element(&self) -> usize {
        2
    }
}

impl TryFrom<u8> for CompressionKind {
    type Error = OmCoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CompressionKind::Linear),
            3 => Ok(CompressionKind::Logarithmic),
            other => Err(OmCoreError::InvalidCompressionType(other)),
        }
    }
}

/// Which on-disk layout the metadata was parsed from. Purely informational
/// once parsing is done: `lut_start`/`data_start` are already normalized, so
/// nothing downstream needs to branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LutLayout {
    V2,
    V3,
}

pub const MAGIC1: u8 = 79;
pub const MAGIC2: u8 = 77;

/// Immutable per-file metadata: dimensions, chunk shape, compression kind,
/// scale factor, and where the LUT and compressed data begin.
#[derive(Debug, Clone)]
pub struct ArrayMetadata {
    pub dims: Vec<u64>,
    pub chunks: Vec<u64>,
    pub scalefactor: f32,
    pub compression: CompressionKind,
    pub lut_start: u64,
    pub data_start: u64,
    pub layout: LutLayout,
}

fn read_u64_le(bytes: &[u8], at: usize) -> Result<u64, OmCoreError> {
    bytes
        .get(at..at + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| OmCoreError::BadMetadata {
            reason: format!("truncated header: expected 8 bytes at offset {at}"),
        })
}

fn read_f32_le(bytes: &[u8], at: usize) -> Result<f32, OmCoreError> {
    bytes
        .get(at..at + 4)
        .map(|s| f32::from_le_bytes(s.try_into().unwrap()))
        .ok_or_else(|| OmCoreError::BadMetadata {
            reason: format!("truncated header: expected 4 bytes at offset {at}"),
        })
}

/// Reads `nDims` out of a short prefix/suffix probe, before the caller knows
/// how many bytes the full header/trailer needs. `at` is the byte offset of
/// the `nDims` field within `bytes` (16 from the front for v2, 4 from the
/// back for v3's last-20-bytes probe).
pub fn peek_n_dims(bytes: &[u8], at: usize) -> Result<u64, OmCoreError> {
    read_u64_le(bytes, at)
}

fn read_dims_array(bytes: &[u8], at: usize, n_dims: usize) -> Result<Vec<u64>, OmCoreError> {
    (0..n_dims)
        .map(|i| read_u64_le(bytes, at + i * 8))
        .collect()
}

fn validate(dims: &[u64], chunks: &[u64]) -> Result<(), OmCoreError> {
    if dims.is_empty() || dims.len() != chunks.len() {
        return Err(OmCoreError::BadMetadata {
            reason: "nDims must be positive and dims/chunks must match in length".into(),
        });
    }
    if dims.iter().any(|&d| d == 0) || chunks.iter().any(|&c| c == 0) {
        return Err(OmCoreError::BadMetadata {
            reason: "dims and chunks must be strictly positive".into(),
        });
    }
    Ok(())
}

/// Parses the version-2 inline header at the front of `bytes`.
pub fn parse_v2(bytes: &[u8]) -> Result<ArrayMetadata, OmCoreError> {
    if bytes.len() < 16 {
        return Err(OmCoreError::BadMetadata {
            reason: "file too small for a version-2 header".into(),
        });
    }
    if bytes[0] != MAGIC1 || bytes[1] != MAGIC2 {
        return Err(OmCoreError::BadMetadata {
            reason: "bad magic number".into(),
        });
    }
    if bytes[2] != 2 {
        return Err(OmCoreError::BadMetadata {
            reason: format!("expected version 2, found {}", bytes[2]),
        });
    }
    let compression = CompressionKind::try_from(bytes[3])?;
    let scalefactor = read_f32_le(bytes, 4)?;
    let n_dims = read_u64_le(bytes, 8)? as usize;

    let dims_at = 16;
    let chunks_at = dims_at + n_dims * 8;
    let header_length = (chunks_at + n_dims * 8) as u64;

    let dims = read_dims_array(bytes, dims_at, n_dims)?;
    let chunks = read_dims_array(bytes, chunks_at, n_dims)?;
    validate(&dims, &chunks)?;

    let n_chunks: u64 = dims
        .iter()
        .zip(chunks.iter())
        .map(|(&d, &c)| (d + c - 1) / c)
        .product();

    Ok(ArrayMetadata {
        dims,
        chunks,
        scalefactor,
        compression,
        lut_start: header_length,
        data_start: header_length + n_chunks * 8,
        layout: LutLayout::V2,
    })
}

/// Parses the version-3 trailer at the end of a file, given the trailing
/// `trailer` bytes (sized to cover `dims`/`chunks`/`scalefactor`/`nDims`/
/// `lutStart`) and the compression tag byte, which lives at absolute file
/// offset 2 — outside the trailer, so the caller reads it separately from
/// the front of the file (see `crate::session`).
pub fn parse_v3(trailer: &[u8], compression_tag: u8) -> Result<ArrayMetadata, OmCoreError> {
    let len = trailer.len();
    if len < 20 {
        return Err(OmCoreError::BadMetadata {
            reason: "trailer too small to hold scalefactor, nDims and lutStart".into(),
        });
    }

    let lut_start_i64 = i64::from_le_bytes(trailer[len - 8..len].try_into().unwrap());
    if lut_start_i64 < 0 {
        return Err(OmCoreError::BadMetadata {
            reason: format!("negative lutStart {lut_start_i64}"),
        });
    }
    let lut_start = lut_start_i64 as u64;

    let n_dims = read_u64_le(trailer, len - 16)? as usize;
    let scalefactor = read_f32_le(trailer, len - 20)?;

    let fixed = 20usize; // scalefactor(4) + nDims(8) + lutStart(8)
    let variable = n_dims
        .checked_mul(16)
        .ok_or_else(|| OmCoreError::BadMetadata {
            reason: "nDims overflow".into(),
        })?;
    if len < fixed + variable {
        return Err(OmCoreError::BadMetadata {
            reason: format!(
                "trailer holds {len} bytes, need {} for nDims={n_dims}",
                fixed + variable
            ),
        });
    }

    // dims | chunks | scalefactor | nDims | lutStart, low to high address.
    let chunks_at = len - fixed - n_dims * 8;
    let dims_at = chunks_at - n_dims * 8;
    let dims = read_dims_array(trailer, dims_at, n_dims)?;
    let chunks = read_dims_array(trailer, chunks_at, n_dims)?;
    validate(&dims, &chunks)?;

    Ok(ArrayMetadata {
        dims,
        chunks,
        scalefactor,
        compression: CompressionKind::try_from(compression_tag)?,
        lut_start,
        data_start: 3,
        layout: LutLayout::V3,
    })
}
