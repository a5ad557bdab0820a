//! `OmFileReader` ties the header parser, chunk-space geometry, the two
//! planners and the per-chunk decoder into the public read API: `open`,
//! `read_into`, `read_with_buffer`, `read_range`, `read_all` — a low-level
//! buffer-supplying call plus convenience wrappers that allocate for the
//! caller.

use std::fs::File;
use std::ops::Range;
use std::path::Path;

use ndarray::ArrayD;

use crate::backend::{ByteSource, MmapBackend};
use crate::codec::{bound, Codec, ZigzagDeltaCodec};
use crate::decoder::decode_chunks;
use crate::errors::OmCoreError;
use crate::geometry::{ChunkGeometry, ReadRequest};
use crate::header::{self, ArrayMetadata, MAGIC1, MAGIC2};
use crate::planner::{plan_data_read, plan_index_read, IoSizes, Lut};

fn read_lut_entries(bytes: &[u8]) -> Result<Vec<u64>, OmCoreError> {
    if bytes.len() % 8 != 0 {
        return Err(OmCoreError::CorruptLut {
            reason: format!("LUT byte range of length {} is not a multiple of 8", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

fn open_metadata<B: ByteSource>(backend: &B) -> Result<ArrayMetadata, OmCoreError> {
    let total = backend.count();
    if total < 4 {
        return Err(OmCoreError::BadMetadata {
            reason: "file too small to hold a version marker".into(),
        });
    }
    let front = backend.get_bytes(0, 4)?;

    if front[0] == MAGIC1 && front[1] == MAGIC2 && front[2] == 2 {
        let prefix = backend.get_bytes(0, 16)?;
        let n_dims = header::peek_n_dims(prefix, 8)? as usize;
        let header_length = 16u64 + 16 * n_dims as u64;
        let full_header = backend.get_bytes(0, header_length)?;
        return header::parse_v2(full_header);
    }

    if front[0] == MAGIC1 && front[1] == 3 {
        let compression_tag = front[2];
        if total < 20 {
            return Err(OmCoreError::BadMetadata {
                reason: "file too small to hold a version-3 trailer".into(),
            });
        }
        let tail_probe = backend.get_bytes(total - 20, 20)?;
        let n_dims = header::peek_n_dims(tail_probe, 4)? as usize;
        let trailer_len = 20u64 + 16 * n_dims as u64;
        if total < trailer_len {
            return Err(OmCoreError::BadMetadata {
                reason: format!("file holds {total} bytes, need {trailer_len} for the trailer"),
            });
        }
        let trailer = backend.get_bytes(total - trailer_len, trailer_len)?;
        return header::parse_v3(trailer, compression_tag);
    }

    Err(OmCoreError::BadMetadata {
        reason: "unrecognized version marker in the first 3 bytes".into(),
    })
}

/// A decode session over one open file: immutable metadata plus the
/// chunk-space geometry derived from it, and the I/O coalescing thresholds
/// used by both planners.
pub struct OmFileReader<B: ByteSource> {
    backend: B,
    meta: ArrayMetadata,
    geometry: ChunkGeometry,
    io: IoSizes,
    codec: ZigzagDeltaCodec,
}

impl<B: ByteSource> OmFileReader<B> {
    pub fn open(backend: B) -> Result<Self, OmCoreError> {
        let meta = open_metadata(&backend)?;
        let geometry = ChunkGeometry::new(meta.dims.clone(), meta.chunks.clone())?;
        Ok(Self {
            backend,
            meta,
            geometry,
            io: IoSizes::default(),
            codec: ZigzagDeltaCodec,
        })
    }

    pub fn with_io_sizes(mut self, io: IoSizes) -> Self {
        self.io = io;
        self
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.meta
    }

    fn scratch_buffer_size(&self) -> usize {
        let n_elements: u64 = self.meta.chunks.iter().product();
        bound(n_elements as usize, self.meta.compression.bytes_per_element())
    }

    /// Allocates its own chunk scratch buffer for the call.
    pub fn read_into(
        &self,
        into: &mut [f32],
        dim_read: &[Range<u64>],
        into_coord_lower: &[u64],
        into_cube_dimension: &[u64],
    ) -> Result<(), OmCoreError> {
        let mut chunk_buffer = vec![0u8; self.scratch_buffer_size()];
        self.read_with_buffer(
            into,
            dim_read,
            into_coord_lower,
            into_cube_dimension,
            &mut chunk_buffer,
        )
    }

    /// As [`Self::read_into`], but with a caller-supplied scratch buffer so
    /// repeated reads can amortize the allocation.
    pub fn read_with_buffer(
        &self,
        into: &mut [f32],
        dim_read: &[Range<u64>],
        into_coord_lower: &[u64],
        into_cube_dimension: &[u64],
        chunk_buffer: &mut [u8],
    ) -> Result<(), OmCoreError> {
        let n = self.geometry.n_dims();
        if dim_read.len() != n || into_coord_lower.len() != n || into_cube_dimension.len() != n {
            return Err(OmCoreError::OutOfBounds {
                reason: format!(
                    "expected {n}-dimensional read, got dim_read={}, into_coord_lower={}, into_cube_dimension={}",
                    dim_read.len(),
                    into_coord_lower.len(),
                    into_cube_dimension.len()
                ),
            });
        }
        for i in 0..n {
            if into_coord_lower[i] + (dim_read[i].end - dim_read[i].start) > into_cube_dimension[i]
            {
                return Err(OmCoreError::OutOfBounds {
                    reason: format!(
                        "dim {i}: into_coord_lower {} + count {} exceeds into_cube_dimension {}",
                        into_coord_lower[i],
                        dim_read[i].end - dim_read[i].start,
                        into_cube_dimension[i]
                    ),
                });
            }
        }
        let expected_len: u64 = into_cube_dimension.iter().product();
        if into.len() as u64 != expected_len {
            return Err(OmCoreError::OutOfBounds {
                reason: format!(
                    "output buffer holds {} elements, into_cube_dimension needs {expected_len}",
                    into.len()
                ),
            });
        }

        let request = ReadRequest::new(
            dim_read.iter().map(|r| r.start).collect(),
            dim_read.iter().map(|r| r.end - r.start).collect(),
        );

        let mut outer_range = Some(self.geometry.first_chunk_range(&request)?);
        while let Some(range) = outer_range.take() {
            let index_plan = plan_index_read(
                &self.geometry,
                &request,
                &self.io,
                self.meta.lut_start,
                range.clone(),
            )?;
            let lut_bytes = self.backend.get_bytes(index_plan.offset, index_plan.count)?;
            let entries = read_lut_entries(lut_bytes)?;
            let lut = Lut::new(&entries, index_plan.index_range.clone());

            let mut inner_range = Some(range);
            while let Some(data_range) = inner_range.take() {
                let data_plan = plan_data_read(
                    &self.geometry,
                    &request,
                    &self.io,
                    &lut,
                    &index_plan.index_range,
                    self.meta.data_start,
                    data_range,
                )?;
                let data_bytes = self.backend.get_bytes(data_plan.offset, data_plan.count)?;
                let consumed = decode_chunks(
                    &self.geometry,
                    &request,
                    into_coord_lower,
                    into_cube_dimension,
                    data_plan.first_chunk,
                    data_plan.last_chunk,
                    data_bytes,
                    &self.codec as &dyn Codec,
                    self.meta.scalefactor,
                    self.meta.compression,
                    chunk_buffer,
                    into,
                )?;
                if consumed as u64 != data_plan.count {
                    return Err(OmCoreError::DecodeMismatch {
                        consumed,
                        expected: data_plan.count as usize,
                    });
                }
                if data_plan.next_chunk.is_some() {
                    inner_range = self
                        .geometry
                        .next_chunk_range(&request, data_plan.last_chunk)?;
                }
            }

            if index_plan.next_chunk.is_some() {
                outer_range = self
                    .geometry
                    .next_chunk_range(&request, index_plan.index_range.end - 1)?;
            }
        }

        Ok(())
    }

    /// Reads `dim_read` into a freshly allocated, NaN-filled buffer of
    /// exactly that shape.
    pub fn read_range(&self, dim_read: &[Range<u64>]) -> Result<Vec<f32>, OmCoreError> {
        let counts: Vec<u64> = dim_read.iter().map(|r| r.end - r.start).collect();
        let len: u64 = counts.iter().product();
        let mut into = vec![f32::NAN; len as usize];
        let zeros = vec![0u64; counts.len()];
        self.read_into(&mut into, dim_read, &zeros, &counts)?;
        Ok(into)
    }

    /// Reads the entire array.
    pub fn read_all(&self) -> Result<Vec<f32>, OmCoreError> {
        let dim_read: Vec<Range<u64>> = self.meta.dims.iter().map(|&d| 0..d).collect();
        self.read_range(&dim_read)
    }

    /// As [`Self::read_range`], shaped as an [`ndarray::ArrayD`] rather than
    /// a flat buffer.
    pub fn read_array(&self, dim_read: &[Range<u64>]) -> Result<ArrayD<f32>, OmCoreError> {
        let shape: Vec<usize> = dim_read.iter().map(|r| (r.end - r.start) as usize).collect();
        let flat = self.read_range(dim_read)?;
        ArrayD::from_shape_vec(shape, flat).map_err(|e| OmCoreError::OutOfBounds {
            reason: format!("read shape does not match buffer length: {e}"),
        })
    }
}

impl OmFileReader<MmapBackend> {
    /// Opens a file by path, memory-mapping it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OmCoreError> {
        Self::open(MmapBackend::open(path)?)
    }

    /// Opens an already-open file handle, memory-mapping it.
    pub fn from_file_handle(file: File, filename: String) -> Result<Self, OmCoreError> {
        Self::open(MmapBackend::from_file(file, filename)?)
    }

    /// Checks whether the backing file still has a name on disk.
    pub fn was_deleted(&self) -> bool {
        self.backend.was_deleted()
    }
}
