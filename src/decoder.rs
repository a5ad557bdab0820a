//! Per-chunk decode: decompress, reverse 2-D delta pre-coding, and scatter
//! into the caller's output cube. Pure once handed compressed bytes — no
//! I/O, no knowledge of the LUT or planners above it.

use crate::codec::Codec;
use crate::errors::OmCoreError;
use crate::geometry::{contiguous_run_len, contiguous_run_split, ChunkGeometry, DimCursor, ReadRequest};
use crate::header::CompressionKind;
use crate::delta2d::delta2d_decode;

fn row_major_strides(extents: &[u64]) -> Vec<u64> {
    let n = extents.len();
    let mut strides = vec![1u64; n];
    for i in (0..n.saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * extents[i + 1];
    }
    strides
}

fn unscale(v: i16, scalefactor: f32, compression: CompressionKind) -> f32 {
    if v == i16::MAX {
        return f32::NAN;
    }
    match compression {
        CompressionKind::Logarithmic => 10f32.powf(v as f32 / scalefactor) - 1.0,
        CompressionKind::Linear => v as f32 / scalefactor,
    }
}

fn le_bytes_to_i16(bytes: &[u8], n_elements: usize) -> Result<Vec<i16>, OmCoreError> {
    bytes
        .get(..n_elements * 2)
        .ok_or_else(|| OmCoreError::CodecFailure {
            reason: format!(
                "decoded scratch buffer holds {} bytes, need {}",
                bytes.len(),
                n_elements * 2
            ),
        })
        .map(|s| {
            s.chunks_exact(2)
                .map(|c| i16::from_le_bytes([c[0], c[1]]))
                .collect()
        })
}

/// Decodes one chunk's compressed bytes, scattering the overlap with
/// `request` into `into`. Returns the number of bytes of `compressed`
/// consumed by the codec — the caller's read cursor advances by exactly
/// this much regardless of whether the chunk overlapped the request.
#[allow(clippy::too_many_arguments)]
pub fn decode_chunk(
    geometry: &ChunkGeometry,
    request: &ReadRequest,
    into_coord_lower: &[u64],
    into_cube_dimension: &[u64],
    global_chunk_num: u64,
    compressed: &[u8],
    codec: &dyn Codec,
    scalefactor: f32,
    compression: CompressionKind,
    chunk_buffer: &mut [u8],
    into: &mut [f32],
) -> Result<usize, OmCoreError> {
    let inter = geometry.per_chunk_intersection(request, into_coord_lower, global_chunk_num);
    let n = geometry.n_dims();
    let n_elements: u64 = inter.chunk_len.iter().product();

    let consumed = codec.decode(compressed, n_elements as usize, chunk_buffer)?;

    if inter.no_data {
        return Ok(consumed);
    }

    let mut values = le_bytes_to_i16(chunk_buffer, n_elements as usize)?;
    let length_last = inter.chunk_len[n - 1];
    let rows = (n_elements / length_last) as usize;
    delta2d_decode(rows, length_last as usize, &mut values);

    let stride_in = row_major_strides(&inter.chunk_len);
    let stride_out = row_major_strides(into_cube_dimension);

    let mut d: u64 = inter
        .local_start
        .iter()
        .zip(&stride_in)
        .map(|(&l, &s)| l * s)
        .sum();
    let mut q: u64 = inter
        .cube_start
        .iter()
        .zip(&stride_out)
        .map(|(&c, &s)| c * s)
        .sum();

    let run_len = contiguous_run_len(&inter.len, &stride_in, &stride_out);
    let split = contiguous_run_split(&inter.len, &stride_in, &stride_out);
    let mut cursor = DimCursor::new(
        inter.len[..split].to_vec(),
        stride_in[..split].to_vec(),
        stride_out[..split].to_vec(),
    );

    loop {
        let (d0, q0) = (d as usize, q as usize);
        for i in 0..run_len as usize {
            into[q0 + i] = unscale(values[d0 + i], scalefactor, compression);
        }
        if !cursor.step(&mut d, &mut q) {
            break;
        }
    }

    Ok(consumed)
}

/// Decodes chunks `first_chunk..=last_chunk` from `data` in strictly
/// increasing order, returning the total bytes of `data` consumed. Callers
/// compare this against the data planner's byte count; a mismatch is
/// `OmCoreError::DecodeMismatch`.
#[allow(clippy::too_many_arguments)]
pub fn decode_chunks(
    geometry: &ChunkGeometry,
    request: &ReadRequest,
    into_coord_lower: &[u64],
    into_cube_dimension: &[u64],
    first_chunk: u64,
    last_chunk: u64,
    data: &[u8],
    codec: &dyn Codec,
    scalefactor: f32,
    compression: CompressionKind,
    chunk_buffer: &mut [u8],
    into: &mut [f32],
) -> Result<u64, OmCoreError> {
    let mut cursor = 0u64;
    for chunk in first_chunk..=last_chunk {
        let consumed = decode_chunk(
            geometry,
            request,
            into_coord_lower,
            into_cube_dimension,
            chunk,
            &data[cursor as usize..],
            codec,
            scalefactor,
            compression,
            chunk_buffer,
            into,
        )?;
        cursor += consumed as u64;
    }
    Ok(cursor)
}
