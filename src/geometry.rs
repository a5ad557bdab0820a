//! Pure arithmetic over `dims`/`chunks`/a read request: chunk counting,
//! chunk enumeration and per-chunk intersection with a read request.
//!
//! Nothing in this module touches I/O; every operation here is a candidate
//! for an isolated unit test with made-up dimensions.

use std::ops::Range;

use crate::errors::OmCoreError;

fn ceil_div(value: u64, divisor: u64) -> u64 {
    (value + divisor - 1) / divisor
}

/// A half-open `[offset, offset + count)` read request per dimension.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub offset: Vec<u64>,
    pub count: Vec<u64>,
}

impl ReadRequest {
    pub fn new(offset: Vec<u64>, count: Vec<u64>) -> Self {
        Self { offset, count }
    }

    pub fn n_dims(&self) -> usize {
        self.offset.len()
    }
}

/// The clamped intersection of one chunk with a [`ReadRequest`].
#[derive(Debug, Clone)]
pub struct ChunkIntersection {
    /// True if this chunk shares no elements with the request (possible when
    /// the chunk was only pulled in by I/O coalescing).
    pub no_data: bool,
    /// Per-dimension length of the overlap.
    pub len: Vec<u64>,
    /// Per-dimension local offset of the overlap within the chunk.
    pub local_start: Vec<u64>,
    /// Per-dimension global coordinate where the overlap begins.
    pub global_start: Vec<u64>,
    /// Per-dimension coordinate where the overlap begins inside the target cube.
    pub cube_start: Vec<u64>,
    /// Per-dimension extent of the chunk itself (short at array boundaries).
    pub chunk_len: Vec<u64>,
}

/// Chunk-space geometry for a rank-N array: chunk counts, chunk numbering,
/// and enumeration of the chunks intersecting a read request.
pub struct ChunkGeometry {
    dims: Vec<u64>,
    chunks: Vec<u64>,
    /// `n_chunks_per_dim[i] = ceil(dims[i] / chunks[i])`
    n_chunks_per_dim: Vec<u64>,
    /// Row-major (last dimension fastest) chunk-number strides.
    chunk_strides: Vec<u64>,
}

impl ChunkGeometry {
    pub fn new(dims: Vec<u64>, chunks: Vec<u64>) -> Result<Self, OmCoreError> {
        if dims.is_empty() || dims.len() != chunks.len() {
            return Err(OmCoreError::BadMetadata {
                reason: "dims and chunks must be non-empty and equal length".into(),
            });
        }
        if dims.iter().any(|&d| d == 0) || chunks.iter().any(|&c| c == 0) {
            return Err(OmCoreError::BadMetadata {
                reason: "dims and chunks must be strictly positive".into(),
            });
        }

        let n_chunks_per_dim: Vec<u64> = dims
            .iter()
            .zip(chunks.iter())
            .map(|(&d, &c)| ceil_div(d, c))
            .collect();

        let n = n_chunks_per_dim.len();
        let mut chunk_strides = vec![1u64; n];
        for i in (0..n.saturating_sub(1)).rev() {
            chunk_strides[i] = chunk_strides[i + 1] * n_chunks_per_dim[i + 1];
        }

        Ok(Self {
            dims,
            chunks,
            n_chunks_per_dim,
            chunk_strides,
        })
    }

    pub fn n_dims(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn chunks(&self) -> &[u64] {
        &self.chunks
    }

    pub fn n_chunks_per_dim(&self, i: usize) -> u64 {
        self.n_chunks_per_dim[i]
    }

    pub fn n_chunks(&self) -> u64 {
        self.n_chunks_per_dim.iter().product()
    }

    /// Per-dimension chunk coordinate of a global chunk number.
    pub fn chunk_coord(&self, global_chunk_num: u64) -> Vec<u64> {
        (0..self.n_dims())
            .map(|i| (global_chunk_num / self.chunk_strides[i]) % self.n_chunks_per_dim[i])
            .collect()
    }

    fn flatten(&self, coord: &[u64]) -> u64 {
        coord
            .iter()
            .zip(self.chunk_strides.iter())
            .map(|(&c, &s)| c * s)
            .sum()
    }

    /// Extent of a chunk along dimension `i`, clamped at the array boundary.
    pub fn chunk_len(&self, coord: &[u64], i: usize) -> u64 {
        let origin = coord[i] * self.chunks[i];
        ((coord[i] + 1) * self.chunks[i]).min(self.dims[i]) - origin
    }

    /// Per-dimension range of chunk coordinates touched by `request`.
    fn chunk_window(&self, request: &ReadRequest) -> Result<Vec<Range<u64>>, OmCoreError> {
        (0..self.n_dims())
            .map(|i| {
                let lo = request.offset[i];
                let hi = request.offset[i] + request.count[i];
                if hi > self.dims[i] {
                    return Err(OmCoreError::OutOfBounds {
                        reason: format!(
                            "read region on dim {i} [{lo}, {hi}) exceeds array extent {}",
                            self.dims[i]
                        ),
                    });
                }
                Ok(lo / self.chunks[i]..ceil_div(hi, self.chunks[i]))
            })
            .collect()
    }

    /// Longest contiguous run of chunk numbers starting at `coord`, given the
    /// per-dimension chunk-coordinate window the request touches. Chunk
    /// numbers are contiguous across a dimension boundary only while that
    /// dimension's window spans its *entire* native chunk count; the run
    /// stops growing the moment it crosses a dimension whose window is
    /// partial, since a genuine gap would follow in flat chunk-number space.
    fn linear_run_len(&self, window: &[Range<u64>]) -> u64 {
        let mut len = 1u64;
        for i in (0..self.n_dims()).rev() {
            let span = window[i].end - window[i].start;
            len *= span;
            if span != self.n_chunks_per_dim[i] {
                break;
            }
        }
        len
    }

    /// The first contiguous range of chunk numbers intersecting `request`.
    pub fn first_chunk_range(&self, request: &ReadRequest) -> Result<Range<u64>, OmCoreError> {
        let window = self.chunk_window(request)?;
        let coord: Vec<u64> = window.iter().map(|r| r.start).collect();
        let start = self.flatten(&coord);
        let len = self.linear_run_len(&window);
        Ok(start..start + len)
    }

    /// Given the last chunk number of the current linear run, returns the
    /// next linear run of chunks intersecting `request`, or `None` once the
    /// walk has covered the whole request.
    pub fn next_chunk_range(
        &self,
        request: &ReadRequest,
        current_last: u64,
    ) -> Result<Option<Range<u64>>, OmCoreError> {
        let window = self.chunk_window(request)?;
        let mut coord = self.chunk_coord(current_last);

        let mut carried = false;
        for i in (0..self.n_dims()).rev() {
            coord[i] += 1;
            if coord[i] < window[i].end {
                carried = true;
                break;
            }
            coord[i] = window[i].start;
            if i == 0 {
                // outermost dimension rolled over: nothing left to enumerate
                return Ok(None);
            }
        }
        if !carried {
            return Ok(None);
        }

        let start = self.flatten(&coord);
        let len = self.linear_run_len(&window);
        Ok(Some(start..start + len))
    }

    /// The clamped intersection of chunk `global_chunk_num` with `request`,
    /// plus where that overlap lands inside the target cube.
    pub fn per_chunk_intersection(
        &self,
        request: &ReadRequest,
        into_coord_lower: &[u64],
        global_chunk_num: u64,
    ) -> ChunkIntersection {
        let n = self.n_dims();
        let coord = self.chunk_coord(global_chunk_num);

        let mut chunk_len = vec![0u64; n];
        let mut local_start = vec![0u64; n];
        let mut global_start = vec![0u64; n];
        let mut cube_start = vec![0u64; n];
        let mut len = vec![0u64; n];
        let mut no_data = false;

        for i in 0..n {
            let origin = coord[i] * self.chunks[i];
            chunk_len[i] = self.chunk_len(&coord, i);

            let req_lo = request.offset[i];
            let req_hi = request.offset[i] + request.count[i];

            let lo = req_lo.max(origin);
            let hi = req_hi.min(origin + chunk_len[i]);

            if hi <= lo {
                no_data = true;
                continue;
            }

            local_start[i] = lo - origin;
            global_start[i] = lo;
            cube_start[i] = into_coord_lower[i] + (lo - req_lo);
            len[i] = hi - lo;
        }

        ChunkIntersection {
            no_data,
            len,
            local_start,
            global_start,
            cube_start,
            chunk_len,
        }
    }
}

/// Rolling multi-dimensional cursor over the "outer" dimensions of a chunk
/// scatter — the dimensions *not* absorbed into the maximal contiguous copy
/// run. Tracks flat offsets into the source (decompressed chunk) buffer and
/// the destination cube buffer, advancing with carry exactly as a row-major
/// odometer would.
pub struct DimCursor {
    coord: Vec<u64>,
    len: Vec<u64>,
    stride_in: Vec<u64>,
    stride_out: Vec<u64>,
}

impl DimCursor {
    pub fn new(len: Vec<u64>, stride_in: Vec<u64>, stride_out: Vec<u64>) -> Self {
        let coord = vec![0u64; len.len()];
        Self {
            coord,
            len,
            stride_in,
            stride_out,
        }
    }

    /// Moves to the next outer position, updating the flat read cursor `d`
    /// and flat write cursor `q` in place. Returns `false` once the
    /// outermost dimension has rolled over (no runs remain).
    pub fn step(&mut self, d: &mut u64, q: &mut u64) -> bool {
        if self.len.is_empty() {
            return false;
        }
        for i in (0..self.len.len()).rev() {
            self.coord[i] += 1;
            *d += self.stride_in[i];
            *q += self.stride_out[i];
            if self.coord[i] < self.len[i] {
                return true;
            }
            *d -= self.coord[i] * self.stride_in[i];
            *q -= self.coord[i] * self.stride_out[i];
            self.coord[i] = 0;
        }
        false
    }
}

/// Length, in elements, of the longest contiguous run that a scatter can
/// copy in one shot: the product of the trailing dimensions whose extent
/// and stride line up contiguously in both the source and destination
/// layouts. Constant for a given chunk intersection and pair of strides.
pub fn contiguous_run_len(len: &[u64], stride_in: &[u64], stride_out: &[u64]) -> u64 {
    let n = len.len();
    if n == 0 {
        return 1;
    }
    let mut run = len[n - 1];
    let mut expect_in = stride_in[n - 1] * len[n - 1];
    let mut expect_out = stride_out[n - 1] * len[n - 1];
    for i in (0..n - 1).rev() {
        if stride_in[i] == expect_in && stride_out[i] == expect_out {
            run *= len[i];
            expect_in *= len[i];
            expect_out *= len[i];
        } else {
            break;
        }
    }
    run
}

/// Index `k` such that dimensions `[0, k)` are the "outer" dimensions a
/// scatter's [`DimCursor`] must walk one run at a time, while `[k, n)` are
/// absorbed into the single contiguous run [`contiguous_run_len`] reports.
/// Mirrors that function's own trailing-dimension walk.
pub fn contiguous_run_split(len: &[u64], stride_in: &[u64], stride_out: &[u64]) -> usize {
    let n = len.len();
    if n == 0 {
        return 0;
    }
    let mut expect_in = stride_in[n - 1] * len[n - 1];
    let mut expect_out = stride_out[n - 1] * len[n - 1];
    let mut split = n - 1;
    for i in (0..n - 1).rev() {
        if stride_in[i] == expect_in && stride_out[i] == expect_out {
            expect_in *= len[i];
            expect_out *= len[i];
            split = i;
        } else {
            break;
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(dims: &[u64], chunks: &[u64]) -> ChunkGeometry {
        ChunkGeometry::new(dims.to_vec(), chunks.to_vec()).unwrap()
    }

    #[test]
    fn n_chunks_accounts_for_short_last_chunk() {
        let g = geom(&[5], &[2]);
        assert_eq!(g.n_chunks_per_dim(0), 3);
        assert_eq!(g.n_chunks(), 3);
    }

    #[test]
    fn chunk_len_is_short_at_boundary() {
        let g = geom(&[5], &[2]);
        assert_eq!(g.chunk_len(&[0], 0), 2);
        assert_eq!(g.chunk_len(&[1], 0), 2);
        assert_eq!(g.chunk_len(&[2], 0), 1);
    }

    #[test]
    fn tiling_visits_every_chunk_exactly_once_on_full_read() {
        let g = geom(&[10, 10, 10], &[4, 4, 4]);
        let req = ReadRequest::new(vec![0, 0, 0], vec![10, 10, 10]);
        let mut seen = std::collections::HashSet::new();
        let mut range = g.first_chunk_range(&req).unwrap();
        loop {
            for c in range.clone() {
                assert!(seen.insert(c), "chunk {c} visited twice");
            }
            match g.next_chunk_range(&req, range.end - 1).unwrap() {
                Some(next) => range = next,
                None => break,
            }
        }
        assert_eq!(seen.len(), g.n_chunks() as usize);
        assert_eq!(seen, (0..g.n_chunks()).collect());
    }

    #[test]
    fn first_range_covers_all_chunks_when_request_spans_every_chunk_row() {
        // S2: dims=[4,4], chunks=[2,2], read [1..3, 1..3] touches all 4 chunks.
        let g = geom(&[4, 4], &[2, 2]);
        let req = ReadRequest::new(vec![1, 1], vec![2, 2]);
        let range = g.first_chunk_range(&req).unwrap();
        assert_eq!(range, 0..4);
        assert!(g.next_chunk_range(&req, 3).unwrap().is_none());
    }

    #[test]
    fn partial_fastest_dimension_breaks_the_run() {
        // S4: dims=[10,10,10], chunks=[4,4,4], read [0..10, 0..10, 3..7].
        let g = geom(&[10, 10, 10], &[4, 4, 4]);
        let req = ReadRequest::new(vec![0, 0, 3], vec![10, 10, 4]);
        let range = g.first_chunk_range(&req).unwrap();
        assert_eq!(range, 0..2);
        let next = g.next_chunk_range(&req, 1).unwrap().unwrap();
        assert_eq!(next, 3..5);
    }

    #[test]
    fn coverage_has_no_gaps_or_duplicates() {
        let g = geom(&[7, 5], &[3, 2]);
        let req = ReadRequest::new(vec![2, 1], vec![4, 3]);
        let mut covered = std::collections::HashSet::new();
        let mut range = g.first_chunk_range(&req).unwrap();
        loop {
            for c in range.clone() {
                let inter = g.per_chunk_intersection(&req, &[0, 0], c);
                if inter.no_data {
                    continue;
                }
                for x in inter.global_start[0]..inter.global_start[0] + inter.len[0] {
                    for y in inter.global_start[1]..inter.global_start[1] + inter.len[1] {
                        assert!(covered.insert((x, y)), "({x},{y}) covered twice");
                    }
                }
            }
            match g.next_chunk_range(&req, range.end - 1).unwrap() {
                Some(next) => range = next,
                None => break,
            }
        }
        let expected: std::collections::HashSet<_> = (2..6)
            .flat_map(|x| (1..4).map(move |y| (x, y)))
            .collect();
        assert_eq!(covered, expected);
    }

    #[test]
    fn dim_cursor_walks_outer_dimensions_with_carry() {
        let mut cursor = DimCursor::new(vec![2, 3], vec![10, 1], vec![20, 1]);
        let mut d = 0u64;
        let mut q = 0u64;
        let mut positions = vec![(d, q)];
        while cursor.step(&mut d, &mut q) {
            positions.push((d, q));
        }
        assert_eq!(
            positions,
            vec![(0, 0), (1, 1), (2, 2), (10, 20), (11, 21), (12, 22)]
        );
    }

    #[test]
    fn contiguous_run_len_absorbs_fully_matching_trailing_dims() {
        // chunk and cube share the same shape: whole chunk is one run.
        assert_eq!(contiguous_run_len(&[2, 3], &[3, 1], &[3, 1]), 6);
        // cube is wider than the chunk: only the fastest dim is contiguous.
        assert_eq!(contiguous_run_len(&[2, 3], &[3, 1], &[10, 1]), 3);
    }

    #[test]
    fn contiguous_run_split_matches_the_absorbed_dimension_count() {
        // fully matching: everything absorbed, no outer dims left to walk.
        assert_eq!(contiguous_run_split(&[2, 3], &[3, 1], &[3, 1]), 0);
        // only the fastest dim absorbed: dim 0 stays outer.
        assert_eq!(contiguous_run_split(&[2, 3], &[3, 1], &[10, 1]), 1);
    }
}
