//! Two coalescers sitting on top of [`crate::geometry::ChunkGeometry`]:
//! an index-read planner that walks chunk-space producing LUT byte ranges,
//! and a data-read planner that walks within one LUT range producing
//! compressed-data byte ranges. Neither touches a byte source directly —
//! the index planner is pure geometry, the data planner takes already
//! decoded LUT entries.

use std::ops::Range;

use crate::errors::OmCoreError;
use crate::geometry::{ChunkGeometry, ReadRequest};

/// Coalescing thresholds for both planners.
#[derive(Debug, Clone, Copy)]
pub struct IoSizes {
    pub merge: u64,
    pub max: u64,
}

impl Default for IoSizes {
    fn default() -> Self {
        Self {
            merge: 512,
            max: 65536,
        }
    }
}

/// One LUT byte range to fetch, plus where chunk enumeration should resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReadPlan {
    pub offset: u64,
    pub count: u64,
    pub index_range: Range<u64>,
    pub next_chunk: Option<u64>,
}

/// Number of 8-byte LUT slots needed to recover both the start and end
/// offsets of every chunk in `range`: the end-offset slot of each chunk in
/// range, plus (when `range` doesn't start at chunk 0, whose start is
/// implicitly zero) one extra leading slot for the start of `range.start`.
fn lut_slot_count(range: &Range<u64>) -> u64 {
    if range.start == 0 {
        range.end
    } else {
        range.end - range.start + 1
    }
}

fn lut_byte_window(range: &Range<u64>) -> (u64, u64) {
    let offset = if range.start == 0 {
        0
    } else {
        (range.start - 1) * 8
    };
    (offset, lut_slot_count(range) * 8)
}

/// Coalesces chunk-number runs into a single LUT read, relative to
/// `lut_start` (the absolute byte offset of LUT entry 0 in the byte
/// source).
pub fn plan_index_read(
    geometry: &ChunkGeometry,
    request: &ReadRequest,
    io: &IoSizes,
    lut_start: u64,
    current: Range<u64>,
) -> Result<IndexReadPlan, OmCoreError> {
    let mut index_range = current;
    let next_chunk = loop {
        let candidate = match geometry.next_chunk_range(request, index_range.end - 1)? {
            Some(c) => c,
            None => break None,
        };
        let gap_bytes = (candidate.start - index_range.end) * 8;
        let merged = index_range.start..candidate.end;
        let merged_bytes = lut_slot_count(&merged) * 8;
        if gap_bytes <= io.merge && merged_bytes <= io.max {
            index_range = merged;
        } else {
            break Some(candidate.start);
        }
    };

    let (rel_offset, count) = lut_byte_window(&index_range);
    Ok(IndexReadPlan {
        offset: lut_start + rel_offset,
        count,
        index_range,
        next_chunk,
    })
}

/// View over the LUT entries an [`IndexReadPlan`] fetched: chunk `k`'s
/// compressed bytes end at `entries[k - base]`, where `base` is the chunk
/// number of `entries[0]` (either `index_range.start` itself, when the read
/// started at the implicit chunk-0 origin, or `index_range.start - 1`, when
/// an extra leading slot was fetched to recover that start offset).
pub struct Lut<'a> {
    entries: &'a [u64],
    first_chunk: u64,
    has_leading: bool,
}

impl<'a> Lut<'a> {
    pub fn new(entries: &'a [u64], index_range: Range<u64>) -> Self {
        Self {
            entries,
            first_chunk: index_range.start,
            has_leading: index_range.start != 0,
        }
    }

    fn base_chunk(&self) -> u64 {
        if self.has_leading {
            self.first_chunk - 1
        } else {
            0
        }
    }

    pub fn end_offset(&self, chunk: u64) -> u64 {
        self.entries[(chunk - self.base_chunk()) as usize]
    }

    pub fn start_offset(&self, chunk: u64) -> u64 {
        if chunk == 0 {
            0
        } else {
            self.end_offset(chunk - 1)
        }
    }
}

/// One compressed-data byte range to fetch, plus where chunk enumeration
/// should resume (`None` if the whole request has been covered).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataReadPlan {
    pub offset: u64,
    pub count: u64,
    pub first_chunk: u64,
    pub last_chunk: u64,
    pub next_chunk: Option<u64>,
}

/// Coalesces chunk-number runs within one already-fetched LUT range into a
/// single compressed-data read, relative to `data_start`.
pub fn plan_data_read(
    geometry: &ChunkGeometry,
    request: &ReadRequest,
    io: &IoSizes,
    lut: &Lut,
    index_range: &Range<u64>,
    data_start: u64,
    current: Range<u64>,
) -> Result<DataReadPlan, OmCoreError> {
    let start_pos = lut.start_offset(current.start);
    let mut end_pos = start_pos;
    for chunk in current.clone() {
        let e = lut.end_offset(chunk);
        if e < end_pos {
            return Err(OmCoreError::CorruptLut {
                reason: format!("chunk {chunk} end offset {e} precedes offset {end_pos}"),
            });
        }
        end_pos = e;
    }
    let mut last_chunk = current.end - 1;

    let next_chunk = loop {
        let candidate = match geometry.next_chunk_range(request, last_chunk)? {
            Some(c) => c,
            None => break None,
        };
        if candidate.start >= index_range.end {
            break Some(candidate.start);
        }

        let candidate_last = candidate.end - 1;
        let next_end_pos = lut.end_offset(candidate_last);
        if next_end_pos < end_pos {
            return Err(OmCoreError::CorruptLut {
                reason: format!(
                    "chunk {candidate_last} end offset {next_end_pos} precedes chunk {last_chunk} end offset {end_pos}"
                ),
            });
        }
        let span = next_end_pos - start_pos;
        let gap = lut.start_offset(candidate.start) - end_pos;
        if span <= io.max || gap <= io.merge {
            last_chunk = candidate_last;
            end_pos = next_end_pos;
        } else {
            break Some(candidate.start);
        }
    };

    Ok(DataReadPlan {
        offset: data_start + start_pos,
        count: end_pos - start_pos,
        first_chunk: current.start,
        last_chunk,
        next_chunk,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geom(dims: &[u64], chunks: &[u64]) -> ChunkGeometry {
        ChunkGeometry::new(dims.to_vec(), chunks.to_vec()).unwrap()
    }

    // dims=[4,4], chunks=[1,1], reading cols 1..3 of every row: first_chunk_range
    // yields four separate two-chunk runs (1..3, 5..7, 9..11, 13..15) since the
    // fastest dimension's window is partial. Good fodder for merge-or-stop tests.
    fn column_slice_fixture() -> (ChunkGeometry, ReadRequest) {
        let g = geom(&[4, 4], &[1, 1]);
        let req = ReadRequest::new(vec![0, 1], vec![4, 2]);
        (g, req)
    }

    #[test]
    fn first_four_runs_are_as_expected() {
        let (g, req) = column_slice_fixture();
        let mut range = g.first_chunk_range(&req).unwrap();
        let mut runs = vec![range.clone()];
        while let Some(next) = g.next_chunk_range(&req, range.end - 1).unwrap() {
            runs.push(next.clone());
            range = next;
        }
        assert_eq!(runs, vec![1..3, 5..7, 9..11, 13..15]);
    }

    #[test]
    fn index_planner_requires_both_thresholds() {
        let (g, req) = column_slice_fixture();
        let first = g.first_chunk_range(&req).unwrap(); // 1..3

        // gap to the next run is (5-3)*8 = 16 bytes; merged range 1..7 costs
        // (7-1+1)*8 = 56 bytes (leading slot since it doesn't start at chunk 0).
        let fits = IoSizes { merge: 16, max: 56 };
        let plan = plan_index_read(&g, &req, &fits, 0, first.clone()).unwrap();
        assert_eq!(plan.index_range, 1..7);
        assert_eq!(plan.next_chunk, Some(9));

        let gap_too_big = IoSizes { merge: 15, max: 56 };
        let plan = plan_index_read(&g, &req, &gap_too_big, 0, first).unwrap();
        assert_eq!(plan.index_range, 1..3);
        assert_eq!(plan.next_chunk, Some(5));
    }

    #[test]
    fn index_planner_stops_once_merged_bytes_exceed_max() {
        let (g, req) = column_slice_fixture();
        let merged_once = 1..7; // as produced above
        let io = IoSizes { merge: 16, max: 56 };
        let plan = plan_index_read(&g, &req, &io, 100, merged_once).unwrap();
        // next run 9..11 is reachable by gap but 1..11 costs (11-1+1)*8=88 > 56
        assert_eq!(plan.index_range, 1..7);
        assert_eq!(plan.next_chunk, Some(9));
        assert_eq!(plan.offset, 100); // lut_start + (1-1)*8
        assert_eq!(plan.count, 56);
    }

    #[test]
    fn lut_addressing_with_and_without_leading_slot() {
        // chunks 0..3, entries are cumulative end offsets 10, 25, 40
        let entries = [10u64, 25, 40];
        let lut = Lut::new(&entries, 0..3);
        assert_eq!(lut.start_offset(0), 0);
        assert_eq!(lut.end_offset(0), 10);
        assert_eq!(lut.start_offset(1), 10);
        assert_eq!(lut.end_offset(2), 40);

        // same chunks but the index range started at 2, so entries[0] is the
        // leading slot recovering chunk 1's end (== chunk 2's start).
        let entries = [25u64, 40];
        let lut = Lut::new(&entries, 2..3);
        assert_eq!(lut.start_offset(2), 25);
        assert_eq!(lut.end_offset(2), 40);
    }

    // LUT entries for the 16 chunks of the 4x4/1x1 fixture, each chunk a
    // uniform 10 bytes, so chunk k ends at (k+1)*10.
    fn uniform_lut_entries() -> Vec<u64> {
        (1..=16).map(|k| k * 10).collect()
    }

    #[test]
    fn data_planner_stops_when_both_thresholds_fail() {
        let (g, req) = column_slice_fixture();
        let entries = uniform_lut_entries();
        let lut = Lut::new(&entries, 0..16);
        // current run 1..3: bytes [10,30). Next run starts at chunk 5: gap =
        // start(5)-end(2) = end(4)-30 = 50-30 = 20; merged span = end(6)-10 = 60.
        let io = IoSizes { merge: 19, max: 59 };
        let plan = plan_data_read(&g, &req, &io, &lut, &(0..16), 0, 1..3).unwrap();
        assert_eq!(plan.first_chunk, 1);
        assert_eq!(plan.last_chunk, 2);
        assert_eq!(plan.offset, 10);
        assert_eq!(plan.count, 20);
        assert_eq!(plan.next_chunk, Some(5));
    }

    #[test]
    fn data_planner_merges_across_a_gap_when_either_threshold_holds() {
        let (g, req) = column_slice_fixture();
        let entries = uniform_lut_entries();
        let lut = Lut::new(&entries, 0..16);
        // same gap (20) and span (60) as above, but this time the gap alone clears merge.
        let io = IoSizes { merge: 20, max: 0 };
        let plan = plan_data_read(&g, &req, &io, &lut, &(0..16), 1000, 1..3).unwrap();
        assert_eq!(plan.last_chunk, 6);
        assert_eq!(plan.offset, 1000 + 10);
        assert_eq!(plan.count, 60);
    }

    #[test]
    fn data_planner_bounded_by_the_fetched_index_range() {
        let (g, req) = column_slice_fixture();
        let entries = uniform_lut_entries();
        // caller only fetched LUT entries for chunks 0..7: runs beyond that
        // cannot be folded in even if the thresholds would otherwise allow it.
        let lut = Lut::new(&entries[..7], 0..7);
        let io = IoSizes {
            merge: u64::MAX,
            max: u64::MAX,
        };
        let plan = plan_data_read(&g, &req, &io, &lut, &(0..7), 0, 1..3).unwrap();
        assert_eq!(plan.last_chunk, 6);
        assert_eq!(plan.next_chunk, Some(9));
    }

    #[test]
    fn non_monotonic_lut_is_corrupt() {
        let g = geom(&[2], &[1]);
        let req = ReadRequest::new(vec![0], vec![2]);
        let entries = [10u64, 5];
        let lut = Lut::new(&entries, 0..2);
        let io = IoSizes::default();
        let err = plan_data_read(&g, &req, &io, &lut, &(0..2), 0, 0..2).unwrap_err();
        assert!(matches!(err, OmCoreError::CorruptLut { .. }));
    }
}
