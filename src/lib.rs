//! Read path for the chunked, compressed, N-dimensional array file format:
//! a header/trailer parser, chunk-space geometry, an index-read and a
//! data-read planner that coalesce I/O, a per-chunk decoder, and the
//! `OmFileReader` session that ties them together.
//!
//! ```text
//! backend (ByteSource) -> header -> geometry -> planner -> decoder -> session
//! ```
//!
//! Encoding is out of scope; the only writer-shaped code lives under
//! `tests/` as a fixture builder.

pub mod backend;
pub mod codec;
pub mod decoder;
pub mod delta2d;
pub mod errors;
pub mod geometry;
pub mod header;
pub mod planner;
pub mod session;

pub use backend::{ByteSource, InMemoryBackend, MmapBackend};
pub use codec::{Codec, ZigzagDeltaCodec};
pub use errors::OmCoreError;
pub use geometry::{ChunkGeometry, ReadRequest};
pub use header::{ArrayMetadata, CompressionKind, LutLayout};
pub use planner::IoSizes;
pub use session::OmFileReader;
