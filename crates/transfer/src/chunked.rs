use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::types::Chunk;
use crate::{DEFAULT_CHUNK_COPY_SIZE, TransferError};

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// Byte range of one chunk within the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Splits a file of known size into fixed-size chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    /// Creates a plan. `chunk_size` must be non-zero.
    pub fn new(file_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidSpec("chunk size must be > 0".into()));
        }
        Ok(Self {
            file_size,
            chunk_size,
        })
    }

    /// Number of chunks. An empty file still travels as one empty chunk.
    pub fn total_chunks(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size).max(1)
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Range of chunk `index`; past-the-end indices yield an empty range.
    pub fn range(&self, index: u64) -> ChunkRange {
        let offset = index.saturating_mul(self.chunk_size);
        let len = self.chunk_size.min(self.file_size.saturating_sub(offset));
        ChunkRange { index, offset, len }
    }

    /// All ranges in index order.
    pub fn ranges(&self) -> impl Iterator<Item = ChunkRange> {
        let plan = *self;
        (0..plan.total_chunks()).map(move |i| plan.range(i))
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads arbitrary byte ranges of a file without loading the whole file.
///
/// Reads proceed in bounded copy steps so a large chunk never needs more
/// than one allocation of its own size.
pub struct ChunkReader {
    file: std::fs::File,
    path: PathBuf,
    file_size: u64,
    copy_size: usize,
}

impl ChunkReader {
    /// Opens `path` for range reads.
    ///
    /// If `copy_size` is 0, [`DEFAULT_CHUNK_COPY_SIZE`] (1 MiB) is used.
    pub fn open(path: &Path, copy_size: usize) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let file_size = file.metadata()?.len();
        let copy_size = if copy_size == 0 {
            DEFAULT_CHUNK_COPY_SIZE
        } else {
            copy_size
        };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            file_size,
            copy_size,
        })
    }

    /// Total file size in bytes, as seen when opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Reads up to `length` bytes starting at `offset`.
    ///
    /// Stops at end-of-file; an `offset` past the end returns no bytes.
    /// Fails with [`TransferError::ShortRead`] if fewer bytes than the
    /// file size promised could be read.
    pub fn read_range(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, TransferError> {
        let expected = length.min(self.file_size.saturating_sub(offset));
        if expected == 0 {
            return Ok(Vec::new());
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut out = Vec::with_capacity(expected as usize);
        let mut step = vec![0u8; self.copy_size.min(expected as usize)];

        while (out.len() as u64) < expected {
            let want = step.len().min((expected - out.len() as u64) as usize);
            let n = self.file.read(&mut step[..want])?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&step[..n]);
        }

        if (out.len() as u64) != expected {
            return Err(TransferError::ShortRead {
                path: self.path.clone(),
                offset,
                expected,
                actual: out.len() as u64,
            });
        }
        Ok(out)
    }

    /// Reads the chunk described by `range`.
    pub fn read_chunk(&mut self, range: ChunkRange) -> Result<Chunk, TransferError> {
        let data = self.read_range(range.offset, range.len)?;
        Ok(Chunk {
            index: range.index,
            offset: range.offset,
            data,
        })
    }
}

/// One-shot range read: opens `path`, reads, closes.
pub fn read_range(
    path: &Path,
    offset: u64,
    length: u64,
    copy_size: usize,
) -> Result<Vec<u8>, TransferError> {
    ChunkReader::open(path, copy_size)?.read_range(offset, length)
}
