//! Input splitting: carve a data set into worker-exclusive chunks.
//!
//! A splitter produces at most `nchunk` disjoint chunks per run; fewer are
//! allowed when the data set is small. Chunks are lazy ordered sequences of
//! records, traversed exactly once by the worker that owns them.

use memchr::memchr;
use tracing::debug;

/// Error reported by a failed split. The built-in splitters never fail;
/// custom (e.g. IO-backed) splitters surface their failures here and the
/// runtime aborts the run.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct SplitError(pub String);

/// Carves an input data set into worker-exclusive chunks.
pub trait Splitter {
    /// Ordered sequence of records owned by one worker.
    type Chunk: IntoIterator + Send;

    /// Split into at most `nchunk` chunks. Zero requested chunks is valid
    /// and produces none.
    fn split(&mut self, nchunk: usize) -> Result<(), SplitError>;

    /// Number of chunks produced by the most recent `split`.
    fn size(&self) -> usize;

    /// The n-th chunk of the most recent `split`.
    fn chunk(&self, n: usize) -> Self::Chunk;
}

/// Splits a flat record slice into contiguous ranges of about
/// `ceil(len / nchunk)` records; the final range absorbs the remainder.
pub struct ArraySplitter<'a, T> {
    records: &'a [T],
    segments: Vec<&'a [T]>,
}

impl<'a, T> ArraySplitter<'a, T> {
    pub fn new(records: &'a [T]) -> Self {
        Self {
            records,
            segments: Vec::new(),
        }
    }
}

impl<'a, T: Sync> Splitter for ArraySplitter<'a, T> {
    type Chunk = &'a [T];

    fn split(&mut self, nchunk: usize) -> Result<(), SplitError> {
        self.segments.clear();
        if nchunk == 0 {
            return Ok(());
        }
        let per = self.records.len().div_ceil(nchunk).max(1);
        self.segments.extend(self.records.chunks(per));
        debug!(
            records = self.records.len(),
            per_chunk = per,
            chunks = self.segments.len(),
            "array split"
        );
        Ok(())
    }

    fn size(&self) -> usize {
        self.segments.len()
    }

    fn chunk(&self, n: usize) -> &'a [T] {
        self.segments[n]
    }
}

/// Splits a byte buffer into segments cut at the nearest newline at or
/// after each `step = ceil(len / nchunk)` stride. Segments exclude the
/// boundary newline; the tail of the buffer may be unterminated.
pub struct TextSplitter<'a> {
    text: &'a [u8],
    segments: Vec<&'a [u8]>,
}

impl<'a> TextSplitter<'a> {
    pub fn new(text: &'a [u8]) -> Self {
        Self {
            text,
            segments: Vec::new(),
        }
    }
}

impl<'a> Splitter for TextSplitter<'a> {
    type Chunk = TextChunk<'a>;

    fn split(&mut self, nchunk: usize) -> Result<(), SplitError> {
        self.segments.clear();
        if nchunk == 0 {
            return Ok(());
        }
        let step = self.text.len().div_ceil(nchunk).max(1);
        debug!(total = self.text.len(), step, "text split");
        let mut p = 0;
        while p < self.text.len() {
            let probe = p + step;
            let cut = if probe >= self.text.len() {
                None
            } else {
                memchr(b'\n', &self.text[probe..]).map(|off| probe + off)
            };
            match cut {
                Some(q) => {
                    debug!(start = p, end = q, "text segment");
                    self.segments.push(&self.text[p..q]);
                    p = q + 1;
                }
                None => {
                    debug!(start = p, end = self.text.len(), "text segment");
                    self.segments.push(&self.text[p..]);
                    break;
                }
            }
        }
        Ok(())
    }

    fn size(&self) -> usize {
        self.segments.len()
    }

    fn chunk(&self, n: usize) -> TextChunk<'a> {
        TextChunk {
            rest: self.segments[n],
        }
    }
}

/// One text segment, yielding newline-delimited records lazily. The last
/// record of the last chunk need not be newline-terminated.
#[derive(Clone, Copy)]
pub struct TextChunk<'a> {
    rest: &'a [u8],
}

impl<'a> IntoIterator for TextChunk<'a> {
    type Item = &'a [u8];
    type IntoIter = TextRecords<'a>;

    fn into_iter(self) -> TextRecords<'a> {
        TextRecords { rest: self.rest }
    }
}

/// Record iterator over a [`TextChunk`].
pub struct TextRecords<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for TextRecords<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        match memchr(b'\n', self.rest) {
            Some(i) => {
                let line = &self.rest[..i];
                self.rest = &self.rest[i + 1..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = &self.rest[..0];
                Some(line)
            }
        }
    }
}
